// Copyright (c) The Corio Project Authors.
// Licensed under the MIT License.

//! The Corio Runtime: a single-threaded, cooperative event loop with timers, I/O readiness
//! dispatch, a thread-pool executor for blocking work, and the `Future`/`Task` primitives built
//! on top of it.
//!
//! - [`EventLoop`]. The scheduler: ready queue, timer heap, selector, self-pipe, executor.
//! - [`Future`]. A one-shot, loop-bound promise, awaitable directly inside an `async fn`.
//! - [`Task`]. Drives an arbitrary `async fn` body to completion on its owning loop.
//! - [`TaskGroup`]. Waits across a set of tasks sharing one output type.
//! - [`TimeoutScope`]. Bounds a task to a deadline, rewriting cancellation to a timeout error.
//! - [`Handle`] / [`TimerHandle`] / [`TimerWeakHandle`]. The one-shot callables scheduled by an
//!   event loop.
//!
//! # Thread affinity
//!
//! Every type above except [`EventLoopHandle`] is `!Send`: an [`EventLoop`] is pinned to the
//! thread that built it. Code on other threads interacts with a running loop only through
//! [`EventLoop::handle`].

mod error;
mod event_loop;
mod executor;
mod future;
mod handle;
mod non_blocking_thread;
mod task;
mod task_group;
mod timeout;

pub use error::{Error, Result};
pub use event_loop::{EventLoop, EventLoopBuilder, EventLoopHandle};
pub use future::Future;
pub use handle::{Handle, TimerHandle, TimerWeakHandle};
pub use task::Task;
pub use task_group::TaskGroup;
pub use timeout::TimeoutScope;

#[cfg(feature = "macros")]
pub use corio_macros::{main, test};
