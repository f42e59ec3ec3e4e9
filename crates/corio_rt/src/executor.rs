// Copyright (c) The Corio Project Authors.
// Licensed under the MIT License.

use threadpool::ThreadPool;

use crate::error::Error;
use crate::event_loop::EventLoop;
use crate::future::Future;

/// Bridges blocking work onto a bounded thread pool, returning loop-bound futures for the
/// result (spec §4.1 `run_in_executor`, §5 "Executor").
///
/// Workers never touch `Rc`-based state: a job's result is handed back over a [`oneshot`]
/// channel, and the receiving end is polled only from the owning loop's thread, inside a
/// [`Task`][crate::Task] the event loop keeps alive in its own task registry until it completes.
/// This keeps every mutation of `Future`/`Task` state on the loop thread, matching spec §5's
/// locking discipline without requiring `unsafe`.
pub(crate) struct Executor {
    pool: ThreadPool,
}

impl Executor {
    pub(crate) fn new(min_threads: usize) -> Self {
        Self {
            pool: ThreadPool::new(min_threads.max(1)),
        }
    }

    pub(crate) fn spawn_blocking<F, T>(&self, event_loop: &EventLoop, f: F) -> Future<T>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let future = event_loop.create_future::<T>();
        let future_for_bridge = future.clone();
        let (tx, rx) = oneshot::channel::<T>();

        self.pool.execute(move || {
            let _ = tx.send(f());
        });

        // The bridging task is kept alive by the event loop's own task registry, not by this
        // return value, so it keeps running even though nothing retains its `Task` handle.
        let _bridge = event_loop.create_task(async move {
            match rx.recv_async().await {
                Ok(value) => future_for_bridge.set_result_if_pending(value),
                Err(_) => future_for_bridge
                    .set_exception_if_pending(Error::Other(Box::new(ExecutorWorkerLost))),
            }
        });

        future
    }
}

#[derive(Debug, thiserror::Error)]
#[error("executor worker dropped its result sender before completing")]
struct ExecutorWorkerLost;
