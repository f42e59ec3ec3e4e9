// Copyright (c) The Corio Project Authors.
// Licensed under the MIT License.

use std::cell::{Cell, RefCell};
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll, Waker};

use crate::error::Error;
use crate::event_loop::{EventLoop, LoopRef};

/// Object-safe driving interface implemented by [`Task`], so an [`EventLoop`] can hold a
/// registry of `Rc<dyn Steppable>` keyed by task id without being generic over every task's
/// output type (spec §5 "cross-thread wakeup"). The event loop's registry entry is the task's
/// strong owner: a spawned task keeps running even if the caller drops its [`Task`] handle, and
/// is only dropped once it finishes and unregisters itself.
pub(crate) trait Steppable {
    fn step(&self);
}

/// Tracks whether a task has finished and how, independently of whether its result value has
/// been taken yet (spec §4.4's `is_done`/cancellation checks must remain valid after
/// [`Task::take_result`] consumes the value).
#[derive(Clone, Copy, PartialEq, Eq)]
enum Terminal {
    Pending,
    Succeeded,
    Failed,
    Cancelled,
}

/// A coroutine driven to completion by repeated polling, per spec §4.4 "Task".
///
/// A `Task<T>` wraps an arbitrary boxed [`std::future::Future`], polling it on its owning loop
/// whenever scheduled. Suspension points are ordinary `.await`s; this crate's own
/// [`Future`][crate::Future] type is the vehicle by which `corio_io`/`corio_http` code suspends a
/// task until a readiness callback or a completed executor job fires.
///
/// Cancellation is necessarily less fine-grained than the generator-based original: Rust's
/// `Future` trait has no equivalent of throwing an exception into a suspended generator, so
/// `cancel()` finalizes the task as [`Error::Cancelled`] at its next scheduled step rather than
/// at its current await point specifically. In practice this is the same observable outcome,
/// since a cancelled task never runs further task-owned code either way.
pub struct Task<T> {
    inner: Rc<TaskInner<T>>,
}

struct TaskInner<T> {
    loop_ref: LoopRef,
    id: u64,
    future: RefCell<Option<Pin<Box<dyn std::future::Future<Output = T>>>>>,
    terminal: Cell<Terminal>,
    result: RefCell<Option<crate::Result<T>>>,
    cancel_requested: Cell<Option<Option<String>>>,
    scheduled: Cell<bool>,
    join_waker: RefCell<Option<Waker>>,
}

impl<T: 'static> Task<T> {
    pub(crate) fn spawn<Fut>(event_loop: &EventLoop, future: Fut) -> Self
    where
        Fut: std::future::Future<Output = T> + 'static,
    {
        let id = event_loop.next_task_id();
        let inner = Rc::new(TaskInner {
            loop_ref: event_loop.loop_ref(),
            id,
            future: RefCell::new(Some(Box::pin(future))),
            terminal: Cell::new(Terminal::Pending),
            result: RefCell::new(None),
            cancel_requested: Cell::new(None),
            scheduled: Cell::new(false),
            join_waker: RefCell::new(None),
        });

        let steppable: Rc<dyn Steppable> = Rc::clone(&inner) as Rc<dyn Steppable>;
        event_loop.register_task(id, steppable);

        let task = Self { inner };
        task.schedule();
        task
    }

    /// Requests cancellation. A no-op, returning `false`, if the task has already completed
    /// (spec §4.4 "Cancellation").
    pub fn cancel(&self, reason: Option<String>) -> bool {
        if self.inner.terminal.get() != Terminal::Pending {
            return false;
        }
        self.inner.cancel_requested.set(Some(reason));
        self.schedule();
        true
    }

    /// Returns whether the task has completed, successfully, exceptionally, or by cancellation.
    #[must_use]
    pub fn is_done(&self) -> bool {
        self.inner.terminal.get() != Terminal::Pending
    }

    /// Returns whether the task's terminal state is cancellation. Valid even after
    /// [`Task::take_result`] has taken the value.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.inner.terminal.get() == Terminal::Cancelled
    }

    /// Returns whether the task completed successfully (neither cancelled nor failed with an
    /// exception). Valid even after [`Task::take_result`] has taken the value.
    #[must_use]
    pub fn is_successful(&self) -> bool {
        self.inner.terminal.get() == Terminal::Succeeded
    }

    /// Returns whether this `Task` and `other` refer to the same underlying task.
    #[must_use]
    pub fn is_same_task(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    /// Returns a future that resolves to `()` once this task is done, without consuming its
    /// result. Used by [`TaskGroup`][crate::TaskGroup]'s waiter futures, which need a
    /// completion signal but must leave the result for the caller to retrieve separately.
    pub fn wait(&self) -> impl std::future::Future<Output = ()> + 'static {
        let inner = Rc::clone(&self.inner);
        std::future::poll_fn(move |cx| {
            if inner.terminal.get() == Terminal::Pending {
                *inner.join_waker.borrow_mut() = Some(cx.waker().clone());
                Poll::Pending
            } else {
                Poll::Ready(())
            }
        })
    }

    /// Takes the task's result if it has completed. Like
    /// [`Future::get_result`][crate::Future::get_result], this consumes the stored value; later
    /// callers see `None`.
    pub fn take_result(&self) -> Option<crate::Result<T>> {
        self.inner.result.borrow_mut().take()
    }

    fn schedule(&self) {
        if self.inner.scheduled.replace(true) {
            return;
        }

        let inner = Rc::clone(&self.inner);
        self.inner.loop_ref.call_soon(move || inner.step());
    }

    /// Consumes the task, panicking unless it completed successfully. Used by
    /// [`EventLoop::block_on`][crate::EventLoop::block_on], whose top-level future is not expected
    /// to be cancelled out from under the blocking caller.
    pub(crate) fn into_inner_result(self) -> T {
        self.inner
            .result
            .borrow_mut()
            .take()
            .expect("into_inner_result called before the task completed")
            .unwrap_or_else(|error| panic!("top-level task failed: {error}"))
    }
}

impl<T: 'static> TaskInner<T> {
    fn step(&self) {
        if self.terminal.get() != Terminal::Pending {
            return;
        }
        self.scheduled.set(false);

        if let Some(reason) = self.cancel_requested.take() {
            self.finish(Err(Error::Cancelled(reason)));
            return;
        }

        let waker = self.loop_ref.cross_thread_waker(self.id);
        let mut cx = Context::from_waker(&waker);

        let mut slot = self.future.borrow_mut();
        let Some(future) = slot.as_mut() else {
            return;
        };

        match future.as_mut().poll(&mut cx) {
            Poll::Ready(value) => {
                drop(slot);
                self.future.borrow_mut().take();
                self.finish(Ok(value));
            }
            Poll::Pending => {}
        }
    }

    fn finish(&self, result: crate::Result<T>) {
        self.terminal.set(match &result {
            Ok(_) => Terminal::Succeeded,
            Err(error) if error.is_cancelled() => Terminal::Cancelled,
            Err(_) => Terminal::Failed,
        });
        *self.result.borrow_mut() = Some(result);
        self.loop_ref.unregister_task(self.id);

        if let Some(waker) = self.join_waker.borrow_mut().take() {
            waker.wake();
        }
    }
}

impl<T: 'static> Steppable for TaskInner<T> {
    fn step(&self) {
        Self::step(self);
    }
}

impl<T> Clone for Task<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<T: 'static> std::future::Future for Task<T> {
    type Output = crate::Result<T>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        if self.inner.terminal.get() == Terminal::Pending {
            *self.inner.join_waker.borrow_mut() = Some(cx.waker().clone());
            return Poll::Pending;
        }

        self.inner.result.borrow_mut().take().map_or_else(
            || {
                Poll::Ready(Err(Error::InvalidState(
                    "task result was already retrieved".into(),
                )))
            },
            Poll::Ready,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::EventLoop;

    #[test]
    fn task_runs_to_completion() {
        let event_loop = EventLoop::new();
        let task = event_loop.create_task(async { 1 + 1 });

        while !task.is_done() {
            event_loop.run_main_iteration();
        }

        assert_eq!(task.take_result().unwrap().unwrap(), 2);
    }

    #[test]
    fn cancel_before_first_step_finishes_as_cancelled() {
        let event_loop = EventLoop::new();
        let task = event_loop.create_task(std::future::pending::<()>());

        assert!(task.cancel(Some("shutdown".into())));
        while !task.is_done() {
            event_loop.run_main_iteration();
        }

        assert!(task.is_cancelled());
    }

    #[test]
    fn task_suspends_on_awaited_future_and_resumes_when_resolved() {
        let event_loop = EventLoop::new();
        let future = event_loop.create_future::<u32>();
        let future_for_task = future.clone();

        let task = event_loop.create_task(async move { future_for_task.await.unwrap() * 2 });

        event_loop.run_main_iteration();
        assert!(!task.is_done());

        future.set_result(5).unwrap();
        while !task.is_done() {
            event_loop.run_main_iteration();
        }

        assert_eq!(task.take_result().unwrap().unwrap(), 10);
    }

    #[test]
    fn is_cancelled_remains_valid_after_take_result() {
        let event_loop = EventLoop::new();
        let task = event_loop.create_task(std::future::pending::<()>());
        task.cancel(None);

        while !task.is_done() {
            event_loop.run_main_iteration();
        }

        let _ = task.take_result();
        assert!(task.is_cancelled());
    }
}
