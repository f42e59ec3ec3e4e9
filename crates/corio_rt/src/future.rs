// Copyright (c) The Corio Project Authors.
// Licensed under the MIT License.

use std::cell::{Cell, RefCell};
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll, Waker};

use crate::error::Error;
use crate::event_loop::LoopRef;

/// A one-shot, `!Send` promise bound to a single [`EventLoop`][crate::EventLoop] (spec §4.3
/// "Future").
///
/// `Future<T>` is both a manually-driven promise (`set_result`/`set_exception`/`cancel`,
/// `add_done_callback`) and a standard [`std::future::Future`], so it can be awaited directly
/// inside an `async fn` driven by a [`Task`][crate::Task]. Awaiting it is the handshake by which
/// a task driver identifies a suspension point (spec §4.3 "Iteration contract").
///
/// Unlike the dynamic-language original, a completed `Future<T>`'s value is taken exactly once:
/// the first caller to observe it (via [`Future::get_result`] or by polling it to completion)
/// consumes the stored `Result<T, Error>`. Later observers see [`Error::InvalidState`]. This
/// mirrors ownership rather than reference semantics and is the one place this crate's `Future`
/// intentionally diverges from repeatable-read `get_result()` calls.
pub struct Future<T> {
    inner: Rc<Inner<T>>,
}

struct Inner<T> {
    loop_ref: LoopRef,
    slot: RefCell<Slot<T>>,
    waker: RefCell<Option<Waker>>,
    done_callbacks: RefCell<Vec<Box<dyn FnOnce()>>>,
    retrieved: Cell<bool>,
    silenced: Cell<bool>,
    cancelled: Cell<bool>,
}

enum Slot<T> {
    Pending,
    Done(Option<std::result::Result<T, Error>>),
}

impl<T> Slot<T> {
    const fn is_pending(&self) -> bool {
        matches!(self, Self::Pending)
    }
}

impl<T: 'static> Future<T> {
    pub(crate) fn new(loop_ref: LoopRef) -> Self {
        Self {
            inner: Rc::new(Inner {
                loop_ref,
                slot: RefCell::new(Slot::Pending),
                waker: RefCell::new(None),
                done_callbacks: RefCell::new(Vec::new()),
                retrieved: Cell::new(false),
                silenced: Cell::new(false),
                cancelled: Cell::new(false),
            }),
        }
    }

    /// Creates an already-resolved future, useful for protocol and transport code that must
    /// return a future-shaped result synchronously.
    #[must_use]
    pub(crate) fn ready(loop_ref: LoopRef, value: std::result::Result<T, Error>) -> Self {
        let future = Self::new(loop_ref);
        future.resolve(value);
        future
    }

    /// Resolves the future with a success value. Errors if the future is already done (spec
    /// §4.3 "setters have a pair `set_X`/`set_X_if_pending`").
    pub fn set_result(&self, value: T) -> crate::Result<()> {
        self.set(Ok(value))
    }

    /// As [`Future::set_result`], but silently does nothing if the future is already done.
    pub fn set_result_if_pending(&self, value: T) {
        let _ = self.set_if_pending(Ok(value));
    }

    /// Resolves the future with an exception. Errors if the future is already done.
    pub fn set_exception(&self, error: Error) -> crate::Result<()> {
        self.set(Err(error))
    }

    /// As [`Future::set_exception`], but silently does nothing if the future is already done.
    pub fn set_exception_if_pending(&self, error: Error) {
        let _ = self.set_if_pending(Err(error));
    }

    /// Cancels the future if it is still pending. Returns whether the cancellation took effect.
    pub fn cancel(&self, reason: Option<String>) -> bool {
        self.set_if_pending(Err(Error::Cancelled(reason))).is_ok()
    }

    /// Returns whether the future has transitioned out of `pending`.
    #[must_use]
    pub fn is_done(&self) -> bool {
        !self.inner.slot.borrow().is_pending()
    }

    /// Returns whether the future's terminal state is cancellation. Valid even after
    /// [`Future::get_result`] has taken the value.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.get()
    }

    /// Takes and returns the result, re-raising a stored exception. Raises
    /// [`Error::InvalidState`] if the future is still pending or its result was already taken by
    /// an earlier observer.
    pub fn get_result(&self) -> crate::Result<T> {
        self.inner.retrieved.set(true);

        let mut slot = self.inner.slot.borrow_mut();
        match &mut *slot {
            Slot::Pending => Err(Error::InvalidState("future result is still pending".into())),
            Slot::Done(taken @ Some(_)) => taken.take().unwrap(),
            Slot::Done(None) => Err(Error::InvalidState(
                "future result was already retrieved".into(),
            )),
        }
    }

    /// Suppresses the "un-observed exception" log that would otherwise fire when a done future
    /// carrying an exception is dropped without its result ever being retrieved.
    pub fn silence(&self) {
        self.inner.silenced.set(true);
    }

    /// Registers `callback` to run once this future is done. If it is already done, the callback
    /// is scheduled on the next ready cycle immediately (spec §4.3 "Callback dispatch").
    pub fn add_done_callback(&self, callback: impl FnOnce() + 'static) {
        if self.inner.slot.borrow().is_pending() {
            self.inner.done_callbacks.borrow_mut().push(Box::new(callback));
        } else {
            self.inner.loop_ref.call_soon(callback);
        }
    }

    fn set(&self, value: std::result::Result<T, Error>) -> crate::Result<()> {
        if !self.inner.slot.borrow().is_pending() {
            return Err(Error::InvalidState(
                "cannot set a result on a future that is already done".into(),
            ));
        }
        self.resolve(value);
        Ok(())
    }

    fn set_if_pending(&self, value: std::result::Result<T, Error>) -> crate::Result<()> {
        if !self.inner.slot.borrow().is_pending() {
            return Err(Error::InvalidState("future is already done".into()));
        }
        self.resolve(value);
        Ok(())
    }

    fn resolve(&self, value: std::result::Result<T, Error>) {
        if matches!(&value, Err(error) if error.is_cancelled()) {
            self.inner.cancelled.set(true);
        }
        *self.inner.slot.borrow_mut() = Slot::Done(Some(value));

        if let Some(waker) = self.inner.waker.borrow_mut().take() {
            waker.wake();
        }

        let callbacks = std::mem::take(&mut *self.inner.done_callbacks.borrow_mut());
        for callback in callbacks {
            self.inner.loop_ref.call_soon(callback);
        }
    }
}

impl<T> Clone for Future<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<T: 'static> std::future::Future for Future<T> {
    type Output = crate::Result<T>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        if self.inner.slot.borrow().is_pending() {
            *self.inner.waker.borrow_mut() = Some(cx.waker().clone());
            return Poll::Pending;
        }

        Poll::Ready(self.get_result())
    }
}

impl<T> Drop for Inner<T> {
    fn drop(&mut self) {
        if self.silenced.get() || self.retrieved.get() {
            return;
        }

        if let Slot::Done(Some(Err(error))) = &*self.slot.borrow() {
            if !error.is_cancelled() {
                tracing::error!(error = %error, "future dropped with an un-retrieved exception");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::EventLoop;

    #[test]
    fn set_result_then_get_result_round_trips() {
        let event_loop = EventLoop::new();
        let future = event_loop.create_future::<u32>();

        future.set_result(7).unwrap();
        assert!(future.is_done());
        assert_eq!(future.get_result().unwrap(), 7);
    }

    #[test]
    fn setting_result_twice_errors() {
        let event_loop = EventLoop::new();
        let future = event_loop.create_future::<u32>();

        future.set_result(1).unwrap();
        assert!(future.set_result(2).is_err());
    }

    #[test]
    fn cancel_is_observed_as_cancelled_error() {
        let event_loop = EventLoop::new();
        let future = event_loop.create_future::<u32>();

        assert!(future.cancel(Some("shutting down".into())));
        let error = future.get_result().unwrap_err();
        assert!(error.is_cancelled());
    }

    #[test]
    fn done_callback_on_pending_future_runs_next_iteration() {
        let event_loop = EventLoop::new();
        let future = event_loop.create_future::<u32>();
        let ran = Rc::new(Cell::new(false));
        let ran_clone = Rc::clone(&ran);

        future.add_done_callback(move || ran_clone.set(true));
        future.set_result(1).unwrap();
        assert!(!ran.get());

        event_loop.run_main_iteration();
        assert!(ran.get());
    }

    #[test]
    fn done_callback_on_already_done_future_is_scheduled_immediately() {
        let event_loop = EventLoop::new();
        let future = event_loop.create_future::<u32>();
        future.set_result(1).unwrap();

        let ran = Rc::new(Cell::new(false));
        let ran_clone = Rc::clone(&ran);
        future.add_done_callback(move || ran_clone.set(true));

        event_loop.run_main_iteration();
        assert!(ran.get());
    }
}
