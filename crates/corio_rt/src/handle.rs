// Copyright (c) The Corio Project Authors.
// Licensed under the MIT License.

use std::cell::{Cell, RefCell};
use std::cmp::Ordering;
use std::rc::{Rc, Weak};

use corio_time::Instant;

/// A one-shot scheduled callable, as described by spec §3 "Handle".
///
/// Handles are appended to the event loop's ready queue (via
/// [`EventLoop::call_soon`][crate::EventLoop::call_soon]) or produced from a fired [`TimerHandle`].
/// Running a cancelled handle is a no-op, and a handle only ever runs once: the value returned to
/// the caller (for cancellation) and the value enqueued on the loop are clones sharing one
/// reference-counted callback slot.
#[derive(Clone)]
pub struct Handle {
    inner: Rc<HandleInner>,
}

struct HandleInner {
    callback: RefCell<Option<Box<dyn FnOnce()>>>,
    cancelled: Cell<bool>,
}

impl Handle {
    pub(crate) fn new(callback: impl FnOnce() + 'static) -> Self {
        Self {
            inner: Rc::new(HandleInner {
                callback: RefCell::new(Some(Box::new(callback))),
                cancelled: Cell::new(false),
            }),
        }
    }

    /// Cancels the handle. A no-op if the handle has already run.
    pub fn cancel(&self) {
        self.inner.cancelled.set(true);
    }

    /// Returns whether the handle has been cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.get()
    }

    /// Runs the handle's callback exactly once, unless cancelled. Called only by the event loop
    /// that owns this handle, on its own thread.
    pub(crate) fn run(&self) {
        if self.inner.cancelled.get() {
            return;
        }

        if let Some(callback) = self.inner.callback.borrow_mut().take() {
            callback();
        }
    }
}

/// A [`Handle`] additionally ordered by an absolute deadline on the owning loop's monotonic
/// clock, per spec §3 "TimerHandle".
#[derive(Clone)]
pub struct TimerHandle {
    when: Instant,
    sequence: u64,
    handle: Handle,
}

impl TimerHandle {
    pub(crate) fn new(when: Instant, sequence: u64, callback: impl FnOnce() + 'static) -> Self {
        Self {
            when,
            sequence,
            handle: Handle::new(callback),
        }
    }

    /// The absolute instant, on the owning loop's clock, at which this timer is due.
    pub(crate) const fn when(&self) -> Instant {
        self.when
    }

    /// Consumes the `TimerHandle`, returning the plain [`Handle`] to enqueue once the timer has
    /// bubbled to the top of the heap and is due.
    pub(crate) fn into_handle(self) -> Handle {
        self.handle
    }

    /// Cancels the underlying handle; the timer entry is lazily discarded once it bubbles to the
    /// top of the heap (spec §4.1 "Timer policy").
    pub fn cancel(&self) {
        self.handle.cancel();
    }

    /// Returns whether this timer has been cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.handle.is_cancelled()
    }
}

impl PartialEq for TimerHandle {
    fn eq(&self, other: &Self) -> bool {
        self.when == other.when && self.sequence == other.sequence
    }
}

impl Eq for TimerHandle {}

impl PartialOrd for TimerHandle {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for TimerHandle {
    // Reversed so a `BinaryHeap<TimerHandle>` is a min-heap by `when`, FIFO for equal `when`
    // (spec §5 "Ordering": "timers run in `when` order with FIFO for equal `when`").
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .when
            .cmp(&self.when)
            .then_with(|| other.sequence.cmp(&self.sequence))
    }
}

/// A weak variant of a scheduled periodic callback: the callback is held weakly and the timer
/// cancels itself automatically once the callback owner is dropped (spec §3, §9 "Weak
/// callbacks").
#[derive(Clone)]
pub struct TimerWeakHandle<T> {
    owner: Weak<T>,
    cancelled: Rc<Cell<bool>>,
}

impl<T> TimerWeakHandle<T> {
    pub(crate) fn new(owner: &Rc<T>) -> Self {
        Self {
            owner: Rc::downgrade(owner),
            cancelled: Rc::new(Cell::new(false)),
        }
    }

    /// Upgrades the weak reference; treats a collected owner as cancelled.
    pub(crate) fn upgrade(&self) -> Option<Rc<T>> {
        if self.cancelled.get() {
            return None;
        }

        self.owner.upgrade()
    }

    /// Explicitly cancels the handle.
    pub fn cancel(&self) {
        self.cancelled.set(true);
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn handle_runs_once() {
        let count = Rc::new(Cell::new(0));
        let count_clone = Rc::clone(&count);
        let handle = Handle::new(move || count_clone.set(count_clone.get() + 1));

        handle.run();
        handle.run();

        assert_eq!(count.get(), 1);
    }

    #[test]
    fn cancelled_handle_is_noop() {
        let ran = Rc::new(Cell::new(false));
        let ran_clone = Rc::clone(&ran);
        let handle = Handle::new(move || ran_clone.set(true));

        handle.cancel();
        handle.run();

        assert!(!ran.get());
    }

    #[test]
    fn timer_heap_orders_by_when_then_sequence() {
        let base = Instant::now();
        let mut heap = std::collections::BinaryHeap::new();
        heap.push(TimerHandle::new(base + Duration::from_secs(2), 0, || {}));
        heap.push(TimerHandle::new(base + Duration::from_secs(1), 0, || {}));
        heap.push(TimerHandle::new(base + Duration::from_secs(1), 1, || {}));

        let first = heap.pop().unwrap();
        assert_eq!(first.when, base + Duration::from_secs(1));
        assert_eq!(first.sequence, 0);

        let second = heap.pop().unwrap();
        assert_eq!(second.sequence, 1);

        let third = heap.pop().unwrap();
        assert_eq!(third.when, base + Duration::from_secs(2));
    }

    #[test]
    fn weak_timer_handle_cancels_when_owner_dropped() {
        let owner = Rc::new(());
        let weak = TimerWeakHandle::new(&owner);
        drop(owner);

        assert!(weak.upgrade().is_none());
    }
}
