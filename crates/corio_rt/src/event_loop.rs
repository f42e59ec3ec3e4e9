// Copyright (c) The Corio Project Authors.
// Licensed under the MIT License.

use std::cell::{Cell, RefCell};
use std::collections::{BinaryHeap, HashMap, VecDeque};
use std::os::fd::RawFd;
use std::rc::{Rc, Weak};
use std::sync::Arc;
use std::time::Duration;

use corio_io::{Readiness, SelfPipe, Selector};
use corio_time::{Clock, Instant};

use crate::executor::Executor;
use crate::future::Future;
use crate::handle::{Handle, TimerHandle, TimerWeakHandle};
use crate::task::{Steppable, Task};

/// One iteration of [`EventLoop::run_main_iteration`] waits at most this long past a timer's
/// deadline before moving it to the ready queue, per spec §4.1 step 1 ("now + ε").
const TIMER_SLOP: Duration = Duration::from_micros(1);

/// Single-threaded cooperative scheduler, I/O readiness dispatcher, and timer heap (spec §3, §4.1).
///
/// An `EventLoop` is pinned to the thread that created it: [`Future`], [`Task`], and every handle
/// it hands out are `!Send`. Code on other threads interacts with a running loop only through
/// [`EventLoop::handle`], whose [`EventLoopHandle::call_soon_thread_safe`] is the sole
/// cross-thread entry point (spec §5 "Cross-thread contract").
#[derive(Clone)]
pub struct EventLoop {
    pub(crate) shared: Rc<LoopShared>,
}

pub(crate) struct LoopShared {
    ready: RefCell<VecDeque<Handle>>,
    timers: RefCell<BinaryHeap<TimerHandle>>,
    timer_seq: Cell<u64>,
    readers: RefCell<HashMap<RawFd, IoRegistration>>,
    writers: RefCell<HashMap<RawFd, IoRegistration>>,
    selector: Selector,
    self_pipe: SelfPipe,
    clock: Clock,
    pub(crate) executor: Executor,
    pub(crate) cross: Arc<CrossThread>,
    pub(crate) tasks: RefCell<HashMap<u64, Rc<dyn Steppable>>>,
    task_seq: Cell<u64>,
    running: Cell<bool>,
    should_stop: Cell<bool>,
}

struct IoRegistration {
    callback: Rc<dyn Fn()>,
    cancelled: Rc<Cell<bool>>,
}

/// Work crossing from another thread into the loop: either a plain callback registered via
/// [`EventLoopHandle::call_soon_thread_safe`], or a task wakeup (a [`Waker`][std::task::Waker]
/// fired from a different thread, e.g. by an executor worker completing a blocking call).
pub(crate) enum CrossMessage {
    Callback(Box<dyn FnOnce() + Send>),
    WakeTask(u64),
    Stop,
}

/// The cross-thread-safe side of an [`EventLoop`]: a self-pipe writer plus a message channel.
///
/// Every push pairs the enqueue with a wakeup write, so a loop blocked in [`Selector::poll`] never
/// misses a cross-thread submission (spec §5, invariant 6 in spec §8).
pub(crate) struct CrossThread {
    sender: async_channel::Sender<CrossMessage>,
    receiver: async_channel::Receiver<CrossMessage>,
    wakeup: corio_io::SelfPipeWriter,
}

impl CrossThread {
    pub(crate) fn push(&self, message: CrossMessage) {
        // The channel is unbounded, so `try_send` only fails if every receiver was dropped,
        // which happens only after the owning loop itself is gone.
        let _ = self.sender.try_send(message);
        self.wakeup.wake();
    }
}

/// A cheap, `Send + Sync` handle to a running [`EventLoop`], usable from any thread.
#[derive(Clone)]
pub struct EventLoopHandle {
    cross: Arc<CrossThread>,
}

impl EventLoopHandle {
    /// Schedules `callback` to run on the loop's own thread at the start of its next ready-queue
    /// pass. Safe to call from any thread (spec §4.1 `call_soon_thread_safe`).
    pub fn call_soon_thread_safe(&self, callback: impl FnOnce() + Send + 'static) {
        self.cross.push(CrossMessage::Callback(Box::new(callback)));
    }

    /// Requests that the loop stop after draining the current ready-queue pass (spec §4.1
    /// `stop()`). Thread-safe.
    pub fn stop(&self) {
        self.cross.push(CrossMessage::Stop);
    }
}

/// Configuration surface for constructing an [`EventLoop`] (spec §9/§10.3 "EventLoopBuilder").
#[derive(Debug, Clone)]
pub struct EventLoopBuilder {
    clock: Option<Clock>,
    min_executor_threads: usize,
}

impl Default for EventLoopBuilder {
    fn default() -> Self {
        Self {
            clock: None,
            min_executor_threads: 1,
        }
    }
}

impl EventLoopBuilder {
    /// Creates a builder with default settings: the real system clock and a single-worker
    /// executor.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Overrides the clock backing the loop's timers, e.g. with a
    /// [`Clock::with_control`][corio_time::Clock::with_control] fake clock in tests.
    #[must_use]
    pub fn clock(mut self, clock: Clock) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Sets the minimum number of worker threads kept alive by the executor (spec §5
    /// "Executor"). Defaults to `1`.
    #[must_use]
    pub fn min_executor_threads(mut self, count: usize) -> Self {
        self.min_executor_threads = count.max(1);
        self
    }

    /// Builds the event loop. Sets up the selector and self-pipe; panics only if the OS refuses
    /// to hand out the underlying file descriptors.
    #[must_use]
    pub fn build(self) -> EventLoop {
        EventLoop::from_builder(self)
    }
}

impl Default for EventLoop {
    fn default() -> Self {
        Self::new()
    }
}

impl EventLoop {
    /// Creates an event loop with default settings. Equivalent to `EventLoopBuilder::new().build()`.
    #[must_use]
    pub fn new() -> Self {
        EventLoopBuilder::new().build()
    }

    fn from_builder(builder: EventLoopBuilder) -> Self {
        let selector = Selector::new().expect("failed to create OS readiness selector");
        let self_pipe = SelfPipe::new().expect("failed to create self-pipe wakeup socket pair");
        selector
            .register_read(self_pipe.read_fd())
            .expect("failed to register self-pipe with selector");

        let (sender, receiver) = async_channel::unbounded();
        let cross = Arc::new(CrossThread {
            sender,
            receiver,
            wakeup: self_pipe.writer(),
        });

        let shared = Rc::new(LoopShared {
            ready: RefCell::new(VecDeque::new()),
            timers: RefCell::new(BinaryHeap::new()),
            timer_seq: Cell::new(0),
            readers: RefCell::new(HashMap::new()),
            writers: RefCell::new(HashMap::new()),
            selector,
            self_pipe,
            clock: builder.clock.unwrap_or_else(Clock::real),
            executor: Executor::new(builder.min_executor_threads),
            cross,
            tasks: RefCell::new(HashMap::new()),
            task_seq: Cell::new(0),
            running: Cell::new(false),
            should_stop: Cell::new(false),
        });

        Self { shared }
    }

    /// Returns this loop as a [`corio_io::Reactor`], the object-safe registration surface
    /// transports build against (spec §4.6). Cheap: `EventLoop` is itself just a pointer.
    #[must_use]
    pub fn as_reactor(&self) -> Rc<dyn corio_io::Reactor> {
        Rc::new(self.clone())
    }

    /// Returns a `Send + Sync` handle usable to schedule work on this loop from other threads.
    #[must_use]
    pub fn handle(&self) -> EventLoopHandle {
        EventLoopHandle {
            cross: Arc::clone(&self.shared.cross),
        }
    }

    /// Returns the clock backing this loop's timers.
    #[must_use]
    pub fn clock(&self) -> &Clock {
        &self.shared.clock
    }

    pub(crate) fn loop_ref(&self) -> LoopRef {
        LoopRef(Rc::downgrade(&self.shared))
    }

    /// Appends `callback` to the ready queue. Same-thread only (spec §4.1 `call_soon`).
    pub fn call_soon(&self, callback: impl FnOnce() + 'static) -> Handle {
        let handle = Handle::new(callback);
        self.shared.ready.borrow_mut().push_back(handle.clone());
        handle
    }

    /// Schedules `callback` to run once `delay` has elapsed on this loop's clock (spec §4.1
    /// `call_later`).
    pub fn call_later(&self, delay: Duration, callback: impl FnOnce() + 'static) -> TimerHandle {
        let when = self.shared.clock.instant_now() + delay;
        self.call_at(when, callback)
    }

    /// Schedules `callback` to run at the absolute instant `when` on this loop's clock (spec
    /// §4.1 `call_at`).
    pub fn call_at(&self, when: Instant, callback: impl FnOnce() + 'static) -> TimerHandle {
        let sequence = self.shared.timer_seq.get();
        self.shared.timer_seq.set(sequence.wrapping_add(1));

        let timer = TimerHandle::new(when, sequence, callback);
        self.shared.timers.borrow_mut().push(timer.clone());
        timer
    }

    /// As [`EventLoop::call_later`], but `callback` is only invoked while `owner` is still alive
    /// (spec §3 `TimerWeakHandle`, §9 "Weak callbacks").
    pub fn call_later_weak<T: 'static>(
        &self,
        delay: Duration,
        owner: &Rc<T>,
        callback: impl Fn(&Rc<T>) + 'static,
    ) -> TimerWeakHandle<T> {
        let weak = TimerWeakHandle::new(owner);
        let weak_for_timer = weak.clone();
        self.call_later(delay, move || {
            if let Some(owner) = weak_for_timer.upgrade() {
                callback(&owner);
            }
        });
        weak
    }

    /// Registers `callback` to run whenever `fd` becomes readable. Replacing an existing reader
    /// cancels the previous registration (spec §4.1 `add_reader`).
    pub fn add_reader(&self, fd: RawFd, callback: impl Fn() + 'static) {
        self.register_io(fd, callback, true);
    }

    /// Registers `callback` to run whenever `fd` becomes writable (spec §4.1 `add_writer`).
    pub fn add_writer(&self, fd: RawFd, callback: impl Fn() + 'static) {
        self.register_io(fd, callback, false);
    }

    /// Unregisters the reader callback for `fd`. Returns whether one was removed (spec §4.1
    /// `remove_reader`).
    pub fn remove_reader(&self, fd: RawFd) -> bool {
        self.unregister_io(fd, true)
    }

    /// Unregisters the writer callback for `fd` (spec §4.1 `remove_writer`).
    pub fn remove_writer(&self, fd: RawFd) -> bool {
        self.unregister_io(fd, false)
    }

    fn register_io(&self, fd: RawFd, callback: impl Fn() + 'static, read: bool) {
        let registration = IoRegistration {
            callback: Rc::new(callback),
            cancelled: Rc::new(Cell::new(false)),
        };

        let mut map = if read {
            self.shared.readers.borrow_mut()
        } else {
            self.shared.writers.borrow_mut()
        };

        if let Some(previous) = map.insert(fd, registration) {
            previous.cancelled.set(true);
        }
        drop(map);

        let readers_has = self.shared.readers.borrow().contains_key(&fd);
        let writers_has = self.shared.writers.borrow().contains_key(&fd);
        let _ = self.shared.selector.modify(fd, readers_has, writers_has);
    }

    fn unregister_io(&self, fd: RawFd, read: bool) -> bool {
        let mut map = if read {
            self.shared.readers.borrow_mut()
        } else {
            self.shared.writers.borrow_mut()
        };
        let removed = map.remove(fd).inspect(|r| r.cancelled.set(true));
        drop(map);

        let readers_has = self.shared.readers.borrow().contains_key(&fd);
        let writers_has = self.shared.writers.borrow().contains_key(&fd);
        if readers_has || writers_has {
            let _ = self.shared.selector.modify(fd, readers_has, writers_has);
        } else {
            let _ = self.shared.selector.deregister(fd);
        }

        removed.is_some()
    }

    /// Offloads `f` onto the loop's bounded executor thread pool, returning a future resolved on
    /// this submitting loop once `f` returns (spec §4.1 `run_in_executor`, §5 "Executor").
    pub fn run_in_executor<F, T>(&self, f: F) -> Future<T>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        self.shared.executor.spawn_blocking(self, f)
    }

    /// Creates a new, pending future bound to this loop (spec §4.1 `create_future`).
    #[must_use]
    pub fn create_future<T>(&self) -> Future<T> {
        Future::new(self.loop_ref())
    }

    /// Spawns `future` as a [`Task`] driven by this loop (spec §4.1 `create_task`).
    pub fn create_task<Fut>(&self, future: Fut) -> Task<Fut::Output>
    where
        Fut: std::future::Future + 'static,
        Fut::Output: 'static,
    {
        Task::spawn(self, future)
    }

    /// Requests that the loop stop once the current ready-queue pass finishes (spec §4.1
    /// `stop()`). Safe to call from the loop's own thread.
    pub fn stop(&self) {
        self.shared.should_stop.set(true);
    }

    /// Runs iterations until `future` completes, then returns its result. This is a blocking
    /// entry point and must not be called from a thread already driving another loop.
    pub fn block_on<Fut>(&self, future: Fut) -> Fut::Output
    where
        Fut: std::future::Future + 'static,
        Fut::Output: 'static,
    {
        crate::non_blocking_thread::assert_not_flagged();
        crate::non_blocking_thread::flag_current_thread();
        let _unflag = scopeguard::guard((), |()| crate::non_blocking_thread::unflag_current_thread());

        let task = self.create_task(future);
        while !task.is_done() {
            self.run_main_iteration();
        }
        task.into_inner_result()
    }

    /// Runs iterations until [`EventLoop::stop`] is called.
    pub fn run_forever(&self) {
        crate::non_blocking_thread::assert_not_flagged();
        crate::non_blocking_thread::flag_current_thread();
        let _unflag = scopeguard::guard((), |()| crate::non_blocking_thread::unflag_current_thread());

        self.shared.should_stop.set(false);
        while !self.shared.should_stop.get() {
            self.run_main_iteration();
        }
    }

    /// Runs exactly one iteration of the main loop (spec §4.1 "Main loop").
    pub fn run_main_iteration(&self) {
        self.shared.running.set(true);
        self.drain_cross_thread();
        self.move_ready_timers();

        let timeout = self.select_timeout();
        if let Ok(ready) = self.shared.selector.poll(timeout) {
            self.dispatch_io(&ready);
        }

        self.drain_cross_thread();
        self.run_ready_handles();
        self.shared.running.set(false);
    }

    fn drain_cross_thread(&self) {
        while let Ok(message) = self.shared.cross.receiver.try_recv() {
            match message {
                CrossMessage::Callback(callback) => {
                    self.shared.ready.borrow_mut().push_back(Handle::new(callback));
                }
                CrossMessage::WakeTask(id) => {
                    if let Some(task) = self.shared.tasks.borrow().get(&id).cloned() {
                        self.shared.ready.borrow_mut().push_back(Handle::new(move || task.step()));
                    }
                }
                CrossMessage::Stop => {
                    self.shared.should_stop.set(true);
                }
            }
        }
    }

    fn move_ready_timers(&self) {
        let deadline = self.shared.clock.instant_now() + TIMER_SLOP;
        let mut timers = self.shared.timers.borrow_mut();

        while let Some(top) = timers.peek() {
            if top.when() > deadline {
                break;
            }
            let Some(timer) = timers.pop() else { break };
            if !timer.is_cancelled() {
                self.shared.ready.borrow_mut().push_back(timer.into_handle());
            }
        }
    }

    fn select_timeout(&self) -> Option<Duration> {
        if !self.shared.ready.borrow().is_empty() {
            return Some(Duration::ZERO);
        }

        self.shared.timers.borrow().peek().map(|top| {
            let now = self.shared.clock.instant_now();
            top.when().saturating_duration_since(now)
        })
    }

    fn dispatch_io(&self, ready: &[(RawFd, Readiness)]) {
        for (fd, readiness) in ready {
            if *fd == self.shared.self_pipe.read_fd() {
                self.shared.self_pipe.drain();
                continue;
            }

            if readiness.readable {
                self.dispatch_one(*fd, true);
            }
            if readiness.writable {
                self.dispatch_one(*fd, false);
            }
        }
    }

    fn dispatch_one(&self, fd: RawFd, read: bool) {
        let map = if read {
            self.shared.readers.borrow()
        } else {
            self.shared.writers.borrow()
        };

        let Some(registration) = map.get(&fd) else {
            return;
        };

        if registration.cancelled.get() {
            drop(map);
            self.unregister_io(fd, read);
            return;
        }

        let callback = Rc::clone(&registration.callback);
        drop(map);
        self.shared
            .ready
            .borrow_mut()
            .push_back(Handle::new(move || callback()));
    }

    fn run_ready_handles(&self) {
        let to_run = self.shared.ready.borrow().len();
        for _ in 0..to_run {
            let Some(handle) = self.shared.ready.borrow_mut().pop_front() else {
                break;
            };

            if std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| handle.run())).is_err() {
                tracing::error!("a scheduled handle panicked; the event loop continues running");
            }
        }
    }

    pub(crate) fn next_task_id(&self) -> u64 {
        let id = self.shared.task_seq.get();
        self.shared.task_seq.set(id.wrapping_add(1));
        id
    }

    pub(crate) fn register_task(&self, id: u64, task: Rc<dyn Steppable>) {
        self.shared.tasks.borrow_mut().insert(id, task);
    }

    pub(crate) fn unregister_task(&self, id: u64) {
        self.shared.tasks.borrow_mut().remove(&id);
    }
}

/// A lightweight, loop-local reference used by [`Future`] and [`Task`] to append handles to their
/// owning loop's ready queue without holding a strong `Rc<LoopShared>` (spec §3 "owning loop").
#[derive(Clone)]
pub(crate) struct LoopRef(Weak<LoopShared>);

impl LoopRef {
    pub(crate) fn call_soon(&self, callback: impl FnOnce() + 'static) {
        if let Some(shared) = self.0.upgrade() {
            shared.ready.borrow_mut().push_back(Handle::new(callback));
        }
    }

    pub(crate) fn cross_thread_waker(&self, task_id: u64) -> std::task::Waker {
        let Some(shared) = self.0.upgrade() else {
            return futures::task::noop_waker();
        };
        let cross = Arc::clone(&shared.cross);
        futures::task::waker_fn(move || cross.push(CrossMessage::WakeTask(task_id)))
    }

    pub(crate) fn is_alive(&self) -> bool {
        self.0.upgrade().is_some()
    }

    pub(crate) fn unregister_task(&self, id: u64) {
        if let Some(shared) = self.0.upgrade() {
            shared.tasks.borrow_mut().remove(&id);
        }
    }
}

impl corio_io::Reactor for EventLoop {
    fn add_reader(&self, fd: RawFd, callback: Rc<dyn Fn()>) {
        self.add_reader(fd, move || callback());
    }

    fn add_writer(&self, fd: RawFd, callback: Rc<dyn Fn()>) {
        self.add_writer(fd, move || callback());
    }

    fn remove_reader(&self, fd: RawFd) -> bool {
        self.remove_reader(fd)
    }

    fn remove_writer(&self, fd: RawFd) -> bool {
        self.remove_writer(fd)
    }

    fn call_soon(&self, callback: Box<dyn FnOnce()>) {
        self.call_soon(move || callback());
    }

    fn call_later(&self, delay: Duration, callback: Box<dyn FnOnce()>) {
        self.call_later(delay, move || callback());
    }
}

impl std::fmt::Debug for EventLoop {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventLoop").finish_non_exhaustive()
    }
}

impl std::fmt::Debug for EventLoopHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventLoopHandle").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;

    use super::*;

    #[test]
    fn call_soon_runs_in_fifo_order() {
        let event_loop = EventLoop::new();
        let order = Rc::new(RefCell::new(Vec::new()));

        for i in 0..3 {
            let order = Rc::clone(&order);
            event_loop.call_soon(move || order.borrow_mut().push(i));
        }

        event_loop.run_main_iteration();
        assert_eq!(*order.borrow(), vec![0, 1, 2]);
    }

    #[test]
    fn call_later_runs_after_call_soon_in_same_pass_if_due() {
        let event_loop = EventLoop::new();
        let ran = Rc::new(Cell::new(false));
        let ran_clone = Rc::clone(&ran);

        event_loop.call_later(Duration::ZERO, move || ran_clone.set(true));
        event_loop.run_main_iteration();
        event_loop.run_main_iteration();

        assert!(ran.get());
    }

    #[test]
    fn cancelled_handle_does_not_run() {
        let event_loop = EventLoop::new();
        let ran = Rc::new(Cell::new(false));
        let ran_clone = Rc::clone(&ran);

        let handle = event_loop.call_soon(move || ran_clone.set(true));
        handle.cancel();
        event_loop.run_main_iteration();

        assert!(!ran.get());
    }

    #[test]
    fn call_soon_thread_safe_is_observed() {
        let event_loop = EventLoop::new();
        let handle = event_loop.handle();
        let ran = Rc::new(Cell::new(false));
        let ran_clone = Rc::clone(&ran);

        std::thread::spawn(move || {
            handle.call_soon_thread_safe(move || {
                // This runs back on the loop thread; we can't touch `ran_clone` from here
                // directly since `Rc` is `!Send`, so just prove delivery via a channel instead.
                drop(ran_clone);
            });
        })
        .join()
        .unwrap();

        event_loop.run_main_iteration();
        event_loop.run_main_iteration();
    }
}
