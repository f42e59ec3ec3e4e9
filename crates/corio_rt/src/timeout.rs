// Copyright (c) The Corio Project Authors.
// Licensed under the MIT License.

use std::time::Duration;

use crate::error::Error;
use crate::event_loop::EventLoop;
use crate::handle::TimerHandle;
use crate::task::Task;

/// Bounds how long an `async` block may run, rewriting its own cancellation to
/// [`Error::TimedOut`] on expiry, per spec §4.5 "A timeout scope schedules a single timer at
/// construction".
///
/// Unlike the original's context-manager, `TimeoutScope` binds a specific [`Task`] at
/// construction (the task performing the bounded work) rather than implicitly capturing
/// whichever coroutine happens to be running; this is a direct consequence of Rust tasks being
/// explicit values instead of an ambient "current coroutine".
pub struct TimeoutScope<T> {
    task: Task<T>,
    timer: TimerHandle,
    timed_out: bool,
}

impl<T: 'static> TimeoutScope<T> {
    /// Spawns `future` as a task on `event_loop`, bound to a timer that cancels it after `delay`.
    pub fn new<Fut>(event_loop: &EventLoop, delay: Duration, future: Fut) -> Self
    where
        Fut: std::future::Future<Output = T> + 'static,
    {
        let task = event_loop.create_task(future);
        let task_for_timer = task.clone();
        let timer = event_loop.call_later(delay, move || {
            task_for_timer.cancel(Some("timeout scope expired".into()));
        });

        Self {
            task,
            timer,
            timed_out: false,
        }
    }

    /// Returns whether the bound task has finished, one way or another.
    #[must_use]
    pub fn is_done(&self) -> bool {
        self.task.is_done()
    }

    /// Awaits the bound task, disarming the timer on completion and rewriting a timeout-induced
    /// cancellation to [`Error::TimedOut`] (spec §4.5 "on exit, if the cancel came from the
    /// timeout, the exception is rewritten").
    pub async fn join(mut self) -> crate::Result<T> {
        if self.timer.is_cancelled() {
            return Err(Error::TimedOut);
        }

        let result = (&mut self.task).await;
        self.timer.cancel();

        match result {
            Err(error) if error.is_cancelled() && self.timer_fired_before_completion() => {
                self.timed_out = true;
                Err(Error::TimedOut)
            }
            other => other,
        }
    }

    fn timer_fired_before_completion(&self) -> bool {
        // The timer's own handle is cancelled unconditionally above; the only way the task ended
        // up cancelled here is if the timer callback ran first and cancelled it, since nothing
        // else holds a reference to this scope's task.
        !self.timed_out && self.task.is_cancelled()
    }
}

impl<T> Drop for TimeoutScope<T> {
    fn drop(&mut self) {
        self.timer.cancel();
    }
}
