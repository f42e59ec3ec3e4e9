// Copyright (c) The Corio Project Authors.
// Licensed under the MIT License.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use super::Timestamp;

/// Controls the flow of time for a [`Clock`][super::Clock] created with
/// [`Clock::with_control`][super::Clock::with_control].
///
/// Exposed only when the `fakes` feature is enabled (or under `#[cfg(test)]`). Never enable
/// `fakes` for production code; it exists purely so that event-loop timer and timeout tests do
/// not need to sleep on the real clock.
#[derive(Debug, Clone)]
pub struct ClockControl {
    state: Arc<Mutex<State>>,
}

#[derive(Debug)]
struct State {
    elapsed: Duration,
    base_instant: Instant,
    auto_advance: Duration,
}

impl State {
    fn new() -> Self {
        Self {
            elapsed: Duration::ZERO,
            base_instant: Instant::now(),
            auto_advance: Duration::ZERO,
        }
    }
}

impl Default for ClockControl {
    fn default() -> Self {
        Self::new()
    }
}

impl ClockControl {
    /// Creates a new `ClockControl`. Time starts at the UNIX epoch and does not advance unless
    /// [`ClockControl::advance`] is called or auto-advance is configured.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(State::new())),
        }
    }

    /// Every subsequent read of the clock advances time by `duration` first.
    ///
    /// Useful for tests that want to assert monotonic progress without manual `advance` calls
    /// between every pair of `now()` reads.
    #[must_use]
    pub fn auto_advance(self, duration: Duration) -> Self {
        self.lock().auto_advance = duration;
        self
    }

    /// Advances the clock's time by `duration`.
    pub fn advance(&self, duration: Duration) {
        let mut state = self.lock();
        state.elapsed = state.elapsed.saturating_add(duration);
    }

    pub(super) fn now(&self) -> Timestamp {
        let elapsed = self.advance_and_read();
        Timestamp::UNIX_EPOCH
            .checked_add(elapsed)
            .expect("fake clock elapsed duration should never overflow Timestamp::MAX")
    }

    pub(super) fn instant_now(&self) -> Instant {
        let elapsed = self.advance_and_read();
        self.lock()
            .base_instant
            .checked_add(elapsed)
            .expect("fake clock elapsed duration should never overflow Instant")
    }

    fn advance_and_read(&self) -> Duration {
        let mut state = self.lock();
        let auto_advance = state.auto_advance;
        state.elapsed = state.elapsed.saturating_add(auto_advance);
        state.elapsed
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}
