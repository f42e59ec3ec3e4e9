// Copyright (c) The Corio Project Authors.
// Licensed under the MIT License.

use std::sync::Arc;
use std::time::Instant;

#[cfg(any(feature = "fakes", test))]
use super::clock_control::ClockControl;
use super::Timestamp;

/// Abstraction over the machine's monotonic clock, per spec §6 ("Clock. Monotonic seconds as
/// floating point; resolution exposed as a constant.").
///
/// In production, [`Clock::real`] is backed directly by [`std::time::Instant`] /
/// [`std::time::SystemTime`] and is effectively free to clone and call. In tests, a
/// [`ClockControl`]-backed clock lets the flow of time be advanced manually so that timeout and
/// timer tests do not have to sleep on the wall clock.
///
/// The [`EventLoop`][corio_rt_docs] only ever reads absolute time through this type: timers are
/// scheduled as `Instant` deadlines on the clock that created the loop.
///
/// [corio_rt_docs]: https://docs.rs/corio_rt
#[derive(Debug, Clone)]
pub struct Clock(Arc<ClockInner>);

#[derive(Debug)]
enum ClockInner {
    Real,
    #[cfg(any(feature = "fakes", test))]
    Control(ClockControl),
}

impl Default for Clock {
    fn default() -> Self {
        Self::real()
    }
}

impl Clock {
    /// The resolution guaranteed by the underlying monotonic source (spec §6).
    pub const RESOLUTION: std::time::Duration = std::time::Duration::from_nanos(1);

    /// Creates a clock backed by the real, monotonic OS clock.
    #[must_use]
    pub fn real() -> Self {
        Self(Arc::new(ClockInner::Real))
    }

    /// Creates a clock whose flow of time is driven by a [`ClockControl`].
    #[cfg(any(feature = "fakes", test))]
    #[must_use]
    pub fn with_control(control: &ClockControl) -> Self {
        Self(Arc::new(ClockInner::Control(control.clone())))
    }

    /// Retrieves the current [`Timestamp`] (wall-clock, non-monotonic).
    #[must_use]
    pub fn now(&self) -> Timestamp {
        match &*self.0 {
            ClockInner::Real => Timestamp::now(),
            #[cfg(any(feature = "fakes", test))]
            ClockInner::Control(control) => control.now(),
        }
    }

    /// Retrieves the current [`Instant`] on this clock's monotonic source.
    ///
    /// This is what [`TimerHandle`][corio_rt_docs]'s `when` deadlines are measured against.
    ///
    /// [corio_rt_docs]: https://docs.rs/corio_rt
    #[must_use]
    pub fn instant_now(&self) -> Instant {
        match &*self.0 {
            ClockInner::Real => Instant::now(),
            #[cfg(any(feature = "fakes", test))]
            ClockInner::Control(control) => control.instant_now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::ClockControl;

    #[test]
    fn assert_types() {
        static_assertions::assert_impl_all!(Clock: Send, Sync);
    }

    #[cfg(not(miri))]
    #[test]
    fn real_clock_moves_forward() {
        let clock = Clock::real();
        let a = clock.instant_now();
        let b = clock.instant_now();
        assert!(b >= a);
    }

    #[test]
    fn control_clock_reflects_advance() {
        let control = ClockControl::new();
        let clock = Clock::with_control(&control);

        let now = clock.now();
        control.advance(Duration::from_secs(10));

        assert_eq!(
            clock.now(),
            now.checked_add(Duration::from_secs(10)).unwrap()
        );
    }
}
