// Copyright (c) The Corio Project Authors.
// Licensed under the MIT License.

//! Monotonic clock primitives shared by the Corio runtime.
//!
//! - [`Clock`]. A monotonic time source, used by `corio_rt`'s event loop to schedule timers and
//!   by [`Timestamp::now`] for wall-clock reads.
//! - [`Timestamp`]. An absolute UTC point in time.
//! - [`DurationExt`]. Minor `Duration` convenience accessors (`as_minutes`/`as_hours`/`as_days`).
//! - [`Error`]. The error type for fallible conversions in this crate.
#![cfg_attr(
    feature = "fakes",
    doc = r"
 - [`ClockControl`]. Drives a fake clock's flow of time in tests. Exposed only when the `fakes`
   feature is enabled.
"
)]
//!
//! # Machine time, not wall time
//!
//! This crate models machine-centric time only: monotonic instants and UTC timestamps. It does
//! not implement calendars, time zones, or human-readable formatting; reach for [jiff], [chrono],
//! or [time] for that and convert via [`Timestamp::to_system_time`].
//!
//! [jiff]: https://crates.io/crates/jiff
//! [chrono]: https://crates.io/crates/chrono
//! [time]: https://crates.io/crates/time
//!
//! # Testing
//!
//! Enable the `fakes` feature (in `dev-dependencies` only) to construct a [`Clock`] backed by
//! `ClockControl`, letting tests advance time deterministically instead of sleeping.

mod clock;
#[cfg(any(feature = "fakes", test))]
mod clock_control;
mod duration_ext;
mod error;
mod timestamp;

pub use clock::*;
#[cfg(any(feature = "fakes", test))]
pub use clock_control::*;
pub use duration_ext::*;
pub use error::*;
pub use timestamp::*;

/// An absolute deadline on a [`Clock`]'s monotonic source.
///
/// Re-exported so that downstream crates (`corio_rt`'s `TimerHandle` in particular) can name the
/// type handed back by [`Clock::instant_now`] without depending on `std` directly for it.
pub use std::time::Instant;
