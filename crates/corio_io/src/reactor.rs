// Copyright (c) The Corio Project Authors.
// Licensed under the MIT License.

//! The minimal I/O-registration surface transports need from an event loop.
//!
//! `corio_io`'s transports (spec §4.6) are driven by readiness callbacks from whatever loop owns
//! them, but the loop itself (spec §4.1) lives in `corio_rt`, which already depends on
//! `corio_io` for [`crate::Selector`]/[`crate::SelfPipe`]. [`Reactor`] breaks that would-be
//! cycle: transports here depend only on this small object-safe trait, and `corio_rt::EventLoop`
//! implements it.

use std::os::fd::RawFd;
use std::rc::Rc;
use std::time::Duration;

/// Registers and unregisters per-fd readiness callbacks. Implemented by `corio_rt::EventLoop`.
pub trait Reactor {
    /// Registers `callback` to run whenever `fd` becomes readable, replacing any previous
    /// reader registration for `fd` (spec §4.1 `add_reader`).
    fn add_reader(&self, fd: RawFd, callback: Rc<dyn Fn()>);

    /// Registers `callback` to run whenever `fd` becomes writable (spec §4.1 `add_writer`).
    fn add_writer(&self, fd: RawFd, callback: Rc<dyn Fn()>);

    /// Unregisters the reader callback for `fd`. Returns whether one was removed.
    fn remove_reader(&self, fd: RawFd) -> bool;

    /// Unregisters the writer callback for `fd`. Returns whether one was removed.
    fn remove_writer(&self, fd: RawFd) -> bool;

    /// Schedules `callback` to run on the next ready-queue pass (spec §4.1 `call_soon`), used by
    /// transports to deliver `connection_lost`/`eof_received` outside of the readiness callback
    /// that triggered them.
    fn call_soon(&self, callback: Box<dyn FnOnce()>);

    /// Schedules `callback` to run once `delay` has elapsed (spec §4.1 `call_later`). Used by the
    /// TCP listener's accept loop to back off after resource-exhaustion errors (spec §4.1
    /// "Failure semantics").
    fn call_later(&self, delay: Duration, callback: Box<dyn FnOnce()>);
}
