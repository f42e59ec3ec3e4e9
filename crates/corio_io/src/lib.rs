// Copyright (c) The Corio Project Authors.
// Licensed under the MIT License.

//! The Corio I/O subsystem: a POSIX readiness-based selector, self-pipe wakeup, and the
//! transport/protocol layer built on top of them (spec §4.1, §4.2, §4.6).
//!
//! The subsystem consists of the following major pieces, each relevant for a different
//! audience:
//!
//! * Engineers implementing an event loop need [`Selector`] (readiness polling) and
//!   [`SelfPipe`] (cross-thread wakeup) — see [`crate::Readiness`] for the shape of a poll
//!   result.
//! * Engineers implementing higher-level I/O endpoints (HTTP, WebSocket, ...) build against the
//!   [`Protocol`]/[`Transport`] (stream-oriented) or [`DatagramProtocol`]/[`DatagramTransport`]
//!   (UDP) contracts, and the concrete [`TcpTransport`]/[`UdpTransport`]/[`PipeReadTransport`]/
//!   [`PipeWriteTransport`] implementations.
//! * Event loop implementations (e.g. `corio_rt::EventLoop`) register themselves with
//!   transports by implementing [`Reactor`].

pub mod mem {
    pub use corio_mem::*;
}

mod error;
mod pipe;
mod reactor;
mod selector;
mod self_pipe;
mod tcp;
mod transport;
mod udp;

pub use error::{Error, Result};
pub use pipe::{PipeReadTransport, PipeWriteTransport};
pub use reactor::Reactor;
pub use selector::{Readiness, Selector};
pub use self_pipe::{SelfPipe, SelfPipeWriter};
pub use tcp::{TcpListenerHandle, TcpTransport};
pub use transport::{
    DatagramProtocol, DatagramTransport, ExtraInfo, ExtraInfoKey, Protocol, Transport, Watermarks,
};
pub use udp::UdpTransport;

#[cfg(test)]
mod tests {
    #[test]
    fn is_64_bit() {
        // This crate requires at least pointers to be 64 bits long.
        // We have various size/pointer/offset logic that assumes this.
        // If we ever want to target 32-bit, we likely need to adjust the math in many places
        // because while reaching u64::MAX is never going to happen with reasonable inputs,
        // u32::MAX is easy to reach even with reasonable inputs (4 GB is nothing!).
        static_assertions::const_assert!(size_of::<usize>() >= 8);
    }
}
