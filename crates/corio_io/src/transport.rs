// Copyright (c) The Corio Project Authors.
// Licensed under the MIT License.

//! The protocol/transport contracts of spec §4.6: the pair of traits every stream-oriented I/O
//! endpoint (TCP, Unix pipe, SSL wrapper) is built against.

use std::any::Any;
use std::net::SocketAddr;
use std::os::fd::RawFd;
use std::rc::Rc;

use crate::error::Error;

/// A closed set of well-known transport metadata keys (spec §9 "Dynamic configuration bags":
/// "replace with a small closed-variant lookup").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExtraInfoKey {
    /// The remote peer's socket address.
    PeerName,
    /// The raw OS file descriptor backing the transport.
    Socket,
    /// The negotiated TLS server name (SSL transports only).
    ServerHostName,
    /// A free-form key not covered by the closed set above, for genuine extensibility (e.g. a
    /// TLS engine handle, which `corio_io` itself has no vocabulary for).
    Other(&'static str),
}

/// The value side of [`ExtraInfoKey`] lookups.
#[derive(Debug, Clone)]
pub enum ExtraInfo {
    /// See [`ExtraInfoKey::PeerName`].
    PeerName(SocketAddr),
    /// See [`ExtraInfoKey::Socket`].
    Socket(RawFd),
    /// See [`ExtraInfoKey::ServerHostName`].
    ServerHostName(String),
    /// See [`ExtraInfoKey::Other`]; the caller downcasts to the type it expects.
    Other(Rc<dyn Any>),
}

/// The byte-consuming endpoint above a [`Transport`] (spec §4.6 "Protocol contract").
///
/// All methods are called synchronously from the owning event loop's thread, from within the
/// transport's readiness callback; implementations must not block.
pub trait Protocol {
    /// Called once, when the transport finishes connecting (or accepting).
    fn connection_made(&mut self, transport: Rc<dyn Transport>);

    /// Called with each chunk of bytes read from the transport. May be called zero or more
    /// times between `connection_made` and `connection_lost`.
    fn data_received(&mut self, data: &[u8]);

    /// Called when the remote peer half-closes (TCP FIN, pipe EOF). Returning `true` requests
    /// that the transport keep its write side open (half-duplex close); the default closes both
    /// directions.
    fn eof_received(&mut self) -> bool {
        false
    }

    /// Called exactly once, when the transport is fully closed. `error` is `Some` if the
    /// closure was caused by an OS error rather than a clean `close()`/EOF.
    fn connection_lost(&mut self, error: Option<Error>);

    /// Called when the transport's write buffer crosses the high watermark.
    fn pause_writing(&mut self) {}

    /// Called when the transport's write buffer drops back below the low watermark.
    fn resume_writing(&mut self) {}
}

/// The byte-producing endpoint above an OS socket/pipe descriptor (spec §4.6 "Transport
/// contract", spec §3 "Transport").
///
/// `write` never blocks: oversized buffered state triggers [`Protocol::pause_writing`] and
/// `resume_writing` is called once the buffer drops below the low watermark.
pub trait Transport {
    /// Queues `data` for writing. Returns immediately; the bytes are flushed as the underlying
    /// fd becomes writable.
    fn write(&self, data: &[u8]);

    /// Half-closes the write side once the write buffer drains (shuts down the send direction
    /// without closing the read side).
    fn write_eof(&self);

    /// Requests an orderly close: flush the write buffer, then close the descriptor.
    fn close(&self);

    /// Closes the descriptor immediately, discarding any buffered, unflushed writes.
    fn abort(&self);

    /// Looks up transport metadata by key (spec §9 "Dynamic configuration bags").
    fn get_extra_info(&self, key: ExtraInfoKey) -> Option<ExtraInfo>;

    /// Sets the high/low write-buffer watermarks (bytes) that drive
    /// `pause_writing`/`resume_writing`.
    fn set_write_buffer_limits(&self, high: usize, low: usize);

    /// Current number of buffered, unflushed write bytes.
    fn get_write_buffer_size(&self) -> usize;

    /// Whether `close()`/`abort()` has been requested (the descriptor may still be draining).
    fn is_closing(&self) -> bool;
}

/// The byte-consuming endpoint above a [`DatagramTransport`] (spec §4.6, UDP variant).
pub trait DatagramProtocol {
    /// Called once, when the transport is ready to send/receive datagrams.
    fn connection_made(&mut self, transport: Rc<dyn DatagramTransport>);

    /// Called with each datagram received, tagged with its source address.
    fn datagram_received(&mut self, data: &[u8], address: SocketAddr);

    /// Called when a send or receive operation reports an OS error that does not close the
    /// transport (e.g. `ECONNREFUSED` on a connected UDP socket).
    fn error_received(&mut self, error: Error);

    /// Called exactly once, when the transport is closed.
    fn connection_lost(&mut self, error: Option<Error>);
}

/// The datagram-oriented counterpart of [`Transport`] (spec §4.6 "Datagram transport (UDP)").
pub trait DatagramTransport {
    /// Queues `data` to be sent to `address` (or the connected remote address if `address` is
    /// `None` and one was set at construction).
    fn send_to(&self, data: &[u8], address: Option<SocketAddr>);

    /// Requests an orderly close of the socket.
    fn close(&self);

    /// Closes the socket immediately, discarding queued datagrams.
    fn abort(&self);

    /// Looks up transport metadata by key.
    fn get_extra_info(&self, key: ExtraInfoKey) -> Option<ExtraInfo>;
}

/// High/low write-buffer watermarks (spec §3 "Transport": "high/low watermarks"). Defaults
/// chosen to match the common 64 KiB / 16 KiB pairing used by comparable readiness-based
/// runtimes (see `other_examples/` reactor sources).
#[derive(Debug, Clone, Copy)]
pub struct Watermarks {
    /// Buffered bytes above which `pause_writing` fires.
    pub high: usize,
    /// Buffered bytes below which `resume_writing` fires.
    pub low: usize,
}

impl Default for Watermarks {
    fn default() -> Self {
        Self {
            high: 64 * 1024,
            low: 16 * 1024,
        }
    }
}
