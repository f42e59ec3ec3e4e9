// Copyright (c) The Corio Project Authors.
// Licensed under the MIT License.

//! The TCP stream transport (spec §4.6 "Stream transport (TCP)") and its listener's
//! accept loop (spec §4.1 "Failure semantics").

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::io::{ErrorKind, Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::os::fd::{AsRawFd, RawFd};
use std::rc::{Rc, Weak};
use std::time::Duration;

use crate::error::Error;
use crate::reactor::Reactor;
use crate::transport::{ExtraInfo, ExtraInfoKey, Protocol, Transport, Watermarks};

/// Bytes read per readable event (spec §4.6: "Reads ≤ N bytes per readable event").
const READ_CHUNK_SIZE: usize = 64 * 1024;

/// How long the listener backs off after an accept error indicating resource exhaustion
/// (spec §4.1 "Failure semantics"; spec §7 "OS errors").
const ACCEPT_BACKOFF: Duration = Duration::from_secs(1);

struct Inner {
    reactor: Rc<dyn Reactor>,
    stream: TcpStream,
    fd: RawFd,
    protocol: RefCell<Box<dyn Protocol>>,
    write_buffer: RefCell<VecDeque<u8>>,
    watermarks: Cell<Watermarks>,
    paused_writing: Cell<bool>,
    writer_registered: Cell<bool>,
    closing: Cell<bool>,
    closed: Cell<bool>,
    write_eof_requested: Cell<bool>,
    /// A weak reference to `self`'s own `Rc`, needed to hand out a fresh `Rc<Inner>` from `&self`
    /// methods (e.g. to register a writer callback from inside `write()`).
    self_ref: Weak<Inner>,
}

/// A TCP stream transport: the byte-moving endpoint above a connected `TcpStream`.
#[derive(Clone)]
pub struct TcpTransport {
    inner: Rc<Inner>,
}

impl TcpTransport {
    /// Wraps an already-connected, non-blocking `TcpStream` and delivers `connection_made` to
    /// `protocol` immediately, then registers a reader so bytes start flowing.
    ///
    /// # Errors
    ///
    /// Returns an error if the stream cannot be switched to non-blocking mode.
    pub fn new(
        reactor: Rc<dyn Reactor>,
        stream: TcpStream,
        mut protocol: Box<dyn Protocol>,
    ) -> crate::error::Result<Self> {
        stream.set_nonblocking(true).map_err(Error::StdIo)?;
        let fd = stream.as_raw_fd();

        let inner = Rc::new_cyclic(|self_ref| Inner {
            reactor: Rc::clone(&reactor),
            stream,
            fd,
            protocol: RefCell::new(Box::new(NullProtocol)),
            write_buffer: RefCell::new(VecDeque::new()),
            watermarks: Cell::new(Watermarks::default()),
            paused_writing: Cell::new(false),
            writer_registered: Cell::new(false),
            closing: Cell::new(false),
            closed: Cell::new(false),
            write_eof_requested: Cell::new(false),
            self_ref: self_ref.clone(),
        });

        std::mem::swap(&mut protocol, &mut *inner.protocol.borrow_mut());
        let transport = Self { inner: Rc::clone(&inner) };
        inner
            .protocol
            .borrow_mut()
            .connection_made(Rc::clone(&inner) as Rc<dyn Transport>);

        let reader_inner = Rc::clone(&inner);
        reactor.add_reader(fd, Rc::new(move || reader_inner.on_readable()));

        Ok(transport)
    }
}

/// A placeholder swapped in during construction so the real protocol can be moved into place
/// without requiring `Option<Box<dyn Protocol>>` plumbing everywhere else.
struct NullProtocol;
impl Protocol for NullProtocol {
    fn connection_made(&mut self, _transport: Rc<dyn Transport>) {}
    fn data_received(&mut self, _data: &[u8]) {}
    fn connection_lost(&mut self, _error: Option<Error>) {}
}

impl Inner {
    fn on_readable(&self) {
        if self.closed.get() {
            return;
        }

        let mut buffer = [0u8; READ_CHUNK_SIZE];
        loop {
            match (&self.stream).read(&mut buffer) {
                Ok(0) => {
                    self.handle_eof();
                    return;
                }
                Ok(n) => {
                    self.protocol.borrow_mut().data_received(&buffer[..n]);
                    if n < buffer.len() {
                        return;
                    }
                }
                Err(error) if error.kind() == ErrorKind::WouldBlock => return,
                Err(error) => {
                    self.fail(Error::StdIo(error));
                    return;
                }
            }
        }
    }

    fn handle_eof(&self) {
        let keep_open = self.protocol.borrow_mut().eof_received();
        self.reactor.remove_reader(self.fd);
        if !keep_open {
            self.finish_close(None);
        }
    }

    fn on_writable(&self) {
        if self.closed.get() {
            return;
        }

        loop {
            let chunk: Vec<u8> = {
                let buffer = self.write_buffer.borrow();
                if buffer.is_empty() {
                    break;
                }
                buffer.iter().copied().take(READ_CHUNK_SIZE).collect()
            };

            match (&self.stream).write(&chunk) {
                Ok(0) => break,
                Ok(n) => {
                    self.write_buffer.borrow_mut().drain(..n);
                    self.maybe_resume_writing();
                }
                Err(error) if error.kind() == ErrorKind::WouldBlock => return,
                Err(error) => {
                    self.fail(Error::StdIo(error));
                    return;
                }
            }
        }

        if self.write_buffer.borrow().is_empty() {
            self.reactor.remove_writer(self.fd);
            self.writer_registered.set(false);

            if self.write_eof_requested.get() {
                let _ = self.stream.shutdown(std::net::Shutdown::Write);
            }
            if self.closing.get() {
                self.finish_close(None);
            }
        }
    }

    fn ensure_writer_registered(&self) {
        if !self.writer_registered.get() {
            self.writer_registered.set(true);
            if let Some(inner) = self.self_ref.upgrade() {
                self.reactor.add_writer(self.fd, Rc::new(move || inner.on_writable()));
            }
        }
    }

    fn maybe_resume_writing(&self) {
        let watermarks = self.watermarks.get();
        if self.paused_writing.get() && self.write_buffer.borrow().len() <= watermarks.low {
            self.paused_writing.set(false);
            self.protocol.borrow_mut().resume_writing();
        }
    }

    fn fail(&self, error: Error) {
        self.reactor.remove_reader(self.fd);
        self.reactor.remove_writer(self.fd);
        self.finish_close(Some(error));
    }

    fn finish_close(&self, error: Option<Error>) {
        if self.closed.replace(true) {
            return;
        }
        self.reactor.remove_reader(self.fd);
        self.reactor.remove_writer(self.fd);
        let _ = self.stream.shutdown(std::net::Shutdown::Both);
        self.protocol.borrow_mut().connection_lost(error);
    }
}

impl Transport for Inner {
    fn write(&self, data: &[u8]) {
        if self.closing.get() || self.closed.get() {
            return;
        }
        if data.is_empty() {
            return;
        }

        let was_empty = self.write_buffer.borrow().is_empty();
        self.write_buffer.borrow_mut().extend(data.iter().copied());

        let watermarks = self.watermarks.get();
        if !self.paused_writing.get() && self.write_buffer.borrow().len() > watermarks.high {
            self.paused_writing.set(true);
            self.protocol.borrow_mut().pause_writing();
        }

        if was_empty {
            // Try an immediate, non-blocking write before registering for writability, since
            // the socket is very likely already writable in the common case.
            self.on_writable_direct();
        }
    }

    fn write_eof(&self) {
        self.write_eof_requested.set(true);
        if self.write_buffer.borrow().is_empty() {
            let _ = self.stream.shutdown(std::net::Shutdown::Write);
        }
    }

    fn close(&self) {
        if self.closing.replace(true) {
            return;
        }
        if self.write_buffer.borrow().is_empty() {
            self.finish_close(None);
        }
    }

    fn abort(&self) {
        self.write_buffer.borrow_mut().clear();
        self.finish_close(None);
    }

    fn get_extra_info(&self, key: ExtraInfoKey) -> Option<ExtraInfo> {
        match key {
            ExtraInfoKey::PeerName => self.stream.peer_addr().ok().map(ExtraInfo::PeerName),
            ExtraInfoKey::Socket => Some(ExtraInfo::Socket(self.fd)),
            ExtraInfoKey::ServerHostName | ExtraInfoKey::Other(_) => None,
        }
    }

    fn set_write_buffer_limits(&self, high: usize, low: usize) {
        self.watermarks.set(Watermarks { high, low });
    }

    fn get_write_buffer_size(&self) -> usize {
        self.write_buffer.borrow().len()
    }

    fn is_closing(&self) -> bool {
        self.closing.get() || self.closed.get()
    }
}

impl Inner {
    /// Best-effort synchronous write attempt from within `write()`, falling back to writer
    /// registration if the socket is not immediately writable or more data remains buffered.
    fn on_writable_direct(&self) {
        self.on_writable();
        if !self.write_buffer.borrow().is_empty() && !self.closed.get() {
            self.ensure_writer_registered();
        }
    }
}

/// Drives a listening socket's accept loop, constructing a fresh [`TcpTransport`] (and protocol,
/// via `make_protocol`) for each accepted connection (spec §4.6, §4.1 "Failure semantics").
pub struct TcpListenerHandle {
    inner: Rc<ListenerInner>,
}

struct ListenerInner {
    reactor: Rc<dyn Reactor>,
    listener: TcpListener,
    fd: RawFd,
    make_protocol: Box<dyn Fn(SocketAddr) -> Box<dyn Protocol>>,
}

impl TcpListenerHandle {
    /// Binds a non-blocking listener and starts accepting connections, invoking `make_protocol`
    /// with each peer address to construct the protocol object for that connection.
    pub fn bind(
        reactor: Rc<dyn Reactor>,
        address: SocketAddr,
        make_protocol: impl Fn(SocketAddr) -> Box<dyn Protocol> + 'static,
    ) -> crate::error::Result<Self> {
        let listener = TcpListener::bind(address).map_err(Error::StdIo)?;
        listener.set_nonblocking(true).map_err(Error::StdIo)?;
        let fd = listener.as_raw_fd();

        let inner = Rc::new(ListenerInner {
            reactor: Rc::clone(&reactor),
            listener,
            fd,
            make_protocol: Box::new(make_protocol),
        });

        let accept_inner = Rc::clone(&inner);
        reactor.add_reader(fd, Rc::new(move || accept_inner.accept_ready()));

        Ok(Self { inner })
    }

    /// The address the listener is bound to.
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.inner.listener.local_addr()
    }

    /// Stops accepting new connections. Already-accepted transports are unaffected.
    pub fn close(&self) {
        self.inner.reactor.remove_reader(self.inner.fd);
    }
}

impl ListenerInner {
    fn accept_ready(self: &Rc<Self>) {
        loop {
            match self.listener.accept() {
                Ok((stream, peer)) => {
                    let protocol = (self.make_protocol)(peer);
                    // A failure to construct the transport (e.g. the peer reset the connection
                    // between `accept` and `set_nonblocking`) is not fatal to the listener.
                    let _ = TcpTransport::new(Rc::clone(&self.reactor) as Rc<dyn Reactor>, stream, protocol);
                }
                Err(error) if error.kind() == ErrorKind::WouldBlock => return,
                Err(error) => {
                    if is_resource_exhaustion(&error) {
                        self.back_off();
                        return;
                    }
                    // Any other OS error is propagated to the loop's exception handler (spec §4.1);
                    // in the absence of a dedicated loop-wide exception sink here, we log and keep
                    // the listener alive rather than abort the whole process.
                    tracing::error!(error = %error, "accept() failed on TCP listener");
                    return;
                }
            }
        }
    }

    fn back_off(self: &Rc<Self>) {
        self.reactor.remove_reader(self.fd);
        let inner = Rc::clone(self);
        self.reactor.call_later(
            ACCEPT_BACKOFF,
            Box::new(move || {
                let reader_inner = Rc::clone(&inner);
                inner.reactor.add_reader(inner.fd, Rc::new(move || reader_inner.accept_ready()));
            }),
        );
    }
}

/// Whether `error` indicates the process/system ran out of a resource needed to accept a new
/// connection (spec §4.1, §7: `EMFILE`/`ENFILE`/`ENOBUFS`/`ENOMEM`).
fn is_resource_exhaustion(error: &std::io::Error) -> bool {
    matches!(
        error.raw_os_error(),
        Some(libc::EMFILE) | Some(libc::ENFILE) | Some(libc::ENOBUFS) | Some(libc::ENOMEM)
    )
}
