// Copyright (c) The Corio Project Authors.
// Licensed under the MIT License.

//! The SSL wrapper transport (spec §4.6 "SSL wrapper"): a transport-of-transports that presents
//! the [`Protocol`] interface downward to an inner byte-level transport (e.g. `TcpTransport`) and
//! the [`Transport`] interface upward to an application protocol, driving a `rustls` state
//! machine in between.
//!
//! Construction returns both the [`SslTransport`] and a [`HandshakeWaiter`] future that resolves
//! once the handshake completes (or fails); a failed handshake closes the inner transport (spec
//! §4.6: "failures close the inner transport and propagate").

mod danger;
mod error;

use std::cell::{Cell, RefCell};
use std::io::{Cursor, Read, Write};
use std::rc::{Rc, Weak};
use std::sync::Arc;
use std::task::{Context, Poll, Waker};

use futures_rustls::rustls;

use corio_io::{ExtraInfo, ExtraInfoKey, Protocol, Transport, Watermarks};

pub use error::{Error, Result};

/// Which side of the handshake a given [`SslTransport`] plays (spec §4.6: "Server-side,
/// client-side, and hostname-match policy are configured at construction").
pub enum Endpoint {
    /// A client connecting to `server_name`, verified with `config`.
    Client {
        config: Arc<rustls::ClientConfig>,
        server_name: rustls::pki_types::ServerName<'static>,
    },
    /// A server accepting a connection, authenticated with `config`.
    Server { config: Arc<rustls::ServerConfig> },
}

/// Builds a client [`rustls::ClientConfig`] that trusts the certificates in `roots` and performs
/// the usual chain and hostname validation.
#[must_use]
pub fn client_config_with_roots(roots: rustls::RootCertStore) -> Arc<rustls::ClientConfig> {
    let config = rustls::ClientConfig::builder()
        .with_root_certificates(roots)
        .with_no_client_auth();
    Arc::new(config)
}

/// Builds a client [`rustls::ClientConfig`] that accepts any server certificate without
/// validating its hostname or chain (spec §4.6: "disabling hostname matching is permitted but
/// documented as unsafe").
///
/// # Safety (in the informal sense, not `unsafe fn`)
///
/// This removes TLS's entire point: the peer is not authenticated at all. Use only against
/// trusted test fixtures.
#[must_use]
pub fn insecure_client_config_skipping_verification() -> Arc<rustls::ClientConfig> {
    let config = rustls::ClientConfig::builder()
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(danger::NoServerVerification::new()))
        .with_no_client_auth();
    Arc::new(config)
}

/// A one-shot future resolving when the handshake underlying an [`SslTransport`] finishes.
pub struct HandshakeWaiter {
    state: Rc<RefCell<WaiterState>>,
}

struct WaiterState {
    result: Option<Result<()>>,
    waker: Option<Waker>,
}

impl HandshakeWaiter {
    fn new() -> (Self, Rc<RefCell<WaiterState>>) {
        let state = Rc::new(RefCell::new(WaiterState {
            result: None,
            waker: None,
        }));
        (
            Self {
                state: Rc::clone(&state),
            },
            state,
        )
    }
}

impl std::future::Future for HandshakeWaiter {
    type Output = Result<()>;

    fn poll(self: std::pin::Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let mut state = self.state.borrow_mut();
        if let Some(result) = state.result.take() {
            return Poll::Ready(result);
        }
        state.waker = Some(cx.waker().clone());
        Poll::Pending
    }
}

fn resolve_waiter(state: &Rc<RefCell<WaiterState>>, result: Result<()>) {
    let mut guard = state.borrow_mut();
    if guard.result.is_some() {
        return;
    }
    guard.result = Some(result);
    if let Some(waker) = guard.waker.take() {
        waker.wake();
    }
}

struct Inner {
    connection: RefCell<rustls::Connection>,
    inner_transport: RefCell<Option<Rc<dyn Transport>>>,
    protocol: RefCell<Box<dyn Protocol>>,
    waiter_state: Rc<RefCell<WaiterState>>,
    handshake_done: Cell<bool>,
    server_name: Option<String>,
    watermarks: Cell<Watermarks>,
    closing: Cell<bool>,
    closed: Cell<bool>,
    self_ref: Weak<Inner>,
}

/// The SSL wrapper transport itself: an upward-facing [`Transport`] backed by an inner
/// byte-level transport and a `rustls` connection (spec §4.6 "SSL wrapper").
#[derive(Clone)]
pub struct SslTransport {
    inner: Rc<Inner>,
}

/// A placeholder swapped in during construction, mirroring `corio_io`'s transports.
struct NullProtocol;
impl Protocol for NullProtocol {
    fn connection_made(&mut self, _transport: Rc<dyn Transport>) {}
    fn data_received(&mut self, _data: &[u8]) {}
    fn connection_lost(&mut self, _error: Option<corio_io::Error>) {}
}

impl SslTransport {
    /// Creates an SSL wrapper transport. `protocol` is the upper-layer protocol that will see
    /// plaintext; it does not receive `connection_made` until the handshake finishes. Returns the
    /// transport (to be registered as the inner transport's protocol) and a waiter future that
    /// resolves when the handshake completes or fails.
    ///
    /// # Errors
    ///
    /// Returns an error if the `rustls` connection cannot be constructed (e.g. an invalid
    /// `server_name`).
    pub fn new(
        endpoint: Endpoint,
        mut protocol: Box<dyn Protocol>,
    ) -> Result<(Self, HandshakeWaiter)> {
        let (connection, server_name) = match endpoint {
            Endpoint::Client {
                config,
                server_name,
            } => {
                let name_for_extra_info = match &server_name {
                    rustls::pki_types::ServerName::DnsName(name) => {
                        Some(name.as_ref().to_string())
                    }
                    _ => None,
                };
                let connection = rustls::ClientConnection::new(config, server_name)?;
                (rustls::Connection::Client(connection), name_for_extra_info)
            }
            Endpoint::Server { config } => {
                let connection = rustls::ServerConnection::new(config)?;
                (rustls::Connection::Server(connection), None)
            }
        };

        let (waiter, waiter_state) = HandshakeWaiter::new();

        let inner = Rc::new_cyclic(|self_ref| Inner {
            connection: RefCell::new(connection),
            inner_transport: RefCell::new(None),
            protocol: RefCell::new(Box::new(NullProtocol)),
            waiter_state,
            handshake_done: Cell::new(false),
            server_name,
            watermarks: Cell::new(Watermarks::default()),
            closing: Cell::new(false),
            closed: Cell::new(false),
            self_ref: self_ref.clone(),
        });

        std::mem::swap(&mut protocol, &mut *inner.protocol.borrow_mut());

        Ok((Self { inner }, waiter))
    }

    /// Returns the `Protocol` implementation to register as the *inner* transport's protocol, so
    /// ciphertext read off the wire reaches this wrapper (spec §4.6: "presents the protocol
    /// interface upward and the transport interface downward").
    #[must_use]
    pub fn as_inner_protocol(&self) -> Box<dyn Protocol> {
        Box::new(Rc::clone(&self.inner))
    }
}

impl Inner {
    /// Flushes any ciphertext `rustls` wants to send as a result of the last state transition.
    fn flush_outgoing(&self) {
        let Some(inner_transport) = self.inner_transport.borrow().clone() else {
            return;
        };

        let mut connection = self.connection.borrow_mut();
        while connection.wants_write() {
            let mut buffer = Vec::new();
            match connection.write_tls(&mut buffer) {
                Ok(0) => break,
                Ok(_) => inner_transport.write(&buffer),
                Err(error) => {
                    drop(connection);
                    self.fail(Error::StdIo(error));
                    return;
                }
            }
        }
    }

    /// Pulls decrypted plaintext out of the connection's read buffer and delivers it upward.
    fn drain_plaintext(&self) {
        let mut plaintext = Vec::new();
        {
            let mut connection = self.connection.borrow_mut();
            let mut reader = connection.reader();
            if let Err(error) = reader.read_to_end(&mut plaintext) {
                if error.kind() != std::io::ErrorKind::WouldBlock {
                    drop(connection);
                    self.fail(Error::StdIo(error));
                    return;
                }
            }
        }
        if !plaintext.is_empty() {
            self.protocol.borrow_mut().data_received(&plaintext);
        }
    }

    fn check_handshake_progress(self: &Rc<Self>) {
        if self.handshake_done.get() {
            return;
        }
        if self.connection.borrow().is_handshaking() {
            return;
        }
        self.handshake_done.set(true);
        resolve_waiter(&self.waiter_state, Ok(()));

        let transport: Rc<dyn Transport> = self.clone();
        self.protocol.borrow_mut().connection_made(transport);
    }

    fn fail(self: &Rc<Self>, error: Error) {
        if let Some(inner_transport) = self.inner_transport.borrow().clone() {
            inner_transport.abort();
        }
        self.finish_close(Some(error));
    }

    fn finish_close(self: &Rc<Self>, error: Option<Error>) {
        if self.closed.replace(true) {
            return;
        }
        if !self.handshake_done.get() {
            resolve_waiter(&self.waiter_state, Err(Error::HandshakeAborted));
        }
        self.protocol
            .borrow_mut()
            .connection_lost(error.map(corio_io::Error::from));
    }
}

impl Protocol for Rc<Inner> {
    fn connection_made(&mut self, transport: Rc<dyn Transport>) {
        *self.inner_transport.borrow_mut() = Some(transport);
        self.flush_outgoing();
        self.check_handshake_progress();
    }

    fn data_received(&mut self, data: &[u8]) {
        if self.closed.get() {
            return;
        }

        {
            let mut connection = self.connection.borrow_mut();
            let mut cursor = Cursor::new(data);
            if let Err(error) = connection.read_tls(&mut cursor) {
                drop(connection);
                self.fail(Error::StdIo(error));
                return;
            }
            if let Err(error) = connection.process_new_packets() {
                drop(connection);
                self.fail(Error::Tls(error));
                return;
            }
        }

        self.flush_outgoing();
        self.check_handshake_progress();
        self.drain_plaintext();
    }

    fn eof_received(&mut self) -> bool {
        self.protocol.borrow_mut().eof_received()
    }

    fn connection_lost(&mut self, error: Option<corio_io::Error>) {
        self.finish_close(error.map(|error| Error::StdIo(error.into())));
    }

    fn pause_writing(&mut self) {
        self.protocol.borrow_mut().pause_writing();
    }

    fn resume_writing(&mut self) {
        self.protocol.borrow_mut().resume_writing();
    }
}

impl Transport for Inner {
    fn write(&self, data: &[u8]) {
        if self.closing.get() || self.closed.get() || data.is_empty() {
            return;
        }

        {
            let mut connection = self.connection.borrow_mut();
            let mut writer = connection.writer();
            if writer.write_all(data).is_err() {
                return;
            }
        }
        self.flush_outgoing();
    }

    fn write_eof(&self) {
        if let Some(inner_transport) = self.inner_transport.borrow().clone() {
            self.connection.borrow_mut().send_close_notify();
            self.flush_outgoing();
            inner_transport.write_eof();
        }
    }

    fn close(&self) {
        if self.closing.replace(true) {
            return;
        }
        if let Some(inner_transport) = self.inner_transport.borrow().clone() {
            self.connection.borrow_mut().send_close_notify();
            self.flush_outgoing();
            inner_transport.close();
        }
    }

    fn abort(&self) {
        if let Some(inner_transport) = self.inner_transport.borrow().clone() {
            inner_transport.abort();
        }
    }

    fn get_extra_info(&self, key: ExtraInfoKey) -> Option<ExtraInfo> {
        match key {
            ExtraInfoKey::ServerHostName => self
                .server_name
                .clone()
                .map(ExtraInfo::ServerHostName),
            ExtraInfoKey::PeerName | ExtraInfoKey::Socket => self
                .inner_transport
                .borrow()
                .as_ref()
                .and_then(|transport| transport.get_extra_info(key)),
            ExtraInfoKey::Other(_) => None,
        }
    }

    fn set_write_buffer_limits(&self, high: usize, low: usize) {
        self.watermarks.set(Watermarks { high, low });
        if let Some(inner_transport) = self.inner_transport.borrow().clone() {
            inner_transport.set_write_buffer_limits(high, low);
        }
    }

    fn get_write_buffer_size(&self) -> usize {
        self.inner_transport
            .borrow()
            .as_ref()
            .map_or(0, |transport| transport.get_write_buffer_size())
    }

    fn is_closing(&self) -> bool {
        self.closing.get() || self.closed.get()
    }
}


impl Transport for SslTransport {
    fn write(&self, data: &[u8]) {
        self.inner.write(data);
    }
    fn write_eof(&self) {
        self.inner.write_eof();
    }
    fn close(&self) {
        self.inner.close();
    }
    fn abort(&self) {
        self.inner.abort();
    }
    fn get_extra_info(&self, key: ExtraInfoKey) -> Option<ExtraInfo> {
        self.inner.get_extra_info(key)
    }
    fn set_write_buffer_limits(&self, high: usize, low: usize) {
        self.inner.set_write_buffer_limits(high, low);
    }
    fn get_write_buffer_size(&self) -> usize {
        self.inner.get_write_buffer_size()
    }
    fn is_closing(&self) -> bool {
        self.inner.is_closing()
    }
}
