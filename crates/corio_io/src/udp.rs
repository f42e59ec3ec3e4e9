// Copyright (c) The Corio Project Authors.
// Licensed under the MIT License.

//! The UDP datagram transport (spec §4.6 "Datagram transport (UDP)").

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::io::ErrorKind;
use std::net::{SocketAddr, UdpSocket};
use std::os::fd::{AsRawFd, RawFd};
use std::rc::{Rc, Weak};

use crate::error::Error;
use crate::reactor::Reactor;
use crate::transport::{DatagramProtocol, DatagramTransport, ExtraInfo, ExtraInfoKey};

/// Maximum UDP payload read per datagram (spec's implicit assumption that a read covers one
/// whole datagram; larger than any payload a non-jumbogram IPv4/IPv6 UDP packet can carry).
const MAX_DATAGRAM_SIZE: usize = 65_536;

struct QueuedDatagram {
    data: Vec<u8>,
    address: SocketAddr,
}

struct Inner {
    reactor: Rc<dyn Reactor>,
    socket: UdpSocket,
    fd: RawFd,
    protocol: RefCell<Box<dyn DatagramProtocol>>,
    /// The address set via `connect()`-equivalent configuration, if any: replaces the
    /// destination for any `send_to` call that does not specify one (spec §4.6).
    remote_address: Option<SocketAddr>,
    outgoing: RefCell<VecDeque<QueuedDatagram>>,
    writer_registered: Cell<bool>,
    closed: Cell<bool>,
    self_ref: Weak<Inner>,
}

/// A UDP datagram transport.
#[derive(Clone)]
pub struct UdpTransport {
    inner: Rc<Inner>,
}

struct NullDatagramProtocol;
impl DatagramProtocol for NullDatagramProtocol {
    fn connection_made(&mut self, _transport: Rc<dyn DatagramTransport>) {}
    fn datagram_received(&mut self, _data: &[u8], _address: SocketAddr) {}
    fn error_received(&mut self, _error: Error) {}
    fn connection_lost(&mut self, _error: Option<Error>) {}
}

impl UdpTransport {
    /// Wraps a bound, non-blocking `UdpSocket`. `remote_address`, if given, is the socket's
    /// "connected" remote (spec §4.6: "a remote address, if set, replaces the destination").
    pub fn new(
        reactor: Rc<dyn Reactor>,
        socket: UdpSocket,
        remote_address: Option<SocketAddr>,
        mut protocol: Box<dyn DatagramProtocol>,
    ) -> crate::error::Result<Self> {
        socket.set_nonblocking(true).map_err(Error::StdIo)?;
        let fd = socket.as_raw_fd();

        let inner = Rc::new_cyclic(|self_ref| Inner {
            reactor: Rc::clone(&reactor),
            socket,
            fd,
            protocol: RefCell::new(Box::new(NullDatagramProtocol)),
            remote_address,
            outgoing: RefCell::new(VecDeque::new()),
            writer_registered: Cell::new(false),
            closed: Cell::new(false),
            self_ref: self_ref.clone(),
        });

        std::mem::swap(&mut protocol, &mut *inner.protocol.borrow_mut());
        let transport = Self { inner: Rc::clone(&inner) };
        inner
            .protocol
            .borrow_mut()
            .connection_made(Rc::clone(&inner) as Rc<dyn DatagramTransport>);

        let reader_inner = Rc::clone(&inner);
        reactor.add_reader(fd, Rc::new(move || reader_inner.on_readable()));

        Ok(transport)
    }
}

impl Inner {
    fn on_readable(&self) {
        if self.closed.get() {
            return;
        }

        let mut buffer = [0u8; MAX_DATAGRAM_SIZE];
        loop {
            match self.socket.recv_from(&mut buffer) {
                Ok((n, address)) => {
                    self.protocol.borrow_mut().datagram_received(&buffer[..n], address);
                }
                Err(error) if error.kind() == ErrorKind::WouldBlock => return,
                Err(error) => {
                    self.protocol.borrow_mut().error_received(Error::StdIo(error));
                    return;
                }
            }
        }
    }

    fn on_writable(&self) {
        if self.closed.get() {
            return;
        }

        loop {
            let Some(datagram) = self.outgoing.borrow_mut().pop_front() else {
                break;
            };

            match self.socket.send_to(&datagram.data, datagram.address) {
                Ok(_) => {}
                Err(error) if error.kind() == ErrorKind::WouldBlock => {
                    self.outgoing.borrow_mut().push_front(datagram);
                    return;
                }
                Err(error) => {
                    self.protocol.borrow_mut().error_received(Error::StdIo(error));
                }
            }
        }

        self.reactor.remove_writer(self.fd);
        self.writer_registered.set(false);
    }

    fn ensure_writer_registered(&self) {
        if !self.writer_registered.get() {
            self.writer_registered.set(true);
            if let Some(inner) = self.self_ref.upgrade() {
                self.reactor.add_writer(self.fd, Rc::new(move || inner.on_writable()));
            }
        }
    }
}

impl DatagramTransport for Inner {
    fn send_to(&self, data: &[u8], address: Option<SocketAddr>) {
        if self.closed.get() {
            return;
        }

        let Some(destination) = address.or(self.remote_address) else {
            tracing::error!("send_to called with no destination and no connected remote address");
            return;
        };

        let was_empty = self.outgoing.borrow().is_empty();
        self.outgoing.borrow_mut().push_back(QueuedDatagram {
            data: data.to_vec(),
            address: destination,
        });

        if was_empty {
            self.on_writable();
            if !self.outgoing.borrow().is_empty() {
                self.ensure_writer_registered();
            }
        }
    }

    fn close(&self) {
        if self.closed.replace(true) {
            return;
        }
        self.reactor.remove_reader(self.fd);
        self.reactor.remove_writer(self.fd);
        self.protocol.borrow_mut().connection_lost(None);
    }

    fn abort(&self) {
        self.outgoing.borrow_mut().clear();
        self.close();
    }

    fn get_extra_info(&self, key: ExtraInfoKey) -> Option<ExtraInfo> {
        match key {
            ExtraInfoKey::PeerName => self.remote_address.map(ExtraInfo::PeerName),
            ExtraInfoKey::Socket => Some(ExtraInfo::Socket(self.fd)),
            ExtraInfoKey::ServerHostName | ExtraInfoKey::Other(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell as StdRefCell;
    use std::collections::HashMap;
    use std::rc::Rc;
    use std::time::Duration;

    use super::*;

    #[derive(Default)]
    struct TestReactor {
        readers: StdRefCell<HashMap<RawFd, Rc<dyn Fn()>>>,
        writers: StdRefCell<HashMap<RawFd, Rc<dyn Fn()>>>,
    }

    impl Reactor for TestReactor {
        fn add_reader(&self, fd: RawFd, callback: Rc<dyn Fn()>) {
            self.readers.borrow_mut().insert(fd, callback);
        }
        fn add_writer(&self, fd: RawFd, callback: Rc<dyn Fn()>) {
            self.writers.borrow_mut().insert(fd, callback);
        }
        fn remove_reader(&self, fd: RawFd) -> bool {
            self.readers.borrow_mut().remove(&fd).is_some()
        }
        fn remove_writer(&self, fd: RawFd) -> bool {
            self.writers.borrow_mut().remove(&fd).is_some()
        }
        fn call_soon(&self, callback: Box<dyn FnOnce()>) {
            callback();
        }
        fn call_later(&self, _delay: Duration, callback: Box<dyn FnOnce()>) {
            callback();
        }
    }

    impl TestReactor {
        fn run_reader(&self, fd: RawFd) {
            if let Some(cb) = self.readers.borrow().get(&fd).cloned() {
                cb();
            }
        }
    }

    struct RecordingProtocol {
        datagrams: Rc<StdRefCell<Vec<(Vec<u8>, SocketAddr)>>>,
    }

    impl DatagramProtocol for RecordingProtocol {
        fn connection_made(&mut self, _transport: Rc<dyn DatagramTransport>) {}
        fn datagram_received(&mut self, data: &[u8], address: SocketAddr) {
            self.datagrams.borrow_mut().push((data.to_vec(), address));
        }
        fn error_received(&mut self, _error: Error) {}
        fn connection_lost(&mut self, _error: Option<Error>) {}
    }

    #[test]
    fn receives_datagram_and_sends_reply() {
        let reactor = Rc::new(TestReactor::default());
        let server = UdpSocket::bind("127.0.0.1:0").unwrap();
        let server_addr = server.local_addr().unwrap();
        let client = UdpSocket::bind("127.0.0.1:0").unwrap();
        let client_addr = client.local_addr().unwrap();

        let datagrams = Rc::new(StdRefCell::new(Vec::new()));
        let protocol = Box::new(RecordingProtocol { datagrams: Rc::clone(&datagrams) });

        let reactor_dyn: Rc<dyn Reactor> = reactor.clone();
        let transport = UdpTransport::new(reactor_dyn, server, None, protocol).unwrap();
        let fd = transport.inner.fd;

        client.send_to(b"ping", server_addr).unwrap();
        std::thread::sleep(Duration::from_millis(50));
        reactor.run_reader(fd);

        assert_eq!(datagrams.borrow().len(), 1);
        assert_eq!(datagrams.borrow()[0].0, b"ping");
        assert_eq!(datagrams.borrow()[0].1, client_addr);

        transport.inner.send_to(b"pong", Some(client_addr));
        std::thread::sleep(Duration::from_millis(50));
        let mut buf = [0u8; 16];
        client.set_nonblocking(false).unwrap();
        client.set_read_timeout(Some(Duration::from_secs(1))).unwrap();
        let n = client.recv(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"pong");
    }
}
