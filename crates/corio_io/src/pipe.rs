// Copyright (c) The Corio Project Authors.
// Licensed under the MIT License.

//! Half-duplex UNIX pipe transports (spec §4.6 "Pipe transports (UNIX)").
//!
//! Only pipes, sockets, and character devices are accepted, per spec: attempting to wrap a
//! regular file (which is always "ready" and would busy-loop the selector) is rejected.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::fs::File;
use std::io::{ErrorKind, Read, Write};
use std::os::fd::{AsRawFd, FromRawFd, RawFd};
use std::rc::{Rc, Weak};

use crate::error::Error;
use crate::reactor::Reactor;
use crate::transport::{ExtraInfo, ExtraInfoKey, Protocol, Transport, Watermarks};

const READ_CHUNK_SIZE: usize = 64 * 1024;

/// Checks that `fd` refers to a FIFO, socket, or character device (spec §4.6: "Only pipes,
/// sockets, and character devices are accepted").
fn assert_supported_fd_kind(fd: RawFd) -> crate::error::Result<()> {
    let mut stat: libc::stat = unsafe { std::mem::zeroed() };
    // SAFETY: `fd` is a valid, open file descriptor for the duration of this call; `stat` is a
    // correctly sized, writable buffer for `fstat` to populate.
    let result = unsafe { libc::fstat(fd, &raw mut stat) };
    if result < 0 {
        return Err(Error::StdIo(std::io::Error::last_os_error()));
    }

    let file_type = stat.st_mode & libc::S_IFMT;
    let supported = matches!(file_type, libc::S_IFIFO | libc::S_IFSOCK | libc::S_IFCHR);
    if !supported {
        return Err(Error::ContractViolation(
            "pipe transports only support FIFOs, sockets, and character devices".to_string(),
        ));
    }
    Ok(())
}

fn set_nonblocking(fd: RawFd) -> crate::error::Result<()> {
    // SAFETY: `fd` is a valid, open descriptor owned by the caller for the duration of the call.
    let flags = unsafe { libc::fcntl(fd, libc::F_GETFL) };
    if flags < 0 {
        return Err(Error::StdIo(std::io::Error::last_os_error()));
    }
    // SAFETY: see above.
    let result = unsafe { libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK) };
    if result < 0 {
        return Err(Error::StdIo(std::io::Error::last_os_error()));
    }
    Ok(())
}

struct ReadInner {
    reactor: Rc<dyn Reactor>,
    file: File,
    fd: RawFd,
    protocol: RefCell<Box<dyn Protocol>>,
    closed: Cell<bool>,
}

/// A read-only pipe transport (spec §4.6): delivers `data_received` as bytes arrive, then
/// `eof_received`/`connection_lost` when the write end closes.
#[derive(Clone)]
pub struct PipeReadTransport {
    inner: Rc<ReadInner>,
}

struct NullProtocol;
impl Protocol for NullProtocol {
    fn connection_made(&mut self, _transport: Rc<dyn Transport>) {}
    fn data_received(&mut self, _data: &[u8]) {}
    fn connection_lost(&mut self, _error: Option<Error>) {}
}

impl PipeReadTransport {
    /// Wraps `fd` (taking ownership) as a read-only pipe transport.
    ///
    /// # Safety
    ///
    /// `fd` must be a currently-open, otherwise-unowned file descriptor referring to a FIFO,
    /// socket, or character device; ownership transfers to the returned transport.
    pub unsafe fn from_raw_fd(
        reactor: Rc<dyn Reactor>,
        fd: RawFd,
        mut protocol: Box<dyn Protocol>,
    ) -> crate::error::Result<Self> {
        assert_supported_fd_kind(fd)?;
        set_nonblocking(fd)?;
        // SAFETY: the caller guarantees `fd` is open and otherwise unowned; `File` becomes its
        // sole owner from this point on.
        let file = unsafe { File::from_raw_fd(fd) };

        let inner = Rc::new(ReadInner {
            reactor: Rc::clone(&reactor),
            file,
            fd,
            protocol: RefCell::new(Box::new(NullProtocol)),
            closed: Cell::new(false),
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

impl ReadInner {
    fn on_readable(&self) {
        if self.closed.get() {
            return;
        }

        let mut buffer = [0u8; READ_CHUNK_SIZE];
        loop {
            match (&self.file).read(&mut buffer) {
                Ok(0) => {
                    let keep_open = self.protocol.borrow_mut().eof_received();
                    self.reactor.remove_reader(self.fd);
                    if !keep_open {
                        self.finish_close(None);
                    }
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
                    self.finish_close(Some(Error::StdIo(error)));
                    return;
                }
            }
        }
    }

    fn finish_close(&self, error: Option<Error>) {
        if self.closed.replace(true) {
            return;
        }
        self.reactor.remove_reader(self.fd);
        self.protocol.borrow_mut().connection_lost(error);
    }
}

impl Transport for ReadInner {
    fn write(&self, _data: &[u8]) {
        tracing::error!("write() called on a read-only pipe transport; ignored");
    }

    fn write_eof(&self) {}

    fn close(&self) {
        self.finish_close(None);
    }

    fn abort(&self) {
        self.finish_close(None);
    }

    fn get_extra_info(&self, key: ExtraInfoKey) -> Option<ExtraInfo> {
        match key {
            ExtraInfoKey::Socket => Some(ExtraInfo::Socket(self.fd)),
            _ => None,
        }
    }

    fn set_write_buffer_limits(&self, _high: usize, _low: usize) {}

    fn get_write_buffer_size(&self) -> usize {
        0
    }

    fn is_closing(&self) -> bool {
        self.closed.get()
    }
}

struct WriteInner {
    reactor: Rc<dyn Reactor>,
    file: File,
    fd: RawFd,
    write_buffer: RefCell<VecDeque<u8>>,
    watermarks: Cell<Watermarks>,
    paused_writing: Cell<bool>,
    writer_registered: Cell<bool>,
    protocol: RefCell<Box<dyn Protocol>>,
    closing: Cell<bool>,
    closed: Cell<bool>,
    self_ref: Weak<WriteInner>,
}

/// A write-only pipe transport (spec §4.6).
#[derive(Clone)]
pub struct PipeWriteTransport {
    inner: Rc<WriteInner>,
}

impl PipeWriteTransport {
    /// Wraps `fd` (taking ownership) as a write-only pipe transport.
    ///
    /// # Safety
    ///
    /// `fd` must be a currently-open, otherwise-unowned file descriptor referring to a FIFO,
    /// socket, or character device.
    pub unsafe fn from_raw_fd(
        reactor: Rc<dyn Reactor>,
        fd: RawFd,
        mut protocol: Box<dyn Protocol>,
    ) -> crate::error::Result<Self> {
        assert_supported_fd_kind(fd)?;
        set_nonblocking(fd)?;
        // SAFETY: the caller guarantees `fd` is open and otherwise unowned.
        let file = unsafe { File::from_raw_fd(fd) };

        let inner = Rc::new_cyclic(|self_ref| WriteInner {
            reactor: Rc::clone(&reactor),
            file,
            fd,
            write_buffer: RefCell::new(VecDeque::new()),
            watermarks: Cell::new(Watermarks::default()),
            paused_writing: Cell::new(false),
            writer_registered: Cell::new(false),
            protocol: RefCell::new(Box::new(NullProtocol)),
            closing: Cell::new(false),
            closed: Cell::new(false),
            self_ref: self_ref.clone(),
        });

        std::mem::swap(&mut protocol, &mut *inner.protocol.borrow_mut());
        let transport = Self { inner: Rc::clone(&inner) };
        inner
            .protocol
            .borrow_mut()
            .connection_made(Rc::clone(&inner) as Rc<dyn Transport>);

        Ok(transport)
    }
}

impl WriteInner {
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

            match (&self.file).write(&chunk) {
                Ok(0) => break,
                Ok(n) => {
                    self.write_buffer.borrow_mut().drain(..n);
                    self.maybe_resume_writing();
                }
                Err(error) if error.kind() == ErrorKind::WouldBlock => return,
                Err(error) => {
                    self.finish_close(Some(Error::StdIo(error)));
                    return;
                }
            }
        }

        if self.write_buffer.borrow().is_empty() {
            self.reactor.remove_writer(self.fd);
            self.writer_registered.set(false);
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

    fn finish_close(&self, error: Option<Error>) {
        if self.closed.replace(true) {
            return;
        }
        self.reactor.remove_writer(self.fd);
        self.protocol.borrow_mut().connection_lost(error);
    }
}

impl Transport for WriteInner {
    fn write(&self, data: &[u8]) {
        if self.closing.get() || self.closed.get() || data.is_empty() {
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
            self.on_writable();
            if !self.write_buffer.borrow().is_empty() && !self.closed.get() {
                self.ensure_writer_registered();
            }
        }
    }

    fn write_eof(&self) {
        self.close();
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
            ExtraInfoKey::Socket => Some(ExtraInfo::Socket(self.fd)),
            _ => None,
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
        received: Rc<StdRefCell<Vec<u8>>>,
        lost: Rc<Cell<bool>>,
    }

    impl Protocol for RecordingProtocol {
        fn connection_made(&mut self, _transport: Rc<dyn Transport>) {}
        fn data_received(&mut self, data: &[u8]) {
            self.received.borrow_mut().extend_from_slice(data);
        }
        fn connection_lost(&mut self, _error: Option<Error>) {
            self.lost.set(true);
        }
    }

    fn pipe_fds() -> (RawFd, RawFd) {
        let mut fds = [0i32; 2];
        // SAFETY: `fds` is a valid, two-element buffer for `pipe` to populate.
        let result = unsafe { libc::pipe(fds.as_mut_ptr()) };
        assert_eq!(result, 0);
        (fds[0], fds[1])
    }

    #[test]
    fn reads_until_write_end_closes() {
        let (read_fd, write_fd) = pipe_fds();
        let reactor = Rc::new(TestReactor::default());
        let received = Rc::new(StdRefCell::new(Vec::new()));
        let lost = Rc::new(Cell::new(false));
        let protocol = Box::new(RecordingProtocol {
            received: Rc::clone(&received),
            lost: Rc::clone(&lost),
        });

        let reactor_dyn: Rc<dyn Reactor> = reactor.clone();
        // SAFETY: `read_fd` was just created by `pipe()` above and is otherwise unowned.
        let transport = unsafe { PipeReadTransport::from_raw_fd(reactor_dyn, read_fd, protocol) }.unwrap();

        // SAFETY: `write_fd` is a valid fd from the same `pipe()` call.
        let mut write_file = unsafe { File::from_raw_fd(write_fd) };
        write_file.write_all(b"hi").unwrap();
        reactor.run_reader(transport.inner.fd);
        assert_eq!(&*received.borrow(), b"hi");

        drop(write_file);
        reactor.run_reader(transport.inner.fd);
        assert!(lost.get());
    }
}
