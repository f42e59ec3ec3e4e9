// Copyright (c) The Corio Project Authors.
// Licensed under the MIT License.

//! The self-pipe wakeup mechanism (spec §3 "Self-pipe", §6 "Self-pipe protocol"): a connected
//! socket pair the event loop always keeps a reader registered on, so a cross-thread submission
//! can interrupt a blocking [`crate::Selector::poll`] call.

use std::os::fd::{AsRawFd, RawFd};
use std::os::unix::net::UnixStream;

use crate::error::{Error, Result};

/// One byte written per wakeup, per spec §6: `\x00`.
const WAKE_BYTE: [u8; 1] = [0];

/// The read half of the pipe, owned by the event loop. Registered with the selector for the
/// lifetime of the loop.
#[derive(Debug)]
pub struct SelfPipe {
    read: UnixStream,
    write_fd: RawFd,
}

/// A cheap, `Send + Sync` handle to the write half, usable from any thread to wake the loop.
#[derive(Debug, Clone)]
pub struct SelfPipeWriter {
    fd: RawFd,
}

// SAFETY: writing a single byte (far below `PIPE_BUF`) to a socket fd from multiple threads
// concurrently is a plain, independent `write(2)` syscall per caller; the kernel serializes the
// underlying buffer append so no caller observes torn writes.
unsafe impl Send for SelfPipeWriter {}
// SAFETY: see above; `wake` takes `&self` and performs no interior mutation besides the syscall.
unsafe impl Sync for SelfPipeWriter {}

impl SelfPipe {
    /// Creates a new connected, non-blocking socket pair.
    pub fn new() -> Result<Self> {
        let (read, write) = UnixStream::pair().map_err(Error::StdIo)?;
        read.set_nonblocking(true).map_err(Error::StdIo)?;
        write.set_nonblocking(true).map_err(Error::StdIo)?;

        let write_fd = write.as_raw_fd();
        // The write half only ever needs `write(2)`; leak it as a raw fd owned by `SelfPipeWriter`
        // clones instead of keeping a `UnixStream` around (which would require synchronizing
        // `write_all` calls across threads for no benefit over a direct syscall).
        std::mem::forget(write);

        Ok(Self { read, write_fd })
    }

    /// The read end's raw file descriptor, registered with the loop's selector.
    #[must_use]
    pub fn read_fd(&self) -> RawFd {
        self.read.as_raw_fd()
    }

    /// Returns a cloneable, thread-safe writer for waking this pipe's reader.
    #[must_use]
    pub fn writer(&self) -> SelfPipeWriter {
        SelfPipeWriter { fd: self.write_fd }
    }

    /// Drains every pending byte from the read end. Called once the selector reports the
    /// self-pipe's fd as readable; never blocks.
    pub fn drain(&self) {
        let mut buffer = [0u8; 256];
        loop {
            // SAFETY: `buffer` is a valid, appropriately-sized buffer for the duration of the
            // call; the fd is owned by `self.read` and non-blocking.
            let result = unsafe {
                libc::read(
                    self.read.as_raw_fd(),
                    buffer.as_mut_ptr().cast(),
                    buffer.len(),
                )
            };
            if result <= 0 {
                break;
            }
        }
    }
}

impl Drop for SelfPipe {
    fn drop(&mut self) {
        // SAFETY: `write_fd` was forgotten out of a `UnixStream` in `new` and is not used
        // elsewhere after this point; it is closed exactly once, here.
        unsafe {
            libc::close(self.write_fd);
        }
    }
}

impl SelfPipeWriter {
    /// Writes a single wakeup byte. Errors (e.g. a full pipe buffer, which only means a wakeup
    /// is already pending) are intentionally ignored: spec §6 only promises "no wakeup is lost",
    /// not that every write succeeds.
    pub fn wake(&self) {
        // SAFETY: `fd` remains open for the process lifetime (owned by the `SelfPipe` that
        // produced this writer); `WAKE_BYTE` is a valid 1-byte buffer.
        unsafe {
            libc::write(self.fd, WAKE_BYTE.as_ptr().cast(), WAKE_BYTE.len());
        }
    }
}
