// Copyright (c) The Corio Project Authors.
// Licensed under the MIT License.

//! The platform readiness selector: a thin `epoll` wrapper reporting which registered file
//! descriptors became readable or writable (spec §4.1, §4.2).
//!
//! Per spec §4.2 "on POSIX, the platform selector is used directly" — there is no fd-count
//! sharding here, only on the Windows selector the original source shards around. We target
//! Linux, so `epoll` is it.

use std::collections::HashSet;
use std::os::fd::RawFd;
use std::time::Duration;

use crate::error::{Error, Result};

/// Readiness reported for one file descriptor in a single [`Selector::poll`] call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Readiness {
    /// The descriptor became readable (or hung up / errored, which we also surface as readable
    /// so a reader callback observes the EOF/error on its next read).
    pub readable: bool,
    /// The descriptor became writable.
    pub writable: bool,
}

/// A wrapper over an `epoll` instance tracking which descriptors are registered for which
/// interest, since `epoll_ctl` distinguishes `ADD` from `MOD` (spec §6 "Selector events").
#[derive(Debug)]
pub struct Selector {
    epoll_fd: RawFd,
    registered: std::cell::RefCell<HashSet<RawFd>>,
}

impl Selector {
    /// Creates a new `epoll` instance.
    pub fn new() -> Result<Self> {
        // SAFETY: `epoll_create1` has no preconditions beyond a valid flags argument; `0` is
        // always valid. We check the returned fd for `-1` below.
        let epoll_fd = unsafe { libc::epoll_create1(0) };
        if epoll_fd < 0 {
            return Err(Error::StdIo(std::io::Error::last_os_error()));
        }
        Ok(Self {
            epoll_fd,
            registered: std::cell::RefCell::new(HashSet::new()),
        })
    }

    /// Registers `fd` for read readiness only. Used for the loop's self-pipe, which never needs
    /// write interest.
    pub fn register_read(&self, fd: RawFd) -> Result<()> {
        self.modify(fd, true, false)
    }

    /// Registers, or updates the interest mask of, `fd` to the given readable/writable interest.
    /// Per spec §6 "zero-mask keys are unregistered", passing `false`/`false` deregisters `fd`.
    pub fn modify(&self, fd: RawFd, readable: bool, writable: bool) -> Result<()> {
        if !readable && !writable {
            return self.deregister(fd);
        }

        let mut events = 0u32;
        if readable {
            events |= libc::EPOLLIN as u32;
        }
        if writable {
            events |= libc::EPOLLOUT as u32;
        }

        let mut event = libc::epoll_event {
            events,
            u64: fd as u64,
        };

        let already_registered = self.registered.borrow().contains(&fd);
        let op = if already_registered {
            libc::EPOLL_CTL_MOD
        } else {
            libc::EPOLL_CTL_ADD
        };

        // SAFETY: `epoll_fd` is a valid epoll instance owned by `self`; `event` is a valid,
        // live pointer for the duration of the call.
        let result = unsafe { libc::epoll_ctl(self.epoll_fd, op, fd, &raw mut event) };
        if result < 0 {
            return Err(Error::StdIo(std::io::Error::last_os_error()));
        }

        self.registered.borrow_mut().insert(fd);
        Ok(())
    }

    /// Removes `fd` from the selector entirely. A no-op if it was never registered.
    pub fn deregister(&self, fd: RawFd) -> Result<()> {
        if !self.registered.borrow_mut().remove(&fd) {
            return Ok(());
        }

        // SAFETY: `epoll_fd` is valid; the event pointer is ignored by the kernel for `CTL_DEL`
        // on modern Linux but older kernels require a non-null pointer, so we pass one anyway.
        let mut event = libc::epoll_event { events: 0, u64: 0 };
        let result =
            unsafe { libc::epoll_ctl(self.epoll_fd, libc::EPOLL_CTL_DEL, fd, &raw mut event) };
        if result < 0 {
            let err = std::io::Error::last_os_error();
            // The fd may already have been closed by its owner; that is not a selector error.
            if err.raw_os_error() != Some(libc::EBADF) {
                return Err(Error::StdIo(err));
            }
        }
        Ok(())
    }

    /// Blocks for at most `timeout` (or indefinitely if `None`) waiting for any registered
    /// descriptor to become ready, returning the set of `(fd, Readiness)` pairs observed.
    pub fn poll(&self, timeout: Option<Duration>) -> Result<Vec<(RawFd, Readiness)>> {
        let timeout_ms = match timeout {
            None => -1,
            Some(duration) => i32::try_from(duration.as_millis()).unwrap_or(i32::MAX),
        };

        let mut events = vec![libc::epoll_event { events: 0, u64: 0 }; 256];
        // SAFETY: `events` is a valid, appropriately-sized buffer for up to its length worth of
        // results; `epoll_fd` is owned by `self`.
        let count = unsafe {
            libc::epoll_wait(
                self.epoll_fd,
                events.as_mut_ptr(),
                events.len() as i32,
                timeout_ms,
            )
        };

        if count < 0 {
            let err = std::io::Error::last_os_error();
            if err.kind() == std::io::ErrorKind::Interrupted {
                return Ok(Vec::new());
            }
            return Err(Error::StdIo(err));
        }

        let mut ready = Vec::with_capacity(count as usize);
        for event in &events[..count as usize] {
            let fd = event.u64 as RawFd;
            let mask = event.events;
            let hangup_or_error =
                (mask & (libc::EPOLLHUP as u32 | libc::EPOLLERR as u32 | libc::EPOLLRDHUP as u32)) != 0;
            ready.push((
                fd,
                Readiness {
                    readable: (mask & libc::EPOLLIN as u32) != 0 || hangup_or_error,
                    writable: (mask & libc::EPOLLOUT as u32) != 0,
                },
            ));
        }
        Ok(ready)
    }
}

impl Drop for Selector {
    fn drop(&mut self) {
        // SAFETY: `epoll_fd` is owned exclusively by `self` and not used again after this call.
        unsafe {
            libc::close(self.epoll_fd);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::os::fd::AsRawFd;
    use std::os::unix::net::UnixStream;

    use super::*;

    #[test]
    fn reports_readable_after_write() {
        let (a, mut b) = UnixStream::pair().expect("socket pair");
        a.set_nonblocking(true).expect("nonblocking");

        let selector = Selector::new().expect("selector");
        selector.modify(a.as_raw_fd(), true, false).expect("register");

        use std::io::Write;
        b.write_all(b"x").expect("write");

        let ready = selector.poll(Some(Duration::from_secs(1))).expect("poll");
        assert_eq!(ready.len(), 1);
        assert_eq!(ready[0].0, a.as_raw_fd());
        assert!(ready[0].1.readable);
    }

    #[test]
    fn poll_times_out_with_nothing_ready() {
        let (a, _b) = UnixStream::pair().expect("socket pair");
        a.set_nonblocking(true).expect("nonblocking");

        let selector = Selector::new().expect("selector");
        selector.modify(a.as_raw_fd(), true, false).expect("register");

        let ready = selector
            .poll(Some(Duration::from_millis(10)))
            .expect("poll");
        assert!(ready.is_empty());
    }

    #[test]
    fn zero_mask_deregisters() {
        let (a, _b) = UnixStream::pair().expect("socket pair");
        let selector = Selector::new().expect("selector");
        selector.modify(a.as_raw_fd(), true, false).expect("register");
        selector.modify(a.as_raw_fd(), false, false).expect("deregister via zero mask");
        assert!(!selector.registered.borrow().contains(&a.as_raw_fd()));
    }
}
