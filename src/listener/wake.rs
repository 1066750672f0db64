//! Wake mechanism for threads parked in `poll`.
//!
//! On Linux this is an `eventfd`; elsewhere a non-blocking self-pipe. Either
//! way the readable end goes into the sleeper's poll set and [`Waker::wake`]
//! makes it readable.

use crate::error::{Result, SerialError};
use std::io;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::time::Duration;

#[derive(Debug)]
pub struct Waker {
    read: OwnedFd,
    #[cfg(not(target_os = "linux"))]
    write: OwnedFd,
}

impl Waker {
    #[cfg(target_os = "linux")]
    pub fn new() -> Result<Self> {
        let fd = unsafe { libc::eventfd(0, libc::EFD_CLOEXEC | libc::EFD_NONBLOCK) };
        if fd < 0 {
            return Err(SerialError::last_os_error("eventfd"));
        }
        Ok(Self {
            read: unsafe { OwnedFd::from_raw_fd(fd) },
        })
    }

    #[cfg(not(target_os = "linux"))]
    pub fn new() -> Result<Self> {
        let mut fds = [0 as libc::c_int; 2];
        if unsafe { libc::pipe(fds.as_mut_ptr()) } < 0 {
            return Err(SerialError::last_os_error("pipe"));
        }
        // Take ownership first so both ends close on any later failure.
        let (read, write) = unsafe { (OwnedFd::from_raw_fd(fds[0]), OwnedFd::from_raw_fd(fds[1])) };
        for fd in [&read, &write] {
            let raw = fd.as_raw_fd();
            crate::platform::check("fcntl(F_SETFL)", unsafe {
                libc::fcntl(raw, libc::F_SETFL, libc::O_NONBLOCK)
            })?;
            crate::platform::check("fcntl(F_SETFD)", unsafe {
                libc::fcntl(raw, libc::F_SETFD, libc::FD_CLOEXEC)
            })?;
        }
        Ok(Self { read, write })
    }

    /// Make the poll descriptor readable. Waking an already woken waker is
    /// not an error.
    pub fn wake(&self) -> Result<()> {
        #[cfg(target_os = "linux")]
        let ret = {
            let one: u64 = 1;
            unsafe {
                libc::write(
                    self.read.as_raw_fd(),
                    (&one as *const u64).cast(),
                    std::mem::size_of::<u64>(),
                )
            }
        };
        #[cfg(not(target_os = "linux"))]
        let ret = {
            let byte = 1u8;
            unsafe { libc::write(self.write.as_raw_fd(), (&byte as *const u8).cast(), 1) }
        };

        if ret < 0 {
            let err = io::Error::last_os_error();
            // A full counter or pipe already means "woken".
            if err.kind() != io::ErrorKind::WouldBlock {
                return Err(SerialError::os("wake", err));
            }
        }
        Ok(())
    }

    /// Consume pending wake-ups.
    pub fn reset(&self) {
        let mut buf = [0u8; 64];
        loop {
            let n = unsafe {
                libc::read(self.read.as_raw_fd(), buf.as_mut_ptr().cast(), buf.len())
            };
            if n <= 0 {
                break;
            }
        }
    }

    /// Sleep until woken or `timeout` elapses. Returns `true` when woken.
    pub fn wait(&self, timeout: Option<Duration>) -> Result<bool> {
        let mut pfd = libc::pollfd {
            fd: self.read.as_raw_fd(),
            events: libc::POLLIN,
            revents: 0,
        };
        let millis = timeout.map_or(-1, |t| t.as_millis().min(libc::c_int::MAX as u128) as libc::c_int);
        loop {
            let ret = unsafe { libc::poll(&mut pfd, 1, millis) };
            if ret >= 0 {
                return Ok(ret > 0 && pfd.revents & libc::POLLIN != 0);
            }
            let err = io::Error::last_os_error();
            if err.kind() != io::ErrorKind::Interrupted {
                return Err(SerialError::os("poll", err));
            }
        }
    }
}

impl AsRawFd for Waker {
    /// The descriptor to include in a poll set.
    fn as_raw_fd(&self) -> RawFd {
        self.read.as_raw_fd()
    }
}
