//! Retry-safe byte I/O on a non-blocking descriptor.
//!
//! Both engine functions are generic over [`RawIo`] so interruption and
//! partial-transfer handling can be driven by a scripted device in tests.

use crate::error::{Result, SerialError};
use crate::platform::TerminalDriver;
use std::io;
use std::os::fd::{AsRawFd, BorrowedFd};
use tracing::{debug, trace};

/// The four primitive operations the I/O engine needs.
///
/// `read` and `write` report errors as [`io::Error`] so the engine can tell
/// interruption and would-block apart from real failures.
pub trait RawIo {
    fn read(&self, buf: &mut [u8]) -> io::Result<usize>;

    fn write(&self, buf: &[u8]) -> io::Result<usize>;

    /// Block until everything written has left the device.
    fn drain(&self) -> Result<()>;

    /// Block until the descriptor can accept more bytes.
    fn wait_writable(&self) -> io::Result<()>;
}

/// [`RawIo`] over a borrowed terminal descriptor.
#[derive(Debug)]
pub struct FdIo<'a, D: TerminalDriver + ?Sized> {
    fd: BorrowedFd<'a>,
    driver: &'a D,
}

impl<'a, D: TerminalDriver + ?Sized> FdIo<'a, D> {
    pub fn new(fd: BorrowedFd<'a>, driver: &'a D) -> Self {
        Self { fd, driver }
    }
}

impl<D: TerminalDriver + ?Sized> RawIo for FdIo<'_, D> {
    fn read(&self, buf: &mut [u8]) -> io::Result<usize> {
        let n = unsafe { libc::read(self.fd.as_raw_fd(), buf.as_mut_ptr().cast(), buf.len()) };
        if n < 0 {
            Err(io::Error::last_os_error())
        } else {
            Ok(n as usize)
        }
    }

    fn write(&self, buf: &[u8]) -> io::Result<usize> {
        let n = unsafe { libc::write(self.fd.as_raw_fd(), buf.as_ptr().cast(), buf.len()) };
        if n < 0 {
            Err(io::Error::last_os_error())
        } else {
            Ok(n as usize)
        }
    }

    fn drain(&self) -> Result<()> {
        self.driver.drain(self.fd.as_raw_fd())
    }

    fn wait_writable(&self) -> io::Result<()> {
        let mut pfd = libc::pollfd {
            fd: self.fd.as_raw_fd(),
            events: libc::POLLOUT,
            revents: 0,
        };
        loop {
            let ret = unsafe { libc::poll(&mut pfd, 1, -1) };
            if ret >= 0 {
                return Ok(());
            }
            let err = io::Error::last_os_error();
            if err.kind() != io::ErrorKind::Interrupted {
                return Err(err);
            }
        }
    }
}

/// Largest number of bytes one call hands back, whatever `max` asks for.
pub const READ_LIMIT: usize = 3 * 1024;

/// Read whatever is pending, up to `max` bytes (at most [`READ_LIMIT`]).
///
/// Interrupted reads are retried and bytes obtained before an interruption
/// are kept. Returns an empty buffer when nothing is pending or at end of
/// stream. A failure after some bytes were read returns those bytes; the
/// failure will surface again on the next call.
///
/// Keeps reading until the descriptor would block, so it must only be used
/// on non-blocking descriptors. See [`read_once`] otherwise.
pub fn read_available<R: RawIo + ?Sized>(io: &R, max: usize) -> Result<Vec<u8>> {
    let max = max.min(READ_LIMIT);
    let mut buf = vec![0u8; max];
    let mut filled = 0;

    while filled < max {
        match io.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
            Err(e) if filled > 0 => {
                debug!(error = %e, filled, "read failed after partial data");
                break;
            }
            Err(e) => return Err(SerialError::os("read", e)),
        }
    }

    buf.truncate(filled);
    trace!(len = filled, "read_available");
    Ok(buf)
}

/// Issue a single read of up to `max` bytes (at most [`READ_LIMIT`]).
///
/// Only interruption is retried. Meant for callers that already know the
/// descriptor is readable, so it never blocks twice on a blocking
/// descriptor. Would-block and end of stream yield an empty buffer.
pub fn read_once<R: RawIo + ?Sized>(io: &R, max: usize) -> Result<Vec<u8>> {
    let mut buf = vec![0u8; max.min(READ_LIMIT)];
    loop {
        match io.read(&mut buf) {
            Ok(n) => {
                buf.truncate(n);
                return Ok(buf);
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(Vec::new()),
            Err(e) => return Err(SerialError::os("read", e)),
        }
    }
}

/// Write every byte of `bytes`, then wait for transmission to finish.
///
/// A failure other than interruption aborts at once. Bytes the OS accepted
/// before the failure have been sent; there is no rollback.
pub fn write_all<R: RawIo + ?Sized>(io: &R, bytes: &[u8]) -> Result<()> {
    let mut offset = 0;

    while offset < bytes.len() {
        match io.write(&bytes[offset..]) {
            Ok(0) => io.wait_writable().map_err(|e| SerialError::os("poll", e))?,
            Ok(n) => offset += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                io.wait_writable().map_err(|e| SerialError::os("poll", e))?
            }
            Err(e) => return Err(SerialError::os("write", e)),
        }
    }

    io.drain()?;
    trace!(len = bytes.len(), "write_all");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::port::mock::{MockDevice, ReadStep, WriteStep};
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    #[test]
    fn test_read_retries_interruption_before_data() {
        let device = MockDevice::new();
        device.script_reads([ReadStep::Interrupted, ReadStep::Interrupted, ReadStep::data(b"abc")]);
        assert_eq!(read_available(&device, 16).unwrap(), b"abc");
    }

    #[test]
    fn test_read_keeps_bytes_across_interruption() {
        let device = MockDevice::new();
        device.script_reads([
            ReadStep::data(b"PI"),
            ReadStep::Interrupted,
            ReadStep::data(b"NG"),
            ReadStep::WouldBlock,
            ReadStep::data(b"late"),
        ]);
        assert_eq!(read_available(&device, 16).unwrap(), b"PING");
        assert_eq!(read_available(&device, 16).unwrap(), b"late");
    }

    #[test]
    fn test_read_nothing_pending_is_empty_not_error() {
        let device = MockDevice::new();
        assert!(read_available(&device, 8).unwrap().is_empty());

        device.script_reads([ReadStep::Eof]);
        assert!(read_available(&device, 8).unwrap().is_empty());
    }

    #[test]
    fn test_read_is_bounded_by_max() {
        let device = MockDevice::new();
        device.script_reads([ReadStep::data(b"0123456789")]);
        assert_eq!(read_available(&device, 4).unwrap(), b"0123");
        assert_eq!(read_available(&device, 100).unwrap(), b"456789");
    }

    #[test]
    fn test_read_error_without_data_carries_errno() {
        let device = MockDevice::new();
        device.script_reads([ReadStep::Error(libc::EIO)]);
        let err = read_available(&device, 8).unwrap_err();
        assert_eq!(
            err,
            SerialError::OsCallFailed {
                operation: "read",
                code: libc::EIO
            }
        );
    }

    #[test]
    fn test_read_error_after_data_returns_the_data() {
        let device = MockDevice::new();
        device.script_reads([ReadStep::data(b"ok"), ReadStep::Error(libc::EIO)]);
        assert_eq!(read_available(&device, 8).unwrap(), b"ok");
    }

    #[test]
    fn test_huge_max_is_capped() {
        let device = MockDevice::new();
        device.script_reads([ReadStep::data(&[7u8; READ_LIMIT + 10])]);
        let first = read_available(&device, usize::MAX).unwrap();
        assert_eq!(first.len(), READ_LIMIT);
        assert_eq!(read_available(&device, usize::MAX).unwrap(), vec![7u8; 10]);
        assert!(read_once(&device, usize::MAX).unwrap().is_empty());
    }

    #[test]
    fn test_read_once_issues_a_single_read() {
        let device = MockDevice::new();
        device.script_reads([
            ReadStep::Interrupted,
            ReadStep::data(b"PI"),
            ReadStep::data(b"NG"),
        ]);
        assert_eq!(read_once(&device, 16).unwrap(), b"PI");
        assert!(!device.reads_exhausted());
        assert_eq!(read_once(&device, 16).unwrap(), b"NG");
    }

    #[test]
    fn test_read_once_would_block_and_error() {
        let device = MockDevice::new();
        device.script_reads([ReadStep::WouldBlock, ReadStep::Error(libc::EIO)]);
        assert!(read_once(&device, 8).unwrap().is_empty());
        assert_eq!(read_once(&device, 8).unwrap_err().raw_os_error(), Some(libc::EIO));
    }

    #[test]
    fn test_write_handles_partial_and_interrupted_writes() {
        let device = MockDevice::new();
        device.script_writes([
            WriteStep::Accept(3),
            WriteStep::Interrupted,
            WriteStep::WouldBlock,
            WriteStep::Accept(0),
            WriteStep::Accept(2),
        ]);
        write_all(&device, b"hello world").unwrap();
        assert_eq!(device.written(), b"hello world");
        assert_eq!(device.writable_waits(), 2);
        assert_eq!(device.drain_calls(), 1);
    }

    #[test]
    fn test_write_error_aborts_without_rollback() {
        let device = MockDevice::new();
        device.script_writes([WriteStep::Accept(4), WriteStep::Error(libc::EIO)]);
        let err = write_all(&device, b"PING-PONG").unwrap_err();
        assert_eq!(err.raw_os_error(), Some(libc::EIO));
        assert_eq!(device.written(), b"PING");
        assert_eq!(device.drain_calls(), 0);
    }

    #[test]
    fn test_empty_write_still_drains() {
        let device = MockDevice::new();
        write_all(&device, b"").unwrap();
        assert!(device.written().is_empty());
        assert_eq!(device.drain_calls(), 1);
    }

    fn read_script() -> impl Strategy<Value = Vec<ReadStep>> {
        prop::collection::vec(
            prop_oneof![
                prop::collection::vec(any::<u8>(), 1..32).prop_map(ReadStep::Data),
                Just(ReadStep::Interrupted),
            ],
            0..24,
        )
    }

    proptest! {
        #[test]
        fn prop_interruptions_never_drop_or_duplicate(script in read_script(), max in 1usize..64) {
            let delivered: Vec<u8> = script
                .iter()
                .filter_map(|step| match step {
                    ReadStep::Data(bytes) => Some(bytes.clone()),
                    _ => None,
                })
                .flatten()
                .collect();

            let device = MockDevice::new();
            device.script_reads(script);

            let mut received = Vec::new();
            loop {
                let chunk = read_available(&device, max).unwrap();
                if chunk.is_empty() {
                    break;
                }
                prop_assert!(chunk.len() <= max);
                received.extend(chunk);
            }
            prop_assert_eq!(received, delivered);
        }
    }
}
