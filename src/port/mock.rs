//! Scripted device for exercising the I/O engine and the event listener
//! without hardware.
//!
//! Reads, writes and line-status samples are played back from scripts, so a
//! test can inject interruptions, partial transfers, would-block conditions
//! and errors at exact points.

use crate::error::{Result, SerialError};
use crate::listener::LineStatusSource;
use crate::port::io::RawIo;
use crate::port::settings::LineStatus;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::io;
use std::sync::Arc;

/// One scripted outcome of a `read` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadStep {
    /// Deliver these bytes. A step larger than the caller's buffer is split.
    Data(Vec<u8>),
    Interrupted,
    WouldBlock,
    Eof,
    /// Fail with this errno.
    Error(i32),
}

impl ReadStep {
    pub fn data(bytes: &[u8]) -> Self {
        Self::Data(bytes.to_vec())
    }
}

/// One scripted outcome of a `write` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteStep {
    /// Accept at most this many bytes.
    Accept(usize),
    Interrupted,
    WouldBlock,
    Error(i32),
}

#[derive(Debug, Default)]
struct MockState {
    reads: VecDeque<ReadStep>,
    writes: VecDeque<WriteStep>,
    written: Vec<u8>,
    drain_calls: usize,
    writable_waits: usize,
    drain_error: Option<i32>,
    line_samples: VecDeque<Result<LineStatus>>,
    line_status: LineStatus,
    line_reads: usize,
}

/// A scripted serial device.
///
/// With empty scripts, reads report would-block, writes accept everything
/// and the line status stays at its last value. Clones share state.
#[derive(Debug, Clone, Default)]
pub struct MockDevice {
    state: Arc<Mutex<MockState>>,
}

impl MockDevice {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append steps to the read script.
    pub fn script_reads(&self, steps: impl IntoIterator<Item = ReadStep>) {
        self.state.lock().reads.extend(steps);
    }

    /// Append steps to the write script.
    pub fn script_writes(&self, steps: impl IntoIterator<Item = WriteStep>) {
        self.state.lock().writes.extend(steps);
    }

    /// Make the next `drain` fail with `errno`.
    pub fn fail_next_drain(&self, errno: i32) {
        self.state.lock().drain_error = Some(errno);
    }

    /// Queue line-status samples; the last successful one repeats afterwards.
    pub fn script_line_status(&self, samples: impl IntoIterator<Item = Result<LineStatus>>) {
        self.state.lock().line_samples.extend(samples);
    }

    /// Every byte accepted by `write` so far.
    pub fn written(&self) -> Vec<u8> {
        self.state.lock().written.clone()
    }

    pub fn drain_calls(&self) -> usize {
        self.state.lock().drain_calls
    }

    pub fn writable_waits(&self) -> usize {
        self.state.lock().writable_waits
    }

    /// Number of line-status samples taken.
    pub fn line_reads(&self) -> usize {
        self.state.lock().line_reads
    }

    /// Whether every scripted read has been consumed.
    pub fn reads_exhausted(&self) -> bool {
        self.state.lock().reads.is_empty()
    }
}

impl RawIo for MockDevice {
    fn read(&self, buf: &mut [u8]) -> io::Result<usize> {
        let mut state = self.state.lock();
        match state.reads.pop_front() {
            None | Some(ReadStep::WouldBlock) => Err(io::ErrorKind::WouldBlock.into()),
            Some(ReadStep::Interrupted) => Err(io::ErrorKind::Interrupted.into()),
            Some(ReadStep::Eof) => Ok(0),
            Some(ReadStep::Error(errno)) => Err(io::Error::from_raw_os_error(errno)),
            Some(ReadStep::Data(mut bytes)) => {
                let n = bytes.len().min(buf.len());
                buf[..n].copy_from_slice(&bytes[..n]);
                if n < bytes.len() {
                    let rest = bytes.split_off(n);
                    state.reads.push_front(ReadStep::Data(rest));
                }
                Ok(n)
            }
        }
    }

    fn write(&self, buf: &[u8]) -> io::Result<usize> {
        let mut state = self.state.lock();
        let limit = match state.writes.pop_front() {
            None => buf.len(),
            Some(WriteStep::Accept(limit)) => limit.min(buf.len()),
            Some(WriteStep::Interrupted) => return Err(io::ErrorKind::Interrupted.into()),
            Some(WriteStep::WouldBlock) => return Err(io::ErrorKind::WouldBlock.into()),
            Some(WriteStep::Error(errno)) => return Err(io::Error::from_raw_os_error(errno)),
        };
        state.written.extend_from_slice(&buf[..limit]);
        Ok(limit)
    }

    fn drain(&self) -> Result<()> {
        let mut state = self.state.lock();
        state.drain_calls += 1;
        match state.drain_error.take() {
            Some(errno) => Err(SerialError::os("tcdrain", io::Error::from_raw_os_error(errno))),
            None => Ok(()),
        }
    }

    fn wait_writable(&self) -> io::Result<()> {
        self.state.lock().writable_waits += 1;
        Ok(())
    }
}

impl LineStatusSource for MockDevice {
    fn line_status(&self) -> Result<LineStatus> {
        let mut state = self.state.lock();
        state.line_reads += 1;
        match state.line_samples.pop_front() {
            Some(Ok(status)) => {
                state.line_status = status;
                Ok(status)
            }
            Some(Err(err)) => Err(err),
            None => Ok(state.line_status),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_oversized_data_step_is_split() {
        let device = MockDevice::new();
        device.script_reads([ReadStep::data(b"Hello, World!")]);

        let mut buf = [0u8; 5];
        assert_eq!(device.read(&mut buf).unwrap(), 5);
        assert_eq!(&buf, b"Hello");
        assert!(!device.reads_exhausted());
    }

    #[test]
    fn test_empty_scripts_have_defaults() {
        let device = MockDevice::new();
        let mut buf = [0u8; 4];
        assert_eq!(
            device.read(&mut buf).unwrap_err().kind(),
            io::ErrorKind::WouldBlock
        );
        assert_eq!(device.write(b"abc").unwrap(), 3);
        assert_eq!(device.written(), b"abc");
    }

    #[test]
    fn test_line_status_repeats_last_sample() {
        let device = MockDevice::new();
        let cts = LineStatus {
            cts: true,
            ..LineStatus::default()
        };
        device.script_line_status([Ok(cts), Err(SerialError::unsupported("TIOCMGET"))]);

        assert_eq!(device.line_status().unwrap(), cts);
        assert!(device.line_status().is_err());
        assert_eq!(device.line_status().unwrap(), cts);
        assert_eq!(device.line_reads(), 3);
    }

    #[test]
    fn test_drain_failure_is_one_shot() {
        let device = MockDevice::new();
        device.fail_next_drain(libc::EIO);
        assert!(device.drain().is_err());
        assert!(device.drain().is_ok());
        assert_eq!(device.drain_calls(), 2);
    }
}
