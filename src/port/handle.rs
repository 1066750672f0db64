//! The serial port handle.
//!
//! A [`SerialPort`] owns one non-blocking terminal descriptor. Everything it
//! does goes through the native [`TerminalDriver`], the configuration codec
//! and the I/O engine.

use crate::error::{Result, SerialError};
use crate::platform::{native, NativeDriver, TerminalDriver};
use crate::port::codec::{self, RawConfigSnapshot};
use crate::port::io::{self as engine, FdIo};
use crate::port::settings::{
    ByteCounts, InterruptCounts, LineStatus, ModemLine, PortConfiguration, QueueSelector,
};
use parking_lot::RwLock;
use std::fs::OpenOptions as FsOpenOptions;
use std::os::fd::{AsFd, AsRawFd, BorrowedFd, IntoRawFd, OwnedFd, RawFd};
use std::os::unix::fs::OpenOptionsExt;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Reader/writer gate that makes reconfiguration atomic relative to reads.
///
/// `configure` holds it exclusively; reads through the handle and
/// data-listener drains hold it shared.
pub type ConfigGate = Arc<RwLock<()>>;

/// How to open a port.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpenOptions {
    pub read: bool,
    pub write: bool,
    /// Claim exclusive ownership (`TIOCEXCL`).
    pub exclusive: bool,
    /// Configuration applied right after the line is switched to raw mode.
    pub config: PortConfiguration,
}

impl Default for OpenOptions {
    fn default() -> Self {
        Self {
            read: true,
            write: true,
            exclusive: true,
            config: PortConfiguration::default(),
        }
    }
}

impl OpenOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn read(mut self, read: bool) -> Self {
        self.read = read;
        self
    }

    pub fn write(mut self, write: bool) -> Self {
        self.write = write;
        self
    }

    pub fn exclusive(mut self, exclusive: bool) -> Self {
        self.exclusive = exclusive;
        self
    }

    pub fn config(mut self, config: PortConfiguration) -> Self {
        self.config = config;
        self
    }
}

/// An open serial port.
///
/// Dropping the handle closes the descriptor without waiting for output to
/// drain; use [`SerialPort::close`] for an orderly shutdown.
#[derive(Debug)]
pub struct SerialPort {
    fd: OwnedFd,
    path: String,
    exclusive: bool,
    gate: ConfigGate,
    driver: &'static NativeDriver,
}

impl SerialPort {
    /// Open the device at `path` and bring it into raw mode with
    /// `options.config` applied.
    ///
    /// # Example
    /// ```no_run
    /// use serial_core::port::{OpenOptions, SerialPort};
    ///
    /// let port = SerialPort::open("/dev/ttyUSB0", OpenOptions::default())?;
    /// port.write_all(b"PING")?;
    /// port.close()?;
    /// # Ok::<(), serial_core::SerialError>(())
    /// ```
    pub fn open(path: impl AsRef<Path>, options: OpenOptions) -> Result<Self> {
        let path = path.as_ref();
        let file = FsOpenOptions::new()
            .read(options.read)
            .write(options.write)
            .custom_flags(libc::O_NOCTTY | libc::O_NONBLOCK)
            .open(path)
            .map_err(|e| SerialError::os("open", e))?;
        Self::init(OwnedFd::from(file), path.display().to_string(), options)
    }

    /// Adopt an already-open terminal descriptor, e.g. a pseudo-terminal.
    ///
    /// The descriptor is switched to non-blocking mode and initialized exactly
    /// like a freshly opened device.
    pub fn from_owned_fd(fd: OwnedFd, label: impl Into<String>, options: OpenOptions) -> Result<Self> {
        let raw = fd.as_raw_fd();
        let flags = crate::platform::check("fcntl(F_GETFL)", unsafe {
            libc::fcntl(raw, libc::F_GETFL)
        })?;
        crate::platform::check("fcntl(F_SETFL)", unsafe {
            libc::fcntl(raw, libc::F_SETFL, flags | libc::O_NONBLOCK)
        })?;
        Self::init(fd, label.into(), options)
    }

    fn init(fd: OwnedFd, path: String, options: OpenOptions) -> Result<Self> {
        let driver = native();
        let raw = fd.as_raw_fd();

        if options.exclusive {
            driver.claim_exclusive(raw)?;
        }

        let mut block = driver.get_control_block(raw)?;
        codec::make_raw(driver, &mut block);
        codec::encode(driver, &mut block, &options.config)?;
        driver.set_control_block(raw, &block)?;
        driver.commit_baud(raw, options.config.baud)?;
        driver.flush(raw, QueueSelector::Both)?;

        info!(fd = raw, path = %path, exclusive = options.exclusive, "opened serial port");
        Ok(Self {
            fd,
            path,
            exclusive: options.exclusive,
            gate: Arc::new(RwLock::new(())),
            driver,
        })
    }

    /// Drain pending output, release exclusive ownership, close.
    ///
    /// A drain failure is logged and does not stop the close.
    pub fn close(self) -> Result<()> {
        let raw = self.fd.as_raw_fd();
        if let Err(err) = self.driver.drain(raw) {
            warn!(fd = raw, path = %self.path, error = %err, "drain before close failed");
        }
        if self.exclusive {
            self.driver.release_exclusive(raw)?;
        }
        let raw = self.fd.into_raw_fd();
        crate::platform::check("close", unsafe { libc::close(raw) })?;
        debug!(fd = raw, path = %self.path, "closed serial port");
        Ok(())
    }

    /// Device path (or label, for adopted descriptors).
    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn is_exclusive(&self) -> bool {
        self.exclusive
    }

    /// The gate shared with data listeners started for this port.
    pub fn config_gate(&self) -> ConfigGate {
        Arc::clone(&self.gate)
    }

    /// Apply a full configuration vector.
    ///
    /// In-flight reads through this handle or its data listeners complete
    /// before the new settings are written.
    pub fn configure(&self, config: &PortConfiguration) -> Result<()> {
        let _exclusive = self.gate.write();
        codec::apply(self.driver, self.fd.as_raw_fd(), config)
    }

    /// The configuration currently in effect, decoded from the OS.
    pub fn configuration(&self) -> Result<PortConfiguration> {
        self.raw_configuration()?.configuration()
    }

    pub fn raw_configuration(&self) -> Result<RawConfigSnapshot> {
        codec::read(self.driver, self.fd.as_raw_fd())
    }

    /// Set `VMIN`.
    pub fn set_min_read_length(&self, min: usize) -> Result<()> {
        let min = u8::try_from(min).map_err(|_| {
            SerialError::invalid("min_read_length", format!("{min} exceeds 255"))
        })?;
        let _exclusive = self.gate.write();
        let raw = self.fd.as_raw_fd();
        let mut block = self.driver.get_control_block(raw)?;
        block.raw.c_cc[libc::VMIN] = min;
        self.driver.set_control_block(raw, &block)
    }

    pub fn set_rts(&self, asserted: bool) -> Result<()> {
        self.driver
            .set_modem_line(self.fd.as_raw_fd(), ModemLine::Rts, asserted)
    }

    pub fn set_dtr(&self, asserted: bool) -> Result<()> {
        self.driver
            .set_modem_line(self.fd.as_raw_fd(), ModemLine::Dtr, asserted)
    }

    pub fn line_status(&self) -> Result<LineStatus> {
        self.driver.line_status(self.fd.as_raw_fd())
    }

    /// Bytes waiting in the input and output queues.
    pub fn byte_counts(&self) -> Result<ByteCounts> {
        self.driver.byte_counts(self.fd.as_raw_fd())
    }

    /// Discard the selected queues. Selecting neither is a no-op.
    pub fn clear_buffers(&self, input: bool, output: bool) -> Result<()> {
        let queue = match (input, output) {
            (true, true) => QueueSelector::Both,
            (true, false) => QueueSelector::Input,
            (false, true) => QueueSelector::Output,
            (false, false) => return Ok(()),
        };
        self.driver.flush(self.fd.as_raw_fd(), queue)
    }

    pub fn send_break(&self, duration: Duration) -> Result<()> {
        self.driver.send_break(self.fd.as_raw_fd(), duration)
    }

    /// Driver interrupt counters. Linux only.
    pub fn interrupt_counts(&self) -> Result<InterruptCounts> {
        self.driver.interrupt_counts(self.fd.as_raw_fd())
    }

    /// Read up to `max` pending bytes without blocking.
    pub fn read_available(&self, max: usize) -> Result<Vec<u8>> {
        let _shared = self.gate.read();
        engine::read_available(&FdIo::new(self.fd.as_fd(), self.driver), max)
    }

    /// Write all of `bytes` and wait until they have been transmitted.
    pub fn write_all(&self, bytes: &[u8]) -> Result<()> {
        engine::write_all(&FdIo::new(self.fd.as_fd(), self.driver), bytes)
    }
}

impl AsRawFd for SerialPort {
    fn as_raw_fd(&self) -> RawFd {
        self.fd.as_raw_fd()
    }
}

impl AsFd for SerialPort {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.fd.as_fd()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_missing_device_reports_enoent() {
        let err = SerialPort::open("/dev/nonexistent_port_12345", OpenOptions::default())
            .unwrap_err();
        assert_eq!(
            err,
            SerialError::OsCallFailed {
                operation: "open",
                code: libc::ENOENT
            }
        );
    }

    #[test]
    fn test_open_regular_file_is_not_a_terminal() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let err = SerialPort::open(file.path(), OpenOptions::default().exclusive(false))
            .unwrap_err();
        assert_eq!(err.raw_os_error(), Some(libc::ENOTTY));
    }

    #[test]
    fn test_open_options_builder() {
        let options = OpenOptions::new().write(false).exclusive(false);
        assert!(options.read);
        assert!(!options.write);
        assert!(!options.exclusive);
        assert_eq!(options.config, PortConfiguration::default());
    }
}
