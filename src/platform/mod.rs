//! Per-OS terminal drivers.
//!
//! Every supported OS family provides one [`TerminalDriver`]. The family is
//! chosen at build time and exposed as [`NativeDriver`]; callers normally go
//! through [`native()`]. Behaviour shared by all POSIX terminals lives in the
//! trait's default methods, families override what differs.
//!
//! ```text
//!             ┌──────────────┐
//! codec ─────►│TerminalDriver│◄──── SerialPort / listeners / monitor
//!             └──────┬───────┘
//!        ┌───────────┼────────────┐
//!   LinuxDriver   BsdDriver   SolarisDriver
//!   (termios2)    (termios)   (termios)
//! ```

use crate::error::{Result, SerialError};
use crate::port::settings::{
    BaudRate, ByteCounts, InterruptCounts, LineStatus, ModemLine, QueueSelector,
};
use std::fmt;
use std::os::fd::RawFd;
use std::path::Path;
use std::time::Duration;

#[cfg(target_os = "linux")]
mod linux;
#[cfg(target_os = "linux")]
pub use linux::LinuxDriver as NativeDriver;
#[cfg(target_os = "linux")]
pub(crate) type RawTermios = libc::termios2;

#[cfg(any(
    target_os = "macos",
    target_os = "ios",
    target_os = "freebsd",
    target_os = "dragonfly",
    target_os = "netbsd",
    target_os = "openbsd"
))]
mod bsd;
#[cfg(any(
    target_os = "macos",
    target_os = "ios",
    target_os = "freebsd",
    target_os = "dragonfly",
    target_os = "netbsd",
    target_os = "openbsd"
))]
pub use bsd::BsdDriver as NativeDriver;
#[cfg(any(
    target_os = "macos",
    target_os = "ios",
    target_os = "freebsd",
    target_os = "dragonfly",
    target_os = "netbsd",
    target_os = "openbsd"
))]
pub(crate) type RawTermios = libc::termios;

#[cfg(any(target_os = "solaris", target_os = "illumos"))]
mod solaris;
#[cfg(any(target_os = "solaris", target_os = "illumos"))]
pub use solaris::SolarisDriver as NativeDriver;
#[cfg(any(target_os = "solaris", target_os = "illumos"))]
pub(crate) type RawTermios = libc::termios;

static NATIVE: NativeDriver = NativeDriver::new();

/// The driver for the OS this crate was built for.
pub fn native() -> &'static NativeDriver {
    &NATIVE
}

/// OS family a driver implements.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlatformFamily {
    Linux,
    Bsd,
    Solaris,
}

/// Optional features of a platform's terminal driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capabilities {
    /// Arbitrary rates can be programmed into the clock divisor.
    pub custom_baud: bool,
    /// Mark and space (stick) parity.
    pub stick_parity: bool,
    /// Exclusive open via `TIOCEXCL`.
    pub exclusive_open: bool,
    /// Serial interrupt counters (`TIOCGICOUNT`).
    pub interrupt_counts: bool,
}

/// The OS control block of one terminal, exactly as the driver returned it.
#[derive(Clone, Copy)]
pub struct ControlBlock {
    pub(crate) raw: RawTermios,
}

impl ControlBlock {
    /// An all-zero block, only useful as a starting point for tests and
    /// benchmarks; real changes always start from [`TerminalDriver::get_control_block`].
    pub fn zeroed() -> Self {
        // SAFETY: termios/termios2 are plain C structs of integers.
        Self {
            raw: unsafe { std::mem::zeroed() },
        }
    }

    pub fn input_flags(&self) -> libc::tcflag_t {
        self.raw.c_iflag
    }

    pub fn output_flags(&self) -> libc::tcflag_t {
        self.raw.c_oflag
    }

    pub fn control_flags(&self) -> libc::tcflag_t {
        self.raw.c_cflag
    }

    pub fn local_flags(&self) -> libc::tcflag_t {
        self.raw.c_lflag
    }

    pub fn control_chars(&self) -> &[libc::cc_t] {
        &self.raw.c_cc
    }
}

impl fmt::Debug for ControlBlock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ControlBlock")
            .field("iflag", &format_args!("{:#o}", self.raw.c_iflag))
            .field("oflag", &format_args!("{:#o}", self.raw.c_oflag))
            .field("cflag", &format_args!("{:#o}", self.raw.c_cflag))
            .field("lflag", &format_args!("{:#o}", self.raw.c_lflag))
            .field("cc", &&self.raw.c_cc[..])
            .finish()
    }
}

/// Convert a `-1` return into the errno of `operation`.
pub(crate) fn check(operation: &'static str, ret: libc::c_int) -> Result<libc::c_int> {
    if ret < 0 {
        Err(SerialError::last_os_error(operation))
    } else {
        Ok(ret)
    }
}

/// Per-family terminal operations.
///
/// The baud, stick-parity and hardware-flow hooks are pure: they only touch
/// the control block. Everything taking a descriptor is a single system call
/// (or a short fixed sequence of them).
pub trait TerminalDriver: Send + Sync + fmt::Debug + 'static {
    fn family(&self) -> PlatformFamily;

    fn capabilities(&self) -> Capabilities;

    fn get_control_block(&self, fd: RawFd) -> Result<ControlBlock>;

    fn set_control_block(&self, fd: RawFd, block: &ControlBlock) -> Result<()>;

    /// Program `baud` into the block. Rates the platform cannot express fail
    /// with [`SerialError::UnsupportedOnPlatform`].
    fn encode_baud(&self, block: &mut ControlBlock, baud: BaudRate) -> Result<()>;

    /// Output speed recorded in the block, if recognizable.
    fn decode_baud(&self, block: &ControlBlock) -> Option<BaudRate>;

    /// Runs after the block was written. Platforms that program custom rates
    /// through a separate call do it here.
    fn commit_baud(&self, _fd: RawFd, _baud: BaudRate) -> Result<()> {
        Ok(())
    }

    /// Control-flag bit selecting mark/space parity, if the platform has one.
    fn stick_parity_flag(&self) -> Option<libc::tcflag_t>;

    /// Control-flag bits that together enable RTS/CTS flow control.
    fn hardware_flow_flags(&self) -> libc::tcflag_t {
        libc::CRTSCTS
    }

    /// Platform-specific raw-mode bits beyond the POSIX set.
    fn prepare_raw(&self, _block: &mut ControlBlock) {}

    fn claim_exclusive(&self, fd: RawFd) -> Result<()> {
        check("ioctl(TIOCEXCL)", unsafe { libc::ioctl(fd, libc::TIOCEXCL) })?;
        Ok(())
    }

    fn release_exclusive(&self, fd: RawFd) -> Result<()> {
        check("ioctl(TIOCNXCL)", unsafe { libc::ioctl(fd, libc::TIOCNXCL) })?;
        Ok(())
    }

    /// Discard queued bytes.
    fn flush(&self, fd: RawFd, queue: QueueSelector) -> Result<()> {
        let selector = match queue {
            QueueSelector::Input => libc::TCIFLUSH,
            QueueSelector::Output => libc::TCOFLUSH,
            QueueSelector::Both => libc::TCIOFLUSH,
        };
        check("tcflush", unsafe { libc::tcflush(fd, selector) })?;
        Ok(())
    }

    /// Block until queued output has physically left the device.
    fn drain(&self, fd: RawFd) -> Result<()> {
        check("tcdrain", unsafe { libc::tcdrain(fd) })?;
        Ok(())
    }

    fn modem_bits(&self, fd: RawFd) -> Result<libc::c_int> {
        let mut bits: libc::c_int = 0;
        check("ioctl(TIOCMGET)", unsafe {
            libc::ioctl(fd, libc::TIOCMGET, &mut bits as *mut libc::c_int)
        })?;
        Ok(bits)
    }

    fn line_status(&self, fd: RawFd) -> Result<LineStatus> {
        let bits = self.modem_bits(fd)?;
        Ok(LineStatus {
            cts: bits & libc::TIOCM_CTS != 0,
            dsr: bits & libc::TIOCM_DSR != 0,
            carrier_detect: bits & libc::TIOCM_CD != 0,
            ring: bits & libc::TIOCM_RI != 0,
            rts: bits & libc::TIOCM_RTS != 0,
            dtr: bits & libc::TIOCM_DTR != 0,
        })
    }

    fn set_modem_line(&self, fd: RawFd, line: ModemLine, asserted: bool) -> Result<()> {
        let mut bits = self.modem_bits(fd)?;
        let mask = match line {
            ModemLine::Rts => libc::TIOCM_RTS,
            ModemLine::Dtr => libc::TIOCM_DTR,
        };
        if asserted {
            bits |= mask;
        } else {
            bits &= !mask;
        }
        check("ioctl(TIOCMSET)", unsafe {
            libc::ioctl(fd, libc::TIOCMSET, &bits as *const libc::c_int)
        })?;
        Ok(())
    }

    fn byte_counts(&self, fd: RawFd) -> Result<ByteCounts> {
        let mut input: libc::c_int = 0;
        let mut output: libc::c_int = 0;
        check("ioctl(FIONREAD)", unsafe {
            libc::ioctl(fd, libc::FIONREAD, &mut input as *mut libc::c_int)
        })?;
        check("ioctl(TIOCOUTQ)", unsafe {
            libc::ioctl(fd, libc::TIOCOUTQ, &mut output as *mut libc::c_int)
        })?;
        Ok(ByteCounts {
            input: input.max(0) as usize,
            output: output.max(0) as usize,
        })
    }

    /// Hold the line in the break condition for `duration`.
    fn send_break(&self, fd: RawFd, duration: Duration) -> Result<()> {
        check("ioctl(TIOCSBRK)", unsafe { libc::ioctl(fd, libc::TIOCSBRK) })?;
        std::thread::sleep(duration);
        check("ioctl(TIOCCBRK)", unsafe { libc::ioctl(fd, libc::TIOCCBRK) })?;
        Ok(())
    }

    fn interrupt_counts(&self, _fd: RawFd) -> Result<InterruptCounts> {
        Err(SerialError::unsupported("interrupt counters"))
    }

    /// Whether the device node currently exists.
    fn device_present(&self, path: &Path) -> bool {
        std::fs::metadata(path).is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zeroed_block_has_no_flags() {
        let block = ControlBlock::zeroed();
        assert_eq!(block.input_flags(), 0);
        assert_eq!(block.control_flags(), 0);
        assert!(block.control_chars().iter().all(|&c| c == 0));
    }

    #[test]
    fn test_check_maps_negative_return_to_errno() {
        let err = check("close", unsafe { libc::close(-1) }).unwrap_err();
        assert_eq!(err.raw_os_error(), Some(libc::EBADF));
    }

    #[test]
    fn test_device_present() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ttyFAKE0");
        assert!(!native().device_present(&path));
        std::fs::write(&path, b"").unwrap();
        assert!(native().device_present(&path));
    }
}
