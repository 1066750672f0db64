//! Solaris and illumos: termios with encoded `Bxxx` speed codes, no
//! programmable clock and no exclusive open.

use super::{check, Capabilities, ControlBlock, PlatformFamily, TerminalDriver};
use crate::error::{Result, SerialError};
use crate::port::settings::{BaudRate, ByteCounts};
use std::os::fd::RawFd;

/// Extended (stick) parity bit of `c_cflag`.
const PAREXT: libc::tcflag_t = 0o4000000;
/// Inbound hardware flow control (RTS).
const CRTSXOFF: libc::tcflag_t = 0o10000000000;

const SPEED_TABLE: &[(u32, libc::speed_t)] = &[
    (0, libc::B0),
    (50, libc::B50),
    (75, libc::B75),
    (110, libc::B110),
    (134, libc::B134),
    (150, libc::B150),
    (200, libc::B200),
    (300, libc::B300),
    (600, libc::B600),
    (1200, libc::B1200),
    (1800, libc::B1800),
    (2400, libc::B2400),
    (4800, libc::B4800),
    (9600, libc::B9600),
    (19200, libc::B19200),
    (38400, libc::B38400),
    (57600, libc::B57600),
    (115200, libc::B115200),
    (230400, libc::B230400),
    (460800, libc::B460800),
];

#[derive(Debug, Default, Clone, Copy)]
pub struct SolarisDriver;

impl SolarisDriver {
    pub const fn new() -> Self {
        Self
    }
}

impl TerminalDriver for SolarisDriver {
    fn family(&self) -> PlatformFamily {
        PlatformFamily::Solaris
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            custom_baud: false,
            stick_parity: true,
            exclusive_open: false,
            interrupt_counts: false,
        }
    }

    fn get_control_block(&self, fd: RawFd) -> Result<ControlBlock> {
        let mut block = ControlBlock::zeroed();
        check("tcgetattr", unsafe { libc::tcgetattr(fd, &mut block.raw) })?;
        Ok(block)
    }

    fn set_control_block(&self, fd: RawFd, block: &ControlBlock) -> Result<()> {
        check("tcsetattr", unsafe {
            libc::tcsetattr(fd, libc::TCSANOW, &block.raw)
        })?;
        Ok(())
    }

    fn encode_baud(&self, block: &mut ControlBlock, baud: BaudRate) -> Result<()> {
        let rate = baud.rate();
        let code = SPEED_TABLE
            .iter()
            .find(|(r, _)| *r == rate)
            .map(|(_, code)| *code)
            .ok_or_else(|| SerialError::unsupported("custom baud rate"))?;
        check("cfsetispeed", unsafe { libc::cfsetispeed(&mut block.raw, code) })?;
        check("cfsetospeed", unsafe { libc::cfsetospeed(&mut block.raw, code) })?;
        Ok(())
    }

    fn decode_baud(&self, block: &ControlBlock) -> Option<BaudRate> {
        let code = unsafe { libc::cfgetospeed(&block.raw) };
        SPEED_TABLE
            .iter()
            .find(|(_, c)| *c == code)
            .map(|(rate, _)| BaudRate::from_rate(*rate))
    }

    fn stick_parity_flag(&self) -> Option<libc::tcflag_t> {
        Some(PAREXT)
    }

    fn hardware_flow_flags(&self) -> libc::tcflag_t {
        libc::CRTSCTS | CRTSXOFF
    }

    fn claim_exclusive(&self, _fd: RawFd) -> Result<()> {
        Err(SerialError::unsupported("exclusive open"))
    }

    fn release_exclusive(&self, _fd: RawFd) -> Result<()> {
        Err(SerialError::unsupported("exclusive open"))
    }

    /// Only the input queue can be queried; output is reported as empty.
    fn byte_counts(&self, fd: RawFd) -> Result<ByteCounts> {
        let mut input: libc::c_int = 0;
        check("ioctl(FIONREAD)", unsafe {
            libc::ioctl(fd, libc::FIONREAD, &mut input as *mut libc::c_int)
        })?;
        Ok(ByteCounts {
            input: input.max(0) as usize,
            output: 0,
        })
    }
}
