//! BSD family (macOS, FreeBSD, DragonFly, NetBSD, OpenBSD): classic termios
//! through `tcgetattr`/`tcsetattr`.
//!
//! BSD speed fields are plain bits-per-second values. The kernel accepts
//! arbitrary rates on the free BSDs; macOS rejects them in `tcsetattr` and
//! programs them through `IOSSIOSPEED` after the block has been written.

use super::{check, Capabilities, ControlBlock, PlatformFamily, TerminalDriver};
use crate::error::Result;
use crate::port::settings::BaudRate;
use std::os::fd::RawFd;

#[cfg(any(target_os = "macos", target_os = "ios"))]
const IOSSIOSPEED: libc::c_ulong = 0x8008_5402;

/// Rates every BSD `tcsetattr` accepts.
const NAMED_RATES: &[u32] = &[
    0, 50, 75, 110, 134, 150, 200, 300, 600, 1200, 1800, 2400, 4800, 9600, 19200, 38400, 57600,
    115200, 230400,
];

#[derive(Debug, Default, Clone, Copy)]
pub struct BsdDriver;

impl BsdDriver {
    pub const fn new() -> Self {
        Self
    }
}

fn set_speed(block: &mut ControlBlock, rate: u32) -> Result<()> {
    check("cfsetspeed", unsafe {
        libc::cfsetspeed(&mut block.raw, rate as libc::speed_t)
    })?;
    Ok(())
}

impl TerminalDriver for BsdDriver {
    fn family(&self) -> PlatformFamily {
        PlatformFamily::Bsd
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            custom_baud: true,
            stick_parity: false,
            exclusive_open: true,
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
        if NAMED_RATES.contains(&rate) {
            return set_speed(block, rate);
        }
        if cfg!(any(target_os = "macos", target_os = "ios")) {
            // Placeholder until commit_baud reprograms the clock.
            set_speed(block, 9600)
        } else {
            set_speed(block, rate)
        }
    }

    fn decode_baud(&self, block: &ControlBlock) -> Option<BaudRate> {
        let speed = unsafe { libc::cfgetospeed(&block.raw) };
        u32::try_from(speed).ok().map(BaudRate::from_rate)
    }

    #[cfg(any(target_os = "macos", target_os = "ios"))]
    fn commit_baud(&self, fd: RawFd, baud: BaudRate) -> Result<()> {
        let rate = baud.rate();
        if NAMED_RATES.contains(&rate) {
            return Ok(());
        }
        let speed = rate as libc::speed_t;
        check("ioctl(IOSSIOSPEED)", unsafe {
            libc::ioctl(fd, IOSSIOSPEED, &speed as *const libc::speed_t)
        })?;
        Ok(())
    }

    fn stick_parity_flag(&self) -> Option<libc::tcflag_t> {
        None
    }

    #[cfg(any(target_os = "macos", target_os = "ios"))]
    fn hardware_flow_flags(&self) -> libc::tcflag_t {
        libc::CRTSCTS | libc::CRTS_IFLOW | libc::CCTS_OFLOW
    }

    #[cfg(any(target_os = "macos", target_os = "ios"))]
    fn prepare_raw(&self, block: &mut ControlBlock) {
        block.raw.c_oflag &= !(libc::OXTABS | libc::ONOEOT);
        block.raw.c_cflag &= !libc::MDMBUF;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_named_rate_round_trips() {
        let mut block = ControlBlock::zeroed();
        BsdDriver.encode_baud(&mut block, BaudRate::from_rate(57600)).unwrap();
        assert_eq!(BsdDriver.decode_baud(&block), Some(BaudRate::from_rate(57600)));
    }

    #[test]
    fn test_no_stick_parity() {
        assert_eq!(BsdDriver.stick_parity_flag(), None);
        assert!(!BsdDriver.capabilities().stick_parity);
    }
}
