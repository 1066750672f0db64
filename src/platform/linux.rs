//! Linux: termios2 through `TCGETS2`/`TCSETS2`, which carries numeric input
//! and output speeds and accepts any rate via `BOTHER`.

use super::{check, Capabilities, ControlBlock, PlatformFamily, TerminalDriver};
use crate::error::Result;
use crate::port::settings::{BaudRate, InterruptCounts};
use std::os::fd::RawFd;

/// Input-speed field of `c_cflag` (`CBAUD << IBSHIFT`).
const CIBAUD: libc::tcflag_t = libc::CBAUD << 16;

/// `TIOCGICOUNT` on the asm-generic ioctl layout.
const TIOCGICOUNT: u32 = 0x545D;

/// Layout of the kernel's `struct serial_icounter_struct`.
#[repr(C)]
#[derive(Default)]
struct SerialIcounter {
    cts: libc::c_int,
    dsr: libc::c_int,
    rng: libc::c_int,
    dcd: libc::c_int,
    rx: libc::c_int,
    tx: libc::c_int,
    frame: libc::c_int,
    overrun: libc::c_int,
    parity: libc::c_int,
    brk: libc::c_int,
    buf_overrun: libc::c_int,
    reserved: [libc::c_int; 9],
}

#[derive(Debug, Default, Clone, Copy)]
pub struct LinuxDriver;

impl LinuxDriver {
    pub const fn new() -> Self {
        Self
    }
}

/// `Bxxx` constant for rates the kernel knows by name.
fn speed_constant(rate: u32) -> Option<libc::speed_t> {
    let code = match rate {
        0 => libc::B0,
        50 => libc::B50,
        75 => libc::B75,
        110 => libc::B110,
        134 => libc::B134,
        150 => libc::B150,
        200 => libc::B200,
        300 => libc::B300,
        600 => libc::B600,
        1200 => libc::B1200,
        1800 => libc::B1800,
        2400 => libc::B2400,
        4800 => libc::B4800,
        9600 => libc::B9600,
        19200 => libc::B19200,
        38400 => libc::B38400,
        57600 => libc::B57600,
        115200 => libc::B115200,
        230400 => libc::B230400,
        460800 => libc::B460800,
        500000 => libc::B500000,
        576000 => libc::B576000,
        921600 => libc::B921600,
        1000000 => libc::B1000000,
        1152000 => libc::B1152000,
        1500000 => libc::B1500000,
        2000000 => libc::B2000000,
        2500000 => libc::B2500000,
        3000000 => libc::B3000000,
        3500000 => libc::B3500000,
        4000000 => libc::B4000000,
        _ => return None,
    };
    Some(code)
}

impl TerminalDriver for LinuxDriver {
    fn family(&self) -> PlatformFamily {
        PlatformFamily::Linux
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            custom_baud: true,
            stick_parity: true,
            exclusive_open: true,
            interrupt_counts: true,
        }
    }

    fn get_control_block(&self, fd: RawFd) -> Result<ControlBlock> {
        let mut block = ControlBlock::zeroed();
        check("ioctl(TCGETS2)", unsafe {
            libc::ioctl(fd, libc::TCGETS2, &mut block.raw as *mut libc::termios2)
        })?;
        Ok(block)
    }

    fn set_control_block(&self, fd: RawFd, block: &ControlBlock) -> Result<()> {
        check("ioctl(TCSETS2)", unsafe {
            libc::ioctl(fd, libc::TCSETS2, &block.raw as *const libc::termios2)
        })?;
        Ok(())
    }

    fn encode_baud(&self, block: &mut ControlBlock, baud: BaudRate) -> Result<()> {
        let rate = baud.rate();
        let raw = &mut block.raw;
        raw.c_cflag &= !(libc::CBAUD | CIBAUD);
        match (baud, speed_constant(rate)) {
            (BaudRate::Standard(_), Some(code)) => raw.c_cflag |= code,
            // custom requests and table entries without a kernel name
            _ => raw.c_cflag |= libc::BOTHER,
        }
        raw.c_ispeed = rate;
        raw.c_ospeed = rate;
        Ok(())
    }

    fn decode_baud(&self, block: &ControlBlock) -> Option<BaudRate> {
        // The kernel fills c_ospeed with the effective rate for Bxxx codes too.
        Some(BaudRate::from_rate(block.raw.c_ospeed))
    }

    fn stick_parity_flag(&self) -> Option<libc::tcflag_t> {
        Some(libc::CMSPAR)
    }

    fn prepare_raw(&self, block: &mut ControlBlock) {
        block.raw.c_iflag &= !libc::IUCLC;
        block.raw.c_line = 0;
    }

    fn interrupt_counts(&self, fd: RawFd) -> Result<InterruptCounts> {
        let mut counter = SerialIcounter::default();
        check("ioctl(TIOCGICOUNT)", unsafe {
            libc::ioctl(fd, TIOCGICOUNT as _, &mut counter as *mut SerialIcounter)
        })?;
        let count = |v: libc::c_int| v.max(0) as u32;
        Ok(InterruptCounts {
            cts: count(counter.cts),
            dsr: count(counter.dsr),
            ring: count(counter.rng),
            carrier_detect: count(counter.dcd),
            rx: count(counter.rx),
            tx: count(counter.tx),
            frame: count(counter.frame),
            overrun: count(counter.overrun),
            parity: count(counter.parity),
            brk: count(counter.brk),
            buf_overrun: count(counter.buf_overrun),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::port::settings::StandardBaud;

    #[test]
    fn test_named_rate_uses_kernel_constant() {
        let mut block = ControlBlock::zeroed();
        LinuxDriver
            .encode_baud(&mut block, BaudRate::Standard(StandardBaud::B115200))
            .unwrap();
        assert_eq!(block.raw.c_cflag & libc::CBAUD, libc::B115200);
        assert_eq!(block.raw.c_ospeed, 115200);
        assert_eq!(
            LinuxDriver.decode_baud(&block),
            Some(BaudRate::Standard(StandardBaud::B115200))
        );
    }

    #[test]
    fn test_unnamed_table_rate_goes_through_bother() {
        let mut block = ControlBlock::zeroed();
        LinuxDriver
            .encode_baud(&mut block, BaudRate::Standard(StandardBaud::B14400))
            .unwrap();
        assert_eq!(block.raw.c_cflag & libc::CBAUD, libc::BOTHER);
        assert_eq!(block.raw.c_ispeed, 14400);
    }

    #[test]
    fn test_custom_rate_bypasses_table() {
        let mut block = ControlBlock::zeroed();
        block.raw.c_cflag = libc::B9600 | libc::CS8;
        LinuxDriver
            .encode_baud(&mut block, BaudRate::Custom(250_000))
            .unwrap();
        assert_eq!(block.raw.c_cflag & libc::CBAUD, libc::BOTHER);
        assert_eq!(block.raw.c_cflag & libc::CSIZE, libc::CS8);
        assert_eq!(LinuxDriver.decode_baud(&block), Some(BaudRate::Custom(250_000)));
    }

    #[test]
    fn test_custom_table_rate_reads_back_equal() {
        let mut block = ControlBlock::zeroed();
        LinuxDriver
            .encode_baud(&mut block, BaudRate::Custom(9600))
            .unwrap();
        // the kernel would report the effective rate in c_ospeed
        assert_eq!(block.raw.c_ospeed, 9600);
        assert_eq!(LinuxDriver.decode_baud(&block), Some(BaudRate::Custom(9600)));
    }

    #[test]
    fn test_get_control_block_on_non_tty_fails_with_errno() {
        let file = tempfile::tempfile().unwrap();
        let err = LinuxDriver
            .get_control_block(std::os::fd::AsRawFd::as_raw_fd(&file))
            .unwrap_err();
        assert_eq!(err.raw_os_error(), Some(libc::ENOTTY));
    }
}
