//! Configuration codec: [`PortConfiguration`] to and from the OS control block.
//!
//! [`encode`] and [`decode`] are pure functions over a [`ControlBlock`];
//! [`apply`] and [`read`] wrap them with exactly one get/set pair on a
//! descriptor. Changes always start from the block the driver returned, so
//! bits this crate does not model are preserved.

use crate::error::{Result, SerialError};
use crate::platform::{ControlBlock, TerminalDriver};
use crate::port::settings::{
    BaudRate, DataBits, FlowControl, Parity, PortConfiguration, QueueSelector, StopBits,
};
use std::os::fd::RawFd;
use tracing::debug;

/// The control block of a port as read back from the OS, with its speed
/// already decoded by the driver.
#[derive(Debug, Clone, Copy)]
pub struct RawConfigSnapshot {
    block: ControlBlock,
    baud: Option<BaudRate>,
    stick: Option<libc::tcflag_t>,
}

impl RawConfigSnapshot {
    pub fn input_flags(&self) -> libc::tcflag_t {
        self.block.input_flags()
    }

    pub fn output_flags(&self) -> libc::tcflag_t {
        self.block.output_flags()
    }

    pub fn control_flags(&self) -> libc::tcflag_t {
        self.block.control_flags()
    }

    pub fn local_flags(&self) -> libc::tcflag_t {
        self.block.local_flags()
    }

    pub fn control_chars(&self) -> &[libc::cc_t] {
        self.block.control_chars()
    }

    /// Output speed, `None` when the driver does not recognize the code.
    pub fn baud(&self) -> Option<BaudRate> {
        self.baud
    }

    pub fn block(&self) -> &ControlBlock {
        &self.block
    }

    /// Decode into a configuration vector.
    pub fn configuration(&self) -> Result<PortConfiguration> {
        let baud = self
            .baud
            .ok_or_else(|| SerialError::unsupported("decoding the current baud rate"))?;
        Ok(decode_fields(&self.block, baud, self.stick))
    }
}

/// Switch `block` to raw mode: no echo, no canonical input, no signal
/// characters, no output post-processing, 8 data bits, receiver enabled,
/// modem control ignored, hang-up on last close, reads return after one byte.
pub fn make_raw<D: TerminalDriver + ?Sized>(driver: &D, block: &mut ControlBlock) {
    let raw = &mut block.raw;

    raw.c_cflag &= !(libc::CRTSCTS | libc::CSIZE | libc::PARENB | libc::CSTOPB);
    raw.c_cflag |= libc::CS8 | libc::CREAD | libc::CLOCAL | libc::HUPCL;

    raw.c_iflag &= !(libc::BRKINT
        | libc::PARMRK
        | libc::ISTRIP
        | libc::INLCR
        | libc::IGNCR
        | libc::ICRNL
        | libc::IXON
        | libc::IXOFF
        | libc::IXANY
        | libc::INPCK
        | libc::IGNPAR);
    raw.c_iflag |= libc::IGNBRK;

    raw.c_oflag &= !(libc::OPOST | libc::ONLCR | libc::OCRNL | libc::ONOCR | libc::ONLRET);

    raw.c_lflag &= !(libc::ECHO
        | libc::ECHOE
        | libc::ECHOK
        | libc::ECHONL
        | libc::ECHOCTL
        | libc::ECHOPRT
        | libc::ECHOKE
        | libc::ICANON
        | libc::ISIG
        | libc::IEXTEN);

    raw.c_cc[libc::VMIN] = 1;
    raw.c_cc[libc::VTIME] = 0;

    driver.prepare_raw(block);
}

/// Write `config` into `block`.
///
/// Character size, stop bits and parity are cleared and re-set together, and
/// exactly one flow-control mode is left enabled.
pub fn encode<D: TerminalDriver + ?Sized>(
    driver: &D,
    block: &mut ControlBlock,
    config: &PortConfiguration,
) -> Result<()> {
    config.validate()?;
    driver.encode_baud(block, config.baud)?;

    let stick = driver.stick_parity_flag();
    let raw = &mut block.raw;

    raw.c_cflag &= !(libc::CSIZE | libc::CSTOPB | libc::PARENB | libc::PARODD | stick.unwrap_or(0));
    raw.c_iflag &= !(libc::INPCK | libc::IGNPAR | libc::PARMRK);

    raw.c_cflag |= match config.data_bits {
        DataBits::Five => libc::CS5,
        DataBits::Six => libc::CS6,
        DataBits::Seven => libc::CS7,
        DataBits::Eight => libc::CS8,
    };

    if config.stop_bits != StopBits::One {
        raw.c_cflag |= libc::CSTOPB;
    }

    raw.c_cflag |= match config.parity {
        Parity::None => 0,
        Parity::Odd => libc::PARENB | libc::PARODD,
        Parity::Even => libc::PARENB,
        Parity::Mark => {
            libc::PARENB | libc::PARODD | stick.ok_or_else(|| SerialError::unsupported("mark parity"))?
        }
        Parity::Space => {
            libc::PARENB | stick.ok_or_else(|| SerialError::unsupported("space parity"))?
        }
    };

    if config.parity.is_enabled() {
        raw.c_iflag |= libc::INPCK;
        // Either mark bad bytes in the stream or drop them, never both.
        raw.c_iflag |= if config.report_parity_errors {
            libc::PARMRK
        } else {
            libc::IGNPAR
        };
    }

    if config.report_buffer_overrun {
        raw.c_iflag |= libc::IMAXBEL;
    } else {
        raw.c_iflag &= !libc::IMAXBEL;
    }

    let hardware = driver.hardware_flow_flags();
    raw.c_cflag &= !hardware;
    raw.c_iflag &= !(libc::IXON | libc::IXOFF | libc::IXANY);
    match config.flow_control {
        FlowControl::None => {}
        FlowControl::Hardware => raw.c_cflag |= hardware,
        FlowControl::Software => raw.c_iflag |= libc::IXON | libc::IXOFF,
    }

    raw.c_cc[libc::VSTART] = config.xon_char;
    raw.c_cc[libc::VSTOP] = config.xoff_char;
    raw.c_cc[libc::VMIN] = config.min_read_length;
    raw.c_cc[libc::VTIME] = 0;

    Ok(())
}

/// Read a configuration vector back out of `block`.
///
/// Fails with [`SerialError::UnsupportedOnPlatform`] when the speed code is
/// not one the driver knows.
pub fn decode<D: TerminalDriver + ?Sized>(
    driver: &D,
    block: &ControlBlock,
) -> Result<PortConfiguration> {
    let baud = driver
        .decode_baud(block)
        .ok_or_else(|| SerialError::unsupported("decoding the current baud rate"))?;
    Ok(decode_fields(block, baud, driver.stick_parity_flag()))
}

fn decode_fields(
    block: &ControlBlock,
    baud: BaudRate,
    stick: Option<libc::tcflag_t>,
) -> PortConfiguration {
    let raw = &block.raw;
    let cflag = raw.c_cflag;
    let iflag = raw.c_iflag;

    let data_bits = match cflag & libc::CSIZE {
        libc::CS5 => DataBits::Five,
        libc::CS6 => DataBits::Six,
        libc::CS7 => DataBits::Seven,
        _ => DataBits::Eight,
    };

    let stop_bits = if cflag & libc::CSTOPB != 0 {
        StopBits::Two
    } else {
        StopBits::One
    };

    let sticky = stick.map_or(false, |flag| cflag & flag != 0);
    let odd = cflag & libc::PARODD != 0;
    let parity = match (cflag & libc::PARENB != 0, sticky, odd) {
        (false, _, _) => Parity::None,
        (true, true, true) => Parity::Mark,
        (true, true, false) => Parity::Space,
        (true, false, true) => Parity::Odd,
        (true, false, false) => Parity::Even,
    };

    let flow_control = if cflag & libc::CRTSCTS != 0 {
        FlowControl::Hardware
    } else if iflag & (libc::IXON | libc::IXOFF) != 0 {
        FlowControl::Software
    } else {
        FlowControl::None
    };

    PortConfiguration {
        baud,
        data_bits,
        stop_bits,
        parity,
        flow_control,
        xon_char: raw.c_cc[libc::VSTART],
        xoff_char: raw.c_cc[libc::VSTOP],
        report_parity_errors: iflag & libc::PARMRK != 0,
        report_buffer_overrun: iflag & libc::IMAXBEL != 0,
        min_read_length: raw.c_cc[libc::VMIN],
    }
}

/// Apply `config` to the terminal behind `fd`, then discard whatever was
/// queued under the previous settings.
pub fn apply<D: TerminalDriver + ?Sized>(
    driver: &D,
    fd: RawFd,
    config: &PortConfiguration,
) -> Result<()> {
    // Local checks first so nothing reaches the OS for an invalid vector.
    config.validate()?;
    let mut block = driver.get_control_block(fd)?;
    encode(driver, &mut block, config)?;
    driver.set_control_block(fd, &block)?;
    driver.commit_baud(fd, config.baud)?;
    driver.flush(fd, QueueSelector::Both)?;
    debug!(
        fd,
        baud = config.baud.rate(),
        parity = ?config.parity,
        flow = ?config.flow_control,
        "applied port configuration"
    );
    Ok(())
}

/// Fetch the current control block of `fd`.
pub fn read<D: TerminalDriver + ?Sized>(driver: &D, fd: RawFd) -> Result<RawConfigSnapshot> {
    let block = driver.get_control_block(fd)?;
    Ok(RawConfigSnapshot {
        baud: driver.decode_baud(&block),
        stick: driver.stick_parity_flag(),
        block,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::native;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    const PORTABLE_RATES: &[u32] = &[1200, 9600, 19200, 38400, 57600, 115200];

    fn encoded(config: &PortConfiguration) -> ControlBlock {
        let mut block = ControlBlock::zeroed();
        make_raw(native(), &mut block);
        encode(native(), &mut block, config).unwrap();
        block
    }

    #[test]
    fn test_make_raw_clears_line_discipline() {
        let mut block = ControlBlock::zeroed();
        block.raw.c_lflag = libc::ICANON | libc::ECHO | libc::ISIG;
        block.raw.c_oflag = libc::OPOST | libc::ONLCR;
        block.raw.c_iflag = libc::ICRNL | libc::IXON;
        make_raw(native(), &mut block);

        assert_eq!(block.local_flags() & (libc::ICANON | libc::ECHO | libc::ISIG), 0);
        assert_eq!(block.output_flags() & libc::OPOST, 0);
        assert_eq!(block.input_flags() & (libc::ICRNL | libc::IXON), 0);
        assert_ne!(block.input_flags() & libc::IGNBRK, 0);
        assert_eq!(block.control_flags() & libc::CSIZE, libc::CS8);
        assert_ne!(block.control_flags() & libc::CREAD, 0);
        assert_ne!(block.control_flags() & libc::CLOCAL, 0);
        assert_eq!(block.control_chars()[libc::VMIN], 1);
    }

    #[test]
    fn test_encode_preserves_unmodelled_bits() {
        let mut block = ControlBlock::zeroed();
        block.raw.c_oflag = libc::ONLCR;
        block.raw.c_lflag = libc::ECHO;
        encode(native(), &mut block, &PortConfiguration::default()).unwrap();
        assert_eq!(block.output_flags(), libc::ONLCR);
        assert_eq!(block.local_flags(), libc::ECHO);
    }

    #[test]
    fn test_flow_control_modes_are_exclusive() {
        let software = encoded(&PortConfiguration::default().with_flow_control(FlowControl::Software));
        let mut block = software;
        encode(
            native(),
            &mut block,
            &PortConfiguration::default().with_flow_control(FlowControl::Hardware),
        )
        .unwrap();
        assert_eq!(block.input_flags() & (libc::IXON | libc::IXOFF), 0);
        assert_ne!(block.control_flags() & libc::CRTSCTS, 0);

        encode(native(), &mut block, &PortConfiguration::default()).unwrap();
        assert_eq!(block.control_flags() & libc::CRTSCTS, 0);
        assert_eq!(decode(native(), &block).unwrap().flow_control, FlowControl::None);
    }

    #[test]
    fn test_parity_error_policies_never_mix() {
        let mut config = PortConfiguration::default().with_parity(Parity::Even);
        config.report_parity_errors = true;
        let mut block = encoded(&config);
        assert_ne!(block.input_flags() & libc::PARMRK, 0);
        assert_eq!(block.input_flags() & libc::IGNPAR, 0);

        config.report_parity_errors = false;
        encode(native(), &mut block, &config).unwrap();
        assert_eq!(block.input_flags() & libc::PARMRK, 0);
        assert_ne!(block.input_flags() & libc::IGNPAR, 0);

        encode(native(), &mut block, &PortConfiguration::default()).unwrap();
        assert_eq!(block.input_flags() & (libc::PARMRK | libc::IGNPAR | libc::INPCK), 0);
    }

    #[test]
    fn test_parity_reporting_without_parity_is_rejected() {
        let mut config = PortConfiguration::default();
        config.report_parity_errors = true;
        let mut block = ControlBlock::zeroed();
        assert_eq!(
            encode(native(), &mut block, &config),
            Err(SerialError::ParityNotEnabled)
        );
    }

    #[test]
    fn test_one_and_a_half_stop_bits_reads_back_as_two() {
        let block = encoded(&PortConfiguration::default().with_stop_bits(StopBits::OnePointFive));
        assert_eq!(decode(native(), &block).unwrap().stop_bits, StopBits::Two);
    }

    #[test]
    fn test_stick_parity_follows_capabilities() {
        let mut block = ControlBlock::zeroed();
        let result = encode(
            native(),
            &mut block,
            &PortConfiguration::default().with_parity(Parity::Mark),
        );
        if native().capabilities().stick_parity {
            result.unwrap();
            assert_eq!(decode(native(), &block).unwrap().parity, Parity::Mark);
        } else {
            assert!(matches!(result, Err(SerialError::UnsupportedOnPlatform { .. })));
        }
    }

    #[test]
    fn test_apply_on_non_tty_surfaces_errno() {
        let file = tempfile::tempfile().unwrap();
        let err = apply(
            native(),
            std::os::fd::AsRawFd::as_raw_fd(&file),
            &PortConfiguration::default(),
        )
        .unwrap_err();
        assert_eq!(err.raw_os_error(), Some(libc::ENOTTY));
    }

    fn parity_strategy() -> impl Strategy<Value = Parity> {
        let stick = native().capabilities().stick_parity;
        prop_oneof![
            Just(Parity::None),
            Just(Parity::Odd),
            Just(Parity::Even),
            Just(if stick { Parity::Mark } else { Parity::Odd }),
            Just(if stick { Parity::Space } else { Parity::Even }),
        ]
    }

    proptest! {
        #[test]
        fn prop_encode_decode_round_trip(
            rate in prop::sample::select(PORTABLE_RATES),
            data_bits in prop::sample::select(vec![DataBits::Five, DataBits::Six, DataBits::Seven, DataBits::Eight]),
            stop_bits in prop::sample::select(vec![StopBits::One, StopBits::Two]),
            parity in parity_strategy(),
            flow_control in prop::sample::select(vec![FlowControl::None, FlowControl::Hardware, FlowControl::Software]),
            xon in 0u8..0x20,
            report_errors in any::<bool>(),
            report_overrun in any::<bool>(),
            min_read_length in any::<u8>(),
        ) {
            let config = PortConfiguration {
                baud: BaudRate::from_rate(rate),
                data_bits,
                stop_bits,
                parity,
                flow_control,
                xon_char: xon,
                xoff_char: xon.wrapping_add(1),
                report_parity_errors: report_errors && parity.is_enabled(),
                report_buffer_overrun: report_overrun,
                min_read_length,
            };
            let block = encoded(&config);
            prop_assert_eq!(decode(native(), &block).unwrap(), config);
        }
    }
}
