//! Platform-neutral line settings.
//!
//! A [`PortConfiguration`] is the configuration vector handed to the codec. It
//! knows nothing about termios; the mapping onto control-block bits lives in
//! [`crate::port::codec`] and the per-OS drivers.

use crate::error::{Result, SerialError};
use serde::{Deserialize, Serialize};

macro_rules! standard_bauds {
    ($($name:ident = $rate:literal),+ $(,)?) => {
        /// Baud rates that go through the fixed enumeration table.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum StandardBaud {
            $($name),+
        }

        impl StandardBaud {
            /// Every entry of the table, slowest first.
            pub const ALL: &'static [StandardBaud] = &[$(StandardBaud::$name),+];

            /// Bits per second.
            pub const fn rate(self) -> u32 {
                match self {
                    $(StandardBaud::$name => $rate),+
                }
            }

            /// Look up a rate in the table.
            pub const fn from_rate(rate: u32) -> Option<Self> {
                match rate {
                    $($rate => Some(StandardBaud::$name),)+
                    _ => None,
                }
            }
        }
    };
}

standard_bauds! {
    B0 = 0,
    B50 = 50,
    B75 = 75,
    B110 = 110,
    B134 = 134,
    B150 = 150,
    B200 = 200,
    B300 = 300,
    B600 = 600,
    B1200 = 1200,
    B1800 = 1800,
    B2400 = 2400,
    B4800 = 4800,
    B9600 = 9600,
    B14400 = 14400,
    B19200 = 19200,
    B28800 = 28800,
    B38400 = 38400,
    B56000 = 56000,
    B57600 = 57600,
    B115200 = 115200,
    B128000 = 128000,
    B153600 = 153600,
    B230400 = 230400,
    B256000 = 256000,
    B460800 = 460800,
    B500000 = 500000,
    B576000 = 576000,
    B921600 = 921600,
    B1000000 = 1000000,
    B1152000 = 1152000,
    B1500000 = 1500000,
    B2000000 = 2000000,
    B2500000 = 2500000,
    B3000000 = 3000000,
    B3500000 = 3500000,
    B4000000 = 4000000,
}

/// Line speed: either a table entry or a rate programmed directly into the
/// device clock divisor.
///
/// Serialized as a plain number; numbers found in the table come back as
/// [`BaudRate::Standard`]. Equality and hashing go by the numeric rate, so
/// `Custom(9600)` equals `Standard(B9600)` and a decoded speed compares equal
/// to the one that was applied.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(from = "u32", into = "u32")]
pub enum BaudRate {
    Standard(StandardBaud),
    Custom(u32),
}

impl BaudRate {
    /// Normalize a numeric rate, preferring the table.
    pub fn from_rate(rate: u32) -> Self {
        match StandardBaud::from_rate(rate) {
            Some(standard) => Self::Standard(standard),
            None => Self::Custom(rate),
        }
    }

    pub fn rate(self) -> u32 {
        match self {
            Self::Standard(standard) => standard.rate(),
            Self::Custom(rate) => rate,
        }
    }

    pub fn is_custom(self) -> bool {
        matches!(self, Self::Custom(_))
    }
}

impl PartialEq for BaudRate {
    fn eq(&self, other: &Self) -> bool {
        self.rate() == other.rate()
    }
}

impl Eq for BaudRate {}

impl std::hash::Hash for BaudRate {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.rate().hash(state);
    }
}

impl From<u32> for BaudRate {
    fn from(rate: u32) -> Self {
        Self::from_rate(rate)
    }
}

impl From<BaudRate> for u32 {
    fn from(baud: BaudRate) -> Self {
        baud.rate()
    }
}

impl From<StandardBaud> for BaudRate {
    fn from(standard: StandardBaud) -> Self {
        Self::Standard(standard)
    }
}

/// Number of data bits per character.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataBits {
    Five,
    Six,
    Seven,
    Eight,
}

impl DataBits {
    pub fn bits(self) -> u8 {
        match self {
            Self::Five => 5,
            Self::Six => 6,
            Self::Seven => 7,
            Self::Eight => 8,
        }
    }
}

impl TryFrom<u8> for DataBits {
    type Error = SerialError;

    fn try_from(bits: u8) -> Result<Self> {
        match bits {
            5 => Ok(Self::Five),
            6 => Ok(Self::Six),
            7 => Ok(Self::Seven),
            8 => Ok(Self::Eight),
            other => Err(SerialError::invalid(
                "data_bits",
                format!("{other} is not one of 5, 6, 7, 8"),
            )),
        }
    }
}

/// Number of stop bits.
///
/// `OnePointFive` is programmed with the two-stop-bit representation, so it
/// reads back as `Two`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopBits {
    One,
    OnePointFive,
    Two,
}

/// Parity checking modes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Parity {
    None,
    Odd,
    Even,
    Mark,
    Space,
}

impl Parity {
    pub fn is_enabled(self) -> bool {
        !matches!(self, Self::None)
    }
}

/// Flow control modes. Exactly one is active at a time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlowControl {
    None,
    Hardware,
    Software,
}

/// ASCII DC1, the customary XON.
pub const DEFAULT_XON: u8 = 0x11;
/// ASCII DC3, the customary XOFF.
pub const DEFAULT_XOFF: u8 = 0x13;

/// The configuration vector applied by the codec.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PortConfiguration {
    /// Line speed.
    pub baud: BaudRate,

    /// Number of data bits (5, 6, 7, or 8).
    pub data_bits: DataBits,

    /// Number of stop bits.
    pub stop_bits: StopBits,

    /// Parity checking mode.
    pub parity: Parity,

    /// Flow control mode.
    pub flow_control: FlowControl,

    /// Character that resumes transmission under software flow control.
    pub xon_char: u8,

    /// Character that suspends transmission under software flow control.
    pub xoff_char: u8,

    /// Mark bytes received with parity/framing errors in the read stream
    /// instead of dropping them. Requires parity.
    pub report_parity_errors: bool,

    /// Signal input queue overflow (`IMAXBEL`).
    pub report_buffer_overrun: bool,

    /// Minimum number of bytes a read waits for (`VMIN`).
    pub min_read_length: u8,
}

impl Default for PortConfiguration {
    fn default() -> Self {
        Self {
            baud: BaudRate::Standard(StandardBaud::B9600),
            data_bits: DataBits::Eight,
            stop_bits: StopBits::One,
            parity: Parity::None,
            flow_control: FlowControl::None,
            xon_char: DEFAULT_XON,
            xoff_char: DEFAULT_XOFF,
            report_parity_errors: false,
            report_buffer_overrun: false,
            min_read_length: 1,
        }
    }
}

impl PortConfiguration {
    /// 8 data bits, no parity, 1 stop bit, no flow control at `baud`.
    pub fn new(baud: impl Into<BaudRate>) -> Self {
        Self {
            baud: baud.into(),
            ..Self::default()
        }
    }

    pub fn with_data_bits(mut self, data_bits: DataBits) -> Self {
        self.data_bits = data_bits;
        self
    }

    pub fn with_stop_bits(mut self, stop_bits: StopBits) -> Self {
        self.stop_bits = stop_bits;
        self
    }

    pub fn with_parity(mut self, parity: Parity) -> Self {
        self.parity = parity;
        self
    }

    pub fn with_flow_control(mut self, flow_control: FlowControl) -> Self {
        self.flow_control = flow_control;
        self
    }

    /// Check cross-field constraints that need no OS call.
    pub fn validate(&self) -> Result<()> {
        if self.report_parity_errors && !self.parity.is_enabled() {
            return Err(SerialError::ParityNotEnabled);
        }
        if self.flow_control == FlowControl::Software && self.xon_char == self.xoff_char {
            return Err(SerialError::invalid(
                "xon_char",
                "XON and XOFF must be different characters",
            ));
        }
        Ok(())
    }
}

/// Asserted (`true`) / deasserted state of each modem control line.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LineStatus {
    pub cts: bool,
    pub dsr: bool,
    pub carrier_detect: bool,
    pub ring: bool,
    pub rts: bool,
    pub dtr: bool,
}

/// Output lines the host may drive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModemLine {
    Rts,
    Dtr,
}

/// Bytes waiting in the driver's queues.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ByteCounts {
    pub input: usize,
    pub output: usize,
}

/// Which driver queue(s) to discard.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueSelector {
    Input,
    Output,
    Both,
}

/// Serial line interrupt counters kept by the driver.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct InterruptCounts {
    pub cts: u32,
    pub dsr: u32,
    pub ring: u32,
    pub carrier_detect: u32,
    pub rx: u32,
    pub tx: u32,
    pub frame: u32,
    pub overrun: u32,
    pub parity: u32,
    pub brk: u32,
    pub buf_overrun: u32,
}
