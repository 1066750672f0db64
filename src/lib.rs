//! Serial port control layer.
//!
//! Opens and configures terminal devices through the platform's termios
//! interface, moves bytes with interruption-safe I/O, and runs background
//! listeners for incoming data, modem line changes and device presence.
//!
//! # Modules
//!
//! - `config`: TOML configuration with environment overrides
//! - `error`: Crate-wide error type
//! - `port`: Port handle, configuration codec and I/O engine
//! - `platform`: Per-OS terminal drivers
//! - `listener`: Thread registry with data and event listeners
//! - `monitor`: Device presence monitoring
//! - `enumerate`: Device-path discovery
//! - `logging`: Subscriber setup for binaries
//!
//! # Example
//!
//! ```rust,no_run
//! use serial_core::{OpenOptions, PortConfiguration, SerialPort, ThreadRegistry};
//! use std::os::fd::AsRawFd;
//!
//! let port = SerialPort::open(
//!     "/dev/ttyUSB0",
//!     OpenOptions::new().config(PortConfiguration::new(115_200u32)),
//! )?;
//! port.write_all(b"PING")?;
//!
//! let registry = ThreadRegistry::global();
//! registry.register_data_listener(port.as_raw_fd(), |bytes: &[u8]| {
//!     println!("{} bytes", bytes.len());
//! })?;
//! # Ok::<(), serial_core::SerialError>(())
//! ```

#[cfg(not(unix))]
compile_error!("serial_core supports Unix-like targets only");

pub mod config;
pub mod enumerate;
pub mod error;
pub mod listener;
pub mod logging;
pub mod monitor;
pub mod platform;
pub mod port;

pub use config::{Config, ConfigError, ConfigLoader, ConfigResult};
pub use enumerate::{DeviceEnumerator, DeviceInfo, SystemEnumerator};
pub use error::{Result, SerialError};
pub use listener::{
    DataCallback, EventCallback, Lifecycle, Listener, ListenerKind, PresenceCallback,
    ThreadRegistry,
};
pub use monitor::PortMonitor;
pub use platform::{native, Capabilities, NativeDriver, PlatformFamily, TerminalDriver};
pub use port::{
    BaudRate, ByteCounts, DataBits, FlowControl, InterruptCounts, LineStatus, OpenOptions, Parity,
    PortConfiguration, SerialPort, StopBits,
};
