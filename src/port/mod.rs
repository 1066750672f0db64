//! Port layer: line settings, the configuration codec, the I/O engine and
//! the [`SerialPort`] handle built from them.

pub mod codec;
pub mod handle;
pub mod io;
pub mod mock;
pub mod settings;

pub use codec::RawConfigSnapshot;
pub use handle::{ConfigGate, OpenOptions, SerialPort};
pub use io::{read_available, read_once, write_all, FdIo, RawIo, READ_LIMIT};
pub use mock::{MockDevice, ReadStep, WriteStep};
pub use settings::*;
