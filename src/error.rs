//! Error types for serial port control.
//!
//! OS failures are carried with the raw error number exactly as the platform
//! reported it, tagged with the name of the call that failed. Lifecycle and
//! capacity errors are detected locally, before any OS call is attempted.

use std::io;
use thiserror::Error;

/// Errors returned by every public operation of this crate.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SerialError {
    /// An underlying system call failed.
    #[error("{operation} failed with OS error {code}")]
    OsCallFailed {
        operation: &'static str,
        code: i32,
    },

    /// The requested operation or setting has no equivalent on this platform.
    #[error("{operation} is not supported on this platform")]
    UnsupportedOnPlatform { operation: &'static str },

    /// A bounded table (listener registry or port monitor) is full.
    #[error("capacity of {capacity} entries exceeded")]
    CapacityExceeded { capacity: usize },

    /// A listener or monitor is already registered for this key.
    #[error("a listener is already registered for {key}")]
    AlreadyRegistered { key: String },

    /// Nothing is registered for this key.
    #[error("no listener registered for {key}")]
    NotRegistered { key: String },

    /// Spawning, starting or joining a background thread failed.
    #[error("thread lifecycle operation '{operation}' failed")]
    ThreadLifecycleFailed { operation: &'static str },

    /// Parity error reporting was requested on a line without parity.
    #[error("parity error reporting requires parity to be enabled")]
    ParityNotEnabled,

    /// A configuration value lies outside its permitted domain.
    #[error("invalid value for '{field}': {reason}")]
    InvalidConfiguration { field: &'static str, reason: String },
}

impl SerialError {
    /// Wrap an I/O error from `operation`, keeping the raw OS error number.
    ///
    /// Errors without an OS error number (which only synthetic errors have)
    /// are recorded with code `-1`.
    pub fn os(operation: &'static str, err: io::Error) -> Self {
        Self::OsCallFailed {
            operation,
            code: err.raw_os_error().unwrap_or(-1),
        }
    }

    /// Capture `errno` right after a failed libc call.
    pub fn last_os_error(operation: &'static str) -> Self {
        Self::os(operation, io::Error::last_os_error())
    }

    pub fn unsupported(operation: &'static str) -> Self {
        Self::UnsupportedOnPlatform { operation }
    }

    pub fn lifecycle(operation: &'static str) -> Self {
        Self::ThreadLifecycleFailed { operation }
    }

    pub fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidConfiguration {
            field,
            reason: reason.into(),
        }
    }

    /// The raw OS error number, if this error came from a system call.
    pub fn raw_os_error(&self) -> Option<i32> {
        match self {
            Self::OsCallFailed { code, .. } => Some(*code),
            _ => None,
        }
    }
}

/// Result type used throughout the crate.
pub type Result<T, E = SerialError> = std::result::Result<T, E>;
