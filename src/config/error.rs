//! Errors raised while loading, validating or saving configuration.

use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    /// The config file exists but could not be read.
    #[error("cannot read config {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("cannot encode config as TOML: {0}")]
    Serialize(#[from] toml::ser::Error),

    /// Creating the parent directory or writing the file failed.
    #[error("cannot write config {}: {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A value is out of range; `key` is the dotted TOML path.
    #[error("{key}: {message}")]
    Invalid { key: String, message: String },

    /// A `SERIAL_CORE_*` override did not parse.
    #[error("{var}: {message}")]
    Env { var: String, message: String },

    /// `save` or `reload` on a loader that was built from defaults only.
    #[error("no config file path to {0}")]
    NoPath(&'static str),
}

impl ConfigError {
    pub fn invalid(key: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Invalid {
            key: key.into(),
            message: message.into(),
        }
    }

    pub fn env(var: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Env {
            var: var.into(),
            message: message.into(),
        }
    }

    /// The file involved, for I/O failures.
    pub fn path(&self) -> Option<&Path> {
        match self {
            Self::Read { path, .. } | Self::Write { path, .. } => Some(path),
            _ => None,
        }
    }
}

pub type ConfigResult<T> = Result<T, ConfigError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages_name_the_offending_setting() {
        let err = ConfigError::invalid("registry.capacity", "must be at least 1");
        assert_eq!(err.to_string(), "registry.capacity: must be at least 1");

        let err = ConfigError::env("SERIAL_CORE_MONITOR_CAPACITY", "expected an integer");
        assert_eq!(
            err.to_string(),
            "SERIAL_CORE_MONITOR_CAPACITY: expected an integer"
        );
        assert_eq!(err.path(), None);
    }

    #[test]
    fn test_io_failures_carry_the_path() {
        let err = ConfigError::Write {
            path: PathBuf::from("/tmp/serial-core/config.toml"),
            source: std::io::Error::from(std::io::ErrorKind::PermissionDenied),
        };
        assert_eq!(err.path(), Some(Path::new("/tmp/serial-core/config.toml")));
        assert!(err.to_string().starts_with("cannot write config /tmp/serial-core/config.toml"));
        assert!(std::error::Error::source(&err).is_some());
    }
}
