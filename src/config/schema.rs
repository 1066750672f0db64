//! Configuration schema definitions.
//!
//! Every section has `#[serde(default)]`, so a file only needs the keys it
//! changes.

use super::error::{ConfigError, ConfigResult};
use crate::port::settings::PortConfiguration;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Root configuration structure.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Listener registry limits
    pub registry: RegistryConfig,
    /// Data and event listener tuning
    pub listener: ListenerConfig,
    /// Port presence monitor tuning
    pub monitor: MonitorConfig,
    /// Settings applied to every port on open
    pub defaults: DefaultsConfig,
    /// Logging configuration
    pub logging: LoggingConfig,
}

impl Config {
    /// Reject values no component can run with.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.registry.capacity == 0 {
            return Err(ConfigError::invalid("registry.capacity", "must be at least 1"));
        }
        if self.listener.read_chunk_size == 0 {
            return Err(ConfigError::invalid(
                "listener.read_chunk_size",
                "must be at least 1",
            ));
        }
        if self.listener.line_poll_interval_ms == 0 {
            return Err(ConfigError::invalid(
                "listener.line_poll_interval_ms",
                "must be at least 1",
            ));
        }
        if self.monitor.capacity == 0 {
            return Err(ConfigError::invalid("monitor.capacity", "must be at least 1"));
        }
        if self.monitor.poll_interval_ms == 0 {
            return Err(ConfigError::invalid(
                "monitor.poll_interval_ms",
                "must be at least 1",
            ));
        }
        self.defaults
            .port
            .validate()
            .map_err(|e| ConfigError::invalid("defaults.port", e.to_string()))
    }
}

/// Listener registry section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// Maximum number of descriptors with listeners at once
    pub capacity: usize,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            capacity: crate::listener::DEFAULT_CAPACITY,
        }
    }
}

/// Listener section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bytes drained per data-listener wake-up
    pub read_chunk_size: usize,
    /// Event listener sampling period in milliseconds
    pub line_poll_interval_ms: u64,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            read_chunk_size: 1024,
            line_poll_interval_ms: 50,
        }
    }
}

impl ListenerConfig {
    pub fn line_poll_interval(&self) -> Duration {
        Duration::from_millis(self.line_poll_interval_ms)
    }
}

/// Port monitor section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// Presence polling period in milliseconds
    pub poll_interval_ms: u64,
    /// Maximum number of watched paths
    pub capacity: usize,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 250,
            capacity: crate::monitor::DEFAULT_CAPACITY,
        }
    }
}

impl MonitorConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// Per-port defaults section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DefaultsConfig {
    /// Claim exclusive ownership on open
    pub exclusive: bool,
    /// Line settings applied on open
    pub port: PortConfiguration,
}

impl Default for DefaultsConfig {
    fn default() -> Self {
        Self {
            exclusive: true,
            port: PortConfiguration::default(),
        }
    }
}

/// Logging configuration section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Filter directive, e.g. "info" or "serial_core=debug". `RUST_LOG` wins.
    pub level: String,
    /// Log format: "json", "pretty", "compact"
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// JSON format
    Json,
    /// Pretty format with colors
    #[default]
    Pretty,
    /// Compact format
    Compact,
}

impl std::str::FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "json" => Ok(Self::Json),
            "pretty" => Ok(Self::Pretty),
            "compact" => Ok(Self::Compact),
            other => Err(format!("unknown log format '{other}'")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::port::settings::{BaudRate, Parity};
    use pretty_assertions::assert_eq;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.registry.capacity, 1024);
        assert_eq!(config.listener.read_chunk_size, 1024);
        assert_eq!(config.listener.line_poll_interval(), Duration::from_millis(50));
        assert_eq!(config.monitor.poll_interval(), Duration::from_millis(250));
        assert!(config.defaults.exclusive);
        assert_eq!(config.defaults.port, PortConfiguration::default());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_serialization() {
        let config = Config::default();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        assert!(toml_str.contains("[registry]"));
        assert!(toml_str.contains("[defaults.port]"));

        let back: Config = toml::from_str(&toml_str).unwrap();
        assert_eq!(back, config);
    }

    #[test]
    fn test_config_deserialization() {
        let toml_str = r#"
            [registry]
            capacity = 8

            [defaults.port]
            baud = 250000
            parity = "even"
        "#;

        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.registry.capacity, 8);
        assert_eq!(config.defaults.port.baud, BaudRate::Custom(250000));
        assert_eq!(config.defaults.port.parity, Parity::Even);
        // Defaults should still work
        assert_eq!(config.monitor.capacity, 1024);
        assert_eq!(config.defaults.port.min_read_length, 1);
    }

    #[test]
    fn test_zero_values_are_rejected() {
        let mut config = Config::default();
        config.listener.read_chunk_size = 0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid { key, .. }) if key == "listener.read_chunk_size"
        ));

        let mut config = Config::default();
        config.monitor.poll_interval_ms = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_invalid_port_defaults_are_rejected() {
        let mut config = Config::default();
        config.defaults.port.report_parity_errors = true;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_log_format_parse() {
        assert_eq!("JSON".parse::<LogFormat>().unwrap(), LogFormat::Json);
        assert!("xml".parse::<LogFormat>().is_err());
    }
}
