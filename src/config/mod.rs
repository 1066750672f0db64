//! Configuration for the serial core.
//!
//! This module provides TOML-based configuration with environment variable overrides.
//!
//! # Configuration Resolution
//!
//! Configuration is loaded from the following locations (in order of priority):
//!
//! 1. `SERIAL_CORE_CONFIG` environment variable (explicit path)
//! 2. `./serial-core.toml` (current directory)
//! 3. `serial-core.toml` in the platform config directory
//!    (`~/.config/serial-core/` on Linux, `~/Library/Application Support/serial-core/` on macOS)
//! 4. Built-in defaults (no file required)
//!
//! # Environment Overrides
//!
//! The pattern is `SERIAL_CORE_<SECTION>_<KEY>`:
//! - `SERIAL_CORE_REGISTRY_CAPACITY=64`
//! - `SERIAL_CORE_LISTENER_READ_CHUNK_SIZE=4096`
//! - `SERIAL_CORE_LISTENER_LINE_POLL_INTERVAL_MS=20`
//! - `SERIAL_CORE_MONITOR_POLL_INTERVAL_MS=100`
//! - `SERIAL_CORE_MONITOR_CAPACITY=16`
//! - `SERIAL_CORE_DEFAULTS_BAUD=115200`
//! - `SERIAL_CORE_DEFAULTS_EXCLUSIVE=false`
//! - `SERIAL_CORE_LOGGING_LEVEL=debug`
//! - `SERIAL_CORE_LOGGING_FORMAT=json`
//!
//! # Example
//!
//! ```rust,no_run
//! use serial_core::config::ConfigLoader;
//!
//! let loader = ConfigLoader::load()?;
//! let config = loader.config();
//! println!("registry capacity: {}", config.registry.capacity);
//! # Ok::<(), serial_core::config::ConfigError>(())
//! ```

mod error;
mod loader;
mod schema;

pub use error::{ConfigError, ConfigResult};
pub use loader::{
    get_default_config_dir, get_default_config_path, resolve_config_path, ConfigLoader,
};
pub use schema::{
    Config, DefaultsConfig, ListenerConfig, LogFormat, LoggingConfig, MonitorConfig,
    RegistryConfig,
};
