//! Configuration loader with file resolution and environment override support.

use super::error::{ConfigError, ConfigResult};
use super::schema::Config;
use directories::ProjectDirs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Environment variable prefix for overrides
const ENV_PREFIX: &str = "SERIAL_CORE";

/// Config file name
const CONFIG_FILE_NAME: &str = "serial-core.toml";

/// Environment variable for explicit config path
const CONFIG_PATH_ENV: &str = "SERIAL_CORE_CONFIG";

/// Configuration loader with resolution and override logic.
#[derive(Debug, Clone)]
pub struct ConfigLoader {
    /// Resolved config file path (if any)
    pub config_path: Option<PathBuf>,
    /// The loaded configuration
    pub config: Config,
}

impl ConfigLoader {
    /// Load configuration using standard resolution order.
    ///
    /// Resolution priority (highest to lowest):
    /// 1. `SERIAL_CORE_CONFIG` environment variable (explicit path)
    /// 2. `./serial-core.toml` (current directory)
    /// 3. `serial-core.toml` in the platform config directory
    /// 4. Built-in defaults (no file required)
    ///
    /// Environment variables override file values; the result is validated.
    pub fn load() -> ConfigResult<Self> {
        let config_path = resolve_config_path();

        let mut config = if let Some(ref path) = config_path {
            load_from_file(path)?
        } else {
            Config::default()
        };

        apply_env_overrides(&mut config)?;
        config.validate()?;

        Ok(Self { config_path, config })
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let path = path.as_ref().to_path_buf();
        let mut config = load_from_file(&path)?;
        apply_env_overrides(&mut config)?;
        config.validate()?;

        Ok(Self {
            config_path: Some(path),
            config,
        })
    }

    /// Create a loader with default configuration (no file).
    ///
    /// Environment overrides that fail to parse are ignored here.
    pub fn with_defaults() -> Self {
        let mut config = Config::default();
        if apply_env_overrides(&mut config).is_err() || config.validate().is_err() {
            config = Config::default();
        }

        Self {
            config_path: None,
            config,
        }
    }

    /// Get the loaded configuration.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Get a mutable reference to the configuration.
    pub fn config_mut(&mut self) -> &mut Config {
        &mut self.config
    }

    /// Consume the loader and return the configuration.
    pub fn into_config(self) -> Config {
        self.config
    }

    /// Save the current configuration to file.
    pub fn save(&self) -> ConfigResult<()> {
        let path = self
            .config_path
            .as_ref()
            .ok_or_else(|| ConfigError::NoPath("save"))?;

        save_to_file(&self.config, path)
    }

    /// Save the current configuration to a specific file.
    pub fn save_to(&self, path: impl AsRef<Path>) -> ConfigResult<()> {
        save_to_file(&self.config, path.as_ref())
    }

    /// Reload configuration from file (if path is set).
    pub fn reload(&mut self) -> ConfigResult<()> {
        if let Some(ref path) = self.config_path {
            let mut config = load_from_file(path)?;
            apply_env_overrides(&mut config)?;
            config.validate()?;
            self.config = config;
        }
        Ok(())
    }
}

/// Resolve the configuration file path using standard locations.
pub fn resolve_config_path() -> Option<PathBuf> {
    if let Ok(path) = std::env::var(CONFIG_PATH_ENV) {
        let path = PathBuf::from(path);
        if path.exists() {
            return Some(path);
        }
    }

    let cwd_config = PathBuf::from(CONFIG_FILE_NAME);
    if cwd_config.exists() {
        return Some(cwd_config);
    }

    get_default_config_path().filter(|path| path.exists())
}

/// Get the default config directory for creating new config files.
pub fn get_default_config_dir() -> Option<PathBuf> {
    ProjectDirs::from("", "", "serial-core").map(|dirs| dirs.config_dir().to_path_buf())
}

/// Get the default config file path for creating new config files.
pub fn get_default_config_path() -> Option<PathBuf> {
    get_default_config_dir().map(|d| d.join(CONFIG_FILE_NAME))
}

/// Load configuration from a file.
fn load_from_file(path: &Path) -> ConfigResult<Config> {
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
        path: path.to_path_buf(),
        source: e,
    })?;

    toml::from_str(&content).map_err(ConfigError::Parse)
}

/// Save configuration to a file.
fn save_to_file(config: &Config, path: &Path) -> ConfigResult<()> {
    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| ConfigError::Write {
            path: path.to_path_buf(),
            source: e,
        })?;
    }

    let content = toml::to_string_pretty(config)?;
    std::fs::write(path, content).map_err(|e| ConfigError::Write {
        path: path.to_path_buf(),
        source: e,
    })
}

/// Parse `SERIAL_CORE_<suffix>` if it is set.
fn env_value<T: FromStr>(suffix: &str, what: &str) -> ConfigResult<Option<T>> {
    let var = format!("{ENV_PREFIX}_{suffix}");
    match std::env::var(&var) {
        Ok(val) => val
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::env(var, format!("invalid {what}"))),
        Err(_) => Ok(None),
    }
}

/// Apply environment variable overrides to the configuration.
///
/// Environment variables follow the pattern: `SERIAL_CORE_<SECTION>_<KEY>`
/// For example:
/// - `SERIAL_CORE_REGISTRY_CAPACITY=64`
/// - `SERIAL_CORE_MONITOR_POLL_INTERVAL_MS=100`
/// - `SERIAL_CORE_LOGGING_LEVEL=debug`
fn apply_env_overrides(config: &mut Config) -> ConfigResult<()> {
    if let Some(val) = env_value("REGISTRY_CAPACITY", "capacity")? {
        config.registry.capacity = val;
    }

    if let Some(val) = env_value("LISTENER_READ_CHUNK_SIZE", "chunk size")? {
        config.listener.read_chunk_size = val;
    }
    if let Some(val) = env_value("LISTENER_LINE_POLL_INTERVAL_MS", "interval")? {
        config.listener.line_poll_interval_ms = val;
    }

    if let Some(val) = env_value("MONITOR_POLL_INTERVAL_MS", "interval")? {
        config.monitor.poll_interval_ms = val;
    }
    if let Some(val) = env_value("MONITOR_CAPACITY", "capacity")? {
        config.monitor.capacity = val;
    }

    if let Some(val) = env_value::<u32>("DEFAULTS_BAUD", "baud rate")? {
        config.defaults.port.baud = val.into();
    }
    if let Some(val) = env_value("DEFAULTS_EXCLUSIVE", "boolean")? {
        config.defaults.exclusive = val;
    }

    if let Ok(val) = std::env::var(format!("{ENV_PREFIX}_LOGGING_LEVEL")) {
        config.logging.level = val;
    }
    if let Some(val) = env_value("LOGGING_FORMAT", "log format")? {
        config.logging.format = val;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LogFormat;
    use crate::port::settings::BaudRate;
    use serial_test::serial;
    use std::env;

    #[test]
    #[serial]
    fn test_default_loader() {
        let loader = ConfigLoader::with_defaults();
        assert_eq!(loader.config().registry.capacity, 1024);
        assert!(loader.config_path.is_none());
    }

    #[test]
    #[serial]
    fn test_env_override() {
        env::set_var("SERIAL_CORE_REGISTRY_CAPACITY", "16");
        env::set_var("SERIAL_CORE_DEFAULTS_BAUD", "250000");
        env::set_var("SERIAL_CORE_LOGGING_FORMAT", "json");

        let loader = ConfigLoader::with_defaults();
        assert_eq!(loader.config().registry.capacity, 16);
        assert_eq!(loader.config().defaults.port.baud, BaudRate::Custom(250000));
        assert_eq!(loader.config().logging.format, LogFormat::Json);

        env::remove_var("SERIAL_CORE_REGISTRY_CAPACITY");
        env::remove_var("SERIAL_CORE_DEFAULTS_BAUD");
        env::remove_var("SERIAL_CORE_LOGGING_FORMAT");
    }

    #[test]
    #[serial]
    fn test_bad_env_value_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("serial-core.toml");
        std::fs::write(&path, "").unwrap();

        env::set_var("SERIAL_CORE_MONITOR_CAPACITY", "lots");
        let err = ConfigLoader::load_from(&path).unwrap_err();
        env::remove_var("SERIAL_CORE_MONITOR_CAPACITY");

        assert!(matches!(err, ConfigError::Env { var, .. } if var == "SERIAL_CORE_MONITOR_CAPACITY"));
    }

    #[test]
    #[serial]
    fn test_explicit_path_env_wins() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("custom.toml");
        std::fs::write(&path, "[registry]\ncapacity = 3\n").unwrap();

        env::set_var(CONFIG_PATH_ENV, &path);
        let loader = ConfigLoader::load().unwrap();
        env::remove_var(CONFIG_PATH_ENV);

        assert_eq!(loader.config_path.as_deref(), Some(path.as_path()));
        assert_eq!(loader.config().registry.capacity, 3);
    }

    #[test]
    #[serial]
    fn test_save_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("serial-core.toml");

        let mut loader = ConfigLoader::with_defaults();
        loader.config_mut().monitor.poll_interval_ms = 75;
        loader.save_to(&path).unwrap();

        let mut loaded = ConfigLoader::load_from(&path).unwrap();
        assert_eq!(loaded.config().monitor.poll_interval_ms, 75);

        std::fs::write(&path, "[monitor]\npoll_interval_ms = 0\n").unwrap();
        assert!(matches!(
            loaded.reload(),
            Err(ConfigError::Invalid { .. })
        ));
        assert_eq!(loaded.config().monitor.poll_interval_ms, 75);
    }

    #[test]
    fn test_save_without_path_fails() {
        let loader = ConfigLoader {
            config_path: None,
            config: Config::default(),
        };
        assert!(matches!(loader.save(), Err(ConfigError::NoPath("save"))));
    }
}
