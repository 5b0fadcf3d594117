//! Application configuration management.
//!
//! Configuration is layered with the `config` crate:
//! 1. Built-in defaults
//! 2. An optional TOML file (`/etc/blueprox/config.toml` on Linux)
//! 3. Environment variables of the form `BLUEPROX__ENGINE__SCAN_WINDOW_SECS=10`
//!
//! Every loaded configuration is validated before it is returned.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Prefix for environment variable overrides.
pub const ENV_PREFIX: &str = "BLUEPROX";

/// Environment variable that points at an alternative config file.
pub const CONFIG_PATH_ENV: &str = "BLUEPROX_CONFIG";

/// Errors raised while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A required configuration file does not exist.
    #[error("Configuration file not found at: {}", .0.display())]
    NotFound(PathBuf),

    /// The file or environment could not be read or deserialized.
    #[error("Failed to load configuration: {0}")]
    LoadError(#[from] ::config::ConfigError),

    /// A single field failed validation.
    #[error("Invalid value for '{field}': {message}")]
    ValidationError {
        /// Dotted path of the offending field.
        field: String,
        /// What is wrong with it.
        message: String,
    },

    /// Several fields failed validation.
    #[error("{} configuration errors: {}", .0.len(), join_errors(.0))]
    MultipleValidationErrors(Vec<ConfigError>),
}

fn join_errors(errors: &[ConfigError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Result alias for configuration operations.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Scan, monitor and adapter timing.
    pub engine: EngineConfig,

    /// Proximity filter tuning.
    pub filter: FilterConfig,

    /// HTTP listener.
    pub server: ServerConfig,
}

/// Engine timing and the distance model constants.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Length of a discovery window in seconds.
    pub scan_window_secs: u64,

    /// Period of the connected-device monitor in seconds.
    pub monitor_interval_secs: u64,

    /// Expected RSSI at one metre, in dBm.
    pub reference_tx_power: i16,

    /// Path loss exponent of the environment.
    pub path_loss_exponent: f64,

    /// Upper bound for adapter queries (RSSI, connection state, name).
    pub query_timeout_secs: u64,

    /// Upper bound for adapter actions (pair, connect, disconnect).
    pub action_timeout_secs: u64,

    /// Wait after a connect before re-checking the link.
    pub connect_settle_ms: u64,

    /// Wait after a disconnect before re-checking the link.
    pub disconnect_settle_ms: u64,

    /// Wait after pairing before re-checking the bond.
    pub pair_settle_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            scan_window_secs: 8,
            monitor_interval_secs: 5,
            reference_tx_power: crate::types::DEFAULT_TX_POWER_DBM,
            path_loss_exponent: crate::distance::DEFAULT_PATH_LOSS_EXPONENT,
            query_timeout_secs: 5,
            action_timeout_secs: 10,
            connect_settle_ms: 4000,
            disconnect_settle_ms: 3000,
            pair_settle_ms: 4000,
        }
    }
}

impl EngineConfig {
    /// Discovery window length.
    #[must_use]
    pub const fn scan_window(&self) -> Duration {
        Duration::from_secs(self.scan_window_secs)
    }

    /// Monitor loop period.
    #[must_use]
    pub const fn monitor_interval(&self) -> Duration {
        Duration::from_secs(self.monitor_interval_secs)
    }

    /// Timeout for adapter queries.
    #[must_use]
    pub const fn query_timeout(&self) -> Duration {
        Duration::from_secs(self.query_timeout_secs)
    }

    /// Timeout for adapter actions.
    #[must_use]
    pub const fn action_timeout(&self) -> Duration {
        Duration::from_secs(self.action_timeout_secs)
    }

    /// Settle time after connect.
    #[must_use]
    pub const fn connect_settle(&self) -> Duration {
        Duration::from_millis(self.connect_settle_ms)
    }

    /// Settle time after disconnect.
    #[must_use]
    pub const fn disconnect_settle(&self) -> Duration {
        Duration::from_millis(self.disconnect_settle_ms)
    }

    /// Settle time after pairing.
    #[must_use]
    pub const fn pair_settle(&self) -> Duration {
        Duration::from_millis(self.pair_settle_ms)
    }
}

/// Unscented Kalman filter parameters shared by every per-device filter.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterConfig {
    /// Multiplier applied to the identity matrix for the initial covariance.
    pub initial_covariance_scale: f64,

    /// Diagonal process noise added on every predict step.
    pub process_noise: f64,

    /// Variance of a raw distance observation, in m².
    pub measurement_noise: f64,

    /// Spread of the sigma points around the mean.
    pub alpha: f64,

    /// Prior knowledge of the distribution (2 is optimal for Gaussians).
    pub beta: f64,

    /// Secondary scaling parameter.
    pub kappa: f64,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            initial_covariance_scale: 10.0,
            process_noise: 0.1,
            measurement_noise: 0.5,
            alpha: 0.1,
            beta: 2.0,
            kappa: 0.0,
        }
    }
}

/// HTTP listener configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Interface to bind.
    pub host: String,

    /// TCP port.
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 5000,
        }
    }
}

impl ServerConfig {
    /// `host:port` string suitable for `TcpListener::bind`.
    #[must_use]
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Config {
    /// Load configuration from a file that must exist, layered with environment overrides.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::NotFound`] if the file is missing, or a load/validation error.
    pub fn load(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ConfigError::NotFound(path.to_path_buf()));
        }
        Self::build(path, true)
    }

    /// Load configuration, falling back to defaults when the file is absent.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be parsed, or validation fails.
    pub fn load_or_default(path: impl AsRef<Path>) -> ConfigResult<Self> {
        Self::build(path.as_ref(), false)
    }

    fn build(path: &Path, required: bool) -> ConfigResult<Self> {
        let loaded: Self = ::config::Config::builder()
            .add_source(
                ::config::File::from(path)
                    .format(::config::FileFormat::Toml)
                    .required(required),
            )
            .add_source(
                ::config::Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        loaded.validate()?;
        Ok(loaded)
    }

    /// Location of the configuration file.
    ///
    /// `BLUEPROX_CONFIG` wins; otherwise `/etc/blueprox/config.toml` on Linux and the
    /// platform config directory elsewhere.
    #[must_use]
    pub fn default_path() -> PathBuf {
        if let Ok(path) = std::env::var(CONFIG_PATH_ENV) {
            return PathBuf::from(path);
        }

        #[cfg(target_os = "linux")]
        {
            PathBuf::from("/etc/blueprox/config.toml")
        }
        #[cfg(not(target_os = "linux"))]
        {
            directories::ProjectDirs::from("", "", "blueprox").map_or_else(
                || PathBuf::from("config.toml"),
                |dirs| dirs.config_dir().join("config.toml"),
            )
        }
    }

    /// Validate every section, collecting all problems.
    ///
    /// # Errors
    ///
    /// Returns the single failure, or [`ConfigError::MultipleValidationErrors`].
    pub fn validate(&self) -> ConfigResult<()> {
        let mut errors = Vec::new();
        let mut check = |ok: bool, field: &str, message: &str| {
            if !ok {
                errors.push(ConfigError::ValidationError {
                    field: field.to_string(),
                    message: message.to_string(),
                });
            }
        };

        let engine = &self.engine;
        check(
            (1..=60).contains(&engine.scan_window_secs),
            "engine.scan_window_secs",
            "must be between 1 and 60 seconds",
        );
        check(
            engine.monitor_interval_secs >= 1,
            "engine.monitor_interval_secs",
            "must be at least 1 second",
        );
        check(
            engine.reference_tx_power > crate::distance::NOISE_FLOOR_DBM
                && engine.reference_tx_power < 0,
            "engine.reference_tx_power",
            "must be between -100 and 0 dBm (exclusive)",
        );
        check(
            (1.0..=6.0).contains(&engine.path_loss_exponent),
            "engine.path_loss_exponent",
            "must be between 1.0 and 6.0",
        );
        check(
            engine.query_timeout_secs >= 1,
            "engine.query_timeout_secs",
            "must be at least 1 second",
        );
        check(
            engine.action_timeout_secs >= 1,
            "engine.action_timeout_secs",
            "must be at least 1 second",
        );

        let filter = &self.filter;
        check(
            filter.initial_covariance_scale > 0.0,
            "filter.initial_covariance_scale",
            "must be positive",
        );
        check(
            filter.process_noise >= 0.0,
            "filter.process_noise",
            "must not be negative",
        );
        check(
            filter.measurement_noise > 0.0,
            "filter.measurement_noise",
            "must be positive",
        );
        check(
            filter.alpha > 0.0 && filter.alpha <= 1.0,
            "filter.alpha",
            "must be in (0, 1]",
        );
        check(filter.beta >= 0.0, "filter.beta", "must not be negative");
        check(
            filter.kappa > -2.0,
            "filter.kappa",
            "must be greater than -2 for a two-state filter",
        );

        check(
            !self.server.host.trim().is_empty(),
            "server.host",
            "must not be empty",
        );

        match errors.len() {
            0 => Ok(()),
            1 => Err(errors.remove(0)),
            _ => Err(ConfigError::MultipleValidationErrors(errors)),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    fn write_config(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new()
            .suffix(".toml")
            .tempfile()
            .unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_defaults_are_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.engine.scan_window(), Duration::from_secs(8));
        assert_eq!(config.engine.monitor_interval(), Duration::from_secs(5));
        assert_eq!(config.engine.reference_tx_power, -59);
        assert_eq!(config.server.bind_address(), "0.0.0.0:5000");
    }

    #[test]
    fn test_load_or_default_without_file() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load_or_default(dir.path().join("missing.toml")).unwrap();
        assert_eq!(config.filter, FilterConfig::default());
    }

    #[test]
    fn test_load_requires_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = Config::load(dir.path().join("missing.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::NotFound(_)));
    }

    #[test]
    fn test_load_partial_file() {
        let file = write_config(
            r"
            [engine]
            scan_window_secs = 12

            [server]
            port = 8080
            ",
        );
        let config = Config::load(file.path()).unwrap();
        assert_eq!(config.engine.scan_window_secs, 12);
        assert_eq!(config.engine.monitor_interval_secs, 5);
        assert_eq!(config.server.port, 8080);
    }

    #[test]
    fn test_round_trip_through_toml() {
        let mut original = Config::default();
        original.filter.measurement_noise = 0.8;
        original.engine.connect_settle_ms = 0;
        let file = write_config(&toml::to_string_pretty(&original).unwrap());

        let loaded = Config::load(file.path()).unwrap();
        assert_eq!(loaded, original);
    }

    #[test]
    fn test_malformed_file_is_rejected() {
        let file = write_config("[engine\nscan_window_secs = ");
        let err = Config::load(file.path()).unwrap_err();
        assert!(matches!(err, ConfigError::LoadError(_)));
    }

    #[test]
    fn test_single_validation_error() {
        let mut config = Config::default();
        config.engine.scan_window_secs = 0;
        let err = config.validate().unwrap_err();
        assert!(
            matches!(err, ConfigError::ValidationError { ref field, .. } if field == "engine.scan_window_secs")
        );
    }

    #[test]
    fn test_multiple_validation_errors() {
        let mut config = Config::default();
        config.engine.reference_tx_power = 3;
        config.filter.alpha = 0.0;
        config.filter.measurement_noise = -1.0;

        match config.validate().unwrap_err() {
            ConfigError::MultipleValidationErrors(errors) => assert_eq!(errors.len(), 3),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_invalid_file_values_fail_validation() {
        let file = write_config("[filter]\nalpha = 4.0\n");
        let err = Config::load(file.path()).unwrap_err();
        assert!(err.to_string().contains("filter.alpha"));
    }
}
