//! Runtime configuration.
//!
//! Aggregates the settings of every component into a single Config struct
//! that can be loaded from YAML files or environment variables.

mod client;

pub use client::{ClientConfig, RetryConfig};

use std::time::Duration;

use serde::Deserialize;

use crate::exceptions::FALLBACK_ERROR_NAME;

/// Default configuration file name.
pub const DEFAULT_CONFIG_FILE: &str = "rebus.yaml";
/// Environment variable for configuration file path.
pub const CONFIG_ENV_VAR: &str = "REBUS_CONFIG";
/// Prefix for configuration environment variables.
pub const CONFIG_ENV_PREFIX: &str = "REBUS";
/// Environment variable for logging configuration.
pub const LOG_ENV_VAR: &str = "REBUS_LOG";

/// Main configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Proxy defaults.
    pub client: ClientConfig,
    /// Signal stream settings.
    pub signals: SignalConfig,
    /// Error mapping settings.
    pub errors: ErrorConfig,
}

impl Config {
    /// Load configuration from file and environment.
    ///
    /// Configuration sources (in order of priority, later overrides earlier):
    /// 1. `rebus.yaml` in current directory (if exists)
    /// 2. File specified by `path` argument (if provided)
    /// 3. File specified by `CONFIG_ENV_VAR` environment variable (if set)
    /// 4. Environment variables with `CONFIG_ENV_PREFIX` prefix
    pub fn load(path: Option<&str>) -> Result<Self, Box<dyn std::error::Error>> {
        use ::config::{Config as ConfigLib, Environment, File, FileFormat};

        let mut builder = ConfigLib::builder()
            .add_source(File::new(DEFAULT_CONFIG_FILE, FileFormat::Yaml).required(false));

        if let Some(config_path) = path {
            builder = builder.add_source(File::new(config_path, FileFormat::Yaml).required(true));
        }

        if let Ok(config_path) = std::env::var(CONFIG_ENV_VAR) {
            builder = builder.add_source(File::new(&config_path, FileFormat::Yaml).required(true));
        }

        let config = builder
            .add_source(
                Environment::with_prefix(CONFIG_ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: Config = config.try_deserialize()?;
        Ok(config)
    }

    /// Create config for testing: short timeouts, fast retries.
    pub fn for_test() -> Self {
        Self {
            client: ClientConfig {
                call_timeout_ms: Some(2_000),
                retry: RetryConfig {
                    max_attempts: 3,
                    min_delay_ms: 1,
                    max_delay_ms: 10,
                },
                ..ClientConfig::default()
            },
            signals: SignalConfig {
                receive_timeout_ms: 500,
            },
            errors: ErrorConfig::default(),
        }
    }
}

/// Signal stream settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SignalConfig {
    /// Default wait for one signal in milliseconds.
    pub receive_timeout_ms: u64,
}

impl SignalConfig {
    pub fn receive_timeout(&self) -> Duration {
        Duration::from_millis(self.receive_timeout_ms)
    }
}

impl Default for SignalConfig {
    fn default() -> Self {
        Self {
            receive_timeout_ms: 5_000,
        }
    }
}

/// Error mapping settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ErrorConfig {
    /// Remote name sent for local errors with no registered name.
    /// Default: "org.freedesktop.DBus.Error.Failed"
    pub fallback_name: String,
}

impl Default for ErrorConfig {
    fn default() -> Self {
        Self {
            fallback_name: FALLBACK_ERROR_NAME.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::io::Write;

    #[test]
    fn test_config_default() {
        let config = Config::default();
        assert!(config.client.default_service.is_none());
        assert_eq!(config.client.default_path, "/");
        assert_eq!(config.signals.receive_timeout(), Duration::from_secs(5));
        assert_eq!(config.errors.fallback_name, FALLBACK_ERROR_NAME);
    }

    #[test]
    fn test_config_for_test() {
        let config = Config::for_test();
        assert_eq!(config.client.call_timeout(), Some(Duration::from_secs(2)));
        assert_eq!(config.client.retry.min_delay_ms, 1);
    }

    #[test]
    #[serial]
    fn test_load_from_file() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        writeln!(
            file,
            "client:\n  default_service: org.example.Svc\n  call_timeout_ms: 250\nerrors:\n  fallback_name: org.example.Error.Failed"
        )
        .unwrap();

        let config = Config::load(file.path().to_str()).unwrap();
        assert_eq!(config.client.default_service.as_deref(), Some("org.example.Svc"));
        assert_eq!(config.client.call_timeout(), Some(Duration::from_millis(250)));
        assert_eq!(config.client.retry.max_attempts, 3);
        assert_eq!(config.errors.fallback_name, "org.example.Error.Failed");
    }

    #[test]
    #[serial]
    fn test_load_env_overrides_file() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        writeln!(file, "signals:\n  receive_timeout_ms: 100").unwrap();

        std::env::set_var("REBUS__SIGNALS__RECEIVE_TIMEOUT_MS", "42");
        let config = Config::load(file.path().to_str());
        std::env::remove_var("REBUS__SIGNALS__RECEIVE_TIMEOUT_MS");

        assert_eq!(config.unwrap().signals.receive_timeout_ms, 42);
    }

    #[test]
    #[serial]
    fn test_load_missing_explicit_file_fails() {
        assert!(Config::load(Some("/nonexistent/rebus.yaml")).is_err());
    }
}
