//! Configuration management for the fluxgate server.
//!
//! This module provides configuration loading with multiple sources:
//! 1. Default values (hardcoded)
//! 2. Configuration file (YAML)
//! 3. Environment variables (override)
//!
//! # Configuration Hierarchy
//!
//! Environment variables take precedence over config file values,
//! which take precedence over defaults.
//!
//! # Example
//!
//! ```ignore
//! use fluxgate_server::config::ServerConfig;
//!
//! // Load from file with env overrides
//! let config = ServerConfig::load("config.yaml")?;
//!
//! // Or load from environment only
//! let config = ServerConfig::from_env()?;
//! ```

use std::path::Path;
use std::time::Duration;

use config::{Config, ConfigError, Environment, File, FileFormat};
use fluxgate_storage::{InfluxConnectionConfig, PoolConfig};
use serde::{Deserialize, Deserializer, Serialize};

/// Prefix of environment overrides, e.g. `FLUXGATE_INFLUXDB__HOST`.
const ENV_PREFIX: &str = "FLUXGATE";

/// Backends accepted in `influxdb.backend`.
pub const VALID_BACKENDS: [&str; 2] = ["influxdb", "memory"];

/// Server configuration.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
pub struct ServerConfig {
    /// Server settings
    #[serde(default)]
    pub server: ServerSettings,

    /// Time-series backend settings
    #[serde(default)]
    pub influxdb: InfluxSettings,

    /// Logging settings
    #[serde(default)]
    pub logging: LoggingSettings,

    /// Metrics settings
    #[serde(default)]
    pub metrics: MetricsSettings,
}

/// Server network settings.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct ServerSettings {
    /// Host to bind to
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to listen on
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8123
}

/// InfluxDB connection and pool settings.
///
/// Overridable via environment variables with the `FLUXGATE_INFLUXDB__`
/// prefix, e.g. `FLUXGATE_INFLUXDB__TOKEN`.
///
/// # Example YAML Configuration
///
/// ```yaml
/// influxdb:
///   host: influx.local
///   port: 8086
///   token: my-token
///   organization: home
///   bucket: homeassistant
///   timeout: 10000
///   pool_size: 5
///   max_retries: 3
/// ```
#[derive(Clone, Deserialize, Serialize, PartialEq)]
pub struct InfluxSettings {
    /// Backend type: "influxdb" or "memory"
    #[serde(default = "default_backend")]
    pub backend: String,

    #[serde(default = "default_influx_host")]
    pub host: String,

    /// Accepts a number or a numeric string.
    #[serde(default = "default_influx_port", deserialize_with = "port_from_number_or_string")]
    pub port: u16,

    #[serde(default)]
    pub token: String,

    #[serde(default)]
    pub organization: String,

    #[serde(default = "default_bucket")]
    pub bucket: String,

    /// Request timeout in milliseconds
    #[serde(default = "default_timeout_ms")]
    pub timeout: u64,

    #[serde(default)]
    pub ssl: bool,

    #[serde(default = "default_true")]
    pub verify_ssl: bool,

    /// Number of pooled connections
    #[serde(default = "default_pool_size")]
    pub pool_size: usize,

    /// Retries after the first failed query attempt
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

impl Default for InfluxSettings {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            host: default_influx_host(),
            port: default_influx_port(),
            token: String::new(),
            organization: String::new(),
            bucket: default_bucket(),
            timeout: default_timeout_ms(),
            ssl: false,
            verify_ssl: true,
            pool_size: default_pool_size(),
            max_retries: default_max_retries(),
        }
    }
}

// Custom Debug implementation to hide the API token
impl std::fmt::Debug for InfluxSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InfluxSettings")
            .field("backend", &self.backend)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("token", &"[REDACTED]")
            .field("organization", &self.organization)
            .field("bucket", &self.bucket)
            .field("timeout", &self.timeout)
            .field("ssl", &self.ssl)
            .field("verify_ssl", &self.verify_ssl)
            .field("pool_size", &self.pool_size)
            .field("max_retries", &self.max_retries)
            .finish()
    }
}

impl InfluxSettings {
    /// Connection settings for the HTTP client.
    pub fn connection_config(&self) -> InfluxConnectionConfig {
        InfluxConnectionConfig {
            host: self.host.clone(),
            port: self.port,
            token: self.token.clone(),
            organization: self.organization.clone(),
            timeout: Duration::from_millis(self.timeout),
            ssl: self.ssl,
            verify_ssl: self.verify_ssl,
        }
    }

    /// Pool sizing and retry settings; acquire timeout and backoff keep their defaults.
    pub fn pool_config(&self) -> PoolConfig {
        PoolConfig {
            capacity: self.pool_size,
            max_retries: self.max_retries,
            ..PoolConfig::default()
        }
    }
}

fn default_backend() -> String {
    "influxdb".to_string()
}

fn default_influx_host() -> String {
    "localhost".to_string()
}

fn default_influx_port() -> u16 {
    8086
}

fn default_bucket() -> String {
    "homeassistant".to_string()
}

fn default_timeout_ms() -> u64 {
    10_000
}

fn default_pool_size() -> usize {
    5
}

fn default_max_retries() -> u32 {
    3
}

fn port_from_number_or_string<'de, D>(deserializer: D) -> Result<u16, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum PortRepr {
        Number(u64),
        Text(String),
    }

    let raw = match PortRepr::deserialize(deserializer)? {
        PortRepr::Number(n) => n,
        PortRepr::Text(text) => text
            .trim()
            .parse::<u64>()
            .map_err(|_| serde::de::Error::custom(format!("invalid port: {text:?}")))?,
    };
    u16::try_from(raw).map_err(|_| serde::de::Error::custom(format!("port out of range: {raw}")))
}

/// Logging settings.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct LoggingSettings {
    /// Log level: "trace", "debug", "info", "warn", "error"
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Use JSON format (true for production, false for development)
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Metrics settings.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct MetricsSettings {
    /// Enable the Prometheus metrics endpoint
    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl Default for MetricsSettings {
    fn default() -> Self {
        Self { enabled: true }
    }
}

fn default_true() -> bool {
    true
}

/// Error type for configuration loading.
#[derive(Debug, thiserror::Error)]
pub enum ConfigLoadError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] ConfigError),

    #[error("configuration file not found: {path}")]
    FileNotFound { path: String },

    #[error("invalid configuration: {message}")]
    Invalid { message: String },
}

fn environment() -> Environment {
    // Use __ as separator for nested keys: FLUXGATE_SERVER__PORT -> server.port
    Environment::with_prefix(ENV_PREFIX)
        .prefix_separator("_")
        .separator("__")
}

impl ServerConfig {
    /// Load configuration from a YAML file with environment variable overrides.
    ///
    /// Environment variables are prefixed with `FLUXGATE_` and use `__` as separator.
    /// For example:
    /// - `FLUXGATE_SERVER__PORT=9090` overrides `server.port`
    /// - `FLUXGATE_INFLUXDB__TOKEN=...` overrides `influxdb.token`
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigLoadError> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(ConfigLoadError::FileNotFound {
                path: path.display().to_string(),
            });
        }

        let config = Config::builder()
            .add_source(Config::try_from(&ServerConfig::default())?)
            .add_source(File::from(path).format(FileFormat::Yaml))
            .add_source(environment())
            .build()?;

        let server_config: ServerConfig = config.try_deserialize()?;
        server_config.validate()?;

        Ok(server_config)
    }

    /// Load configuration from environment variables only.
    pub fn from_env() -> Result<Self, ConfigLoadError> {
        let config = Config::builder()
            .add_source(Config::try_from(&ServerConfig::default())?)
            .add_source(environment())
            .build()?;

        let server_config: ServerConfig = config.try_deserialize()?;
        server_config.validate()?;

        Ok(server_config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigLoadError> {
        if self.server.port == 0 {
            return Err(ConfigLoadError::Invalid {
                message: "server.port must be greater than 0".to_string(),
            });
        }

        if !VALID_BACKENDS.contains(&self.influxdb.backend.as_str()) {
            return Err(ConfigLoadError::Invalid {
                message: format!(
                    "influxdb.backend must be one of: {:?}, got: {}",
                    VALID_BACKENDS, self.influxdb.backend
                ),
            });
        }

        if self.influxdb.pool_size == 0 {
            return Err(ConfigLoadError::Invalid {
                message: "influxdb.pool_size must be at least 1".to_string(),
            });
        }

        if self.influxdb.timeout == 0 {
            return Err(ConfigLoadError::Invalid {
                message: "influxdb.timeout must be greater than 0".to_string(),
            });
        }

        if self.influxdb.bucket.trim().is_empty() {
            return Err(ConfigLoadError::Invalid {
                message: "influxdb.bucket must not be empty".to_string(),
            });
        }

        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.to_lowercase().as_str()) {
            return Err(ConfigLoadError::Invalid {
                message: format!(
                    "logging.level must be one of: {:?}, got: {}",
                    valid_levels, self.logging.level
                ),
            });
        }

        Ok(())
    }
}
