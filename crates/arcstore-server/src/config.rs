//! Server configuration loading from file and environment variables.

use arcstore_db::DbRuntimeSettings;
use serde::Deserialize;
use std::net::{IpAddr, Ipv4Addr};
use std::path::PathBuf;
use thiserror::Error;

/// Top-level server configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// Server network settings.
    #[serde(default)]
    pub server: ServerConfig,

    /// Database and connection pool settings.
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Location of the signal sample files.
    #[serde(default)]
    pub storage: StorageConfig,

    /// Per-client request limits.
    #[serde(default)]
    pub rate_limit: RateLimitConfig,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Network configuration for the HTTP server.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Host address to bind to.
    #[serde(default = "default_host")]
    pub host: IpAddr,

    /// Port to listen on.
    #[serde(default = "default_port")]
    pub port: u16,
}

/// Database configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// Path to the SQLite database file.
    #[serde(default = "default_db_path")]
    pub path: String,

    /// Busy timeout for SQLite connections, in milliseconds.
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,

    /// Number of pooled connections.
    #[serde(default = "default_pool_size")]
    pub pool_size: u32,

    /// Seconds a request waits for a free connection before getting a 503.
    #[serde(default = "default_pool_timeout_secs")]
    pub pool_timeout_secs: u64,

    /// Seconds shutdown waits for in-flight requests to return their
    /// connections.
    #[serde(default = "default_drain_timeout_secs")]
    pub drain_timeout_secs: u64,

    /// Optional maximum age of a pooled connection, in seconds.
    #[serde(default)]
    pub max_lifetime_secs: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// Directory that `binary_data_path` values are resolved against.
    #[serde(default = "default_binary_dir")]
    pub binary_dir: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitConfig {
    /// Requests allowed per client IP in each one-minute window.
    #[serde(default = "default_requests_per_minute")]
    pub requests_per_minute: u32,
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level filter (e.g., "info", "debug", "arcstore_db=debug,info").
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Whether to output logs in JSON format.
    #[serde(default)]
    pub json: bool,
}

fn default_host() -> IpAddr {
    IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1))
}

fn default_port() -> u16 {
    5001
}

fn default_db_path() -> String {
    "arcstore.db".to_string()
}

fn default_busy_timeout_ms() -> u64 {
    5_000
}

fn default_pool_size() -> u32 {
    10
}

fn default_pool_timeout_secs() -> u64 {
    30
}

fn default_drain_timeout_secs() -> u64 {
    30
}

fn default_binary_dir() -> PathBuf {
    PathBuf::from("data")
}

fn default_requests_per_minute() -> u32 {
    600
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
            busy_timeout_ms: default_busy_timeout_ms(),
            pool_size: default_pool_size(),
            pool_timeout_secs: default_pool_timeout_secs(),
            drain_timeout_secs: default_drain_timeout_secs(),
            max_lifetime_secs: None,
        }
    }
}

impl DatabaseConfig {
    /// Pool and connection settings for [`arcstore_db::create_pool`].
    pub fn runtime_settings(&self) -> DbRuntimeSettings {
        DbRuntimeSettings {
            busy_timeout_ms: self.busy_timeout_ms,
            pool_max_size: self.pool_size,
            acquire_timeout_ms: self.pool_timeout_secs.saturating_mul(1_000),
            drain_timeout_ms: self.drain_timeout_secs.saturating_mul(1_000),
            max_lifetime_secs: self.max_lifetime_secs,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            binary_dir: default_binary_dir(),
        }
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            requests_per_minute: default_requests_per_minute(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

/// Errors that can occur when loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read the configuration file.
    #[error("failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),

    /// Failed to parse the configuration file.
    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Loads configuration from a TOML file, falling back to defaults.
///
/// Environment variable overrides:
/// - `ARCSTORE_HOST` overrides `server.host`
/// - `ARCSTORE_PORT` overrides `server.port`
/// - `ARCSTORE_DB_PATH` overrides `database.path`
/// - `ARCSTORE_POOL_SIZE` overrides `database.pool_size`
/// - `ARCSTORE_POOL_TIMEOUT_SECS` overrides `database.pool_timeout_secs`
/// - `ARCSTORE_BINARY_DIR` overrides `storage.binary_dir`
/// - `ARCSTORE_LOG_LEVEL` overrides `logging.level`
/// - `ARCSTORE_LOG_JSON` overrides `logging.json` (set to "true" to enable)
///
/// # Errors
///
/// Returns `ConfigError` if the file exists but cannot be read or parsed.
pub fn load_config(path: Option<&str>) -> Result<Config, ConfigError> {
    let mut config = match path {
        Some(p) => match std::fs::read_to_string(p) {
            Ok(contents) => toml::from_str(&contents)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = p, "config file not found, using defaults");
                Config::default()
            }
            Err(e) => return Err(ConfigError::FileRead(e)),
        },
        None => Config::default(),
    };

    apply_env_overrides(&mut config, |key| std::env::var(key).ok());
    Ok(config)
}

fn apply_env_overrides(config: &mut Config, var: impl Fn(&str) -> Option<String>) {
    if let Some(host) = var("ARCSTORE_HOST") {
        if let Ok(parsed) = host.parse() {
            config.server.host = parsed;
        }
    }
    if let Some(port) = var("ARCSTORE_PORT") {
        if let Ok(parsed) = port.parse() {
            config.server.port = parsed;
        }
    }
    if let Some(db_path) = var("ARCSTORE_DB_PATH") {
        config.database.path = db_path;
    }
    if let Some(size) = var("ARCSTORE_POOL_SIZE") {
        if let Ok(parsed) = size.parse() {
            config.database.pool_size = parsed;
        }
    }
    if let Some(timeout) = var("ARCSTORE_POOL_TIMEOUT_SECS") {
        if let Ok(parsed) = timeout.parse() {
            config.database.pool_timeout_secs = parsed;
        }
    }
    if let Some(dir) = var("ARCSTORE_BINARY_DIR") {
        config.storage.binary_dir = PathBuf::from(dir);
    }
    if let Some(level) = var("ARCSTORE_LOG_LEVEL") {
        config.logging.level = level;
    }
    if let Some(json) = var("ARCSTORE_LOG_JSON") {
        config.logging.json = json == "true" || json == "1";
    }
}
