//! Configuration management
//!
//! This module handles loading and parsing configuration for Rollcall.
//! Configuration can be loaded from:
//! - config.yml file
//! - Environment variables (override file settings)
//!
//! Missing optional values are filled with sensible defaults.

use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,
    /// Database configuration
    #[serde(default)]
    pub database: DatabaseConfig,
    /// Attendance capture configuration
    #[serde(default)]
    pub attendance: AttendanceConfig,
    /// Statistics aggregation configuration
    #[serde(default)]
    pub stats: StatsConfig,
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Host address to bind to
    #[serde(default = "default_host")]
    pub host: String,
    /// Port to listen on
    #[serde(default = "default_port")]
    pub port: u16,
    /// CORS allowed origin
    #[serde(default = "default_cors_origin")]
    pub cors_origin: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            cors_origin: default_cors_origin(),
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_cors_origin() -> String {
    "http://localhost:3000".to_string()
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Database driver (sqlite or mysql)
    #[serde(default)]
    pub driver: DatabaseDriver,
    /// Database connection URL
    #[serde(default = "default_database_url")]
    pub url: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            driver: DatabaseDriver::default(),
            url: default_database_url(),
        }
    }
}

fn default_database_url() -> String {
    "data/rollcall.db".to_string()
}

/// Database driver type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseDriver {
    /// SQLite (default)
    #[default]
    Sqlite,
    /// MySQL
    Mysql,
}

/// Attendance capture configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttendanceConfig {
    /// Lifetime of a freshly generated session token
    #[serde(default = "default_token_ttl_seconds")]
    pub token_ttl_seconds: u64,
    /// Interval of the idle precondition re-check
    #[serde(default = "default_recheck_interval_seconds")]
    pub recheck_interval_seconds: u64,
    /// IANA timezone of the institution (calendar days and schedule windows)
    #[serde(default = "default_timezone")]
    pub timezone: String,
    /// Base URL embedded in scannable attendance links
    #[serde(default = "default_link_base_url")]
    pub link_base_url: String,
}

impl Default for AttendanceConfig {
    fn default() -> Self {
        Self {
            token_ttl_seconds: default_token_ttl_seconds(),
            recheck_interval_seconds: default_recheck_interval_seconds(),
            timezone: default_timezone(),
            link_base_url: default_link_base_url(),
        }
    }
}

fn default_token_ttl_seconds() -> u64 {
    600 // 10 minutes
}

fn default_recheck_interval_seconds() -> u64 {
    30
}

fn default_timezone() -> String {
    "UTC".to_string()
}

fn default_link_base_url() -> String {
    "http://localhost:8080/attend".to_string()
}

impl AttendanceConfig {
    /// Token lifetime as a chrono duration
    pub fn token_ttl(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.token_ttl_seconds as i64)
    }

    /// Idle re-check interval
    pub fn recheck_interval(&self) -> Duration {
        Duration::from_secs(self.recheck_interval_seconds)
    }

    /// Parse the configured timezone
    pub fn tz(&self) -> Result<Tz, ConfigError> {
        self.timezone.parse::<Tz>().map_err(|_| {
            ConfigError::ValidationError(format!("Unknown timezone '{}'", self.timezone))
        })
    }

    /// Parse the configured link base URL
    pub fn link_base(&self) -> Result<url::Url, ConfigError> {
        url::Url::parse(&self.link_base_url).map_err(|e| {
            ConfigError::ValidationError(format!(
                "Invalid link_base_url '{}': {}",
                self.link_base_url, e
            ))
        })
    }
}

/// Statistics aggregation configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatsConfig {
    /// Number of students per batch
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Maximum concurrent computations inside a batch
    #[serde(default = "default_batch_concurrency")]
    pub batch_concurrency: usize,
    /// Pause between batches in milliseconds
    #[serde(default = "default_batch_delay_ms")]
    pub batch_delay_ms: u64,
    /// Lifetime of a cached statistics result
    #[serde(default = "default_cache_ttl_seconds")]
    pub cache_ttl_seconds: u64,
    /// Maximum number of cached results
    #[serde(default = "default_cache_capacity")]
    pub cache_capacity: u64,
}

impl Default for StatsConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            batch_concurrency: default_batch_concurrency(),
            batch_delay_ms: default_batch_delay_ms(),
            cache_ttl_seconds: default_cache_ttl_seconds(),
            cache_capacity: default_cache_capacity(),
        }
    }
}

fn default_batch_size() -> usize {
    20
}

fn default_batch_concurrency() -> usize {
    4
}

fn default_batch_delay_ms() -> u64 {
    200
}

fn default_cache_ttl_seconds() -> u64 {
    300
}

fn default_cache_capacity() -> u64 {
    10_000
}

impl StatsConfig {
    /// Pause between batches
    pub fn batch_delay(&self) -> Duration {
        Duration::from_millis(self.batch_delay_ms)
    }

    /// Lifetime of a cached result
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_seconds)
    }
}

/// Error type for configuration parsing
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    FileRead {
        path: String,
        source: std::io::Error,
    },
    #[error("Failed to parse config file '{path}': {message}")]
    ParseError {
        path: String,
        message: String,
    },
    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

impl Config {
    /// Load configuration from file
    ///
    /// If the file doesn't exist, returns default configuration.
    /// If the file exists but is invalid YAML, returns an error with details.
    pub fn load(path: &std::path::Path) -> anyhow::Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::FileRead {
            path: path.display().to_string(),
            source: e,
        })?;

        // Handle empty file - return defaults
        if content.trim().is_empty() {
            return Ok(Self::default());
        }

        let config: Config = serde_yaml::from_str(&content).map_err(|e| {
            ConfigError::ParseError {
                path: path.display().to_string(),
                message: format_yaml_error(&e),
            }
        })?;

        Ok(config)
    }

    /// Load configuration from file with environment variable overrides
    ///
    /// Environment variables follow the pattern:
    /// - ROLLCALL_SERVER_HOST
    /// - ROLLCALL_SERVER_PORT
    /// - ROLLCALL_DATABASE_DRIVER
    /// - ROLLCALL_DATABASE_URL
    /// - ROLLCALL_ATTENDANCE_TOKEN_TTL_SECONDS
    /// - ROLLCALL_ATTENDANCE_RECHECK_INTERVAL_SECONDS
    /// - ROLLCALL_ATTENDANCE_TIMEZONE
    /// - ROLLCALL_ATTENDANCE_LINK_BASE_URL
    /// - ROLLCALL_STATS_BATCH_SIZE
    /// - ROLLCALL_STATS_BATCH_CONCURRENCY
    /// - ROLLCALL_STATS_BATCH_DELAY_MS
    /// - ROLLCALL_STATS_CACHE_TTL_SECONDS
    pub fn load_with_env(path: &std::path::Path) -> anyhow::Result<Self> {
        let mut config = Self::load(path)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Check values that serde cannot reject on its own
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.attendance.token_ttl_seconds == 0 {
            return Err(ConfigError::ValidationError(
                "attendance.token_ttl_seconds must be greater than zero".to_string(),
            ));
        }
        if self.attendance.recheck_interval_seconds == 0 {
            return Err(ConfigError::ValidationError(
                "attendance.recheck_interval_seconds must be greater than zero".to_string(),
            ));
        }
        if self.stats.batch_size == 0 || self.stats.batch_concurrency == 0 {
            return Err(ConfigError::ValidationError(
                "stats.batch_size and stats.batch_concurrency must be greater than zero"
                    .to_string(),
            ));
        }
        self.attendance.tz()?;
        self.attendance.link_base()?;
        Ok(())
    }

    /// Apply environment variable overrides to the configuration
    fn apply_env_overrides(&mut self) {
        // Server configuration
        if let Ok(host) = std::env::var("ROLLCALL_SERVER_HOST") {
            self.server.host = host;
        }
        if let Ok(port) = std::env::var("ROLLCALL_SERVER_PORT") {
            if let Ok(port) = port.parse::<u16>() {
                self.server.port = port;
            }
        }

        // Database configuration
        if let Ok(driver) = std::env::var("ROLLCALL_DATABASE_DRIVER") {
            match driver.to_lowercase().as_str() {
                "sqlite" => self.database.driver = DatabaseDriver::Sqlite,
                "mysql" => self.database.driver = DatabaseDriver::Mysql,
                _ => {} // Ignore invalid values
            }
        }
        if let Ok(url) = std::env::var("ROLLCALL_DATABASE_URL") {
            self.database.url = url;
        }

        // Attendance configuration
        if let Some(ttl) = env_parse::<u64>("ROLLCALL_ATTENDANCE_TOKEN_TTL_SECONDS") {
            self.attendance.token_ttl_seconds = ttl;
        }
        if let Some(secs) = env_parse::<u64>("ROLLCALL_ATTENDANCE_RECHECK_INTERVAL_SECONDS") {
            self.attendance.recheck_interval_seconds = secs;
        }
        if let Ok(tz) = std::env::var("ROLLCALL_ATTENDANCE_TIMEZONE") {
            self.attendance.timezone = tz;
        }
        if let Ok(base) = std::env::var("ROLLCALL_ATTENDANCE_LINK_BASE_URL") {
            self.attendance.link_base_url = base;
        }

        // Stats configuration
        if let Some(size) = env_parse::<usize>("ROLLCALL_STATS_BATCH_SIZE") {
            self.stats.batch_size = size;
        }
        if let Some(n) = env_parse::<usize>("ROLLCALL_STATS_BATCH_CONCURRENCY") {
            self.stats.batch_concurrency = n;
        }
        if let Some(ms) = env_parse::<u64>("ROLLCALL_STATS_BATCH_DELAY_MS") {
            self.stats.batch_delay_ms = ms;
        }
        if let Some(ttl) = env_parse::<u64>("ROLLCALL_STATS_CACHE_TTL_SECONDS") {
            self.stats.cache_ttl_seconds = ttl;
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.parse::<T>().ok())
}

/// Format YAML parsing error with location and context
fn format_yaml_error(e: &serde_yaml::Error) -> String {
    if let Some(location) = e.location() {
        format!(
            "at line {}, column {}: {}",
            location.line(),
            location.column(),
            e
        )
    } else {
        e.to_string()
    }
}

// Shared mutex for all config tests that modify environment variables.
#[cfg(test)]
static CONFIG_ENV_MUTEX: std::sync::Mutex<()> = std::sync::Mutex::new(());

#[cfg(test)]
const ENV_KEYS: &[&str] = &[
    "ROLLCALL_SERVER_HOST",
    "ROLLCALL_SERVER_PORT",
    "ROLLCALL_DATABASE_DRIVER",
    "ROLLCALL_DATABASE_URL",
    "ROLLCALL_ATTENDANCE_TOKEN_TTL_SECONDS",
    "ROLLCALL_ATTENDANCE_RECHECK_INTERVAL_SECONDS",
    "ROLLCALL_ATTENDANCE_TIMEZONE",
    "ROLLCALL_ATTENDANCE_LINK_BASE_URL",
    "ROLLCALL_STATS_BATCH_SIZE",
    "ROLLCALL_STATS_BATCH_CONCURRENCY",
    "ROLLCALL_STATS_BATCH_DELAY_MS",
    "ROLLCALL_STATS_CACHE_TTL_SECONDS",
];
