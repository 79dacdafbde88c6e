//! Configuration structures for r2b.
//!
//! Configuration is loaded from TOML files, then overridden by environment
//! variables and finally by CLI flags. It is read once at startup and never
//! mutated afterwards.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Environment variable overriding `buffer.flush_interval_seconds`.
pub const ENV_FLUSH_INTERVAL_SECONDS: &str = "FLUSH_INTERVAL_SECONDS";
/// Environment variable overriding `buffer.max_lines_per_flush`.
pub const ENV_MAX_LINES_PER_FLUSH: &str = "MAX_LINES_PER_FLUSH";
/// Environment variable overriding `storage.location`.
pub const ENV_STORAGE_LOCATION: &str = "STORAGE_LOCATION";

/// Main configuration structure.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    /// Buffer and flush trigger configuration
    #[serde(default)]
    pub buffer: BufferConfig,

    /// Durable storage configuration
    #[serde(default)]
    pub storage: StorageConfig,

    /// Engine lifecycle configuration
    #[serde(default)]
    pub engine: EngineConfig,

    /// Monitoring configuration
    #[serde(default)]
    pub monitoring: MonitoringConfig,
}

/// Buffer configuration.
///
/// Both thresholds are soft targets: a burst between two policy checks may
/// push the buffer past `max_lines_per_flush`.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BufferConfig {
    /// Flush once this many seconds passed since the last flush (0 = always due)
    #[serde(default = "default_flush_interval_seconds")]
    pub flush_interval_seconds: u64,

    /// Flush once this many records are buffered across all keys
    #[serde(default = "default_max_lines_per_flush")]
    pub max_lines_per_flush: usize,

    /// Cadence of the timer trigger
    #[serde(default = "default_timer_interval_seconds")]
    pub timer_interval_seconds: u64,
}

impl BufferConfig {
    /// Time threshold as a [`Duration`].
    pub fn flush_interval(&self) -> Duration {
        Duration::from_secs(self.flush_interval_seconds)
    }

    /// Timer cadence as a [`Duration`].
    pub fn timer_interval(&self) -> Duration {
        Duration::from_secs(self.timer_interval_seconds)
    }
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            flush_interval_seconds: default_flush_interval_seconds(),
            max_lines_per_flush: default_max_lines_per_flush(),
            timer_interval_seconds: default_timer_interval_seconds(),
        }
    }
}

/// Storage configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageConfig {
    /// Where batches go: `s3://bucket[/prefix]`, `memory://`, or a local directory
    #[serde(default = "default_location")]
    pub location: String,

    /// Upper bound for a single key's write
    #[serde(default = "default_write_timeout_ms")]
    pub write_timeout_ms: u64,

    /// AWS region (for S3)
    pub aws_region: Option<String>,

    /// S3 endpoint (for MinIO or other S3-compatible storage)
    pub s3_endpoint: Option<String>,
}

impl StorageConfig {
    /// Write timeout as a [`Duration`].
    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms)
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            location: default_location(),
            write_timeout_ms: default_write_timeout_ms(),
            aws_region: None,
            s3_endpoint: None,
        }
    }
}

/// Engine lifecycle configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EngineConfig {
    /// Budget for the final flush on shutdown
    #[serde(default = "default_shutdown_timeout_seconds")]
    pub shutdown_timeout_seconds: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            shutdown_timeout_seconds: default_shutdown_timeout_seconds(),
        }
    }
}

/// Monitoring configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MonitoringConfig {
    /// Health and metrics HTTP port
    #[serde(default = "default_health_port")]
    pub health_port: u16,

    /// Log level
    #[serde(default)]
    pub log_level: LogLevel,

    /// Log format
    #[serde(default)]
    pub log_format: LogFormat,
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            health_port: default_health_port(),
            log_level: LogLevel::default(),
            log_format: LogFormat::default(),
        }
    }
}

/// Log level.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Trace level
    Trace,
    /// Debug level
    Debug,
    /// Info level (default)
    #[default]
    Info,
    /// Warn level
    Warn,
    /// Error level
    Error,
}

impl LogLevel {
    /// Filter directive understood by `tracing_subscriber::EnvFilter`.
    pub fn as_filter(&self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

/// Log format.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// JSON format (default)
    #[default]
    Json,
    /// Plain text format
    Text,
}

// Default value functions
fn default_flush_interval_seconds() -> u64 {
    300 // 5 minutes
}
fn default_max_lines_per_flush() -> usize {
    1000
}
fn default_timer_interval_seconds() -> u64 {
    300
}
fn default_location() -> String {
    "./blobs".to_string()
}
fn default_write_timeout_ms() -> u64 {
    30_000
}
fn default_shutdown_timeout_seconds() -> u64 {
    30
}
fn default_health_port() -> u16 {
    8080
}

impl Config {
    /// Load configuration from a TOML file, apply environment overrides and validate.
    pub fn from_file(path: &std::path::Path) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let mut config: Config = toml::from_str(&content)?;
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Apply overrides from the process environment.
    pub fn apply_env_overrides(&mut self) -> crate::Result<()> {
        self.apply_overrides_from(|name| std::env::var(name).ok())
    }

    /// Apply overrides from an arbitrary variable lookup.
    ///
    /// A variable that is present but not a valid number is a configuration
    /// error, not a silent fallback to the file value.
    pub fn apply_overrides_from<F>(&mut self, lookup: F) -> crate::Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(raw) = lookup(ENV_FLUSH_INTERVAL_SECONDS) {
            self.buffer.flush_interval_seconds = parse_env(ENV_FLUSH_INTERVAL_SECONDS, &raw)?;
        }
        if let Some(raw) = lookup(ENV_MAX_LINES_PER_FLUSH) {
            self.buffer.max_lines_per_flush = parse_env(ENV_MAX_LINES_PER_FLUSH, &raw)?;
        }
        if let Some(raw) = lookup(ENV_STORAGE_LOCATION) {
            self.storage.location = raw.trim().to_string();
        }
        Ok(())
    }

    /// Validate the configuration.
    pub fn validate(&self) -> crate::Result<()> {
        if self.storage.location.trim().is_empty() {
            return Err(crate::Error::Config("Storage location is required".into()));
        }

        if self.storage.write_timeout_ms == 0 {
            return Err(crate::Error::Config(
                "storage.write_timeout_ms must be greater than zero".into(),
            ));
        }

        if self.buffer.timer_interval_seconds == 0 {
            return Err(crate::Error::Config(
                "buffer.timer_interval_seconds must be greater than zero".into(),
            ));
        }

        Ok(())
    }
}

fn parse_env<T: std::str::FromStr>(name: &str, raw: &str) -> crate::Result<T> {
    raw.trim().parse::<T>().map_err(|_| {
        crate::Error::Config(format!("{} must be a non-negative integer, got {:?}", name, raw))
    })
}
