//! Server configuration module.
//!
//! Parses configuration from environment variables for the Logtail server.
//!
//! # Environment Variables
//!
//! | Variable | Required | Default | Description |
//! |----------|----------|---------|-------------|
//! | `LOGTAIL_FILE` | No | `logs.txt` | Path of the log file to tail |
//! | `PORT` | No | 3000 | HTTP server port |
//! | `LOGTAIL_SNAPSHOT_BYTES` | No | 1024 | Lookback window for the initial snapshot |
//! | `LOGTAIL_MAX_LINES` | No | 10 | Maximum lines per message |
//! | `LOGTAIL_SEND_TIMEOUT_MS` | No | 5000 | Per-subscriber send timeout |
//! | `LOGTAIL_QUEUE_CAPACITY` | No | 256 | Per-subscriber outbound queue size |
//! | `LOGTAIL_REWATCH_INTERVAL_MS` | No | 1000 | Retry interval after the watch is lost |

use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

use crate::engine::TailOptions;

/// Default HTTP server port.
const DEFAULT_PORT: u16 = 3000;

/// Default log file, relative to the working directory.
const DEFAULT_LOG_FILE: &str = "logs.txt";

/// Default per-subscriber send timeout.
const DEFAULT_SEND_TIMEOUT_MS: u64 = 5_000;

/// Default per-subscriber outbound queue capacity.
const DEFAULT_QUEUE_CAPACITY: usize = 256;

/// Default delay between attempts to re-arm a lost watch.
const DEFAULT_REWATCH_INTERVAL_MS: u64 = 1_000;

/// Errors that can occur when parsing configuration.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// Required environment variable is missing.
    #[error("missing required environment variable: {0}")]
    MissingEnvVar(String),

    /// Environment variable has invalid format.
    #[error("invalid format for {var}: {message}")]
    InvalidFormat { var: String, message: String },

    /// Configuration validation failed.
    #[error("configuration validation failed: {0}")]
    ValidationError(String),
}

/// Server configuration parsed from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Path of the log file being tailed.
    pub log_file: PathBuf,

    /// HTTP server port.
    pub port: u16,

    /// Snapshot and delta extraction settings.
    pub tail: TailOptions,

    /// Upper bound for a single WebSocket send.
    pub send_timeout: Duration,

    /// Messages buffered per subscriber before it is dropped as too slow.
    pub queue_capacity: usize,

    /// Delay between attempts to re-arm a lost file watch.
    pub rewatch_interval: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_file: PathBuf::from(DEFAULT_LOG_FILE),
            port: DEFAULT_PORT,
            tail: TailOptions::default(),
            send_timeout: Duration::from_millis(DEFAULT_SEND_TIMEOUT_MS),
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            rewatch_interval: Duration::from_millis(DEFAULT_REWATCH_INTERVAL_MS),
        }
    }
}

impl Config {
    /// Parse configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if a variable is not valid unicode, fails to
    /// parse, or is out of range.
    ///
    /// # Example
    ///
    /// ```no_run
    /// use logtail_server::config::Config;
    ///
    /// let config = Config::from_env().expect("Failed to load config");
    /// println!("Tailing {} on port {}", config.log_file.display(), config.port);
    /// ```
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let log_file = match read_var("LOGTAIL_FILE")? {
            Some(path) if path.trim().is_empty() => {
                return Err(ConfigError::MissingEnvVar("LOGTAIL_FILE".to_string()));
            }
            Some(path) => PathBuf::from(path),
            None => defaults.log_file,
        };

        let tail = TailOptions {
            snapshot_window: parse_env("LOGTAIL_SNAPSHOT_BYTES")?
                .unwrap_or(defaults.tail.snapshot_window),
            max_lines: parse_env("LOGTAIL_MAX_LINES")?.unwrap_or(defaults.tail.max_lines),
        };

        let config = Self {
            log_file,
            port: parse_env("PORT")?.unwrap_or(defaults.port),
            tail,
            send_timeout: parse_env("LOGTAIL_SEND_TIMEOUT_MS")?
                .map(Duration::from_millis)
                .unwrap_or(defaults.send_timeout),
            queue_capacity: parse_env("LOGTAIL_QUEUE_CAPACITY")?
                .unwrap_or(defaults.queue_capacity),
            rewatch_interval: parse_env("LOGTAIL_REWATCH_INTERVAL_MS")?
                .map(Duration::from_millis)
                .unwrap_or(defaults.rewatch_interval),
        };

        config.validate()?;

        Ok(config)
    }

    /// Validate the configuration.
    fn validate(&self) -> Result<(), ConfigError> {
        if self.tail.max_lines == 0 {
            return Err(ConfigError::ValidationError(
                "LOGTAIL_MAX_LINES must be at least 1".to_string(),
            ));
        }

        if self.queue_capacity == 0 {
            return Err(ConfigError::ValidationError(
                "LOGTAIL_QUEUE_CAPACITY must be at least 1".to_string(),
            ));
        }

        if self.send_timeout.is_zero() {
            return Err(ConfigError::ValidationError(
                "LOGTAIL_SEND_TIMEOUT_MS must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }
}

/// Read an environment variable, treating "not set" as `None`.
fn read_var(name: &str) -> Result<Option<String>, ConfigError> {
    match env::var(name) {
        Ok(value) => Ok(Some(value)),
        Err(env::VarError::NotPresent) => Ok(None),
        Err(env::VarError::NotUnicode(_)) => Err(ConfigError::InvalidFormat {
            var: name.to_string(),
            message: "contains invalid unicode".to_string(),
        }),
    }
}

/// Parse a numeric environment variable.
///
/// Returns `None` if the variable is not set.
fn parse_env<T>(name: &str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    let Some(raw) = read_var(name)? else {
        return Ok(None);
    };

    raw.trim()
        .parse()
        .map(Some)
        .map_err(|err: T::Err| ConfigError::InvalidFormat {
            var: name.to_string(),
            message: format!("'{raw}': {err}"),
        })
}
