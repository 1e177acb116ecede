//! Error types for the Logtail server.
//!
//! This module defines the error hierarchy used throughout the server.
//!
//! # Error Types
//!
//! - [`TailError`] - Failures of a single snapshot or delta read cycle
//! - [`ServerError`] - Top-level server errors encompassing all failure modes
//!
//! Watch and configuration errors live next to the code that raises them
//! ([`crate::watcher::WatcherError`], [`crate::config::ConfigError`]) and
//! convert into [`ServerError`] with `?`.

use std::error::Error;
use std::fmt;
use std::io;
use std::path::PathBuf;

use thiserror::Error as ThisError;

use crate::config::ConfigError;
use crate::watcher::WatcherError;

/// Errors raised by the tail engine while reading the log file.
///
/// A `TailError` only ever fails the cycle that produced it. The engine leaves
/// the cursor untouched so the next cycle retries from the same offset.
#[derive(ThisError, Debug)]
pub enum TailError {
    /// The log file could not be stat'd, opened, or read.
    #[error("failed to read log file {}: {source}", path.display())]
    Read {
        /// Path of the log file.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },
}

impl TailError {
    /// Creates a new read error for `path`.
    ///
    /// # Example
    ///
    /// ```rust
    /// use std::io;
    /// use logtail_server::error::TailError;
    ///
    /// let err = TailError::read("logs.txt", io::Error::from(io::ErrorKind::NotFound));
    /// assert!(err.is_not_found());
    /// ```
    pub fn read(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Read {
            path: path.into(),
            source,
        }
    }

    /// Returns `true` if the log file no longer exists.
    pub fn is_not_found(&self) -> bool {
        match self {
            Self::Read { source, .. } => source.kind() == io::ErrorKind::NotFound,
        }
    }
}

/// Top-level error type for the Logtail server.
///
/// # Error Categories
///
/// - **Configuration errors**: Problems loading or validating server config
/// - **Tail errors**: The log file could not be read
/// - **Watch errors**: The log file could not be watched
/// - **Internal errors**: Unexpected failures that don't fit other categories
#[derive(Debug)]
pub enum ServerError {
    /// Configuration error during server initialization.
    Config(ConfigError),

    /// Reading the log file failed.
    Tail(TailError),

    /// Watching the log file failed.
    Watch(WatcherError),

    /// Unexpected internal server error.
    Internal(String),
}

impl fmt::Display for ServerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Config(err) => write!(f, "configuration error: {err}"),
            Self::Tail(err) => write!(f, "tail error: {err}"),
            Self::Watch(err) => write!(f, "watch error: {err}"),
            Self::Internal(msg) => write!(f, "internal server error: {msg}"),
        }
    }
}

impl Error for ServerError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Config(err) => Some(err),
            Self::Tail(err) => Some(err),
            Self::Watch(err) => Some(err),
            Self::Internal(_) => None,
        }
    }
}

impl From<ConfigError> for ServerError {
    fn from(err: ConfigError) -> Self {
        Self::Config(err)
    }
}

impl From<TailError> for ServerError {
    fn from(err: TailError) -> Self {
        Self::Tail(err)
    }
}

impl From<WatcherError> for ServerError {
    fn from(err: WatcherError) -> Self {
        Self::Watch(err)
    }
}

impl ServerError {
    /// Creates a new internal error.
    ///
    /// # Example
    ///
    /// ```rust
    /// use logtail_server::error::ServerError;
    ///
    /// let err = ServerError::internal("listener closed");
    /// assert!(matches!(err, ServerError::Internal(_)));
    /// ```
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }
}

/// A specialized Result type for server operations.
pub type Result<T> = std::result::Result<T, ServerError>;
