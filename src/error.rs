/// Error taxonomy for the persistence and caching layers
///
/// Every variant carries the key it failed on so callers can report
/// both the failing key and the error kind without string parsing.

use serde::Serialize;
use std::{fmt, time::Duration};
use thiserror::Error;

/// Result alias used across storage, session and cache modules
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Coarse error classification exposed to external callers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    NotFound,
    AlreadyExists,
    Timeout,
    Io,
    TooLarge,
    InvalidState,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::NotFound => "not_found",
            ErrorKind::AlreadyExists => "already_exists",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Io => "io",
            ErrorKind::TooLarge => "too_large",
            ErrorKind::InvalidState => "invalid_state",
        };
        f.write_str(name)
    }
}

/// Typed storage error with the failing key attached
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StoreError {
    /// Key absent in every backend that was consulted
    #[error("not found: '{key}'")]
    NotFound { key: String },

    /// Create attempted on a live key
    #[error("already exists: '{key}'")]
    AlreadyExists { key: String },

    /// Backend call exceeded its deadline
    #[error("timed out after {}ms: '{key}'", .after.as_millis())]
    Timeout { key: String, after: Duration },

    /// Backend-level failure other than timeout or not-found
    #[error("I/O error on '{key}': {message}")]
    Io { key: String, message: String },

    /// Payload does not fit the configured budget
    #[error("payload for '{key}' is too large: {size} bytes (budget {budget} bytes)")]
    TooLarge { key: String, size: u64, budget: u64 },

    /// Stored bytes could not be decoded, or the value has an illegal shape
    #[error("invalid state for '{key}': {message}")]
    InvalidState { key: String, message: String },
}

impl StoreError {
    pub fn not_found(key: impl Into<String>) -> Self {
        Self::NotFound { key: key.into() }
    }

    pub fn already_exists(key: impl Into<String>) -> Self {
        Self::AlreadyExists { key: key.into() }
    }

    pub fn timeout(key: impl Into<String>, after: Duration) -> Self {
        Self::Timeout {
            key: key.into(),
            after,
        }
    }

    pub fn io(key: impl Into<String>, message: impl fmt::Display) -> Self {
        Self::Io {
            key: key.into(),
            message: message.to_string(),
        }
    }

    pub fn too_large(key: impl Into<String>, size: u64, budget: u64) -> Self {
        Self::TooLarge {
            key: key.into(),
            size,
            budget,
        }
    }

    pub fn invalid_state(key: impl Into<String>, message: impl fmt::Display) -> Self {
        Self::InvalidState {
            key: key.into(),
            message: message.to_string(),
        }
    }

    /// Classification of this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::AlreadyExists { .. } => ErrorKind::AlreadyExists,
            Self::Timeout { .. } => ErrorKind::Timeout,
            Self::Io { .. } => ErrorKind::Io,
            Self::TooLarge { .. } => ErrorKind::TooLarge,
            Self::InvalidState { .. } => ErrorKind::InvalidState,
        }
    }

    /// The key the failing operation was issued against
    pub fn key(&self) -> &str {
        match self {
            Self::NotFound { key }
            | Self::AlreadyExists { key }
            | Self::Timeout { key, .. }
            | Self::Io { key, .. }
            | Self::TooLarge { key, .. }
            | Self::InvalidState { key, .. } => key,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Timeouts and I/O failures, i.e. the failures a fallback may mask
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Timeout { .. } | Self::Io { .. })
    }
}
