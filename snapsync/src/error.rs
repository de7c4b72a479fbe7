//! Error types for sync sessions.

use chrono::{DateTime, Utc};
use thiserror::Error;

/// Errors that can occur while synchronizing a calculation.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Missing or invalid calculator configuration. Fatal at bootstrap.
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    /// A cached state could not be decoded or restored.
    #[error("Cache entry {key} is corrupted: {message}")]
    CacheCorrupted { key: String, message: String },

    /// The cache backend failed to read, write or remove an entry.
    #[error("Cache store error: {message}")]
    Store { message: String },

    /// Serialization/deserialization error.
    #[error("Serialization error: {message}")]
    Serialization { message: String },

    /// The source returned an interval whose end precedes its start.
    #[error("Malformed interval: [{start_on}, {end_before})")]
    MalformedInterval {
        start_on: DateTime<Utc>,
        end_before: DateTime<Utc>,
    },

    /// An interval that does not continue from the up-to-date marker.
    #[error("Interval [{start_on}, {end_before}) does not continue from {expected:?}")]
    IntervalViolation {
        expected: Option<DateTime<Utc>>,
        start_on: DateTime<Utc>,
        end_before: DateTime<Utc>,
    },

    /// Network error (connection failed, timeout, etc.).
    #[error("Network error: {message}")]
    Network { message: String },

    /// Rate limited by the source.
    #[error("Rate limited. Retry after {retry_after_secs:?} seconds")]
    RateLimited { retry_after_secs: Option<u64> },

    /// The source returned an error status.
    #[error("Server error ({status}): {message}")]
    Server { status: u16, message: String },

    /// The source rejected our credentials.
    #[error("Authentication failed: {message}")]
    Authentication { message: String },

    /// The source rejected the request.
    #[error("Invalid request: {message}")]
    InvalidRequest { message: String },

    /// A page was requested while another request is still outstanding.
    #[error("A page fetch is already in flight")]
    FetchInFlight,

    /// A state-machine step was invoked from a phase that does not allow it.
    #[error("Cannot {operation} while {phase}")]
    InvalidPhase {
        phase: &'static str,
        operation: &'static str,
    },

    /// The session driver has exited.
    #[error("Sync session is closed")]
    SessionClosed,
}

impl SyncError {
    /// Creates a configuration error with the given message.
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration {
            message: msg.into(),
        }
    }

    /// Creates a store error with the given message.
    pub fn store(msg: impl Into<String>) -> Self {
        Self::Store {
            message: msg.into(),
        }
    }

    /// Creates a serialization error with the given message.
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization {
            message: msg.into(),
        }
    }

    /// Creates a network error with the given message.
    pub fn network(msg: impl Into<String>) -> Self {
        Self::Network {
            message: msg.into(),
        }
    }

    /// Returns true if this error is transient and the fetch should be retried.
    pub fn is_transient(&self) -> bool {
        match self {
            SyncError::Network { .. } => true,
            SyncError::RateLimited { .. } => true,
            SyncError::Server { status, .. } => *status >= 500,
            _ => false,
        }
    }

    /// Returns true if this error must halt the session.
    ///
    /// Configuration errors, interval errors and internal-consistency errors
    /// are fatal. Everything else degrades to a retry or a logged warning.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            SyncError::Configuration { .. }
                | SyncError::MalformedInterval { .. }
                | SyncError::IntervalViolation { .. }
                | SyncError::FetchInFlight
                | SyncError::InvalidPhase { .. }
        )
    }

    /// Returns the suggested retry delay in seconds, if available.
    pub fn retry_after(&self) -> Option<u64> {
        match self {
            SyncError::RateLimited { retry_after_secs } => *retry_after_secs,
            _ => None,
        }
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization {
            message: err.to_string(),
        }
    }
}

impl From<std::io::Error> for SyncError {
    fn from(err: std::io::Error) -> Self {
        Self::Store {
            message: err.to_string(),
        }
    }
}

/// Result type for sync operations.
pub type SyncResult<T> = std::result::Result<T, SyncError>;
