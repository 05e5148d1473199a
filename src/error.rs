//! Error types for configuration resolution and lease coordination.
//!
//! All fallible operations in this crate return [`Result<T>`], which uses
//! the [`Error`] enum for error variants. Lease conflicts are not errors:
//! they surface as `Ok(false)` from the lease operations.

use crate::model::Scope;

/// Errors that can occur while resolving configuration or managing leases.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A context's identifying fields failed local validation.
    ///
    /// Raised before any provider call when a required id is empty or a
    /// lease IP is unspecified. Always recoverable by supplying a valid id.
    #[error("Invalid scope: {0}")]
    InvalidScope(Scope),

    /// A lease operation was given an empty hardware address.
    #[error("Invalid hardware address for {0}")]
    InvalidAddress(Scope),

    /// The provider holds no record for a fully valid scope.
    #[error("{0} not found")]
    NotFound(Scope),

    /// Transport or storage failure reported by the provider.
    #[error("Provider error: {0}")]
    Provider(String),

    /// The call context was cancelled before the operation completed.
    #[error("Operation cancelled")]
    Cancelled,

    /// The call context deadline passed before the operation completed.
    #[error("Deadline exceeded")]
    DeadlineExceeded,

    /// The watcher was closed, either explicitly or by its provider.
    #[error("Watcher closed")]
    WatcherClosed,

    /// The watcher fell behind and its buffer dropped events.
    ///
    /// Callers should re-read the scope and treat cached merges as stale.
    #[error("Watcher lagged behind by {0} events")]
    WatcherLagged(u64),

    /// A hardware address string could not be parsed.
    #[error("Invalid hardware address: {0}")]
    InvalidHardwareAddr(String),

    /// Invalid configuration.
    ///
    /// Returned by [`Config::validate`](crate::Config::validate) when the
    /// configuration contains invalid values (e.g., a zero hold duration).
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// File system I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error (config or store files).
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Returns true if the provider reported a missing record.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound(_))
    }

    /// Returns true if the call context was cancelled or timed out.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, Error::Cancelled | Error::DeadlineExceeded)
    }
}

/// A specialized Result type for netdhcp operations.
pub type Result<T> = std::result::Result<T, Error>;
