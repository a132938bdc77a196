// src/error.rs

use thiserror::Error;

/// Core error types for Depot
///
/// The domain variants (`NotFound` through `Unimplemented`) form the closed
/// set the control API translates into response envelopes. The remaining
/// variants carry infrastructure failures.
#[derive(Error, Debug)]
pub enum Error {
    /// Referenced entity is absent
    #[error("unknown resource: {0}")]
    NotFound(String),

    /// Uniqueness violation on create
    #[error("resource already exists: {0}")]
    AlreadyExists(String),

    /// Repository name cannot be used as a key or path segment
    #[error("invalid repository name: {0:?}")]
    InvalidName(String),

    /// Same id, different content
    #[error("conflicting content for {0}")]
    Conflict(String),

    /// Delta requested between incompatible or misordered packages
    #[error("invalid delta pair: {0}")]
    InvalidPair(String),

    /// Delta is known to fail and was not attempted again
    #[error("delta {0} previously failed")]
    PreviouslyFailed(String),

    /// Persisted record could not be decoded
    #[error("corrupt record '{key}' in bucket '{bucket}': {reason}")]
    Corrupt {
        bucket: String,
        key: String,
        reason: String,
    },

    /// Operation is not available
    #[error("not implemented: {0}")]
    Unimplemented(String),

    /// Delta computation ran and failed; the failure has been recorded
    #[error("delta {delta_id} failed: {reason}")]
    DeltaFailed { delta_id: String, reason: String },

    /// Package metadata could not be read from a package file
    #[error("failed to read package metadata from {path}: {reason}")]
    Metadata { path: String, reason: String },

    /// Database-related errors
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Store initialization error
    #[error("Failed to initialize store: {0}")]
    InitError(String),
}

/// Result type alias using Depot's Error type
pub type Result<T> = std::result::Result<T, Error>;
