//! Application error types.
//!
//! All errors use `thiserror` for automatic Error trait derivation. The
//! variants double as the retry taxonomy of the reconciler: `NotFound` on a
//! fetch is benign, everything store-side is retried with backoff.

use thiserror::Error;

/// Application result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error enum for the operator.
#[derive(Error, Debug)]
pub enum Error {
    /// Invalid configuration or malformed request.
    #[error("validation error: {0}")]
    Validation(String),

    /// Object does not exist in the store.
    #[error("not found: {0}")]
    NotFound(String),

    /// Apply rejected: field ownership or resource version conflict.
    #[error("conflict: {0}")]
    Conflict(String),

    /// Invalid lifecycle state transition.
    #[error("state transition error: {0}")]
    StateTransition(String),

    /// A store call exceeded its deadline.
    #[error("timeout: {0}")]
    Timeout(String),

    /// Internal errors (including recovered panics).
    #[error("internal error: {0}")]
    Internal(String),

    /// JSON serialization/deserialization errors.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// YAML decoding errors.
    #[error("yaml error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// I/O errors.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// True when the object is gone from the store.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound(_))
    }

    /// Whether requeueing with backoff can make progress.
    ///
    /// Validation and decoding failures will not fix themselves, but the
    /// queue still backs them off; this only drives log severity.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Conflict(_)
            | Error::Timeout(_)
            | Error::Io(_)
            | Error::Internal(_)
            | Error::StateTransition(_) => true,
            Error::NotFound(_)
            | Error::Validation(_)
            | Error::Serialization(_)
            | Error::Yaml(_) => false,
        }
    }

    /// Short CamelCase reason, used when recording events.
    pub fn reason(&self) -> &'static str {
        match self {
            Error::Validation(_) => "ValidationFailed",
            Error::NotFound(_) => "NotFound",
            Error::Conflict(_) => "ApplyConflict",
            Error::StateTransition(_) => "InvalidTransition",
            Error::Timeout(_) => "StoreTimeout",
            Error::Internal(_) => "InternalError",
            Error::Serialization(_) | Error::Yaml(_) => "DecodeFailed",
            Error::Io(_) => "IoError",
        }
    }
}

// Convenience constructors
impl Error {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    pub fn state_transition(msg: impl Into<String>) -> Self {
        Self::StateTransition(msg.into())
    }

    pub fn timeout(msg: impl Into<String>) -> Self {
        Self::Timeout(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }
}
