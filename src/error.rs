//! Error types for the feed engine
//!
//! Provides unified error handling using thiserror.

use thiserror::Error;

// == Feed Error Enum ==
/// Unified error type for remote calls and feed operations.
///
/// Cache operations never produce one of these: a miss is an `Option`, not
/// an error. The enum is `Clone` so the last failure can sit inside
/// published loader and query state.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FeedError {
    /// Transport-level failure (connection refused, timeout, reset)
    #[error("Network error: {0}")]
    Network(String),

    /// No signed-in user, or the backend refused the credentials
    #[error("Sign in required")]
    Unauthenticated,

    /// The backend answered but refused the operation
    #[error("Rejected by backend: {0}")]
    Rejected(String),

    /// Item is not held locally or not known remotely
    #[error("Not found: {0}")]
    NotFound(String),

    /// Caller-supplied data failed validation
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Backend reply could not be decoded
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    /// Internal failure (task panicked, channel closed)
    #[error("Internal error: {0}")]
    Internal(String),
}

impl FeedError {
    // == Retryable ==
    /// Returns true for transient failures the user can retry as-is.
    pub fn is_retryable(&self) -> bool {
        matches!(self, FeedError::Network(_))
    }
}

// == Conversions ==
impl From<reqwest::Error> for FeedError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            FeedError::InvalidResponse(err.to_string())
        } else if let Some(status) = err.status() {
            match status.as_u16() {
                401 | 403 => FeedError::Unauthenticated,
                404 => FeedError::NotFound(err.to_string()),
                _ => FeedError::Rejected(err.to_string()),
            }
        } else {
            FeedError::Network(err.to_string())
        }
    }
}

impl From<serde_json::Error> for FeedError {
    fn from(err: serde_json::Error) -> Self {
        FeedError::InvalidResponse(err.to_string())
    }
}

// == Result Type Alias ==
/// Convenience Result type for the feed engine.
pub type Result<T> = std::result::Result<T, FeedError>;
