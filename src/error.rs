//! Error types shared by every container and backend.

use crate::protocol::ParseError;
use crate::serialization::LoadFailure;
use thiserror::Error;

/// Errors raised by containers, backends and the batch machinery.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The key has no entry
    #[error("key not found: {0}")]
    KeyNotFound(String),

    /// The key had an entry but its TTL has lapsed
    #[error("key expired: {0}")]
    KeyExpired(String),

    /// An operation needs a numeric (or otherwise typed) value and got something else
    #[error("type mismatch: {0}")]
    TypeMismatch(String),

    /// The key cannot be used with this container
    #[error("invalid key: {0}")]
    KeyFormat(String),

    /// Encoding or decoding a value failed
    #[error("serialization error: {0}")]
    Serialization(String),

    /// A `Loaded::Failed` marker was converted into an error by the caller
    #[error("failed to load value: {0}")]
    Load(LoadFailure),

    /// The backend rejected or failed the request
    #[error("backend error: {0}")]
    Backend(String),

    /// The remote store sent a malformed frame
    #[error("protocol error: {0}")]
    Protocol(#[from] ParseError),

    /// Network failure talking to the remote store
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// `begin` was called while a batch is already open on the client
    #[error("a batch is already active on this client")]
    BatchActive,

    /// The backend cannot provide this structure or operation
    #[error("unsupported: {0}")]
    Unsupported(String),

    /// Invalid configuration value
    #[error("configuration error: {0}")]
    Config(String),
}

impl StoreError {
    /// True for both "never existed" and "existed, then expired".
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::KeyNotFound(_) | StoreError::KeyExpired(_))
    }

    /// True only when the entry existed and its TTL lapsed.
    pub fn is_expired(&self) -> bool {
        matches!(self, StoreError::KeyExpired(_))
    }
}

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expired_is_a_not_found() {
        let expired = StoreError::KeyExpired("k".to_string());
        assert!(expired.is_not_found());
        assert!(expired.is_expired());

        let missing = StoreError::KeyNotFound("k".to_string());
        assert!(missing.is_not_found());
        assert!(!missing.is_expired());
    }

    #[test]
    fn test_display() {
        let err = StoreError::KeyExpired("session".to_string());
        assert_eq!(err.to_string(), "key expired: session");
        assert_eq!(
            StoreError::BatchActive.to_string(),
            "a batch is already active on this client"
        );
    }
}
