//! Error types for noir-state

use thiserror::Error;

/// Errors that can occur in the persistence layer
#[derive(Error, Debug)]
pub enum StorageError {
    /// No record stored under the given id
    #[error("investigation record not found: {investigation_id}")]
    NotFound { investigation_id: String },

    /// Id contains characters that cannot be used as a storage key
    #[error("invalid investigation id for storage: {investigation_id:?}")]
    InvalidId { investigation_id: String },

    /// Digest string is not 64 hex characters
    #[error("invalid content digest: {digest}")]
    InvalidDigest { digest: String },

    /// Stored body no longer matches its recorded digest
    #[error("digest mismatch for {investigation_id}: expected {expected}, got {actual}")]
    DigestMismatch {
        investigation_id: String,
        expected: String,
        actual: String,
    },

    /// Serialization error
    #[error("serialization failed: {0}")]
    Serialization(String),

    /// Filesystem error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Background task failed before completing the operation
    #[error("storage task failed: {0}")]
    Task(String),
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        StorageError::Serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_digest_mismatch_displays_both_digests() {
        let err = StorageError::DigestMismatch {
            investigation_id: "inv-1".to_string(),
            expected: "abc123".to_string(),
            actual: "def456".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("inv-1"));
        assert!(msg.contains("abc123"));
        assert!(msg.contains("def456"));
    }

    #[test]
    fn test_not_found_displays_id() {
        let err = StorageError::NotFound {
            investigation_id: "inv-missing".to_string(),
        };
        assert!(err.to_string().contains("inv-missing"));
    }
}
