//! Storage trait definitions for Noir
//!
//! - `ContentDigest`: SHA-256 digest used to seal stored bodies
//! - `StoredInvestigation`: persisted envelope around an investigation document
//! - `InvestigationStore`: async, backend-agnostic record store
//!
//! In-memory fakes live in the `fakes` module; a filesystem backend lives in
//! `fs_store`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

use crate::error::StorageError;

/// Result type for storage operations
pub type StorageResult<T> = std::result::Result<T, StorageError>;

// ---------------------------------------------------------------------------
// ContentDigest
// ---------------------------------------------------------------------------

/// Content digest (SHA-256 hex string).
///
/// The inner field is private to guarantee the string is always valid
/// lowercase hex produced by `from_bytes` or validated via `TryFrom<String>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContentDigest(String);

impl ContentDigest {
    /// Compute the SHA-256 digest of the given bytes.
    pub fn from_bytes(data: &[u8]) -> Self {
        use sha2::Digest;
        let mut hasher = Sha256::new();
        hasher.update(data);
        ContentDigest(hex::encode(hasher.finalize()))
    }

    /// Digest of the canonical JSON encoding of `value`.
    ///
    /// `serde_json` maps are ordered by key, so equal values always encode
    /// to the same bytes.
    pub fn of_json<T: Serialize>(value: &T) -> StorageResult<Self> {
        let bytes = serde_json::to_vec(value)?;
        Ok(Self::from_bytes(&bytes))
    }

    /// Return the full hex string.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Short form (first 12 hex chars).
    pub fn short(&self) -> &str {
        &self.0[..12.min(self.0.len())]
    }
}

impl TryFrom<String> for ContentDigest {
    type Error = StorageError;

    fn try_from(s: String) -> std::result::Result<Self, Self::Error> {
        if s.len() != 64 || !s.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(StorageError::InvalidDigest { digest: s });
        }
        Ok(ContentDigest(s.to_ascii_lowercase()))
    }
}

impl std::fmt::Display for ContentDigest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// StoredInvestigation
// ---------------------------------------------------------------------------

/// A persisted investigation document.
///
/// `body` is the full serialized investigation (plan, step executions,
/// evidence ledger, assessment, trace log). `status` is duplicated out of the
/// body so stores can filter without parsing it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredInvestigation {
    pub investigation_id: String,
    pub status: String,
    pub digest: ContentDigest,
    pub body: serde_json::Value,
    pub stored_at: DateTime<Utc>,
}

impl StoredInvestigation {
    /// Seal `body` under its content digest.
    pub fn new(
        investigation_id: impl Into<String>,
        status: impl Into<String>,
        body: serde_json::Value,
    ) -> StorageResult<Self> {
        let digest = ContentDigest::of_json(&body)?;
        Ok(Self {
            investigation_id: investigation_id.into(),
            status: status.into(),
            digest,
            body,
            stored_at: Utc::now(),
        })
    }

    /// Recompute the body digest and compare it with the recorded one.
    pub fn verify(&self) -> StorageResult<()> {
        let actual = ContentDigest::of_json(&self.body)?;
        if actual != self.digest {
            return Err(StorageError::DigestMismatch {
                investigation_id: self.investigation_id.clone(),
                expected: self.digest.to_string(),
                actual: actual.to_string(),
            });
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// InvestigationStore
// ---------------------------------------------------------------------------

/// Investigation record store.
///
/// Guarantees:
/// - `put` replaces any earlier record with the same id.
/// - `get` returns `StorageError::NotFound` for unknown ids.
/// - `list` is ordered by `stored_at`, then by id.
#[async_trait]
pub trait InvestigationStore: Send + Sync {
    /// Store (or replace) a record.
    async fn put(&self, record: StoredInvestigation) -> StorageResult<()>;

    /// Load a record by investigation id.
    async fn get(&self, investigation_id: &str) -> StorageResult<StoredInvestigation>;

    /// Check whether a record exists.
    async fn contains(&self, investigation_id: &str) -> StorageResult<bool>;

    /// List records, optionally filtered by status.
    async fn list(&self, status: Option<&str>) -> StorageResult<Vec<StoredInvestigation>>;

    /// Delete a record. No-op if absent.
    async fn delete(&self, investigation_id: &str) -> StorageResult<()>;
}

/// Storage keys double as file names, so only a conservative alphabet is accepted.
pub(crate) fn validate_id(investigation_id: &str) -> StorageResult<()> {
    let ok = !investigation_id.is_empty()
        && investigation_id.len() <= 128
        && investigation_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if ok {
        Ok(())
    } else {
        Err(StorageError::InvalidId {
            investigation_id: investigation_id.to_string(),
        })
    }
}

pub(crate) fn sort_records(records: &mut [StoredInvestigation]) {
    records.sort_by(|a, b| {
        a.stored_at
            .cmp(&b.stored_at)
            .then_with(|| a.investigation_id.cmp(&b.investigation_id))
    });
}
