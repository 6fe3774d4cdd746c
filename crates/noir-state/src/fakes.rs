//! In-memory fakes for storage traits
//!
//! `MemoryInvestigationStore` satisfies the `InvestigationStore` contract
//! without touching disk. Used by tests and by ephemeral CLI runs.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;

use crate::error::StorageError;
use crate::storage_traits::*;

/// In-memory investigation store backed by a `HashMap<id, record>`.
#[derive(Debug, Default)]
pub struct MemoryInvestigationStore {
    records: Mutex<HashMap<String, StoredInvestigation>>,
}

impl MemoryInvestigationStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn records(&self) -> MutexGuard<'_, HashMap<String, StoredInvestigation>> {
        // A panic while holding the lock cannot leave a half-written record:
        // every mutation is a single insert/remove.
        self.records
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl InvestigationStore for MemoryInvestigationStore {
    async fn put(&self, record: StoredInvestigation) -> StorageResult<()> {
        validate_id(&record.investigation_id)?;
        record.verify()?;
        self.records()
            .insert(record.investigation_id.clone(), record);
        Ok(())
    }

    async fn get(&self, investigation_id: &str) -> StorageResult<StoredInvestigation> {
        self.records()
            .get(investigation_id)
            .cloned()
            .ok_or_else(|| StorageError::NotFound {
                investigation_id: investigation_id.to_string(),
            })
    }

    async fn contains(&self, investigation_id: &str) -> StorageResult<bool> {
        Ok(self.records().contains_key(investigation_id))
    }

    async fn list(&self, status: Option<&str>) -> StorageResult<Vec<StoredInvestigation>> {
        let mut out: Vec<StoredInvestigation> = self
            .records()
            .values()
            .filter(|r| status.map_or(true, |s| r.status == s))
            .cloned()
            .collect();
        sort_records(&mut out);
        Ok(out)
    }

    async fn delete(&self, investigation_id: &str) -> StorageResult<()> {
        self.records().remove(investigation_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: &str, status: &str) -> StoredInvestigation {
        StoredInvestigation::new(id, status, serde_json::json!({ "id": id })).unwrap()
    }

    #[tokio::test]
    async fn test_put_get_roundtrip() {
        let store = MemoryInvestigationStore::new();
        store.put(record("inv-1", "completed")).await.unwrap();
        let loaded = store.get("inv-1").await.unwrap();
        assert_eq!(loaded.status, "completed");
        assert!(store.contains("inv-1").await.unwrap());
    }

    #[tokio::test]
    async fn test_put_rejects_tampered_record() {
        let store = MemoryInvestigationStore::new();
        let mut r = record("inv-1", "completed");
        r.body = serde_json::json!({"id": "other"});
        assert!(matches!(
            store.put(r).await,
            Err(StorageError::DigestMismatch { .. })
        ));
    }

    #[tokio::test]
    async fn test_list_filters_by_status() {
        let store = MemoryInvestigationStore::new();
        store.put(record("inv-1", "completed")).await.unwrap();
        store.put(record("inv-2", "degraded")).await.unwrap();
        store.put(record("inv-3", "completed")).await.unwrap();

        assert_eq!(store.list(None).await.unwrap().len(), 3);
        let completed = store.list(Some("completed")).await.unwrap();
        assert_eq!(completed.len(), 2);
        assert!(completed.iter().all(|r| r.status == "completed"));
    }
}
