//! Filesystem-backed investigation store.
//!
//! Layout: `<root>/investigations/<investigation_id>.json`, one pretty-printed
//! `StoredInvestigation` per file. Writes go to a temp file in the same
//! directory and are renamed into place.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tempfile::NamedTempFile;
use tracing::debug;

use crate::error::StorageError;
use crate::storage_traits::*;

pub struct FsInvestigationStore {
    records_dir: PathBuf,
}

impl FsInvestigationStore {
    /// Create a store rooted at `root`. Creates `root/investigations/` if needed.
    pub fn new(root: impl AsRef<Path>) -> StorageResult<Self> {
        let records_dir = root.as_ref().join("investigations");
        fs::create_dir_all(&records_dir)?;
        Ok(Self { records_dir })
    }

    fn record_path(&self, investigation_id: &str) -> PathBuf {
        self.records_dir.join(format!("{investigation_id}.json"))
    }

    fn write_record(dir: &Path, path: &Path, record: &StoredInvestigation) -> StorageResult<()> {
        let bytes = serde_json::to_vec_pretty(record)?;
        let mut tmp = NamedTempFile::new_in(dir)?;
        tmp.write_all(&bytes)?;
        tmp.persist(path).map_err(|e| StorageError::Io(e.error))?;
        Ok(())
    }

    fn read_record(path: &Path, investigation_id: &str) -> StorageResult<StoredInvestigation> {
        let bytes = fs::read(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                StorageError::NotFound {
                    investigation_id: investigation_id.to_string(),
                }
            } else {
                StorageError::Io(e)
            }
        })?;
        let record: StoredInvestigation = serde_json::from_slice(&bytes)?;
        record.verify()?;
        Ok(record)
    }
}

async fn blocking<T, F>(f: F) -> StorageResult<T>
where
    F: FnOnce() -> StorageResult<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| StorageError::Task(e.to_string()))?
}

#[async_trait]
impl InvestigationStore for FsInvestigationStore {
    async fn put(&self, record: StoredInvestigation) -> StorageResult<()> {
        validate_id(&record.investigation_id)?;
        record.verify()?;
        let dir = self.records_dir.clone();
        let path = self.record_path(&record.investigation_id);
        debug!(investigation_id = %record.investigation_id, path = %path.display(), "writing record");
        blocking(move || Self::write_record(&dir, &path, &record)).await
    }

    async fn get(&self, investigation_id: &str) -> StorageResult<StoredInvestigation> {
        validate_id(investigation_id)?;
        let path = self.record_path(investigation_id);
        let id = investigation_id.to_string();
        blocking(move || Self::read_record(&path, &id)).await
    }

    async fn contains(&self, investigation_id: &str) -> StorageResult<bool> {
        validate_id(investigation_id)?;
        Ok(self.record_path(investigation_id).exists())
    }

    async fn list(&self, status: Option<&str>) -> StorageResult<Vec<StoredInvestigation>> {
        let dir = self.records_dir.clone();
        let status = status.map(str::to_string);
        blocking(move || {
            let mut out = Vec::new();
            for entry in fs::read_dir(&dir)? {
                let path = entry?.path();
                if path.extension().and_then(|e| e.to_str()) != Some("json") {
                    continue;
                }
                let Some(id) = path.file_stem().and_then(|s| s.to_str()) else {
                    continue;
                };
                let record = Self::read_record(&path, id)?;
                if status.as_deref().map_or(true, |s| record.status == s) {
                    out.push(record);
                }
            }
            sort_records(&mut out);
            Ok(out)
        })
        .await
    }

    async fn delete(&self, investigation_id: &str) -> StorageResult<()> {
        validate_id(investigation_id)?;
        match fs::remove_file(self.record_path(investigation_id)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StorageError::Io(e)),
        }
    }
}
