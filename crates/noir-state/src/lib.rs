//! Noir-State: persistence layer for Noir investigation records
//!
//! Terminal investigations are serialized by `noir-core` into self-contained
//! JSON documents keyed by investigation id. This crate owns the contract for
//! storing those documents and ships two backends.
//!
//! ## Layer 0 - Data/Persistence
//!
//! Focus: integrity of stored documents (every body is content-addressed by
//! its SHA-256 digest) and a backend-agnostic async API.
//!
//! ## Key Components
//!
//! - `InvestigationStore`: async store/load/list contract
//! - `StoredInvestigation`: the persisted document envelope
//! - `MemoryInvestigationStore`: in-memory backend (tests, ephemeral runs)
//! - `FsInvestigationStore`: one JSON file per investigation, atomic writes

mod error;
pub mod fakes;
pub mod fs_store;
pub mod storage_traits;

pub use error::StorageError;
pub use fakes::MemoryInvestigationStore;
pub use fs_store::FsInvestigationStore;
pub use storage_traits::{ContentDigest, InvestigationStore, StorageResult, StoredInvestigation};
