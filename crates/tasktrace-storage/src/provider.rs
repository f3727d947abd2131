use crate::Result;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Backend that holds screenshot payloads (base64 strings) by id.
///
/// Responsibilities:
/// - Generate collision-free ids on `store`
/// - Rehydrate payloads under a known id on `store_with_id`
/// - Release entries on `delete` / `cleanup`
///
/// A provider is driven serially by its owner; it needs no internal ordering
/// guarantees beyond being safe to share across threads.
pub trait StorageProvider: Send + Sync + fmt::Debug {
    /// Backend kind, used for logging and configuration round-trips
    fn kind(&self) -> StorageKind;

    /// Store a payload under a freshly generated id
    fn store(&self, data: &str) -> Result<String>;

    /// Store a payload under a caller-chosen id, replacing any existing entry
    fn store_with_id(&self, id: &str, data: &str) -> Result<()>;

    /// Fetch a payload; `Error::NotFound` when the id is absent
    fn retrieve(&self, id: &str) -> Result<String>;

    /// Remove a payload; absent ids are ignored
    fn delete(&self, id: &str) -> Result<()>;

    /// Check whether an id is present
    fn contains(&self, id: &str) -> bool;

    /// Release every entry held by this provider
    fn cleanup(&self) -> Result<()>;
}

/// Available storage backends
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageKind {
    /// In-process map, lost on exit
    #[default]
    Memory,
    /// One file per entry in a private directory
    File,
}

impl fmt::Display for StorageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageKind::Memory => write!(f, "memory"),
            StorageKind::File => write!(f, "file"),
        }
    }
}

/// Generate a fresh globally unique storage id
pub fn generate_id() -> String {
    uuid::Uuid::new_v4().to_string()
}
