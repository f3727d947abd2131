//! Screenshot payload storage for tasktrace.
//!
//! Payloads are opaque base64 strings addressed by generated ids. Two
//! backends are provided:
//! - [`MemoryStorage`]: an in-process map, lost on exit
//! - [`FileStorage`]: one file per entry in a private directory that
//!   survives restarts until [`StorageProvider::cleanup`] is called

pub mod error;
mod file;
mod memory;
mod provider;

pub use error::{Error, Result};
pub use file::FileStorage;
pub use memory::MemoryStorage;
pub use provider::{StorageKind, StorageProvider, generate_id};

use std::sync::Arc;

/// Build a shared provider of the requested kind
pub fn create_provider(kind: StorageKind) -> Result<Arc<dyn StorageProvider>> {
    Ok(match kind {
        StorageKind::Memory => Arc::new(MemoryStorage::new()),
        StorageKind::File => Arc::new(FileStorage::new()?),
    })
}
