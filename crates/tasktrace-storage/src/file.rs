use crate::provider::{StorageKind, StorageProvider, generate_id};
use crate::{Error, Result};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

const ENTRY_EXT: &str = "b64";

/// Disk-backed storage: one `<id>.b64` file per payload in a private directory.
///
/// The directory outlives the process unless `cleanup()` is called, so a
/// restarted process can reattach with [`FileStorage::open`].
#[derive(Debug)]
pub struct FileStorage {
    dir: PathBuf,
}

impl FileStorage {
    /// Create a fresh private directory under the system temp dir
    pub fn new() -> Result<Self> {
        let dir = std::env::temp_dir()
            .join("tasktrace-screenshots")
            .join(generate_id());
        Self::open(dir)
    }

    /// Use (and create if needed) an explicit directory
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        tracing::debug!(dir = %dir.display(), "file storage ready");
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn entry_path(&self, id: &str) -> Result<PathBuf> {
        validate_id(id)?;
        Ok(self.dir.join(format!("{}.{}", id, ENTRY_EXT)))
    }
}

fn validate_id(id: &str) -> Result<()> {
    if id.is_empty() || id.contains(['/', '\\']) || id.contains("..") {
        return Err(Error::InvalidId(id.to_string()));
    }
    Ok(())
}

impl StorageProvider for FileStorage {
    fn kind(&self) -> StorageKind {
        StorageKind::File
    }

    fn store(&self, data: &str) -> Result<String> {
        let id = generate_id();
        self.store_with_id(&id, data)?;
        Ok(id)
    }

    fn store_with_id(&self, id: &str, data: &str) -> Result<()> {
        let path = self.entry_path(id)?;
        // The directory may have been removed by a previous cleanup()
        fs::create_dir_all(&self.dir)?;
        fs::write(path, data)?;
        Ok(())
    }

    fn retrieve(&self, id: &str) -> Result<String> {
        let path = self.entry_path(id)?;
        match fs::read_to_string(&path) {
            Ok(data) => Ok(data),
            Err(err) if err.kind() == ErrorKind::NotFound => Err(Error::NotFound(id.to_string())),
            Err(err) => Err(err.into()),
        }
    }

    fn delete(&self, id: &str) -> Result<()> {
        let path = self.entry_path(id)?;
        match fs::remove_file(path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    fn contains(&self, id: &str) -> bool {
        self.entry_path(id).map(|p| p.is_file()).unwrap_or(false)
    }

    fn cleanup(&self) -> Result<()> {
        match fs::remove_dir_all(&self.dir) {
            Ok(()) => {
                tracing::debug!(dir = %self.dir.display(), "file storage removed");
                Ok(())
            }
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(err) => {
                tracing::warn!(dir = %self.dir.display(), error = %err, "failed to remove file storage");
                Err(err.into())
            }
        }
    }
}
