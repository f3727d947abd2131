//! Isolated filesystem environment for report tests.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// Temp directory with a `report/` subdirectory, removed on drop.
///
/// # Example
/// ```no_run
/// use tasktrace_testing::TestWorld;
///
/// let world = TestWorld::new();
/// let path = world.report_path("session");
/// assert!(path.ends_with("report/session.html"));
/// ```
pub struct TestWorld {
    temp_dir: TempDir,
    report_dir: PathBuf,
}

impl Default for TestWorld {
    fn default() -> Self {
        Self::new()
    }
}

impl TestWorld {
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let report_dir = temp_dir.path().join("report");
        std::fs::create_dir_all(&report_dir).expect("Failed to create report dir");
        Self {
            temp_dir,
            report_dir,
        }
    }

    pub fn root(&self) -> &Path {
        self.temp_dir.path()
    }

    pub fn report_dir(&self) -> &Path {
        &self.report_dir
    }

    /// Single-file report location for `name`
    pub fn report_path(&self, name: &str) -> PathBuf {
        self.report_dir.join(format!("{name}.html"))
    }

    /// Directory-mode report folder for `name`
    pub fn report_folder(&self, name: &str) -> PathBuf {
        self.report_dir.join(name)
    }

    pub fn read(&self, path: &Path) -> Result<String> {
        std::fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))
    }

    pub fn file_size(&self, path: &Path) -> Result<u64> {
        Ok(std::fs::metadata(path)
            .with_context(|| format!("Failed to stat {}", path.display()))?
            .len())
    }

    /// Write `content` at `relative` under the root, creating parents
    pub fn write_file(&self, relative: &str, content: &str) -> Result<PathBuf> {
        let path = self.temp_dir.path().join(relative);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&path, content)?;
        Ok(path)
    }
}
