use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tasktrace_dump::GroupedActionDump;
use tasktrace_dump::document::DEFAULT_TEMPLATE;
use tasktrace_storage::{StorageKind, StorageProvider};

/// Environment variable naming the run directory; reports go to `<run dir>/report`
pub const RUN_DIR_ENV: &str = "TASKTRACE_RUN_DIR";

const DEFAULT_RUN_DIR: &str = "tasktrace_run";
const REPORT_SUBDIR: &str = "report";

/// Resolve the report output directory based on priority:
/// 1. Explicit path (with tilde expansion)
/// 2. TASKTRACE_RUN_DIR environment variable, joined with `report`
/// 3. `./tasktrace_run/report`
pub fn resolve_report_dir(explicit_path: Option<&Path>) -> PathBuf {
    if let Some(path) = explicit_path {
        return expand_tilde(path);
    }

    if let Ok(run_dir) = std::env::var(RUN_DIR_ENV)
        && !run_dir.is_empty()
    {
        return expand_tilde(Path::new(&run_dir)).join(REPORT_SUBDIR);
    }

    PathBuf::from(DEFAULT_RUN_DIR).join(REPORT_SUBDIR)
}

/// Expand tilde (~) in paths to the user's home directory
fn expand_tilde(path: &Path) -> PathBuf {
    if let Ok(stripped) = path.strip_prefix("~")
        && let Some(home) = dirs::home_dir()
    {
        return home.join(stripped);
    }
    path.to_path_buf()
}

/// Unique, timestamped report name: `<tag>-<YYYY-MM-DD_HH-MM-SS>-<8 hex>`
pub fn report_file_name(tag: &str) -> String {
    let timestamp = chrono::Local::now().format("%Y-%m-%d_%H-%M-%S");
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!("{}-{}-{}", tag, timestamp, &suffix[..8])
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputFormat {
    /// One self-contained document with inline image blocks
    #[default]
    SingleHtml,
    /// `index.html` plus a `screenshots/` folder
    HtmlAndExternalAssets,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReportConfig {
    pub generate_report: bool,
    pub output_format: OutputFormat,
    /// Announce the report location when a session finalizes
    pub auto_print: bool,
    pub report_dir: Option<PathBuf>,
    pub template_path: Option<PathBuf>,
    /// Where screenshot payloads live until they are persisted
    pub storage: StorageKind,
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            generate_report: true,
            output_format: OutputFormat::default(),
            auto_print: true,
            report_dir: None,
            template_path: None,
            storage: StorageKind::default(),
        }
    }
}

impl ReportConfig {
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)?;
        let config: ReportConfig = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn report_dir(&self) -> PathBuf {
        resolve_report_dir(self.report_dir.as_deref())
    }

    /// Fresh provider of the configured kind, e.g. as a `migrate_to` target
    pub fn create_provider(&self) -> Result<Arc<dyn StorageProvider>> {
        Ok(tasktrace_storage::create_provider(self.storage)?)
    }

    /// Empty dump backed by the configured storage
    pub fn new_dump(&self, group_name: &str) -> Result<GroupedActionDump> {
        Ok(GroupedActionDump::with_storage(
            group_name,
            self.create_provider()?,
        ))
    }

    /// Report template: the configured file, or the built-in minimal page
    pub fn template(&self) -> Result<String> {
        match &self.template_path {
            Some(path) => std::fs::read_to_string(expand_tilde(path)).map_err(|e| {
                Error::Config(format!("cannot read template {}: {}", path.display(), e))
            }),
            None => Ok(DEFAULT_TEMPLATE.to_string()),
        }
    }
}
