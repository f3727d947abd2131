//! Directory-mode reports: `index.html` plus a `screenshots/` folder of
//! decoded image files.

use crate::document::{self, DocumentOptions};
use crate::execution::ProviderResolver;
use crate::grouped::GroupedActionDump;
use crate::image::{ImageFormat, decode_payload};
use crate::screenshot::{PersistLocation, SCREENSHOT_REF_KEY, Screenshot};
use crate::{Error, Result};
use serde_json::Value;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tasktrace_storage::{MemoryStorage, StorageProvider};

pub const INDEX_FILE: &str = "index.html";
pub const SCREENSHOTS_DIR: &str = "screenshots";

pub fn screenshot_file_name(id: &str, format: ImageFormat) -> String {
    format!("{}.{}", id, format.extension())
}

/// Path of a screenshot file as referenced from the index document
pub fn relative_screenshot_path(file_name: &str) -> String {
    format!("./{}/{}", SCREENSHOTS_DIR, file_name)
}

fn is_path_reference(reference: &str) -> bool {
    reference.starts_with("./")
        || reference.starts_with("../")
        || Path::new(reference).is_absolute()
}

fn resolve_reference_path(dir: &Path, reference: &str) -> PathBuf {
    let path = Path::new(reference);
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        dir.join(reference.strip_prefix("./").unwrap_or(reference))
    }
}

/// Conventional location of a screenshot that has no explicit path
fn conventional_file(dir: &Path, id: &str) -> Option<(String, PathBuf)> {
    [ImageFormat::Png, ImageFormat::Jpeg]
        .into_iter()
        .map(|format| screenshot_file_name(id, format))
        .map(|name| (relative_screenshot_path(&name), dir.join(SCREENSHOTS_DIR).join(name)))
        .find(|(_, absolute)| absolute.is_file())
}

/// Replace `{"$screenshot": id}` values whose id is in `paths`
fn rewrite_references(value: &mut Value, paths: &HashMap<String, String>) {
    match value {
        Value::Object(map) => {
            if map.len() == 1
                && let Some(Value::String(id)) = map.get_mut(SCREENSHOT_REF_KEY)
            {
                if let Some(path) = paths.get(id.as_str()) {
                    *id = path.clone();
                }
                return;
            }
            for v in map.values_mut() {
                rewrite_references(v, paths);
            }
        }
        Value::Array(items) => {
            for item in items {
                rewrite_references(item, paths);
            }
        }
        _ => {}
    }
}

impl GroupedActionDump {
    /// Write `dir/index.html` and one decoded image file per unique screenshot.
    /// References in the index point at the files (`./screenshots/{id}.{ext}`).
    pub fn write_to_directory(
        &self,
        dir: &Path,
        template: Option<&str>,
        options: &DocumentOptions,
    ) -> Result<PathBuf> {
        let screenshots_dir = dir.join(SCREENSHOTS_DIR);
        fs::create_dir_all(&screenshots_dir)?;

        let mut paths = HashMap::new();
        for screenshot in self.unique_screenshots() {
            let (format, bytes) = decode_payload(&screenshot.read()?)?;
            let name = screenshot_file_name(screenshot.id(), format);
            fs::write(screenshots_dir.join(&name), bytes)?;
            paths.insert(screenshot.id().to_string(), relative_screenshot_path(&name));
        }

        let mut value = self.to_value()?;
        rewrite_references(&mut value, &paths);
        let block = document::dump_block(&serde_json::to_string(&value)?, &options.attributes);

        let index = dir.join(INDEX_FILE);
        let template = template.unwrap_or(document::DEFAULT_TEMPLATE);
        fs::write(&index, document::embed_in_template(template, &block))?;
        tracing::debug!(path = %index.display(), screenshots = paths.len(), "wrote directory report");
        Ok(index)
    }

    /// Load a directory-mode report.
    ///
    /// References resolve, in order: explicit paths to files, image blocks in
    /// the index, then `./screenshots/{id}.png` / `.jpeg`. File-backed
    /// screenshots are read lazily.
    pub fn from_directory(dir: &Path) -> Result<Self> {
        let index = fs::read_to_string(dir.join(INDEX_FILE))?;
        let block = document::last_dump_block(&index)
            .ok_or_else(|| Error::MalformedDocument(format!("no dump block in {}", dir.display())))?;
        let images = document::parse_image_blocks(&index);
        let value: Value = serde_json::from_str(&block.json)
            .map_err(|e| Error::MalformedDocument(format!("invalid dump JSON: {e}")))?;

        let storage: Arc<dyn StorageProvider> = Arc::new(MemoryStorage::new());
        for (id, data) in &images {
            storage.store_with_id(id, data)?;
        }
        let mut dump = Self::from_value_unresolved(value, Arc::clone(&storage))?;

        let mut resolver = ProviderResolver::new(&storage);
        let mut files: HashMap<String, Arc<Screenshot>> = HashMap::new();
        for execution in dump.executions_mut() {
            execution.resolve_screenshots(&mut |reference| {
                if images.contains_key(reference) {
                    return resolver.resolve(reference);
                }
                if let Some(existing) = files.get(reference) {
                    return Some(Arc::clone(existing));
                }

                let (id, relative_path, absolute_path) = if is_path_reference(reference) {
                    let absolute = resolve_reference_path(dir, reference);
                    let id = absolute
                        .file_stem()
                        .and_then(|s| s.to_str())
                        .unwrap_or(reference)
                        .to_string();
                    (id, reference.to_string(), absolute)
                } else if let Some((relative, absolute)) = conventional_file(dir, reference) {
                    (reference.to_string(), relative, absolute)
                } else {
                    tracing::warn!(reference, "screenshot file not found");
                    return None;
                };

                let screenshot = Screenshot::persisted(
                    id,
                    PersistLocation::ExternalFile {
                        relative_path,
                        absolute_path,
                    },
                );
                files.insert(reference.to_string(), Arc::clone(&screenshot));
                Some(screenshot)
            });
        }
        Ok(dump)
    }
}
