use crate::document::{self, DocumentOptions, ImageMap};
use crate::execution::{ExecutionDump, ProviderResolver};
use crate::legacy;
use crate::screenshot::Screenshot;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeSet, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tasktrace_storage::{MemoryStorage, StorageProvider};

/// Top-level container: one automation session's executions plus the
/// provider holding their screenshot payloads.
#[derive(Debug, Clone)]
pub struct GroupedActionDump {
    sdk_version: String,
    group_name: String,
    group_description: Option<String>,
    model_briefs: BTreeSet<String>,
    executions: Vec<ExecutionDump>,
    storage: Arc<dyn StorageProvider>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct DumpView<'a> {
    sdk_version: &'a str,
    group_name: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    group_description: Option<&'a str>,
    model_briefs: &'a BTreeSet<String>,
    executions: &'a [ExecutionDump],
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct DumpRecord {
    #[serde(default)]
    sdk_version: String,
    #[serde(default)]
    group_name: String,
    #[serde(default)]
    group_description: Option<String>,
    #[serde(default)]
    model_briefs: Vec<String>,
    #[serde(default)]
    executions: Vec<ExecutionDump>,
}

/// Compact JSON plus every screenshot payload it references
#[derive(Debug, Clone)]
pub struct SerializedDump {
    pub json: String,
    pub images: ImageMap,
}

impl GroupedActionDump {
    /// New dump backed by in-memory storage
    pub fn new(group_name: impl Into<String>) -> Self {
        Self::with_storage(group_name, Arc::new(MemoryStorage::new()))
    }

    pub fn with_storage(group_name: impl Into<String>, storage: Arc<dyn StorageProvider>) -> Self {
        Self {
            sdk_version: env!("CARGO_PKG_VERSION").to_string(),
            group_name: group_name.into(),
            group_description: None,
            model_briefs: BTreeSet::new(),
            executions: Vec::new(),
            storage,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.group_description = Some(description.into());
        self
    }

    pub fn with_sdk_version(mut self, sdk_version: impl Into<String>) -> Self {
        self.sdk_version = sdk_version.into();
        self
    }

    pub fn sdk_version(&self) -> &str {
        &self.sdk_version
    }

    pub fn group_name(&self) -> &str {
        &self.group_name
    }

    pub fn group_description(&self) -> Option<&str> {
        self.group_description.as_deref()
    }

    pub fn storage(&self) -> &Arc<dyn StorageProvider> {
        &self.storage
    }

    pub fn executions(&self) -> &[ExecutionDump] {
        &self.executions
    }

    /// Latest execution, for loops that keep extending the current step
    pub fn last_execution_mut(&mut self) -> Option<&mut ExecutionDump> {
        self.executions.last_mut()
    }

    pub fn model_briefs(&self) -> impl Iterator<Item = &str> {
        self.model_briefs.iter().map(String::as_str)
    }

    pub fn add_model_brief(&mut self, brief: impl Into<String>) {
        self.model_briefs.insert(brief.into());
    }

    pub fn append_execution(&mut self, execution: ExecutionDump) {
        self.executions.push(execution);
    }

    /// Replace the execution at `index`; out-of-range indexes are ignored
    pub fn update_execution(&mut self, index: usize, execution: ExecutionDump) -> bool {
        match self.executions.get_mut(index) {
            Some(slot) => {
                *slot = execution;
                true
            }
            None => false,
        }
    }

    /// Store a captured payload in this dump's provider
    pub fn create_screenshot(&self, data: &str) -> Result<Arc<Screenshot>> {
        Screenshot::create_in(data, &self.storage)
    }

    /// Every reachable screenshot, duplicates included
    pub fn collect_all_screenshots(&self) -> Vec<Arc<Screenshot>> {
        self.executions
            .iter()
            .flat_map(ExecutionDump::collect_screenshots)
            .collect()
    }

    /// Reachable screenshots, first occurrence of each id only
    pub fn unique_screenshots(&self) -> Vec<Arc<Screenshot>> {
        let mut seen = HashSet::new();
        self.collect_all_screenshots()
            .into_iter()
            .filter(|s| seen.insert(s.id().to_string()))
            .collect()
    }

    fn view(&self) -> DumpView<'_> {
        DumpView {
            sdk_version: &self.sdk_version,
            group_name: &self.group_name,
            group_description: self.group_description.as_deref(),
            model_briefs: &self.model_briefs,
            executions: &self.executions,
        }
    }

    /// Compact JSON with screenshots as `{"$screenshot": id}` references
    pub fn serialize(&self) -> Result<String> {
        Ok(serde_json::to_string(&self.view())?)
    }

    pub(crate) fn to_value(&self) -> Result<Value> {
        Ok(serde_json::to_value(self.view())?)
    }

    /// Id → payload for every reachable screenshot.
    /// Loads all payloads at once; incremental writers should not use it.
    pub fn image_map(&self) -> Result<ImageMap> {
        let mut images = ImageMap::new();
        for screenshot in self.unique_screenshots() {
            images.insert(screenshot.id().to_string(), screenshot.read()?);
        }
        Ok(images)
    }

    pub fn serialize_with_images(&self) -> Result<SerializedDump> {
        Ok(SerializedDump {
            images: self.image_map()?,
            json: self.serialize()?,
        })
    }

    /// Single-file body: one image block per unique screenshot, then the dump block
    pub fn to_document(&self, options: &DocumentOptions) -> Result<String> {
        let SerializedDump { json, images } = self.serialize_with_images()?;
        let mut blocks: Vec<String> = images
            .iter()
            .map(|(id, data)| document::image_block(id, data))
            .collect();
        blocks.push(document::dump_block(&json, &options.attributes));
        Ok(blocks.join("\n"))
    }

    /// Write template + document body to `path` in one overwrite
    pub fn write_document(
        &self,
        path: &Path,
        template: Option<&str>,
        options: &DocumentOptions,
    ) -> Result<PathBuf> {
        let body = self.to_document(options)?;
        let template = template.unwrap_or(document::DEFAULT_TEMPLATE);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, format!("{}\n{}", template, body))?;
        Ok(path.to_path_buf())
    }

    fn from_record(record: DumpRecord, storage: Arc<dyn StorageProvider>) -> Self {
        let mut dump = Self::with_storage(record.group_name, storage)
            .with_sdk_version(record.sdk_version);
        dump.group_description = record.group_description;
        dump.model_briefs = record.model_briefs.into_iter().collect();
        dump.executions = record.executions;
        dump
    }

    /// Bind placeholders whose ids the provider holds; others stay unresolved
    fn bind_to_storage(&mut self) {
        let storage = Arc::clone(&self.storage);
        let mut resolver = ProviderResolver::new(&storage);
        for execution in &mut self.executions {
            execution.resolve_screenshots(&mut |id| {
                if storage.contains(id) {
                    resolver.resolve(id)
                } else {
                    tracing::warn!(id, "no image data for screenshot reference");
                    None
                }
            });
        }
    }

    /// Parse compact JSON; screenshot references are left unresolved
    pub fn from_json(json: &str) -> Result<Self> {
        let record: DumpRecord = serde_json::from_str(json)?;
        Ok(Self::from_record(record, Arc::new(MemoryStorage::new())))
    }

    /// Parse compact JSON and rehydrate `images` into a fresh memory provider
    pub fn from_json_with_images(json: &str, images: &ImageMap) -> Result<Self> {
        let storage: Arc<dyn StorageProvider> = Arc::new(MemoryStorage::new());
        for (id, data) in images {
            storage.store_with_id(id, data)?;
        }
        let record: DumpRecord = serde_json::from_str(json)?;
        let mut dump = Self::from_record(record, storage);
        dump.bind_to_storage();
        Ok(dump)
    }

    /// Legacy dialect: payloads inline in the JSON
    fn from_legacy_value(mut value: Value) -> Result<Self> {
        let storage: Arc<dyn StorageProvider> = Arc::new(MemoryStorage::new());
        let moved = legacy::extract_inline_images(&mut value, storage.as_ref())?;
        tracing::debug!(moved, "lifted inline screenshots from legacy dump");
        let record: DumpRecord = serde_json::from_value(value)?;
        let mut dump = Self::from_record(record, storage);
        dump.bind_to_storage();
        Ok(dump)
    }

    /// Load a single-file report document (template + blocks)
    pub fn from_document(document: &str) -> Result<Self> {
        let block = document::last_dump_block(document)
            .ok_or_else(|| Error::MalformedDocument("no dump block found".to_string()))?;
        let images = document::parse_image_blocks(document);
        let malformed = |e: serde_json::Error| Error::MalformedDocument(format!("invalid dump JSON: {e}"));

        if !images.is_empty() {
            return Self::from_json_with_images(&block.json, &images).map_err(|e| match e {
                Error::Json(e) => malformed(e),
                other => other,
            });
        }

        let value: Value = serde_json::from_str(&block.json).map_err(malformed)?;
        if legacy::has_inline_images(&value) {
            return Self::from_legacy_value(value);
        }
        let record: DumpRecord = serde_json::from_value(value).map_err(malformed)?;
        Ok(Self::from_record(record, Arc::new(MemoryStorage::new())))
    }

    pub fn from_document_file(path: &Path) -> Result<Self> {
        let document = std::fs::read_to_string(path)?;
        Self::from_document(&document)
    }

    /// Move every payload into `target` and make it this dump's provider
    pub fn migrate_to(&mut self, target: Arc<dyn StorageProvider>) -> Result<()> {
        for screenshot in self.unique_screenshots() {
            screenshot.migrate_to(&target)?;
        }
        tracing::debug!(from = %self.storage.kind(), to = %target.kind(), "migrated screenshot storage");
        self.storage = target;
        Ok(())
    }

    /// Release everything held by the owned provider
    pub fn cleanup(&self) -> Result<()> {
        Ok(self.storage.cleanup()?)
    }

    pub(crate) fn executions_mut(&mut self) -> &mut [ExecutionDump] {
        &mut self.executions
    }

    pub(crate) fn from_value_unresolved(value: Value, storage: Arc<dyn StorageProvider>) -> Result<Self> {
        let record: DumpRecord = serde_json::from_value(value)?;
        Ok(Self::from_record(record, storage))
    }
}
