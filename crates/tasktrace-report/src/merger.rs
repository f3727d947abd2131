//! Merge finished single-file reports into one document.
//!
//! Sources are never loaded whole: image blocks are streamed across in
//! chunks, and only the last dump block of each source (found by scanning
//! backwards) is read into memory.

use crate::config::{report_file_name, resolve_report_dir};
use crate::fs::{FileSystem, FsAppender, FsReader, StdFileSystem};
use crate::{Error, Result};
use std::collections::BTreeMap;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tasktrace_dump::directory::SCREENSHOTS_DIR;
use tasktrace_dump::document::{self, DEFAULT_TEMPLATE, DumpBlock};
use tasktrace_dump::scan::{self, CHUNK_SIZE};
use tasktrace_dump::GroupedActionDump;
use walkdir::WalkDir;

/// One report queued for merging plus caller metadata for its dump block
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeSource {
    pub path: PathBuf,
    pub attributes: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum MergeTarget {
    /// Timestamped `merged-*.html` in the report directory
    #[default]
    Auto,
    Path(PathBuf),
}

#[derive(Debug, Clone, Default)]
pub struct MergeOptions {
    /// Delete source documents after a successful merge (best effort)
    pub remove_originals: bool,
    /// Replace an existing explicit target
    pub overwrite: bool,
    pub template: Option<String>,
}

#[derive(Debug)]
pub struct ReportMerger {
    fs: Arc<dyn FileSystem>,
    report_dir: PathBuf,
    sources: Vec<MergeSource>,
}

impl Default for ReportMerger {
    fn default() -> Self {
        Self::new(resolve_report_dir(None))
    }
}

impl ReportMerger {
    pub fn new(report_dir: impl Into<PathBuf>) -> Self {
        Self {
            fs: Arc::new(StdFileSystem),
            report_dir: report_dir.into(),
            sources: Vec::new(),
        }
    }

    pub fn with_file_system(mut self, fs: Arc<dyn FileSystem>) -> Self {
        self.fs = fs;
        self
    }

    pub fn add_report(&mut self, path: impl Into<PathBuf>, attributes: BTreeMap<String, String>) {
        self.sources.push(MergeSource {
            path: path.into(),
            attributes,
        });
    }

    pub fn sources(&self) -> &[MergeSource] {
        &self.sources
    }

    pub fn clear(&mut self) {
        self.sources.clear();
    }

    /// Merge every queued report, in order, into one document.
    ///
    /// The queue is cleared on success. On failure the partial output is
    /// removed and the queue is kept.
    pub fn merge(&mut self, target: MergeTarget, options: &MergeOptions) -> Result<PathBuf> {
        if self.sources.len() < 2 {
            return Err(Error::NotEnoughReports(self.sources.len()));
        }

        let output = match target {
            MergeTarget::Auto => self
                .report_dir
                .join(format!("{}.html", report_file_name("merged"))),
            MergeTarget::Path(path) => path,
        };
        if self.fs.stat(&output)?.is_some() && !options.overwrite {
            return Err(Error::AlreadyExists(output));
        }
        if let Some(parent) = output.parent() {
            self.fs.mkdir_all(parent)?;
        }

        if let Err(e) = self.write_merged(&output, options) {
            if let Err(cleanup) = self.fs.remove_file(&output) {
                tracing::warn!(path = %output.display(), error = %cleanup, "failed to remove partial merge output");
            }
            return Err(e);
        }

        tracing::info!(
            path = %output.display(),
            reports = self.sources.len(),
            "merged reports"
        );

        if options.remove_originals {
            for source in &self.sources {
                if let Err(e) = self.fs.remove_file(&source.path) {
                    tracing::warn!(path = %source.path.display(), error = %e, "failed to remove merged report");
                }
            }
        }
        self.sources.clear();
        Ok(output)
    }

    fn write_merged(&self, output: &Path, options: &MergeOptions) -> Result<()> {
        let template = options.template.as_deref().unwrap_or(DEFAULT_TEMPLATE);
        self.fs.write_file(output, template.as_bytes())?;

        for source in &self.sources {
            let mut out = BufWriter::with_capacity(CHUNK_SIZE, FsAppender::new(self.fs.as_ref(), output));
            let copied = scan::copy_image_blocks(FsReader::open(self.fs.as_ref(), &source.path)?, &mut out)?;

            let block = scan::last_dump_block(FsReader::open(self.fs.as_ref(), &source.path)?)?
                .ok_or_else(|| {
                    tasktrace_dump::Error::MalformedDocument(format!(
                        "no dump block in {}",
                        source.path.display()
                    ))
                })?;
            let DumpBlock {
                mut attributes,
                json,
            } = block;
            attributes.extend(source.attributes.clone());

            out.write_all(b"\n")?;
            out.write_all(document::dump_block(&json, &attributes).as_bytes())?;
            out.flush()?;
            tracing::debug!(source = %source.path.display(), images = copied, "merged report");

            self.copy_screenshot_folder(&source.path, output)?;
        }
        Ok(())
    }

    /// Directory-mode sources keep screenshots next to the document
    fn copy_screenshot_folder(&self, source: &Path, output: &Path) -> Result<()> {
        let (Some(source_parent), Some(output_parent)) = (source.parent(), output.parent()) else {
            return Ok(());
        };
        let source_dir = source_parent.join(SCREENSHOTS_DIR);
        let target_dir = output_parent.join(SCREENSHOTS_DIR);
        if source_dir == target_dir || !source_dir.is_dir() {
            return Ok(());
        }

        for entry in WalkDir::new(&source_dir).into_iter().filter_map(|e| e.ok()) {
            if !entry.file_type().is_file() {
                continue;
            }
            let Ok(relative) = entry.path().strip_prefix(&source_dir) else {
                continue;
            };
            let destination = target_dir.join(relative);
            if let Some(parent) = destination.parent() {
                self.fs.mkdir_all(parent)?;
            }
            self.fs.copy_file(entry.path(), &destination)?;
        }
        Ok(())
    }
}

/// A dump block of a merged document and the dump it describes
#[derive(Debug)]
pub struct MergedReport {
    pub attributes: BTreeMap<String, String>,
    pub dump: GroupedActionDump,
}

/// Every dump block of a merged document, in order, resolved against the
/// document's shared image blocks
pub fn read_merged_document(path: &Path) -> Result<Vec<MergedReport>> {
    let content = std::fs::read_to_string(path)?;
    let images = document::parse_image_blocks(&content);
    let blocks = document::parse_dump_blocks(&content);
    if blocks.is_empty() {
        return Err(tasktrace_dump::Error::MalformedDocument(format!(
            "no dump block in {}",
            path.display()
        ))
        .into());
    }

    blocks
        .into_iter()
        .map(|block| {
            let dump = GroupedActionDump::from_json_with_images(&block.json, &images)?;
            Ok(MergedReport {
                attributes: block.attributes,
                dump,
            })
        })
        .collect()
}
