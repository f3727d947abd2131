//! Incremental report writer.
//!
//! Inline mode keeps one evolving document:
//!
//! ```text
//! [template][image blocks ...] <- image_end_offset [dump block]
//! ```
//!
//! Each update truncates back to `image_end_offset`, appends image blocks for
//! screenshots not written yet, moves the offset past them and appends a
//! fresh dump block. Persisted screenshots release their payloads, so memory
//! stays flat however long the session runs, and the file grows with distinct
//! screenshots rather than with the number of updates.
//!
//! Directory mode writes each new screenshot once as a file and overwrites
//! `index.html` on every update.
//!
//! Writes run on a dedicated worker thread fed by a channel, so they apply
//! strictly in call order without blocking the caller.

use crate::config::{OutputFormat, ReportConfig};
use crate::fs::{FileSystem, StdFileSystem};
use crate::sink::{NullReportGenerator, ReportSink};
use crate::{Error, Result};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{Receiver, Sender, channel};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;
use tasktrace_dump::directory::{
    INDEX_FILE, SCREENSHOTS_DIR, relative_screenshot_path, screenshot_file_name,
};
use tasktrace_dump::document::{DEFAULT_TEMPLATE, dump_block, embed_in_template, image_block};
use tasktrace_dump::image::decode_payload;
use tasktrace_dump::{GroupedActionDump, Screenshot};
use tokio::sync::oneshot;

/// Counters maintained by the write worker
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriteStats {
    /// Distinct screenshots persisted by this generator
    pub written_screenshots: usize,
    /// Inline mode: byte offset where the dump block starts
    pub image_end_offset: u64,
    pub writes: usize,
    pub failed_writes: usize,
    /// The latest write ended with a complete dump block on disk
    pub document_complete: bool,
}

#[derive(Default)]
pub struct ReportOptions {
    /// Document template; the built-in minimal page when unset
    pub template: Option<String>,
    /// Extra attributes on every dump block
    pub attributes: BTreeMap<String, String>,
    pub file_system: Option<Arc<dyn FileSystem>>,
    /// Used as-is by [`ReportGenerator::create`] instead of building a writer
    pub sink: Option<Arc<dyn ReportSink>>,
}

impl ReportOptions {
    pub fn with_template(mut self, template: impl Into<String>) -> Self {
        self.template = Some(template.into());
        self
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    pub fn with_file_system(mut self, fs: Arc<dyn FileSystem>) -> Self {
        self.file_system = Some(fs);
        self
    }

    pub fn with_sink(mut self, sink: Arc<dyn ReportSink>) -> Self {
        self.sink = Some(sink);
        self
    }
}

/// Dump state captured at `on_dump_update` time
struct DumpSnapshot {
    json: String,
    screenshots: Vec<Arc<Screenshot>>,
}

impl DumpSnapshot {
    fn capture(dump: &GroupedActionDump) -> tasktrace_dump::Result<Self> {
        Ok(Self {
            json: dump.serialize()?,
            screenshots: dump.unique_screenshots(),
        })
    }
}

enum Command {
    Write(DumpSnapshot),
    Fail(Error),
    Flush(oneshot::Sender<Result<()>>),
}

#[derive(Debug, Clone)]
enum Target {
    Inline { path: PathBuf },
    Directory { dir: PathBuf },
}

impl Target {
    fn report_path(&self) -> PathBuf {
        match self {
            Target::Inline { path } => path.clone(),
            Target::Directory { dir } => dir.join(INDEX_FILE),
        }
    }

    fn format(&self) -> OutputFormat {
        match self {
            Target::Inline { .. } => OutputFormat::SingleHtml,
            Target::Directory { .. } => OutputFormat::HtmlAndExternalAssets,
        }
    }
}

fn lock_stats(stats: &Mutex<WriteStats>) -> MutexGuard<'_, WriteStats> {
    stats.lock().unwrap_or_else(PoisonError::into_inner)
}

/// State owned by the worker thread
struct Writer {
    fs: Arc<dyn FileSystem>,
    target: Target,
    template: String,
    attributes: BTreeMap<String, String>,
    written: HashSet<String>,
    image_end_offset: u64,
    initialized: bool,
    stats: Arc<Mutex<WriteStats>>,
    pending_error: Option<Error>,
}

impl Writer {
    fn run(mut self, rx: Receiver<Command>) {
        loop {
            match rx.recv() {
                Ok(Command::Write(snapshot)) => self.apply(snapshot),
                Ok(Command::Fail(err)) => {
                    lock_stats(&self.stats).document_complete = false;
                    self.record(err);
                }
                Ok(Command::Flush(reply)) => {
                    let result = match self.pending_error.take() {
                        Some(err) => Err(err),
                        None => Ok(()),
                    };
                    let _ = reply.send(result);
                }
                Err(_) => break,
            }
        }
        tracing::debug!(path = %self.target.report_path().display(), "report writer stopped");
    }

    /// Keep the first failure for the next flush; log the rest
    fn record(&mut self, err: Error) {
        tracing::error!(path = %self.target.report_path().display(), error = %err, "report write failed");
        if self.pending_error.is_none() {
            self.pending_error = Some(err);
        }
    }

    fn apply(&mut self, snapshot: DumpSnapshot) {
        let result = match self.target.clone() {
            Target::Inline { path } => self.write_inline(&path, &snapshot),
            Target::Directory { dir } => self.write_directory(&dir, &snapshot),
        };
        // Ok(Some(_)): the document is complete but some screenshots were skipped
        let (complete, error) = match result {
            Ok(skipped) => (true, skipped),
            Err(err) => (false, Some(err)),
        };

        {
            let mut stats = lock_stats(&self.stats);
            stats.writes += 1;
            stats.written_screenshots = self.written.len();
            stats.image_end_offset = self.image_end_offset;
            stats.document_complete = complete;
            if error.is_some() {
                stats.failed_writes += 1;
            }
        }

        if let Some(err) = error {
            self.record(err);
        }
    }

    fn write_inline(&mut self, path: &Path, snapshot: &DumpSnapshot) -> Result<Option<Error>> {
        if !self.initialized {
            if let Some(parent) = path.parent() {
                self.fs.mkdir_all(parent)?;
            }
            self.fs.write_file(path, self.template.as_bytes())?;
            self.image_end_offset = match self.fs.stat(path)? {
                Some(stat) => stat.len,
                None => self.template.len() as u64,
            };
            self.initialized = true;
        } else {
            self.fs.truncate(path, self.image_end_offset)?;
        }

        let mut first_error = None;
        let mut appended = 0usize;
        for screenshot in &snapshot.screenshots {
            if self.written.contains(screenshot.id()) {
                continue;
            }
            let data = match screenshot.read() {
                Ok(data) => data,
                Err(e) => {
                    tracing::warn!(id = screenshot.id(), error = %e, "skipping unreadable screenshot");
                    first_error.get_or_insert(Error::from(e));
                    continue;
                }
            };

            let block = format!("\n{}", image_block(screenshot.id(), &data));
            self.fs.append_file(path, block.as_bytes())?;
            self.image_end_offset += block.len() as u64;
            self.written.insert(screenshot.id().to_string());
            appended += 1;

            if !screenshot.is_persisted()
                && let Err(e) = screenshot.mark_persisted_inline(path)
            {
                first_error.get_or_insert(Error::from(e));
            }
        }

        let block = format!("\n{}", dump_block(&snapshot.json, &self.attributes));
        self.fs.append_file(path, block.as_bytes())?;
        tracing::debug!(
            path = %path.display(),
            appended,
            image_end_offset = self.image_end_offset,
            "inline report updated"
        );

        Ok(first_error)
    }

    fn write_directory(&mut self, dir: &Path, snapshot: &DumpSnapshot) -> Result<Option<Error>> {
        let screenshots_dir = dir.join(SCREENSHOTS_DIR);
        if !self.initialized {
            self.fs.mkdir_all(&screenshots_dir)?;
            self.initialized = true;
        }

        let mut first_error = None;
        let mut appended = 0usize;
        for screenshot in &snapshot.screenshots {
            if self.written.contains(screenshot.id()) {
                continue;
            }
            let decoded = screenshot
                .read()
                .and_then(|data| decode_payload(&data));
            let (format, bytes) = match decoded {
                Ok(decoded) => decoded,
                Err(e) => {
                    tracing::warn!(id = screenshot.id(), error = %e, "skipping unreadable screenshot");
                    first_error.get_or_insert(Error::from(e));
                    continue;
                }
            };

            let name = screenshot_file_name(screenshot.id(), format);
            let absolute = screenshots_dir.join(&name);
            self.fs.write_file(&absolute, &bytes)?;
            self.written.insert(screenshot.id().to_string());
            appended += 1;

            if !screenshot.is_persisted()
                && let Err(e) =
                    screenshot.mark_persisted_to_path(&relative_screenshot_path(&name), &absolute)
            {
                first_error.get_or_insert(Error::from(e));
            }
        }

        let index = embed_in_template(
            &self.template,
            &dump_block(&snapshot.json, &self.attributes),
        );
        self.fs.write_file(&dir.join(INDEX_FILE), index.as_bytes())?;
        tracing::debug!(dir = %dir.display(), appended, "directory report updated");

        Ok(first_error)
    }
}

/// Report writer for one session and one output location
pub struct ReportGenerator {
    report_path: PathBuf,
    format: OutputFormat,
    fs: Arc<dyn FileSystem>,
    tx: Mutex<Option<Sender<Command>>>,
    destroyed: AtomicBool,
    stats: Arc<Mutex<WriteStats>>,
    auto_print: bool,
    _handle: JoinHandle<()>,
}

impl ReportGenerator {
    /// Single-document report at `path`
    pub fn inline(path: impl Into<PathBuf>, options: ReportOptions) -> Result<Self> {
        Self::spawn(Target::Inline { path: path.into() }, options)
    }

    /// Directory report: `dir/index.html` plus `dir/screenshots/`
    pub fn directory(dir: impl Into<PathBuf>, options: ReportOptions) -> Result<Self> {
        Self::spawn(Target::Directory { dir: dir.into() }, options)
    }

    /// Build the sink a session should report to, following `config`
    pub fn create(
        report_name: &str,
        config: &ReportConfig,
        mut options: ReportOptions,
    ) -> Result<Arc<dyn ReportSink>> {
        if let Some(sink) = options.sink.take() {
            return Ok(sink);
        }
        if !config.generate_report {
            tracing::debug!("report generation disabled");
            return Ok(Arc::new(NullReportGenerator));
        }

        let fs: Arc<dyn FileSystem> = match options.file_system.take() {
            Some(fs) => fs,
            None => Arc::new(StdFileSystem),
        };
        if !fs.is_available() {
            tracing::warn!("filesystem unavailable, report generation disabled");
            return Ok(Arc::new(NullReportGenerator));
        }
        options.file_system = Some(fs);
        if options.template.is_none() {
            options.template = Some(config.template()?);
        }

        let report_dir = config.report_dir();
        let generator = match config.output_format {
            OutputFormat::SingleHtml => {
                Self::inline(report_dir.join(format!("{report_name}.html")), options)?
            }
            OutputFormat::HtmlAndExternalAssets => {
                Self::directory(report_dir.join(report_name), options)?
            }
        };
        Ok(Arc::new(generator.with_auto_print(config.auto_print)))
    }

    fn spawn(target: Target, options: ReportOptions) -> Result<Self> {
        let fs: Arc<dyn FileSystem> = match options.file_system {
            Some(fs) => fs,
            None => Arc::new(StdFileSystem),
        };
        let report_path = target.report_path();
        let format = target.format();
        let stats = Arc::new(Mutex::new(WriteStats::default()));

        let writer = Writer {
            fs: Arc::clone(&fs),
            target,
            template: options
                .template
                .unwrap_or_else(|| DEFAULT_TEMPLATE.to_string()),
            attributes: options.attributes,
            written: HashSet::new(),
            image_end_offset: 0,
            initialized: false,
            stats: Arc::clone(&stats),
            pending_error: None,
        };

        let (tx, rx) = channel();
        let handle = std::thread::Builder::new()
            .name("tasktrace-report-writer".to_string())
            .spawn(move || writer.run(rx))?;

        Ok(Self {
            report_path,
            format,
            fs,
            tx: Mutex::new(Some(tx)),
            destroyed: AtomicBool::new(false),
            stats,
            auto_print: false,
            _handle: handle,
        })
    }

    /// Log the report location at info level on finalize
    pub fn with_auto_print(mut self, auto_print: bool) -> Self {
        self.auto_print = auto_print;
        self
    }

    pub fn format(&self) -> OutputFormat {
        self.format
    }

    /// Counters as of the last completed write
    pub fn stats(&self) -> WriteStats {
        *lock_stats(&self.stats)
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::Acquire)
    }

    fn send(&self, command: Command) -> Result<()> {
        let tx = self.tx.lock().unwrap_or_else(PoisonError::into_inner);
        match tx.as_ref() {
            Some(tx) => tx.send(command).map_err(|_| Error::QueueClosed),
            None => Err(Error::QueueClosed),
        }
    }

    fn close_queue(&self) {
        self.tx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }

    fn report_exists(&self) -> bool {
        matches!(self.fs.stat(&self.report_path), Ok(Some(_)))
    }

    fn announce(&self) {
        if !self.auto_print {
            return;
        }
        tracing::info!(path = %self.report_path.display(), "report generated");
        if self.format == OutputFormat::HtmlAndExternalAssets {
            tracing::info!(
                "directory reports load screenshots from separate files; serve the folder over HTTP to view it"
            );
        }
    }
}

#[async_trait]
impl ReportSink for ReportGenerator {
    fn on_dump_update(&self, dump: &GroupedActionDump) {
        if self.is_destroyed() {
            tracing::debug!(path = %self.report_path.display(), "update after finalize ignored");
            return;
        }
        let command = match DumpSnapshot::capture(dump) {
            Ok(snapshot) => Command::Write(snapshot),
            Err(e) => Command::Fail(e.into()),
        };
        if self.send(command).is_err() {
            tracing::error!(path = %self.report_path.display(), "report writer is gone, update dropped");
        }
    }

    async fn flush(&self) -> Result<()> {
        if self.is_destroyed() {
            return Ok(());
        }
        let (reply, done) = oneshot::channel();
        self.send(Command::Flush(reply))?;
        done.await.map_err(|_| Error::QueueClosed)?
    }

    async fn finalize(&self, dump: &GroupedActionDump) -> Option<PathBuf> {
        if self.is_destroyed() {
            return self.report_exists().then(|| self.report_path.clone());
        }

        self.on_dump_update(dump);
        let flushed = self.flush().await;
        self.destroyed.store(true, Ordering::Release);
        self.close_queue();

        // Earlier or per-screenshot failures do not void a complete final write
        let final_write_ok = match flushed {
            Ok(()) => true,
            Err(Error::QueueClosed) => false,
            Err(e) => {
                tracing::warn!(path = %self.report_path.display(), error = %e, "report finalized with earlier write errors");
                true
            }
        };
        if final_write_ok && self.stats().document_complete && self.report_exists() {
            self.announce();
            return Some(self.report_path.clone());
        }
        tracing::error!(path = %self.report_path.display(), "report finalize failed");
        None
    }

    fn report_path(&self) -> Option<PathBuf> {
        Some(self.report_path.clone())
    }
}
