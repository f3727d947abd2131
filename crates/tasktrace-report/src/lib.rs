//! Report generation for tasktrace sessions.
//!
//! - [`ReportGenerator`]: incremental, memory-bounded writer for one session
//!   (single document or directory with screenshot files)
//! - [`NullReportGenerator`]: no-op sink when reports are disabled
//! - [`ReportMerger`]: combines finished single-file reports
//! - [`ReportConfig`]: toml-backed settings and the [`ReportGenerator::create`] factory
//!
//! # Example
//!
//! ```no_run
//! use tasktrace_dump::{ExecutionDump, Task};
//! use tasktrace_report::{ReportConfig, ReportGenerator, ReportOptions, ReportSink};
//!
//! # async fn run() -> tasktrace_report::Result<()> {
//! let config = ReportConfig::default();
//! let sink = ReportGenerator::create("checkout", &config, ReportOptions::default())?;
//!
//! let mut dump = config.new_dump("checkout")?;
//! dump.append_execution(ExecutionDump::new("open cart"));
//! for _ in 0..3 {
//!     let shot = dump.create_screenshot("data:image/png;base64,iVBORw0KGgo=")?;
//!     if let Some(execution) = dump.last_execution_mut() {
//!         execution.append_task(Task::new("Action").with_ui_screenshot(shot));
//!     }
//!     sink.on_dump_update(&dump);
//! }
//!
//! let path = sink.finalize(&dump).await;
//! println!("report: {:?}", path);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod fs;
mod generator;
mod merger;
mod sink;

pub use config::{OutputFormat, ReportConfig, report_file_name, resolve_report_dir};
pub use error::{Error, Result};
pub use fs::{FileStat, FileSystem, StdFileSystem};
pub use generator::{ReportGenerator, ReportOptions, WriteStats};
pub use merger::{
    MergeOptions, MergeSource, MergeTarget, MergedReport, ReportMerger, read_merged_document,
};
pub use sink::{NullReportGenerator, ReportSink};
