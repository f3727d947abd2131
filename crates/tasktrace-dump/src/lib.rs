//! Execution dump model and report document codec for tasktrace.
//!
//! # Overview
//!
//! A [`GroupedActionDump`] holds one session's [`ExecutionDump`]s, each a
//! list of [`Task`]s that may reference [`Screenshot`]s. Screenshot payloads
//! live in a [`tasktrace_storage::StorageProvider`] until a report writer
//! persists them, after which they are recovered lazily from the document or
//! image file they were written to.
//!
//! Two persisted forms are supported:
//! - single-file documents: template + image blocks + trailing dump block
//!   ([`GroupedActionDump::to_document`], [`GroupedActionDump::from_document`])
//! - directories: `index.html` + `screenshots/` files
//!   ([`GroupedActionDump::write_to_directory`], [`GroupedActionDump::from_directory`])
//!
//! # Example
//!
//! ```no_run
//! use tasktrace_dump::{DocumentOptions, ExecutionDump, GroupedActionDump, Task};
//!
//! # fn main() -> tasktrace_dump::Result<()> {
//! let mut dump = GroupedActionDump::new("login flow");
//! let shot = dump.create_screenshot("data:image/png;base64,iVBORw0KGgo=")?;
//!
//! let mut execution = ExecutionDump::new("tap login");
//! execution.append_task(Task::new("Action").with_ui_screenshot(shot));
//! dump.append_execution(execution);
//!
//! let html = dump.to_document(&DocumentOptions::default())?;
//! let restored = GroupedActionDump::from_document(&html)?;
//! assert_eq!(restored.executions().len(), 1);
//! # Ok(())
//! # }
//! ```

pub mod directory;
pub mod document;
pub mod error;
mod execution;
mod grouped;
pub mod image;
pub mod legacy;
pub mod scan;
mod screenshot;
mod task;

pub use document::{DocumentOptions, DumpBlock, ImageMap};
pub use error::{Error, Result};
pub use execution::ExecutionDump;
pub use grouped::{GroupedActionDump, SerializedDump};
pub use screenshot::{PersistLocation, SCREENSHOT_REF_KEY, Screenshot, ScreenshotSlot};
pub use task::{RecorderItem, Task, UiContext};
