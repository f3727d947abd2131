use crate::Result;
use async_trait::async_trait;
use std::path::PathBuf;
use tasktrace_dump::GroupedActionDump;

/// Destination for the evolving dump of one session.
///
/// `on_dump_update` is fire-and-forget; writes are applied in call order and
/// their failures surface on the next `flush`.
#[async_trait]
pub trait ReportSink: Send + Sync {
    /// Queue a write of the dump's current state
    fn on_dump_update(&self, dump: &GroupedActionDump);

    /// Wait for every queued write; the first failure since the last flush is returned
    async fn flush(&self) -> Result<()>;

    /// Write the final state, flush and close. `None` when nothing usable was written.
    async fn finalize(&self, dump: &GroupedActionDump) -> Option<PathBuf>;

    fn report_path(&self) -> Option<PathBuf>;
}

/// Sink for hosts where persistence is disabled or unavailable
#[derive(Debug, Default, Clone, Copy)]
pub struct NullReportGenerator;

#[async_trait]
impl ReportSink for NullReportGenerator {
    fn on_dump_update(&self, _dump: &GroupedActionDump) {}

    async fn flush(&self) -> Result<()> {
        Ok(())
    }

    async fn finalize(&self, _dump: &GroupedActionDump) -> Option<PathBuf> {
        None
    }

    fn report_path(&self) -> Option<PathBuf> {
        None
    }
}
