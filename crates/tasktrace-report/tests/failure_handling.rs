use std::io;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tasktrace_dump::{ExecutionDump, GroupedActionDump, PersistLocation, Screenshot, Task};
use tasktrace_report::fs::FileStat;
use tasktrace_report::{
    Error, FileSystem, ReportConfig, ReportGenerator, ReportOptions, ReportSink, StdFileSystem,
};
use tasktrace_testing::TestWorld;
use tasktrace_testing::fixtures::incremental_dump;

/// Std filesystem whose appends can be switched to fail
#[derive(Debug, Default)]
struct FlakyFileSystem {
    inner: StdFileSystem,
    fail_appends: AtomicBool,
    failures_left: AtomicUsize,
}

impl FlakyFileSystem {
    fn set_failing(&self, failing: bool) {
        self.fail_appends.store(failing, Ordering::SeqCst);
    }

    /// Fail only the next `count` appends
    fn fail_next_appends(&self, count: usize) {
        self.failures_left.store(count, Ordering::SeqCst);
    }

    fn should_fail(&self) -> bool {
        self.fail_appends.load(Ordering::SeqCst)
            || self
                .failures_left
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
    }
}

impl FileSystem for FlakyFileSystem {
    fn mkdir_all(&self, path: &Path) -> io::Result<()> {
        self.inner.mkdir_all(path)
    }

    fn write_file(&self, path: &Path, contents: &[u8]) -> io::Result<()> {
        self.inner.write_file(path, contents)
    }

    fn append_file(&self, path: &Path, contents: &[u8]) -> io::Result<()> {
        if self.should_fail() {
            return Err(io::Error::other("disk full"));
        }
        self.inner.append_file(path, contents)
    }

    fn truncate(&self, path: &Path, len: u64) -> io::Result<()> {
        self.inner.truncate(path, len)
    }

    fn read_chunk(&self, path: &Path, offset: u64, buf: &mut [u8]) -> io::Result<usize> {
        self.inner.read_chunk(path, offset, buf)
    }

    fn stat(&self, path: &Path) -> io::Result<Option<FileStat>> {
        self.inner.stat(path)
    }

    fn copy_file(&self, from: &Path, to: &Path) -> io::Result<()> {
        self.inner.copy_file(from, to)
    }

    fn remove_file(&self, path: &Path) -> io::Result<()> {
        self.inner.remove_file(path)
    }
}

/// Host without filesystem access
#[derive(Debug)]
struct SandboxedFileSystem;

impl FileSystem for SandboxedFileSystem {
    fn is_available(&self) -> bool {
        false
    }

    fn mkdir_all(&self, _path: &Path) -> io::Result<()> {
        Err(io::Error::from(io::ErrorKind::PermissionDenied))
    }

    fn write_file(&self, _path: &Path, _contents: &[u8]) -> io::Result<()> {
        Err(io::Error::from(io::ErrorKind::PermissionDenied))
    }

    fn append_file(&self, _path: &Path, _contents: &[u8]) -> io::Result<()> {
        Err(io::Error::from(io::ErrorKind::PermissionDenied))
    }

    fn truncate(&self, _path: &Path, _len: u64) -> io::Result<()> {
        Err(io::Error::from(io::ErrorKind::PermissionDenied))
    }

    fn read_chunk(&self, _path: &Path, _offset: u64, _buf: &mut [u8]) -> io::Result<usize> {
        Err(io::Error::from(io::ErrorKind::PermissionDenied))
    }

    fn stat(&self, _path: &Path) -> io::Result<Option<FileStat>> {
        Err(io::Error::from(io::ErrorKind::PermissionDenied))
    }

    fn copy_file(&self, _from: &Path, _to: &Path) -> io::Result<()> {
        Err(io::Error::from(io::ErrorKind::PermissionDenied))
    }

    fn remove_file(&self, _path: &Path) -> io::Result<()> {
        Err(io::Error::from(io::ErrorKind::PermissionDenied))
    }
}

#[tokio::test]
async fn failed_write_surfaces_on_flush_and_queue_continues() -> anyhow::Result<()> {
    let world = TestWorld::new();
    let path = world.report_path("flaky");
    let fs = Arc::new(FlakyFileSystem::default());
    let generator = ReportGenerator::inline(
        path.clone(),
        ReportOptions::default().with_file_system(fs.clone()),
    )?;
    let dump = incremental_dump("flaky", 2, 64)?;

    fs.set_failing(true);
    generator.on_dump_update(&dump);
    let err = generator.flush().await.unwrap_err();
    assert!(matches!(err, Error::Io(_)));
    assert_eq!(generator.stats().failed_writes, 1);

    // nothing was persisted, so the payloads are still in storage
    for shot in dump.unique_screenshots() {
        assert!(!shot.is_persisted());
    }

    fs.set_failing(false);
    generator.on_dump_update(&dump);
    generator.flush().await?;
    assert_eq!(generator.stats().written_screenshots, 2);

    let restored = GroupedActionDump::from_document_file(&path)?;
    assert_eq!(restored.unique_screenshots().len(), 2);
    Ok(())
}

#[tokio::test]
async fn flush_reports_error_once() -> anyhow::Result<()> {
    let world = TestWorld::new();
    let fs = Arc::new(FlakyFileSystem::default());
    let generator = ReportGenerator::inline(
        world.report_path("once"),
        ReportOptions::default().with_file_system(fs.clone()),
    )?;
    let dump = incremental_dump("once", 1, 64)?;

    fs.set_failing(true);
    generator.on_dump_update(&dump);
    generator.on_dump_update(&dump);
    assert!(generator.flush().await.is_err());
    assert_eq!(generator.stats().failed_writes, 2);

    fs.set_failing(false);
    assert!(generator.flush().await.is_ok());
    Ok(())
}

#[tokio::test]
async fn finalize_failure_returns_no_path() -> anyhow::Result<()> {
    let world = TestWorld::new();
    let fs = Arc::new(FlakyFileSystem::default());
    let generator = ReportGenerator::inline(
        world.report_path("broken"),
        ReportOptions::default().with_file_system(fs.clone()),
    )?;
    let dump = incremental_dump("broken", 1, 64)?;

    fs.set_failing(true);
    assert_eq!(generator.finalize(&dump).await, None);
    Ok(())
}

#[tokio::test]
async fn unrecoverable_screenshot_does_not_void_report() -> anyhow::Result<()> {
    let world = TestWorld::new();
    let generator = ReportGenerator::inline(world.report_path("partial"), ReportOptions::default())?;
    let mut dump = incremental_dump("partial", 1, 64)?;
    let lost = Screenshot::persisted(
        "gone",
        PersistLocation::ExternalFile {
            relative_path: "./screenshots/gone.png".to_string(),
            absolute_path: world.root().join("gone.png"),
        },
    );
    let mut execution = ExecutionDump::new("lost screenshot");
    execution.append_task(Task::new("Action").with_ui_screenshot(lost));
    dump.append_execution(execution);

    generator.on_dump_update(&dump);
    let err = generator.flush().await.unwrap_err();
    assert!(matches!(
        err,
        Error::Dump(tasktrace_dump::Error::CannotRecover { ref id, .. }) if id == "gone"
    ));
    assert!(generator.stats().document_complete);

    let path = generator.finalize(&dump).await.expect("report path");
    let restored = GroupedActionDump::from_document_file(&path)?;
    assert_eq!(restored.executions().len(), 2);
    let shots = restored.unique_screenshots();
    assert_eq!(shots.len(), 1);
    shots[0].read()?;
    Ok(())
}

#[tokio::test]
async fn earlier_failed_update_does_not_void_final_report() -> anyhow::Result<()> {
    let world = TestWorld::new();
    let path = world.report_path("recovered");
    let fs = Arc::new(FlakyFileSystem::default());
    let generator = ReportGenerator::inline(
        path.clone(),
        ReportOptions::default().with_file_system(fs.clone()),
    )?;
    let dump = incremental_dump("recovered", 2, 64)?;

    fs.fail_next_appends(1);
    generator.on_dump_update(&dump);

    assert_eq!(generator.finalize(&dump).await, Some(path.clone()));
    let stats = generator.stats();
    assert_eq!(stats.failed_writes, 1);
    assert!(stats.document_complete);
    let restored = GroupedActionDump::from_document_file(&path)?;
    assert_eq!(restored.unique_screenshots().len(), 2);
    Ok(())
}

#[tokio::test]
async fn unavailable_filesystem_degrades_to_null_sink() -> anyhow::Result<()> {
    let world = TestWorld::new();
    let config = ReportConfig {
        report_dir: Some(world.report_dir().to_path_buf()),
        ..Default::default()
    };
    let sink = ReportGenerator::create(
        "sandboxed",
        &config,
        ReportOptions::default().with_file_system(Arc::new(SandboxedFileSystem)),
    )?;

    let dump = incremental_dump("sandboxed", 1, 64)?;
    sink.on_dump_update(&dump);
    sink.flush().await?;
    assert_eq!(sink.report_path(), None);
    assert_eq!(sink.finalize(&dump).await, None);
    assert!(!world.report_path("sandboxed").exists());
    Ok(())
}
