use filetime::FileTime;
use std::path::{Path, PathBuf};
use tasktrace_dump::directory::{INDEX_FILE, SCREENSHOTS_DIR};
use tasktrace_dump::{GroupedActionDump, PersistLocation};
use tasktrace_report::{OutputFormat, ReportGenerator, ReportOptions, ReportSink};
use tasktrace_testing::TestWorld;
use tasktrace_testing::assertions::assert_screenshot_payloads;
use tasktrace_testing::fixtures::{fake_png, incremental_dump, push_screenshot_task};

fn screenshot_files(dir: &Path) -> anyhow::Result<Vec<PathBuf>> {
    let mut files: Vec<PathBuf> = std::fs::read_dir(dir.join(SCREENSHOTS_DIR))?
        .map(|entry| entry.map(|e| e.path()))
        .collect::<Result<_, _>>()?;
    files.sort();
    Ok(files)
}

fn mtime(path: &Path) -> anyhow::Result<FileTime> {
    Ok(FileTime::from_last_modification_time(&std::fs::metadata(path)?))
}

#[tokio::test]
async fn unchanged_dump_leaves_files_untouched() -> anyhow::Result<()> {
    let world = TestWorld::new();
    let dir = world.report_folder("directory");
    let generator = ReportGenerator::directory(dir.clone(), ReportOptions::default())?;
    assert_eq!(generator.format(), OutputFormat::HtmlAndExternalAssets);
    let mut dump = incremental_dump("directory", 2, 64)?;

    generator.on_dump_update(&dump);
    generator.flush().await?;

    let files = screenshot_files(&dir)?;
    assert_eq!(files.len(), 2);
    // backdate so any rewrite is detectable regardless of timestamp resolution
    let past = FileTime::from_unix_time(1_000_000_000, 0);
    for file in &files {
        filetime::set_file_mtime(file, past)?;
    }
    let index_before = std::fs::read(dir.join(INDEX_FILE))?;

    generator.on_dump_update(&dump);
    generator.flush().await?;
    for file in &files {
        assert_eq!(mtime(file)?, past);
    }
    assert_eq!(std::fs::read(dir.join(INDEX_FILE))?, index_before);

    push_screenshot_task(&mut dump, 64)?;
    generator.on_dump_update(&dump);
    generator.flush().await?;
    assert_eq!(screenshot_files(&dir)?.len(), 3);
    for file in &files {
        assert_eq!(mtime(file)?, past);
    }
    assert_eq!(generator.stats().written_screenshots, 3);
    Ok(())
}

#[tokio::test]
async fn directory_report_loads_back() -> anyhow::Result<()> {
    let world = TestWorld::new();
    let dir = world.report_folder("reload");
    let generator = ReportGenerator::directory(dir.clone(), ReportOptions::default())?;
    let dump = incremental_dump("reload", 3, 64)?;

    let index = generator.finalize(&dump).await.expect("report path");
    assert_eq!(index, dir.join(INDEX_FILE));

    for shot in dump.unique_screenshots() {
        assert!(matches!(
            shot.persisted_location(),
            Some(PersistLocation::ExternalFile { .. })
        ));
    }

    // the index keeps bare ids; the reader falls back to ./screenshots/{id}.png
    let restored = GroupedActionDump::from_directory(&dir)?;
    assert_eq!(restored.executions()[0].tasks.len(), 3);
    let expected: Vec<String> = (0..3).map(|_| fake_png(64)).collect();
    assert_screenshot_payloads(&restored, &expected)?;
    Ok(())
}
