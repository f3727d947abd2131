use std::collections::BTreeMap;
use std::path::PathBuf;
use tasktrace_dump::document::{dump_block, parse_dump_blocks, parse_image_blocks};
use tasktrace_dump::{DocumentOptions, GroupedActionDump};
use tasktrace_report::{
    Error, MergeOptions, MergeTarget, ReportGenerator, ReportMerger, ReportOptions, ReportSink,
    read_merged_document,
};
use tasktrace_testing::TestWorld;
use tasktrace_testing::fixtures::multi_execution_dump;

async fn finished_report(world: &TestWorld, name: &str) -> anyhow::Result<PathBuf> {
    let generator = ReportGenerator::inline(world.report_path(name), ReportOptions::default())?;
    let dump = multi_execution_dump(name, 1)?;
    generator.on_dump_update(&dump);
    generator
        .finalize(&dump)
        .await
        .ok_or_else(|| anyhow::anyhow!("report {name} not written"))
}

fn case(index: usize) -> BTreeMap<String, String> {
    BTreeMap::from([("data-case".to_string(), format!("case {index}"))])
}

#[tokio::test]
async fn merges_three_reports() -> anyhow::Result<()> {
    let world = TestWorld::new();
    let mut merger = ReportMerger::new(world.report_dir());
    let mut sources = Vec::new();
    for i in 0..3 {
        let path = finished_report(&world, &format!("suite-{i}")).await?;
        merger.add_report(path.clone(), case(i));
        sources.push(path);
    }

    let target = world.root().join("merged").join("all.html");
    let options = MergeOptions {
        remove_originals: true,
        ..Default::default()
    };
    let output = merger.merge(MergeTarget::Path(target.clone()), &options)?;
    assert_eq!(output, target);
    assert!(merger.sources().is_empty());

    let doc = world.read(&output)?;
    assert_eq!(parse_dump_blocks(&doc).len(), 3);
    assert_eq!(parse_image_blocks(&doc).len(), 3);
    for source in &sources {
        assert!(!source.exists());
    }

    let reports = read_merged_document(&output)?;
    assert_eq!(reports.len(), 3);
    for (i, report) in reports.iter().enumerate() {
        assert_eq!(report.attributes["data-case"], format!("case {i}"));
        assert_eq!(report.dump.group_name(), format!("suite-{i}"));
        assert_eq!(report.dump.executions().len(), 1);
        for shot in report.dump.unique_screenshots() {
            shot.read()?;
        }
    }
    Ok(())
}

#[tokio::test]
async fn merge_keeps_originals_by_default_and_names_output() -> anyhow::Result<()> {
    let world = TestWorld::new();
    let mut merger = ReportMerger::new(world.report_dir());
    let first = finished_report(&world, "a").await?;
    let second = finished_report(&world, "b").await?;
    merger.add_report(first.clone(), BTreeMap::new());
    merger.add_report(second.clone(), BTreeMap::new());

    let output = merger.merge(MergeTarget::Auto, &MergeOptions::default())?;
    assert!(first.exists());
    assert!(second.exists());
    assert_eq!(output.parent(), Some(world.report_dir()));
    let name = output.file_name().and_then(|n| n.to_str()).unwrap_or_default();
    assert!(name.starts_with("merged-") && name.ends_with(".html"));
    Ok(())
}

#[test]
fn merge_needs_two_reports() {
    let world = TestWorld::new();
    let mut merger = ReportMerger::new(world.report_dir());
    assert!(matches!(
        merger.merge(MergeTarget::Auto, &MergeOptions::default()),
        Err(Error::NotEnoughReports(0))
    ));

    merger.add_report(world.report_path("only"), BTreeMap::new());
    assert!(matches!(
        merger.merge(MergeTarget::Auto, &MergeOptions::default()),
        Err(Error::NotEnoughReports(1))
    ));
}

#[tokio::test]
async fn existing_target_requires_overwrite() -> anyhow::Result<()> {
    let world = TestWorld::new();
    let target = world.write_file("out.html", "existing")?;
    let mut merger = ReportMerger::new(world.report_dir());
    merger.add_report(finished_report(&world, "x").await?, BTreeMap::new());
    merger.add_report(finished_report(&world, "y").await?, BTreeMap::new());

    let err = merger
        .merge(MergeTarget::Path(target.clone()), &MergeOptions::default())
        .unwrap_err();
    assert!(matches!(err, Error::AlreadyExists(ref p) if p == &target));
    assert_eq!(world.read(&target)?, "existing");

    let overwrite = MergeOptions {
        overwrite: true,
        ..Default::default()
    };
    merger.merge(MergeTarget::Path(target.clone()), &overwrite)?;
    assert_eq!(parse_dump_blocks(&world.read(&target)?).len(), 2);
    Ok(())
}

#[tokio::test]
async fn only_the_last_dump_block_of_a_source_is_merged() -> anyhow::Result<()> {
    let world = TestWorld::new();
    let dump = multi_execution_dump("current", 1)?;
    let stale = GroupedActionDump::new("stale").serialize()?;
    let with_history = format!(
        "<html></html>\n{}\n{}",
        dump_block(&stale, &BTreeMap::new()),
        dump.to_document(&DocumentOptions::default())?
    );
    let history_path = world.write_file("report/history.html", &with_history)?;

    let mut merger = ReportMerger::new(world.report_dir());
    merger.add_report(history_path, BTreeMap::new());
    merger.add_report(finished_report(&world, "other").await?, BTreeMap::new());
    let output = merger.merge(MergeTarget::Auto, &MergeOptions::default())?;

    let reports = read_merged_document(&output)?;
    let names: Vec<&str> = reports.iter().map(|r| r.dump.group_name()).collect();
    assert_eq!(names, vec!["current", "other"]);
    Ok(())
}

#[tokio::test]
async fn missing_source_fails_without_leaving_output() -> anyhow::Result<()> {
    let world = TestWorld::new();
    let mut merger = ReportMerger::new(world.report_dir());
    merger.add_report(finished_report(&world, "present").await?, BTreeMap::new());
    merger.add_report(world.report_path("absent"), BTreeMap::new());

    let target = world.root().join("partial.html");
    assert!(merger.merge(MergeTarget::Path(target.clone()), &MergeOptions::default()).is_err());
    assert!(!target.exists());
    assert_eq!(merger.sources().len(), 2);
    Ok(())
}

#[tokio::test]
async fn directory_sources_bring_their_screenshots() -> anyhow::Result<()> {
    let world = TestWorld::new();
    let dir = world.report_folder("dir-source");
    let generator = ReportGenerator::directory(dir.clone(), ReportOptions::default())?;
    let dump = multi_execution_dump("dir-source", 2)?;
    let index = generator.finalize(&dump).await.expect("index path");

    let mut merger = ReportMerger::new(world.report_dir());
    merger.add_report(index, BTreeMap::new());
    merger.add_report(finished_report(&world, "inline").await?, BTreeMap::new());

    let target = world.root().join("combined").join("merged.html");
    merger.merge(MergeTarget::Path(target), &MergeOptions::default())?;

    for shot in dump.unique_screenshots() {
        let copied = world
            .root()
            .join("combined")
            .join("screenshots")
            .join(format!("{}.png", shot.id()));
        assert!(copied.is_file(), "missing {}", copied.display());
    }
    Ok(())
}
