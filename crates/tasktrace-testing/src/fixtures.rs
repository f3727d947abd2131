//! Fixtures for building dumps with predictable screenshot payloads.

use anyhow::Result;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tasktrace_dump::image::ImageFormat;
use tasktrace_dump::{ExecutionDump, GroupedActionDump, RecorderItem, Screenshot, Task};

/// Base timestamp for deterministic dumps (2024-01-01T00:00:00Z)
pub const BASE_TIME_MS: i64 = 1_704_067_200_000;

/// A data-URI payload of roughly `size` base64 characters.
///
/// The body is rounded up to a multiple of 4 so it always decodes.
pub fn fake_base64(size: usize, format: ImageFormat) -> String {
    let body_len = size.div_ceil(4).max(1) * 4;
    format!("data:{};base64,{}", format.mime(), "A".repeat(body_len))
}

pub fn fake_png(size: usize) -> String {
    fake_base64(size, ImageFormat::Png)
}

/// `BASE_TIME_MS + offset_ms` as a UTC timestamp
pub fn fixed_time(offset_ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(BASE_TIME_MS + offset_ms).unwrap_or_default()
}

/// Task whose ui context and first recorder item share one screenshot
pub fn shared_screenshot_task(screenshot: &Arc<Screenshot>, offset_ms: i64) -> Task {
    Task::new("Action")
        .with_status("finished")
        .with_ui_screenshot(Arc::clone(screenshot))
        .with_recorder_item(RecorderItem::screenshot(
            "screenshot",
            fixed_time(offset_ms),
            Arc::clone(screenshot),
        ))
}

/// One execution with one task per payload size; each task references its
/// screenshot from the ui context.
pub fn dump_with_screenshots(
    group_name: &str,
    sizes: &[usize],
) -> Result<(GroupedActionDump, Vec<Arc<Screenshot>>)> {
    let mut dump = GroupedActionDump::new(group_name).with_sdk_version("0.0.0-test");
    let mut execution = ExecutionDump::new("execution-0").with_log_time(fixed_time(0));
    let mut screenshots = Vec::new();

    for (i, size) in sizes.iter().enumerate() {
        let screenshot = dump.create_screenshot(&fake_png(*size))?;
        execution.append_task(
            Task::new("Action")
                .with_status("finished")
                .with_ui_screenshot(Arc::clone(&screenshot))
                .with_recorder_item(RecorderItem::new("step", fixed_time(i as i64))),
        );
        screenshots.push(screenshot);
    }

    dump.append_execution(execution);
    Ok((dump, screenshots))
}

/// Append a task with a fresh `size`-byte screenshot to the last execution,
/// creating the execution on first use. Mirrors one round of a long-running loop.
pub fn push_screenshot_task(dump: &mut GroupedActionDump, size: usize) -> Result<Arc<Screenshot>> {
    let screenshot = dump.create_screenshot(&fake_png(size))?;
    if dump.executions().is_empty() {
        dump.append_execution(ExecutionDump::new("loop").with_log_time(fixed_time(0)));
    }
    if let Some(execution) = dump.last_execution_mut() {
        let round = execution.tasks.len() as i64;
        execution.append_task(shared_screenshot_task(&screenshot, round));
    }
    Ok(screenshot)
}

/// Dump after `rounds` loop iterations of `size`-byte screenshots
pub fn incremental_dump(group_name: &str, rounds: usize, size: usize) -> Result<GroupedActionDump> {
    let mut dump = GroupedActionDump::new(group_name).with_sdk_version("0.0.0-test");
    for _ in 0..rounds {
        push_screenshot_task(&mut dump, size)?;
    }
    Ok(dump)
}

/// `count` executions, each with one task and one distinct screenshot
pub fn multi_execution_dump(group_name: &str, count: usize) -> Result<GroupedActionDump> {
    let mut dump = GroupedActionDump::new(group_name).with_sdk_version("0.0.0-test");
    for i in 0..count {
        let screenshot = dump.create_screenshot(&fake_png(64 + i * 4))?;
        let mut execution = ExecutionDump::new(format!("{group_name}-execution-{i}"))
            .with_log_time(fixed_time(i as i64 * 1000));
        execution.append_task(shared_screenshot_task(&screenshot, i as i64));
        dump.append_execution(execution);
    }
    Ok(dump)
}
