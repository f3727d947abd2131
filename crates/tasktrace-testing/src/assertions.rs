//! Custom assertions for report documents.

use anyhow::{Context, Result};
use tasktrace_dump::document::{self, BLOCK_CLOSE};
use tasktrace_dump::GroupedActionDump;

/// Assert the document holds exactly one dump block and nothing follows it
/// except whitespace.
pub fn assert_single_trailing_dump_block(doc: &str) -> Result<()> {
    let blocks = document::parse_dump_blocks(doc);
    if blocks.len() != 1 {
        anyhow::bail!("Expected exactly 1 dump block, found {}", blocks.len());
    }
    let marker = format!("<script type=\"{}\"", document::DUMP_BLOCK_TYPE);
    let start = doc.rfind(&marker).context("Dump block marker missing")?;
    let tail = &doc[start..];
    if !tail.trim_end().ends_with(BLOCK_CLOSE) {
        anyhow::bail!("Dump block is not the last element of the document");
    }
    if !document::parse_image_blocks(tail).is_empty() {
        anyhow::bail!("Image blocks found after the dump block");
    }
    Ok(())
}

/// Assert the number of distinct image blocks
pub fn assert_image_block_count(doc: &str, expected: usize) -> Result<()> {
    let images = document::parse_image_blocks(doc);
    if images.len() != expected {
        anyhow::bail!("Expected {} image blocks, found {}", expected, images.len());
    }
    let marker = format!("<script type=\"{}\"", document::IMAGE_BLOCK_TYPE);
    let physical = doc.matches(&marker).count();
    if physical != expected {
        anyhow::bail!(
            "Expected {} physical image blocks, found {} (duplicate ids written?)",
            expected,
            physical
        );
    }
    Ok(())
}

/// Assert every unique screenshot in `dump` reads back as `expected`, in order
pub fn assert_screenshot_payloads(dump: &GroupedActionDump, expected: &[String]) -> Result<()> {
    let actual = dump
        .unique_screenshots()
        .iter()
        .map(|s| s.read())
        .collect::<Result<Vec<_>, _>>()
        .context("Failed to read screenshot payload")?;
    if actual.len() != expected.len() {
        anyhow::bail!("Expected {} screenshots, found {}", expected.len(), actual.len());
    }
    for (i, (a, e)) in actual.iter().zip(expected).enumerate() {
        if a != e {
            anyhow::bail!(
                "Screenshot {} payload mismatch ({} bytes vs {} bytes)",
                i,
                a.len(),
                e.len()
            );
        }
    }
    Ok(())
}
