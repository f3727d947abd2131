//! Report document block codec.
//!
//! A report document is an HTML template followed by embedded script blocks:
//!
//! ```text
//! <script type="tasktrace-image" data-id="ID">
//! {escaped base64 data uri}
//! </script>
//! <script type="tasktrace-dump" key="value">
//! {escaped dump json}
//! </script>
//! ```
//!
//! Readers take every image block and the *last* dump block; earlier dump
//! blocks are stale versions left behind by incremental writers.

use regex::Regex;
use std::collections::BTreeMap;
use std::sync::LazyLock;

/// `type` attribute of image blocks
pub const IMAGE_BLOCK_TYPE: &str = "tasktrace-image";

/// `type` attribute of dump blocks
pub const DUMP_BLOCK_TYPE: &str = "tasktrace-dump";

/// Closing tag shared by every block
pub const BLOCK_CLOSE: &str = "</script>";

pub(crate) const IMAGE_OPEN_PREFIX: &str = "<script type=\"tasktrace-image\"";
pub(crate) const DUMP_OPEN_PREFIX: &str = "<script type=\"tasktrace-dump\"";

const ESCAPE_MARKER: &str = "__tasktrace_lt__";

static SCRIPT_TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)<(/?script)").expect("valid script tag regex"));

/// Minimal template used when the caller supplies none
pub const DEFAULT_TEMPLATE: &str = r#"<!doctype html>
<html>
<head>
<meta charset="utf-8">
<title>tasktrace report</title>
</head>
<body>
<div id="tasktrace-report"></div>
</body>
</html>
"#;

/// Image id to data-URI payload
pub type ImageMap = BTreeMap<String, String>;

/// Options for rendering a dump block
#[derive(Debug, Clone, Default)]
pub struct DocumentOptions {
    /// Extra attributes on the dump block (e.g. test-runner metadata)
    pub attributes: BTreeMap<String, String>,
}

impl DocumentOptions {
    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }
}

/// Parsed dump block: decoded attributes plus unescaped JSON text
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DumpBlock {
    pub attributes: BTreeMap<String, String>,
    pub json: String,
}

/// Neutralize anything that would close or open a script element early.
///
/// Case-insensitive; `unescape_block_content` reverses it exactly.
pub fn escape_block_content(content: &str) -> String {
    SCRIPT_TAG
        .replace_all(content, format!("{ESCAPE_MARKER}$1").as_str())
        .into_owned()
}

pub fn unescape_block_content(content: &str) -> String {
    content.replace(ESCAPE_MARKER, "<")
}

/// Opening tag of an image block; also the needle used by streaming lookups
pub fn image_open_tag(id: &str) -> String {
    format!("{IMAGE_OPEN_PREFIX} data-id=\"{}\">", encode_attribute(id))
}

pub fn image_block(id: &str, data: &str) -> String {
    format!(
        "{}\n{}\n{}",
        image_open_tag(id),
        escape_block_content(data),
        BLOCK_CLOSE
    )
}

/// Render a dump block. Attribute values are percent-encoded and emitted in
/// key order so identical inputs produce identical bytes.
pub fn dump_block(json: &str, attributes: &BTreeMap<String, String>) -> String {
    let mut open = String::from(DUMP_OPEN_PREFIX);
    for (key, value) in attributes {
        if key == "type" {
            continue;
        }
        open.push_str(&format!(" {}=\"{}\"", key, encode_attribute(value)));
    }
    open.push('>');
    format!("{}\n{}\n{}", open, escape_block_content(json), BLOCK_CLOSE)
}

/// Place `content` just before the template's last `</html>`, or after the
/// template when it has none
pub fn embed_in_template(template: &str, content: &str) -> String {
    match template.rfind("</html>") {
        Some(pos) => format!("{}{}\n{}", &template[..pos], content, &template[pos..]),
        None => format!("{}\n{}", template, content),
    }
}

/// Every image block in the document, keyed by id. Later duplicates win.
pub fn parse_image_blocks(document: &str) -> ImageMap {
    let mut images = ImageMap::new();
    let mut cursor = 0;
    while let Some((block, next)) = next_block(document, cursor, IMAGE_OPEN_PREFIX) {
        cursor = next;
        match block.attributes.get("data-id") {
            Some(id) => {
                images.insert(id.clone(), block.content);
            }
            None => tracing::warn!("image block without data-id ignored"),
        }
    }
    images
}

/// Every complete dump block, in document order
pub fn parse_dump_blocks(document: &str) -> Vec<DumpBlock> {
    let mut blocks = Vec::new();
    let mut cursor = 0;
    while let Some((block, next)) = next_block(document, cursor, DUMP_OPEN_PREFIX) {
        cursor = next;
        blocks.push(block.into_dump_block());
    }
    blocks
}

/// The last complete dump block. An unterminated trailing block (a write cut
/// short) is skipped in favor of the one before it.
pub fn last_dump_block(document: &str) -> Option<DumpBlock> {
    let mut end = document.len();
    while let Some(start) = document[..end].rfind(DUMP_OPEN_PREFIX) {
        if let Some((block, _)) = next_block(document, start, DUMP_OPEN_PREFIX) {
            return Some(block.into_dump_block());
        }
        end = start;
    }
    None
}

struct RawBlock {
    attributes: BTreeMap<String, String>,
    content: String,
}

impl RawBlock {
    fn into_dump_block(mut self) -> DumpBlock {
        self.attributes.remove("type");
        DumpBlock {
            attributes: self.attributes,
            json: self.content,
        }
    }
}

/// Parse the first complete block opening at or after `from`.
/// Returns the block and the offset just past its closing tag.
fn next_block(document: &str, from: usize, open_prefix: &str) -> Option<(RawBlock, usize)> {
    let mut cursor = from;
    loop {
        let start = cursor + document[cursor..].find(open_prefix)?;
        let tag_end = start + document[start..].find('>')?;
        let body_start = tag_end + 1;
        let Some(close) = document[body_start..].find(BLOCK_CLOSE) else {
            return None;
        };
        let body_end = body_start + close;

        // the prefix must be followed by whitespace or '>' to be a block of this type
        let after_prefix = &document[start + open_prefix.len()..tag_end];
        if !after_prefix.is_empty() && !after_prefix.starts_with(char::is_whitespace) {
            cursor = body_end + BLOCK_CLOSE.len();
            continue;
        }

        let attributes = parse_attributes(&document[start + "<script".len()..tag_end]);
        let content = block_body(&document[body_start..body_end]);
        return Some((
            RawBlock {
                attributes,
                content: unescape_block_content(content),
            },
            body_end + BLOCK_CLOSE.len(),
        ));
    }
}

fn block_body(raw: &str) -> &str {
    let raw = raw.strip_prefix('\n').unwrap_or(raw);
    raw.strip_suffix('\n').unwrap_or(raw)
}

/// Parse `key="value"` pairs from the inside of an opening tag.
/// Values are percent-decoded; bare keys map to an empty string.
pub(crate) fn parse_attributes(tag: &str) -> BTreeMap<String, String> {
    let mut attributes = BTreeMap::new();
    let mut rest = tag.trim_start();
    while !rest.is_empty() {
        let key_end = rest
            .find(|c: char| c == '=' || c.is_whitespace())
            .unwrap_or(rest.len());
        let key = &rest[..key_end];
        rest = &rest[key_end..];

        if let Some(after_eq) = rest.strip_prefix("=\"") {
            let value_end = after_eq.find('"').unwrap_or(after_eq.len());
            if !key.is_empty() {
                attributes.insert(key.to_string(), decode_attribute(&after_eq[..value_end]));
            }
            rest = after_eq.get(value_end + 1..).unwrap_or("");
        } else {
            if !key.is_empty() {
                attributes.insert(key.to_string(), String::new());
            }
            rest = rest.strip_prefix('=').unwrap_or(rest);
        }
        rest = rest.trim_start();
    }
    attributes
}

fn is_unreserved(byte: u8) -> bool {
    byte.is_ascii_alphanumeric()
        || matches!(
            byte,
            b'-' | b'_' | b'.' | b'!' | b'~' | b'*' | b'\'' | b'(' | b')'
        )
}

/// Percent-encode everything outside the URI component unreserved set
pub fn encode_attribute(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for byte in value.bytes() {
        if is_unreserved(byte) {
            out.push(byte as char);
        } else {
            out.push_str(&format!("%{:02X}", byte));
        }
    }
    out
}

/// Inverse of `encode_attribute`. Malformed escapes are kept literally.
pub fn decode_attribute(value: &str) -> String {
    let bytes = value.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%'
            && i + 2 < bytes.len()
            && let Some(decoded) = hex_pair(bytes[i + 1], bytes[i + 2])
        {
            out.push(decoded);
            i += 3;
            continue;
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

fn hex_pair(high: u8, low: u8) -> Option<u8> {
    let high = (high as char).to_digit(16)?;
    let low = (low as char).to_digit(16)?;
    Some((high * 16 + low) as u8)
}
