//! Older dumps embedded screenshot payloads directly in the JSON under
//! `screenshot` / `screenshotBase64` keys. These helpers detect that dialect
//! and lift the payloads into a storage provider.

use crate::Result;
use crate::screenshot::SCREENSHOT_REF_KEY;
use serde_json::{Map, Value};
use tasktrace_storage::StorageProvider;

const INLINE_KEYS: [&str; 2] = ["screenshot", "screenshotBase64"];

// shorter strings are ids or paths rather than payloads
const INLINE_PAYLOAD_MIN_LEN: usize = 100;

fn is_inline_payload(key: &str, value: &Value) -> bool {
    INLINE_KEYS.contains(&key)
        && value
            .as_str()
            .is_some_and(|s| s.starts_with("data:image/") || s.len() > INLINE_PAYLOAD_MIN_LEN)
}

/// Whether any nested value carries an inline screenshot payload
pub fn has_inline_images(value: &Value) -> bool {
    match value {
        Value::Object(map) => map
            .iter()
            .any(|(key, v)| is_inline_payload(key, v) || has_inline_images(v)),
        Value::Array(items) => items.iter().any(has_inline_images),
        _ => false,
    }
}

/// Move every inline payload into `provider`, replacing it with a
/// `{"$screenshot": id}` reference. Returns how many were moved.
pub fn extract_inline_images(value: &mut Value, provider: &dyn StorageProvider) -> Result<usize> {
    match value {
        Value::Object(map) => {
            let mut moved = 0;
            for (key, v) in map.iter_mut() {
                if is_inline_payload(key, v) {
                    let data = v.as_str().unwrap_or_default();
                    let id = provider.store(data)?;
                    let mut reference = Map::new();
                    reference.insert(SCREENSHOT_REF_KEY.to_string(), Value::String(id));
                    *v = Value::Object(reference);
                    moved += 1;
                } else {
                    moved += extract_inline_images(v, provider)?;
                }
            }
            Ok(moved)
        }
        Value::Array(items) => {
            let mut moved = 0;
            for item in items {
                moved += extract_inline_images(item, provider)?;
            }
            Ok(moved)
        }
        _ => Ok(0),
    }
}
