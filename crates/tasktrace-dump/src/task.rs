use crate::screenshot::{Screenshot, ScreenshotSlot};
use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;

/// One unit of work within an execution.
///
/// Only the fields that carry screenshots are typed; everything else the
/// automation layer records is passed through untouched in `extra`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    #[serde(rename = "type", default)]
    pub task_type: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ui_context: Option<UiContext>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub recorder: Vec<RecorderItem>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Page state captured when the task ran
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UiContext {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub screenshot: Option<ScreenshotSlot>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// A timestamped event recorded while the task ran
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecorderItem {
    #[serde(rename = "type")]
    pub item_type: String,

    #[serde(rename = "ts", with = "chrono::serde::ts_milliseconds")]
    pub timestamp: DateTime<Utc>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub screenshot: Option<ScreenshotSlot>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Task {
    pub fn new(task_type: impl Into<String>) -> Self {
        Self {
            task_type: task_type.into(),
            ..Default::default()
        }
    }

    pub fn with_status(mut self, status: impl Into<String>) -> Self {
        self.status = Some(status.into());
        self
    }

    pub fn with_ui_screenshot(mut self, screenshot: Arc<Screenshot>) -> Self {
        self.ui_context
            .get_or_insert_with(UiContext::default)
            .screenshot = Some(screenshot.into());
        self
    }

    pub fn with_recorder_item(mut self, item: RecorderItem) -> Self {
        self.recorder.push(item);
        self
    }

    /// Screenshot slots in document order: ui context first, then recorder
    pub fn screenshot_slots(&self) -> impl Iterator<Item = &ScreenshotSlot> {
        self.ui_context
            .as_ref()
            .and_then(|ctx| ctx.screenshot.as_ref())
            .into_iter()
            .chain(self.recorder.iter().filter_map(|item| item.screenshot.as_ref()))
    }

    pub fn screenshot_slots_mut(&mut self) -> impl Iterator<Item = &mut ScreenshotSlot> {
        self.ui_context
            .as_mut()
            .and_then(|ctx| ctx.screenshot.as_mut())
            .into_iter()
            .chain(
                self.recorder
                    .iter_mut()
                    .filter_map(|item| item.screenshot.as_mut()),
            )
    }
}

impl RecorderItem {
    pub fn new(item_type: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        Self {
            item_type: item_type.into(),
            // serialized as whole milliseconds
            timestamp: timestamp.trunc_subsecs(3),
            screenshot: None,
            extra: Map::new(),
        }
    }

    pub fn screenshot(item_type: impl Into<String>, timestamp: DateTime<Utc>, screenshot: Arc<Screenshot>) -> Self {
        Self {
            screenshot: Some(screenshot.into()),
            ..Self::new(item_type, timestamp)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_unknown_fields_pass_through() {
        let raw = json!({
            "type": "Action",
            "status": "finished",
            "subType": "Tap",
            "param": { "locate": "login button" },
            "uiContext": { "screenshot": { "$screenshot": "s1" }, "size": { "width": 10 } },
            "recorder": [{ "type": "screenshot", "ts": 100, "screenshot": { "$screenshot": "s2" }, "timing": "after" }]
        });
        let task: Task = serde_json::from_value(raw.clone()).unwrap();

        assert_eq!(task.task_type, "Action");
        assert_eq!(task.extra["subType"], "Tap");
        assert_eq!(task.recorder[0].timestamp.timestamp_millis(), 100);
        let ids: Vec<&str> = task.screenshot_slots().map(|s| s.id()).collect();
        assert_eq!(ids, vec!["s1", "s2"]);

        assert_eq!(serde_json::to_value(&task).unwrap(), raw);
    }

    #[test]
    fn test_recorder_timestamp_round_trips_at_millisecond_precision() {
        let ts = DateTime::from_timestamp(1_700_000_000, 123_456_789).unwrap();
        let item = RecorderItem::new("screenshot", ts);
        assert_eq!(item.timestamp.timestamp_subsec_nanos(), 123_000_000);

        let value = serde_json::to_value(&item).unwrap();
        assert_eq!(value["ts"], json!(1_700_000_000_123i64));
        let back: RecorderItem = serde_json::from_value(value).unwrap();
        assert_eq!(back.timestamp, item.timestamp);
    }

    #[test]
    fn test_builder_attaches_screenshots() {
        let ts = DateTime::from_timestamp_millis(1_700_000_000_123).unwrap();
        let task = Task::new("Planning")
            .with_status("running")
            .with_ui_screenshot(Screenshot::create("data:image/png;base64,AAAA"))
            .with_recorder_item(RecorderItem::screenshot(
                "screenshot",
                ts,
                Screenshot::create("data:image/png;base64,BBBB"),
            ));

        assert_eq!(task.screenshot_slots().count(), 2);
        let value = serde_json::to_value(&task).unwrap();
        assert_eq!(value["recorder"][0]["ts"], 1_700_000_000_123i64);
        assert!(value["uiContext"]["screenshot"]["$screenshot"].is_string());
    }
}
