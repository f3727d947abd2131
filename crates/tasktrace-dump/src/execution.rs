use crate::screenshot::{Screenshot, ScreenshotSlot};
use crate::task::Task;
use crate::Result;
use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tasktrace_storage::StorageProvider;

/// One high-level action run (e.g. a single natural-language step)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionDump {
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub log_time: DateTime<Utc>,

    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ai_act_context: Option<String>,

    #[serde(default)]
    pub tasks: Vec<Task>,
}

impl ExecutionDump {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            // serialized at millisecond precision
            log_time: Utc::now().trunc_subsecs(3),
            name: name.into(),
            description: None,
            ai_act_context: None,
            tasks: Vec::new(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_log_time(mut self, log_time: DateTime<Utc>) -> Self {
        self.log_time = log_time.trunc_subsecs(3);
        self
    }

    pub fn append_task(&mut self, task: Task) {
        self.tasks.push(task);
    }

    /// Live screenshots in task order: ui context before recorder items
    pub fn collect_screenshots(&self) -> Vec<Arc<Screenshot>> {
        self.tasks
            .iter()
            .flat_map(|task| task.screenshot_slots())
            .filter_map(|slot| slot.screenshot().cloned())
            .collect()
    }

    /// Ids of references not yet bound to a screenshot
    pub fn placeholder_ids(&self) -> Vec<String> {
        self.tasks
            .iter()
            .flat_map(|task| task.screenshot_slots())
            .filter_map(|slot| match slot {
                ScreenshotSlot::Placeholder(id) => Some(id.clone()),
                ScreenshotSlot::Live(_) => None,
            })
            .collect()
    }

    pub fn resolve_screenshots(&mut self, resolve: &mut dyn FnMut(&str) -> Option<Arc<Screenshot>>) {
        for task in &mut self.tasks {
            for slot in task.screenshot_slots_mut() {
                slot.resolve_with(resolve);
            }
        }
    }

    /// JSON form with screenshots as `{"$screenshot": id}` references
    pub fn to_serializable(&self) -> Result<Value> {
        Ok(serde_json::to_value(self)?)
    }

    /// Rebuild from JSON; screenshot references stay unresolved
    pub fn from_serializable(value: Value) -> Result<Self> {
        Ok(serde_json::from_value(value)?)
    }

    /// Rebuild from JSON, binding every reference to `provider`
    pub fn from_serializable_with_provider(
        value: Value,
        provider: &Arc<dyn StorageProvider>,
    ) -> Result<Self> {
        let mut execution = Self::from_serializable(value)?;
        let mut resolver = ProviderResolver::new(provider);
        execution.resolve_screenshots(&mut |id| resolver.resolve(id));
        Ok(execution)
    }
}

/// Binds references to one provider, handing out a single shared handle per id
pub(crate) struct ProviderResolver<'a> {
    provider: &'a Arc<dyn StorageProvider>,
    seen: HashMap<String, Arc<Screenshot>>,
}

impl<'a> ProviderResolver<'a> {
    pub(crate) fn new(provider: &'a Arc<dyn StorageProvider>) -> Self {
        Self {
            provider,
            seen: HashMap::new(),
        }
    }

    pub(crate) fn resolve(&mut self, id: &str) -> Option<Arc<Screenshot>> {
        if let Some(existing) = self.seen.get(id) {
            return Some(Arc::clone(existing));
        }
        let screenshot = Screenshot::restore(id, self.provider);
        self.seen.insert(id.to_string(), Arc::clone(&screenshot));
        Some(screenshot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::RecorderItem;
    use serde_json::json;
    use tasktrace_storage::MemoryStorage;

    #[test]
    fn test_serializable_round_trip() {
        let shot = Screenshot::create("data:image/png;base64,AAAA");
        let mut execution = ExecutionDump::new("Tap login").with_description("tap the login button");
        execution.append_task(Task::new("Action").with_ui_screenshot(Arc::clone(&shot)));

        let value = execution.to_serializable().unwrap();
        assert_eq!(value["name"], "Tap login");
        assert_eq!(value["tasks"][0]["uiContext"]["screenshot"]["$screenshot"], shot.id());
        assert!(value["logTime"].is_i64() || value["logTime"].is_u64());

        let restored = ExecutionDump::from_serializable(value).unwrap();
        assert_eq!(restored.log_time, execution.log_time);
        assert_eq!(restored.placeholder_ids(), vec![shot.id().to_string()]);
        assert!(restored.collect_screenshots().is_empty());
    }

    #[test]
    fn test_provider_binding_shares_handles() {
        let provider: Arc<dyn StorageProvider> = Arc::new(MemoryStorage::new());
        provider.store_with_id("s1", "data:image/png;base64,AAAA").unwrap();

        let value = json!({
            "logTime": 1_700_000_000_000i64,
            "name": "step",
            "tasks": [{
                "type": "Action",
                "uiContext": { "screenshot": { "$screenshot": "s1" } },
                "recorder": [{ "type": "screenshot", "ts": 1, "screenshot": { "$screenshot": "s1" } }]
            }]
        });
        let execution = ExecutionDump::from_serializable_with_provider(value, &provider).unwrap();
        let shots = execution.collect_screenshots();
        assert_eq!(shots.len(), 2);
        assert!(Arc::ptr_eq(&shots[0], &shots[1]));
        assert_eq!(shots[0].read().unwrap(), "data:image/png;base64,AAAA");
    }

    #[test]
    fn test_collect_order() {
        let ts = Utc::now();
        let first = Screenshot::create("data:image/png;base64,AAAA");
        let second = Screenshot::create("data:image/png;base64,BBBB");
        let third = Screenshot::create("data:image/png;base64,CCCC");

        let mut execution = ExecutionDump::new("ordered");
        execution.append_task(
            Task::new("Action")
                .with_ui_screenshot(Arc::clone(&first))
                .with_recorder_item(RecorderItem::screenshot("screenshot", ts, Arc::clone(&second))),
        );
        execution.append_task(Task::new("Action").with_ui_screenshot(Arc::clone(&third)));

        let ids: Vec<String> = execution
            .collect_screenshots()
            .iter()
            .map(|s| s.id().to_string())
            .collect();
        assert_eq!(ids, vec![first.id(), second.id(), third.id()]);
    }
}
