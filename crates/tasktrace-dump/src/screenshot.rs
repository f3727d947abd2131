use crate::image::{ImageFormat, encode_payload, strip_data_uri_prefix};
use crate::scan;
use crate::{Error, Result};
use serde::de::Deserializer;
use serde::ser::{SerializeMap, Serializer};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tasktrace_storage::{StorageProvider, generate_id};

/// JSON key of a screenshot reference: `{"$screenshot": "<id>"}`
pub const SCREENSHOT_REF_KEY: &str = "$screenshot";

/// Where a persisted screenshot's bytes now live
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PersistLocation {
    /// Image block inside a single-file report document
    InlineDocument { document_path: PathBuf },
    /// Standalone image file next to a directory-mode report
    ExternalFile {
        relative_path: String,
        absolute_path: PathBuf,
    },
}

impl fmt::Display for PersistLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PersistLocation::InlineDocument { document_path } => {
                write!(f, "{}", document_path.display())
            }
            PersistLocation::ExternalFile { absolute_path, .. } => {
                write!(f, "{}", absolute_path.display())
            }
        }
    }
}

enum State {
    /// Payload held in memory (no provider bound yet)
    Memory(String),
    /// Payload held by a storage provider under the screenshot id
    Stored(Arc<dyn StorageProvider>),
    /// Payload released; recoverable from the location
    Persisted(PersistLocation),
}

/// One captured screenshot.
///
/// Shared as `Arc<Screenshot>` between the dump model and report writers;
/// the persistence state transitions exactly once, from holding a payload to
/// `Persisted`, and every holder observes it.
pub struct Screenshot {
    id: String,
    state: Mutex<State>,
}

impl fmt::Debug for Screenshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match &*self.lock() {
            State::Memory(_) => "memory".to_string(),
            State::Stored(provider) => format!("stored({})", provider.kind()),
            State::Persisted(location) => format!("persisted({})", location),
        };
        f.debug_struct("Screenshot")
            .field("id", &self.id)
            .field("state", &state)
            .finish()
    }
}

impl Screenshot {
    /// Wrap an in-memory payload under a fresh id
    pub fn create(data: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            id: generate_id(),
            state: Mutex::new(State::Memory(data.into())),
        })
    }

    /// Store the payload in `provider` and return a handle bound to it
    pub fn create_in(data: &str, provider: &Arc<dyn StorageProvider>) -> Result<Arc<Self>> {
        let id = provider.store(data)?;
        Ok(Arc::new(Self {
            id,
            state: Mutex::new(State::Stored(Arc::clone(provider))),
        }))
    }

    /// Handle for a payload the provider already holds under `id`
    pub fn restore(id: impl Into<String>, provider: &Arc<dyn StorageProvider>) -> Arc<Self> {
        Arc::new(Self {
            id: id.into(),
            state: Mutex::new(State::Stored(Arc::clone(provider))),
        })
    }

    /// Handle for a screenshot whose bytes already live at `location`
    pub fn persisted(id: impl Into<String>, location: PersistLocation) -> Arc<Self> {
        Arc::new(Self {
            id: id.into(),
            state: Mutex::new(State::Persisted(location)),
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Whether the payload is still held in memory or by a provider
    pub fn has_payload(&self) -> bool {
        !self.is_persisted()
    }

    pub fn is_persisted(&self) -> bool {
        matches!(&*self.lock(), State::Persisted(_))
    }

    pub fn persisted_location(&self) -> Option<PersistLocation> {
        match &*self.lock() {
            State::Persisted(location) => Some(location.clone()),
            _ => None,
        }
    }

    /// Data-URI payload, recovered from the persisted location when released
    pub fn read(&self) -> Result<String> {
        let location = match &*self.lock() {
            State::Memory(data) => return Ok(data.clone()),
            State::Stored(provider) => return Ok(provider.retrieve(&self.id)?),
            State::Persisted(location) => location.clone(),
        };
        self.recover(&location)
    }

    /// Payload without its `data:image/...;base64,` prefix
    pub fn raw_base64(&self) -> Result<String> {
        let data = self.read()?;
        Ok(strip_data_uri_prefix(&data).to_string())
    }

    fn recover(&self, location: &PersistLocation) -> Result<String> {
        let cannot_recover = |reason: String| Error::CannotRecover {
            id: self.id.clone(),
            location: location.to_string(),
            reason,
        };
        match location {
            PersistLocation::InlineDocument { document_path } => {
                match scan::find_image_block_in_file(document_path, &self.id) {
                    Ok(Some(data)) => Ok(data),
                    Ok(None) => Err(cannot_recover("image block not found".to_string())),
                    Err(e) => Err(cannot_recover(e.to_string())),
                }
            }
            PersistLocation::ExternalFile { absolute_path, .. } => {
                let bytes = std::fs::read(absolute_path).map_err(|e| cannot_recover(e.to_string()))?;
                Ok(encode_payload(ImageFormat::from_path(absolute_path), &bytes))
            }
        }
    }

    /// Record that the payload now lives in the image block of `document_path`
    pub fn mark_persisted_inline(&self, document_path: &Path) -> Result<()> {
        self.transition(PersistLocation::InlineDocument {
            document_path: document_path.to_path_buf(),
        })
    }

    /// Record that the payload now lives in a standalone image file
    pub fn mark_persisted_to_path(&self, relative_path: &str, absolute_path: &Path) -> Result<()> {
        self.transition(PersistLocation::ExternalFile {
            relative_path: relative_path.to_string(),
            absolute_path: absolute_path.to_path_buf(),
        })
    }

    fn transition(&self, location: PersistLocation) -> Result<()> {
        let mut state = self.lock();
        if let State::Persisted(existing) = &*state {
            tracing::error!(
                id = %self.id,
                existing = %existing,
                requested = %location,
                "screenshot already persisted"
            );
            return Err(Error::DuplicatePersistAttempt(self.id.clone()));
        }
        if let State::Stored(provider) = &*state
            && let Err(e) = provider.delete(&self.id)
        {
            tracing::warn!(id = %self.id, error = %e, "failed to release screenshot from storage");
        }
        tracing::debug!(id = %self.id, location = %location, "screenshot persisted");
        *state = State::Persisted(location);
        Ok(())
    }

    /// Move the payload into `target`. Persisted screenshots are left alone.
    pub fn migrate_to(&self, target: &Arc<dyn StorageProvider>) -> Result<()> {
        let mut state = self.lock();
        let data = match &*state {
            State::Persisted(_) => return Ok(()),
            State::Memory(data) => {
                target.store_with_id(&self.id, data)?;
                None
            }
            State::Stored(current) => {
                if std::ptr::addr_eq(Arc::as_ptr(current), Arc::as_ptr(target)) {
                    return Ok(());
                }
                Some((current.retrieve(&self.id)?, Arc::clone(current)))
            }
        };
        if let Some((payload, previous)) = data {
            target.store_with_id(&self.id, &payload)?;
            previous.delete(&self.id)?;
        }
        *state = State::Stored(Arc::clone(target));
        Ok(())
    }

    /// JSON reference form: `{"$screenshot": id}`
    pub fn to_serializable(&self) -> serde_json::Value {
        serde_json::json!({ SCREENSHOT_REF_KEY: self.id })
    }
}

/// A screenshot field inside the dump model.
///
/// Freshly deserialized JSON only carries ids; `Placeholder` keeps them until
/// a loader binds them to a provider or a file.
#[derive(Debug, Clone)]
pub enum ScreenshotSlot {
    Live(Arc<Screenshot>),
    Placeholder(String),
}

impl ScreenshotSlot {
    pub fn id(&self) -> &str {
        match self {
            ScreenshotSlot::Live(screenshot) => screenshot.id(),
            ScreenshotSlot::Placeholder(id) => id,
        }
    }

    pub fn screenshot(&self) -> Option<&Arc<Screenshot>> {
        match self {
            ScreenshotSlot::Live(screenshot) => Some(screenshot),
            ScreenshotSlot::Placeholder(_) => None,
        }
    }

    /// Bind a placeholder through `resolve`; unresolved ids stay placeholders
    pub fn resolve_with(&mut self, resolve: &mut dyn FnMut(&str) -> Option<Arc<Screenshot>>) {
        if let ScreenshotSlot::Placeholder(id) = self
            && let Some(screenshot) = resolve(id)
        {
            *self = ScreenshotSlot::Live(screenshot);
        }
    }
}

impl From<Arc<Screenshot>> for ScreenshotSlot {
    fn from(screenshot: Arc<Screenshot>) -> Self {
        ScreenshotSlot::Live(screenshot)
    }
}

impl Serialize for ScreenshotSlot {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(1))?;
        map.serialize_entry(SCREENSHOT_REF_KEY, self.id())?;
        map.end()
    }
}

impl<'de> Deserialize<'de> for ScreenshotSlot {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        #[derive(Deserialize)]
        struct Reference {
            #[serde(rename = "$screenshot")]
            id: String,
        }
        let reference = Reference::deserialize(deserializer)?;
        Ok(ScreenshotSlot::Placeholder(reference.id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tasktrace_storage::MemoryStorage;

    fn memory() -> Arc<dyn StorageProvider> {
        Arc::new(MemoryStorage::new())
    }

    #[test]
    fn test_create_in_provider() {
        let provider = memory();
        let shot = Screenshot::create_in("data:image/png;base64,AAAA", &provider).unwrap();
        assert!(provider.contains(shot.id()));
        assert!(shot.has_payload());
        assert_eq!(shot.read().unwrap(), "data:image/png;base64,AAAA");
        assert_eq!(shot.raw_base64().unwrap(), "AAAA");
    }

    #[test]
    fn test_persist_releases_provider_entry() {
        let provider = memory();
        let shot = Screenshot::create_in("data:image/png;base64,AAAA", &provider).unwrap();
        shot.mark_persisted_inline(Path::new("/tmp/report.html")).unwrap();

        assert!(shot.is_persisted());
        assert!(!shot.has_payload());
        assert!(!provider.contains(shot.id()));
    }

    #[test]
    fn test_double_persist_is_rejected() {
        let shot = Screenshot::create("data:image/png;base64,AAAA");
        shot.mark_persisted_inline(Path::new("/tmp/a.html")).unwrap();

        let err = shot
            .mark_persisted_to_path("./screenshots/x.png", Path::new("/tmp/x.png"))
            .unwrap_err();
        assert!(matches!(err, Error::DuplicatePersistAttempt(_)));
        assert_eq!(
            shot.persisted_location(),
            Some(PersistLocation::InlineDocument {
                document_path: PathBuf::from("/tmp/a.html")
            })
        );
    }

    #[test]
    fn test_recover_missing_file_is_fatal() {
        let shot = Screenshot::persisted(
            "gone",
            PersistLocation::ExternalFile {
                relative_path: "./screenshots/gone.png".to_string(),
                absolute_path: PathBuf::from("/nonexistent/tasktrace/gone.png"),
            },
        );
        let err = shot.read().unwrap_err();
        assert!(err.is_fatal());
        assert!(err.to_string().contains("gone"));
    }

    #[test]
    fn test_migrate_between_providers() {
        let source = memory();
        let target = memory();
        let shot = Screenshot::create_in("data:image/png;base64,AAAA", &source).unwrap();

        shot.migrate_to(&target).unwrap();
        assert!(!source.contains(shot.id()));
        assert!(target.contains(shot.id()));
        assert_eq!(shot.read().unwrap(), "data:image/png;base64,AAAA");

        // same provider is a no-op
        shot.migrate_to(&target).unwrap();
        assert!(target.contains(shot.id()));
    }

    #[test]
    fn test_slot_serialization() {
        let slot = ScreenshotSlot::Live(Screenshot::create("data:image/png;base64,AAAA"));
        let value = serde_json::to_value(&slot).unwrap();
        assert_eq!(value, serde_json::json!({ "$screenshot": slot.id() }));

        let parsed: ScreenshotSlot = serde_json::from_value(value).unwrap();
        assert!(matches!(parsed, ScreenshotSlot::Placeholder(ref id) if id == slot.id()));
    }
}
