//! Persisted key/value stores behind the session settings.
//!
//! Backends notify their subscribers after every `set`. Listeners are invoked once the
//! backend's own lock has been released, so a listener may read the backend again.

use crate::error::SettingsError;
use crate::lock;
use crate::model::Value;
use serde_json::Map;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tracing::debug;

pub type ChangeListener = Arc<dyn Fn() + Send + Sync>;

/// A persisted settings store, such as the editor's settings file.
pub trait SettingsBackend: Send + Sync {
    fn get(&self, key: &str) -> Option<Value>;
    fn set(&self, key: &str, value: Value);
    /// Flush pending writes to durable storage.
    fn save(&self) -> Result<(), SettingsError>;
    fn subscribe(&self, listener: ChangeListener);
}

#[derive(Default)]
struct Listeners(Mutex<Vec<ChangeListener>>);

impl Listeners {
    fn push(&self, listener: ChangeListener) {
        lock(&self.0).push(listener);
    }

    fn notify(&self) {
        let listeners: Vec<ChangeListener> = lock(&self.0).clone();
        for listener in listeners {
            listener();
        }
    }
}

/// In-memory backend. Counts saves so callers can observe flushes.
#[derive(Default)]
pub struct MemoryBackend {
    values: Mutex<Map<String, Value>>,
    listeners: Listeners,
    saves: AtomicUsize,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::Relaxed)
    }
}

impl SettingsBackend for MemoryBackend {
    fn get(&self, key: &str) -> Option<Value> {
        lock(&self.values).get(key).cloned()
    }

    fn set(&self, key: &str, value: Value) {
        lock(&self.values).insert(key.to_string(), value);
        self.listeners.notify();
    }

    fn save(&self) -> Result<(), SettingsError> {
        self.saves.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn subscribe(&self, listener: ChangeListener) {
        self.listeners.push(listener);
    }
}

/// Flat JSON object on disk. Writes stay in memory until [`SettingsBackend::save`].
pub struct JsonFileBackend {
    path: PathBuf,
    values: Mutex<Map<String, Value>>,
    listeners: Listeners,
}

impl JsonFileBackend {
    /// Default location: `<config dir>/pgrun/settings.json`.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join("pgrun").join("settings.json"))
    }

    /// Load `path`, or start empty when it does not exist yet.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, SettingsError> {
        let path = path.into();
        let values = if path.exists() {
            let raw = std::fs::read_to_string(&path)?;
            if raw.trim().is_empty() {
                Map::new()
            } else {
                match serde_json::from_str::<Value>(&raw)? {
                    Value::Object(map) => map,
                    _ => return Err(SettingsError::NotAnObject),
                }
            }
        } else {
            Map::new()
        };
        debug!(path = %path.display(), keys = values.len(), "loaded settings file");
        Ok(Self {
            path,
            values: Mutex::new(values),
            listeners: Listeners::default(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl SettingsBackend for JsonFileBackend {
    fn get(&self, key: &str) -> Option<Value> {
        lock(&self.values).get(key).cloned()
    }

    fn set(&self, key: &str, value: Value) {
        lock(&self.values).insert(key.to_string(), value);
        self.listeners.notify();
    }

    fn save(&self) -> Result<(), SettingsError> {
        let body = serde_json::to_string_pretty(&*lock(&self.values))?;
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.path, body)?;
        debug!(path = %self.path.display(), "saved settings file");
        Ok(())
    }

    fn subscribe(&self, listener: ChangeListener) {
        self.listeners.push(listener);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn listeners_fire_on_set() {
        let backend = MemoryBackend::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let hits2 = hits.clone();
        backend.subscribe(Arc::new(move || {
            hits2.fetch_add(1, Ordering::Relaxed);
        }));
        backend.set("default_host", json!("db"));
        backend.set("default_port", json!(5432));
        assert_eq!(hits.load(Ordering::Relaxed), 2);
        assert_eq!(backend.get("default_port"), Some(json!(5432)));
    }

    #[test]
    fn listener_may_read_backend_again() {
        let backend = Arc::new(MemoryBackend::new());
        let seen = Arc::new(Mutex::new(None));
        let (b2, seen2) = (Arc::downgrade(&backend), seen.clone());
        backend.subscribe(Arc::new(move || {
            if let Some(b) = b2.upgrade() {
                *lock(&seen2) = b.get("default_user");
            }
        }));
        backend.set("default_user", json!("alice"));
        assert_eq!(*lock(&seen), Some(json!("alice")));
    }

    #[test]
    fn file_backend_persists_only_on_save() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("settings.json");

        let backend = JsonFileBackend::open(&path).unwrap();
        backend.set("default_database", json!("app"));
        assert!(!path.exists());
        backend.save().unwrap();

        let reopened = JsonFileBackend::open(&path).unwrap();
        assert_eq!(reopened.get("default_database"), Some(json!("app")));
        assert_eq!(reopened.path(), path.as_path());
    }

    #[test]
    fn file_backend_rejects_non_objects() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, "[1, 2]").unwrap();
        assert!(matches!(
            JsonFileBackend::open(&path),
            Err(SettingsError::NotAnObject)
        ));
    }
}
