use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};

use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use tracing::{debug, error, info, warn};

use crate::error::Result;
use crate::write_atomic;

/// How often the watcher compares the settings file's mtime.
const POLL_INTERVAL: Duration = Duration::from_secs(2);

type ChangeCallback = Box<dyn Fn(&Value) + Send + Sync>;

struct Inner {
    /// Persisted values (defaults merged with the file's contents).
    persisted: Map<String, Value>,
    /// Runtime-only overlay (`set(..., persist=false)`); survives reloads,
    /// never written to disk. Privacy mode lives here.
    runtime: Map<String, Value>,
    last_mtime: Option<SystemTime>,
    callbacks: HashMap<String, Vec<ChangeCallback>>,
}

impl Inner {
    fn effective(&self, key: &str) -> Option<&Value> {
        self.runtime.get(key).or_else(|| self.persisted.get(key))
    }
}

/// Runtime settings with hot-reload.
///
/// Reads go through an in-memory cache refreshed by mtime polling (~2 s), so
/// an external edit to the file may lag by one poll interval; a caller's own
/// `set` is visible immediately.
pub struct SettingsStore {
    path: PathBuf,
    inner: Arc<Mutex<Inner>>,
}

impl SettingsStore {
    /// Open the store, merging the file's contents (if any) over `defaults`.
    pub fn open(path: PathBuf, defaults: Map<String, Value>) -> Result<Self> {
        let mut persisted = defaults;
        let mut last_mtime = None;

        if path.exists() {
            match std::fs::read_to_string(&path) {
                Ok(raw) => match serde_json::from_str::<Map<String, Value>>(&raw) {
                    Ok(user) => {
                        for (k, v) in user {
                            persisted.insert(k, v);
                        }
                        last_mtime = std::fs::metadata(&path).and_then(|m| m.modified()).ok();
                        info!(path = %path.display(), "loaded user settings");
                    }
                    Err(e) => error!("settings file is not a JSON object, ignoring: {e}"),
                },
                Err(e) => error!("failed to read settings file: {e}"),
            }
        } else {
            info!("no user settings file, using defaults");
        }

        Ok(Self {
            path,
            inner: Arc::new(Mutex::new(Inner {
                persisted,
                runtime: Map::new(),
                last_mtime,
                callbacks: HashMap::new(),
            })),
        })
    }

    /// Typed get with a default for missing or mistyped values.
    pub fn get<T: DeserializeOwned>(&self, key: &str, default: T) -> T {
        let inner = self.inner.lock().unwrap();
        inner
            .effective(key)
            .cloned()
            .and_then(|v| serde_json::from_value(v).ok())
            .unwrap_or(default)
    }

    pub fn get_value(&self, key: &str) -> Option<Value> {
        self.inner.lock().unwrap().effective(key).cloned()
    }

    /// Set a value. With `persist`, the whole file is rewritten atomically;
    /// otherwise the value lives only in the runtime overlay until restart.
    pub fn set(&self, key: &str, value: Value, persist: bool) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        if persist {
            inner.persisted.insert(key.to_string(), value.clone());
            let bytes = serde_json::to_vec_pretty(&inner.persisted)?;
            if let Some(parent) = self.path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            write_atomic(&self.path, &bytes)?;
            inner.last_mtime = std::fs::metadata(&self.path).and_then(|m| m.modified()).ok();
        } else {
            inner.runtime.insert(key.to_string(), value.clone());
        }
        Self::fire_callbacks(&inner, key, &value);
        Ok(())
    }

    /// Register a callback fired when the named key changes, either via `set`
    /// or via a hot reload that altered it.
    pub fn on_change<F>(&self, key: &str, callback: F)
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        let mut inner = self.inner.lock().unwrap();
        inner
            .callbacks
            .entry(key.to_string())
            .or_default()
            .push(Box::new(callback));
    }

    /// Spawn the mtime poller. The returned handle aborts with the runtime.
    pub fn spawn_watcher(&self) -> tokio::task::JoinHandle<()> {
        let path = self.path.clone();
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(POLL_INTERVAL);
            loop {
                ticker.tick().await;
                let mtime = match std::fs::metadata(&path).and_then(|m| m.modified()) {
                    Ok(t) => t,
                    Err(_) => continue,
                };
                let stale = {
                    let guard = inner.lock().unwrap();
                    guard.last_mtime != Some(mtime)
                };
                if stale {
                    debug!(path = %path.display(), "settings file changed, reloading");
                    Self::reload(&path, &inner, mtime);
                }
            }
        })
    }

    fn reload(path: &PathBuf, inner: &Arc<Mutex<Inner>>, mtime: SystemTime) {
        let raw = match std::fs::read_to_string(path) {
            Ok(r) => r,
            Err(e) => {
                warn!("settings reload failed: {e}");
                return;
            }
        };
        let fresh: Map<String, Value> = match serde_json::from_str(&raw) {
            Ok(m) => m,
            Err(e) => {
                warn!("settings reload skipped, invalid JSON: {e}");
                return;
            }
        };

        let mut guard = inner.lock().unwrap();
        guard.last_mtime = Some(mtime);

        let mut changed: Vec<(String, Value)> = Vec::new();
        for (k, v) in &fresh {
            if guard.persisted.get(k) != Some(v) {
                changed.push((k.clone(), v.clone()));
            }
        }
        for (k, v) in &fresh {
            guard.persisted.insert(k.clone(), v.clone());
        }
        for (k, v) in &changed {
            // Runtime overlay shadows reloaded values by design.
            if !guard.runtime.contains_key(k) {
                Self::fire_callbacks(&guard, k, v);
            }
        }
        if !changed.is_empty() {
            info!(count = changed.len(), "settings hot-reloaded");
        }
    }

    fn fire_callbacks(inner: &Inner, key: &str, value: &Value) {
        if let Some(cbs) = inner.callbacks.get(key) {
            for cb in cbs {
                cb(value);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn defaults() -> Map<String, Value> {
        let mut m = Map::new();
        m.insert("spice_turns".into(), json!(5));
        m.insert("start_in_privacy_mode".into(), json!(false));
        m
    }

    #[test]
    fn get_falls_back_to_default() {
        let dir = tempfile::tempdir().unwrap();
        let store = SettingsStore::open(dir.path().join("settings.json"), defaults()).unwrap();
        assert_eq!(store.get::<i64>("spice_turns", 0), 5);
        assert_eq!(store.get::<i64>("missing", 42), 42);
    }

    #[test]
    fn persisted_set_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        {
            let store = SettingsStore::open(path.clone(), defaults()).unwrap();
            store.set("spice_turns", json!(9), true).unwrap();
        }
        let store = SettingsStore::open(path, defaults()).unwrap();
        assert_eq!(store.get::<i64>("spice_turns", 0), 9);
    }

    #[test]
    fn runtime_set_is_not_written() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        let store = SettingsStore::open(path.clone(), defaults()).unwrap();
        store.set("privacy_mode", json!(true), false).unwrap();
        assert!(store.get::<bool>("privacy_mode", false));
        assert!(!path.exists());
    }

    #[test]
    fn writer_sees_own_write_immediately() {
        let dir = tempfile::tempdir().unwrap();
        let store = SettingsStore::open(dir.path().join("s.json"), defaults()).unwrap();
        store.set("spice_turns", json!(7), true).unwrap();
        assert_eq!(store.get::<i64>("spice_turns", 0), 7);
    }

    #[test]
    fn change_callback_fires_on_set() {
        let dir = tempfile::tempdir().unwrap();
        let store = SettingsStore::open(dir.path().join("s.json"), defaults()).unwrap();
        static FIRED: AtomicUsize = AtomicUsize::new(0);
        store.on_change("privacy_mode", |_| {
            FIRED.fetch_add(1, Ordering::SeqCst);
        });
        store.set("privacy_mode", json!(true), false).unwrap();
        assert_eq!(FIRED.load(Ordering::SeqCst), 1);
    }
}
