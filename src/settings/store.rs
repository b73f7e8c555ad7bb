use log::error;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex as StdMutex;

/// Key/value persistence consumed by the coordinator's configuration and
/// the device-id generator. Implementations must tolerate concurrent
/// readers; writes are expected to be rare (user edits a setting).
pub trait SettingsStore: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;
    fn set(&self, key: &str, value: &str);
}

/// Settings backed by a single JSON object file on disk.
///
/// The file is read once at open; every `set` rewrites it. A missing or
/// unreadable file yields an empty store, and write failures are logged
/// rather than surfaced, so a broken disk degrades to in-memory behavior.
pub struct JsonFileStore {
    path: PathBuf,
    values: StdMutex<Map<String, Value>>,
}

impl JsonFileStore {
    pub fn open(path: PathBuf) -> Self {
        let values = match std::fs::read_to_string(&path) {
            Ok(content) => match serde_json::from_str::<Map<String, Value>>(&content) {
                Ok(map) => map,
                Err(e) => {
                    error!("Failed to parse settings file {}: {}", path.display(), e);
                    Map::new()
                }
            },
            Err(_) => Map::new(),
        };

        JsonFileStore {
            path,
            values: StdMutex::new(values),
        }
    }

    fn persist(&self, values: &Map<String, Value>) {
        let content = match serde_json::to_string_pretty(values) {
            Ok(c) => c,
            Err(e) => {
                error!("Failed to serialize settings: {}", e);
                return;
            }
        };
        if let Err(e) = std::fs::write(&self.path, content) {
            error!(
                "Failed to write settings file {}: {}",
                self.path.display(),
                e
            );
        }
    }
}

impl SettingsStore for JsonFileStore {
    fn get(&self, key: &str) -> Option<String> {
        let values = self.values.lock().unwrap();
        values.get(key).and_then(|v| match v {
            Value::String(s) => Some(s.clone()),
            other => Some(other.to_string()),
        })
    }

    fn set(&self, key: &str, value: &str) {
        let mut values = self.values.lock().unwrap();
        values.insert(key.to_string(), Value::String(value.to_string()));
        self.persist(&values);
    }
}

/// In-memory store for tests and ephemeral runs.
#[derive(Default)]
pub struct MemoryStore {
    values: StdMutex<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        MemoryStore::default()
    }
}

impl SettingsStore for MemoryStore {
    fn get(&self, key: &str) -> Option<String> {
        self.values.lock().unwrap().get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) {
        self.values
            .lock()
            .unwrap()
            .insert(key.to_string(), value.to_string());
    }
}
