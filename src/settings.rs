//! Key-value settings used to persist reconnection tokens.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use crate::error::Result;

/// Persistent string settings.
///
/// Implementations must be usable from any thread.
pub trait SettingsStore: Send + Sync + 'static {
    fn has(&self, key: &str) -> bool;
    fn get(&self, key: &str) -> Option<String>;
    fn set(&self, key: &str, value: &str);
}

/// Settings key holding the identity token for `connection_identifier`.
pub fn token_key(connection_identifier: &str) -> String {
    format!("{}_PEERWIRE_ID_TOKEN", connection_identifier)
}

/// In-process settings, lost on exit.
#[derive(Debug, Default)]
pub struct MemorySettings {
    values: Mutex<HashMap<String, String>>,
}

impl MemorySettings {
    pub fn new() -> Self {
        Self::default()
    }

    fn values(&self) -> MutexGuard<'_, HashMap<String, String>> {
        lock(&self.values)
    }
}

impl SettingsStore for MemorySettings {
    fn has(&self, key: &str) -> bool {
        self.values().contains_key(key)
    }

    fn get(&self, key: &str) -> Option<String> {
        self.values().get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) {
        self.values().insert(key.to_string(), value.to_string());
    }
}

// A panic while holding the lock cannot leave the map half-written.
fn lock(values: &Mutex<HashMap<String, String>>) -> MutexGuard<'_, HashMap<String, String>> {
    match values.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Settings stored as a flat JSON object in a file.
///
/// Every `set` rewrites the file. Read and write failures are logged; the
/// in-memory values stay authoritative.
#[derive(Debug)]
pub struct JsonFileSettings {
    path: PathBuf,
    values: Mutex<HashMap<String, String>>,
}

impl JsonFileSettings {
    /// Open `path`, loading existing values. A missing file starts empty.
    pub fn open(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref().to_path_buf();
        let values = match Self::load(&path) {
            Ok(values) => values,
            Err(e) => {
                tracing::warn!("Could not load settings from {}: {}", path.display(), e);
                HashMap::new()
            }
        };
        Self {
            path,
            values: Mutex::new(values),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(path: &Path) -> Result<HashMap<String, String>> {
        if !path.exists() {
            return Ok(HashMap::new());
        }
        let text = std::fs::read_to_string(path)?;
        if text.trim().is_empty() {
            return Ok(HashMap::new());
        }
        Ok(serde_json::from_str(&text)?)
    }

    fn save(&self, values: &HashMap<String, String>) -> Result<()> {
        let text = serde_json::to_string_pretty(values)?;
        std::fs::write(&self.path, text)?;
        Ok(())
    }

    fn values(&self) -> MutexGuard<'_, HashMap<String, String>> {
        lock(&self.values)
    }
}

impl SettingsStore for JsonFileSettings {
    fn has(&self, key: &str) -> bool {
        self.values().contains_key(key)
    }

    fn get(&self, key: &str) -> Option<String> {
        self.values().get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) {
        let mut values = self.values();
        values.insert(key.to_string(), value.to_string());
        if let Err(e) = self.save(&values) {
            tracing::warn!("Could not save settings to {}: {}", self.path.display(), e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_key() {
        assert_eq!(token_key("Server"), "Server_PEERWIRE_ID_TOKEN");
    }

    #[test]
    fn test_memory_settings() {
        let settings = MemorySettings::new();
        assert!(!settings.has("a"));
        settings.set("a", "1");
        assert!(settings.has("a"));
        assert_eq!(settings.get("a").as_deref(), Some("1"));
        settings.set("a", "2");
        assert_eq!(settings.get("a").as_deref(), Some("2"));
    }

    #[test]
    fn test_json_file_settings_persist() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");

        let settings = JsonFileSettings::open(&path);
        assert!(!settings.has("token"));
        settings.set("token", "abc");

        let reopened = JsonFileSettings::open(&path);
        assert_eq!(reopened.get("token").as_deref(), Some("abc"));
    }

    #[test]
    fn test_json_file_settings_corrupt_file_starts_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, "{not json").unwrap();

        let settings = JsonFileSettings::open(&path);
        assert!(!settings.has("token"));
        settings.set("token", "x");
        assert_eq!(JsonFileSettings::open(&path).get("token").as_deref(), Some("x"));
    }
}
