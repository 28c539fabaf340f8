//! Per-module JSON configuration files.
//!
//! Each module keeps its admin-settable globals in `data_dir/config/<name>.json`.
//! The file is read once at startup and rewritten wholesale on every change.

use serde::Serialize;
use serde::de::DeserializeOwned;
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use tracing::{info, warn};

#[derive(Debug)]
pub enum SettingsError {
    Io { path: PathBuf, source: std::io::Error },
    Json { path: PathBuf, source: serde_json::Error },
}

impl fmt::Display for SettingsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io { path, source } => write!(f, "settings file '{}': {}", path.display(), source),
            Self::Json { path, source } => {
                write!(f, "settings file '{}' is not valid JSON: {}", path.display(), source)
            }
        }
    }
}

impl std::error::Error for SettingsError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io { source, .. } => Some(source),
            Self::Json { source, .. } => Some(source),
        }
    }
}

/// A typed JSON file cached in memory.
pub struct JsonStore<T> {
    path: PathBuf,
    value: RwLock<T>,
}

impl<T> JsonStore<T>
where
    T: Serialize + DeserializeOwned + Default + Clone,
{
    /// Read the file, falling back to defaults if it is missing or broken.
    pub fn load_or_default(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let value = match read_json(&path) {
            Ok(Some(v)) => v,
            Ok(None) => T::default(),
            Err(e) => {
                warn!("{e}, using defaults");
                T::default()
            }
        };
        Self { path, value: RwLock::new(value) }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Snapshot of the current value.
    pub fn get(&self) -> T {
        self.value.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Apply `f` and write the whole file back.
    pub fn update<R>(&self, f: impl FnOnce(&mut T) -> R) -> Result<R, SettingsError> {
        let mut guard = self.value.write().unwrap_or_else(|e| e.into_inner());
        let mut next = guard.clone();
        let result = f(&mut next);
        write_json(&self.path, &next)?;
        *guard = next;
        Ok(result)
    }
}

pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, SettingsError> {
    let content = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(SettingsError::Io { path: path.to_path_buf(), source: e }),
    };
    serde_json::from_str(&content)
        .map(Some)
        .map_err(|e| SettingsError::Json { path: path.to_path_buf(), source: e })
}

pub fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), SettingsError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| SettingsError::Io { path: parent.to_path_buf(), source: e })?;
    }
    let content = serde_json::to_string_pretty(value)
        .map_err(|e| SettingsError::Json { path: path.to_path_buf(), source: e })?;
    std::fs::write(path, content).map_err(|e| SettingsError::Io { path: path.to_path_buf(), source: e })
}

/// Enabled/disabled flag per built-in module. Missing entries mean enabled.
pub struct ModuleSwitches {
    store: JsonStore<BTreeMap<String, bool>>,
}

impl ModuleSwitches {
    pub fn load(path: impl Into<PathBuf>) -> Self {
        Self { store: JsonStore::load_or_default(path) }
    }

    pub fn is_enabled(&self, module: &str) -> bool {
        self.store.get().get(module).copied().unwrap_or(true)
    }

    pub fn set(&self, module: &str, enabled: bool) -> Result<(), SettingsError> {
        self.store.update(|map| {
            map.insert(module.to_string(), enabled);
        })?;
        info!("🔧 Module {} {}", module, if enabled { "enabled" } else { "disabled" });
        Ok(())
    }

    /// Flip the flag and return the new state.
    pub fn toggle(&self, module: &str) -> Result<bool, SettingsError> {
        let next = !self.is_enabled(module);
        self.set(module, next)?;
        Ok(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Serialize, Deserialize, Default, Clone, Debug, PartialEq)]
    struct Sample {
        api_key: String,
        #[serde(default)]
        limit: u32,
    }

    #[test]
    fn test_missing_file_gives_default() {
        let dir = tempfile::tempdir().unwrap();
        let store: JsonStore<Sample> = JsonStore::load_or_default(dir.path().join("none.json"));
        assert_eq!(store.get(), Sample::default());
    }

    #[test]
    fn test_update_is_visible_after_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config").join("weather.json");
        let store: JsonStore<Sample> = JsonStore::load_or_default(&path);
        store.update(|s| s.api_key = "abc".into()).unwrap();
        assert_eq!(store.get().api_key, "abc");

        let reloaded: JsonStore<Sample> = JsonStore::load_or_default(&path);
        assert_eq!(reloaded.get().api_key, "abc");
    }

    #[test]
    fn test_broken_file_falls_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.json");
        std::fs::write(&path, "{ not json").unwrap();
        let store: JsonStore<Sample> = JsonStore::load_or_default(&path);
        assert_eq!(store.get(), Sample::default());
    }

    #[test]
    fn test_switches_default_enabled_and_toggle() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("modules.json");
        let switches = ModuleSwitches::load(&path);
        assert!(switches.is_enabled("weather"));
        assert!(!switches.toggle("weather").unwrap());
        assert!(!switches.is_enabled("weather"));
        assert!(ModuleSwitches::load(&path).is_enabled("gemini"));
        assert!(!ModuleSwitches::load(&path).is_enabled("weather"));
    }
}
