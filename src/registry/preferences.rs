//! Preference Store Module
//!
//! Named string preferences that survive restarts. The cache configuration
//! lives in a single entry, [`CACHE_PREFERENCE_KEY`].

use std::collections::BTreeMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::cache::CacheConfiguration;
use crate::error::{CacheError, Result};

/// Name of the preference holding the serialized cache configuration.
pub const CACHE_PREFERENCE_KEY: &str = "block_cache.configuration";

// == Preference Store ==
/// Key/value persistence for user preferences.
pub trait PreferenceStore: Send + Sync {
    fn get(&self, name: &str) -> Result<Option<String>>;
    fn set(&self, name: &str, value: &str) -> Result<()>;
}

// == In-Memory Store ==
/// Preference store that forgets everything on exit.
#[derive(Debug, Default)]
pub struct MemoryPreferenceStore {
    values: Mutex<BTreeMap<String, String>>,
}

impl MemoryPreferenceStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PreferenceStore for MemoryPreferenceStore {
    fn get(&self, name: &str) -> Result<Option<String>> {
        Ok(self.values.lock().get(name).cloned())
    }

    fn set(&self, name: &str, value: &str) -> Result<()> {
        self.values
            .lock()
            .insert(name.to_string(), value.to_string());
        Ok(())
    }
}

// == File Store ==
/// Preference store backed by a JSON object file.
///
/// A missing file reads as an empty store. Writes go to a sibling temp file
/// that is then renamed over the original; a file that no longer parses is
/// replaced rather than merged into.
#[derive(Debug)]
pub struct FilePreferenceStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl FilePreferenceStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_all(&self) -> Result<BTreeMap<String, String>> {
        match fs::read_to_string(&self.path) {
            Ok(contents) => Ok(serde_json::from_str(&contents)?),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(BTreeMap::new()),
            Err(err) => Err(err.into()),
        }
    }
}

impl PreferenceStore for FilePreferenceStore {
    fn get(&self, name: &str) -> Result<Option<String>> {
        Ok(self.read_all()?.remove(name))
    }

    fn set(&self, name: &str, value: &str) -> Result<()> {
        let _guard = self.write_lock.lock();
        let mut values = match self.read_all() {
            Ok(values) => values,
            Err(CacheError::Serialization(err)) => {
                warn!(
                    path = %self.path.display(),
                    error = %err,
                    "preference file is corrupt, replacing it"
                );
                BTreeMap::new()
            }
            Err(err) => return Err(err),
        };
        values.insert(name.to_string(), value.to_string());

        let tmp = self.path.with_extension("tmp");
        fs::write(&tmp, serde_json::to_string_pretty(&values)?)?;
        fs::rename(&tmp, &self.path)?;
        debug!(path = %self.path.display(), name, "preference saved");
        Ok(())
    }
}

// == Configuration Persistence ==
/// Reads the persisted cache configuration.
///
/// An absent entry, an unreadable store, or a malformed document all yield
/// the default configuration.
pub fn load_configuration(store: &dyn PreferenceStore) -> CacheConfiguration {
    match store.get(CACHE_PREFERENCE_KEY) {
        Ok(Some(document)) => CacheConfiguration::from_json(&document),
        Ok(None) => {
            debug!("no persisted cache configuration, using defaults");
            CacheConfiguration::default()
        }
        Err(err) => {
            warn!(error = %err, "could not read preferences, using default cache configuration");
            CacheConfiguration::default()
        }
    }
}

/// Persists `configuration` under [`CACHE_PREFERENCE_KEY`].
pub fn save_configuration(
    store: &dyn PreferenceStore,
    configuration: &CacheConfiguration,
) -> Result<()> {
    store.set(CACHE_PREFERENCE_KEY, &configuration.to_json()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{BackendKind, SizingRule};
    use tempfile::tempdir;

    #[test]
    fn test_memory_store_round_trip() {
        let store = MemoryPreferenceStore::new();
        assert_eq!(store.get("missing").unwrap(), None);
        store.set("a", "1").unwrap();
        assert_eq!(store.get("a").unwrap().as_deref(), Some("1"));
    }

    #[test]
    fn test_file_store_missing_file_is_empty() {
        let dir = tempdir().unwrap();
        let store = FilePreferenceStore::new(dir.path().join("prefs.json"));
        assert_eq!(store.get(CACHE_PREFERENCE_KEY).unwrap(), None);
    }

    #[test]
    fn test_file_store_persists_across_instances() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("prefs.json");
        FilePreferenceStore::new(&path).set("theme", "dark").unwrap();
        FilePreferenceStore::new(&path).set("zoom", "2").unwrap();

        let reopened = FilePreferenceStore::new(&path);
        assert_eq!(reopened.get("theme").unwrap().as_deref(), Some("dark"));
        assert_eq!(reopened.get("zoom").unwrap().as_deref(), Some("2"));
    }

    #[test]
    fn test_corrupt_file_falls_back_to_default_configuration() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("prefs.json");
        fs::write(&path, "{ this is not json").unwrap();
        let store = FilePreferenceStore::new(&path);

        assert!(matches!(
            store.get(CACHE_PREFERENCE_KEY),
            Err(CacheError::Serialization(_))
        ));
        assert_eq!(load_configuration(&store), CacheConfiguration::default());
    }

    #[test]
    fn test_saving_over_corrupt_file_repairs_it() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("prefs.json");
        fs::write(&path, "{ corrupt").unwrap();
        let store = FilePreferenceStore::new(&path);
        let config = CacheConfiguration::new(
            BackendKind::SimpleBounded,
            SizingRule::FixedCacheBudget { mib: 64 },
        );

        save_configuration(&store, &config).unwrap();

        assert_eq!(load_configuration(&store), config);
        let reopened = FilePreferenceStore::new(&path);
        assert!(reopened.get(CACHE_PREFERENCE_KEY).unwrap().is_some());
    }

    #[test]
    fn test_save_then_load_configuration() {
        let store = MemoryPreferenceStore::new();
        let config = CacheConfiguration::new(
            BackendKind::SimpleBounded,
            SizingRule::FixedReservedForRest { mib: 700 },
        );
        save_configuration(&store, &config).unwrap();
        assert_eq!(load_configuration(&store), config);
    }
}
