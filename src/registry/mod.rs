//! Registry Module
//!
//! The single cache instance shared by every rendering worker.
//!
//! A [`CacheRegistry`] is created once by the composition root and handed to
//! whoever needs block storage. The backend is built on first access from
//! the persisted configuration and then lives as long as the registry.
//! Editing and saving the configuration afterwards does not rebuild it; the
//! new settings apply after a restart, and [`CacheRegistry::restart_required`]
//! reports when that is the case.

mod preferences;

pub use preferences::{
    load_configuration, save_configuration, FilePreferenceStore, MemoryPreferenceStore,
    PreferenceStore, CACHE_PREFERENCE_KEY,
};

use std::fmt;
use std::sync::Arc;

use once_cell::sync::OnceCell;
use tracing::{info, warn};

use crate::cache::{
    BlockLocalKey, BlockValue, CacheBackend, CacheBuilder, CacheConfiguration, EvictionListener,
    MemoryInfo,
};
use crate::error::Result;

struct ActiveCache<K, V> {
    backend: Arc<dyn CacheBackend<K, V>>,
    configuration: CacheConfiguration,
}

// == Cache Registry ==
/// Owner of the process-wide block cache.
pub struct CacheRegistry<K: BlockLocalKey, V: BlockValue> {
    preferences: Arc<dyn PreferenceStore>,
    memory: MemoryInfo,
    listener: Option<EvictionListener<K, V>>,
    active: OnceCell<ActiveCache<K, V>>,
}

impl<K: BlockLocalKey, V: BlockValue> CacheRegistry<K, V> {
    // == Constructor ==
    /// Creates a registry; nothing is built until [`CacheRegistry::backend`] is called.
    pub fn new(preferences: Arc<dyn PreferenceStore>, memory: MemoryInfo) -> Self {
        Self {
            preferences,
            memory,
            listener: None,
            active: OnceCell::new(),
        }
    }

    /// Hook passed to the backend when it is built.
    pub fn with_eviction_listener(mut self, listener: EvictionListener<K, V>) -> Self {
        self.listener = Some(listener);
        self
    }

    // == Backend ==
    /// Returns the shared backend, building it on first call.
    ///
    /// A configuration that resolves to an unusable budget is returned as an
    /// error; a later call will try again.
    pub fn backend(&self) -> Result<Arc<dyn CacheBackend<K, V>>> {
        let active = self.active.get_or_try_init(|| {
            let configuration = load_configuration(self.preferences.as_ref());
            let mut builder = CacheBuilder::new(configuration.clone(), self.memory);
            if let Some(listener) = &self.listener {
                builder = builder.with_eviction_listener(Arc::clone(listener));
            }
            let backend = builder.build()?;
            info!(backend = %backend.kind(), budget = backend.budget(), "block cache registry initialized");
            Ok::<_, crate::error::CacheError>(ActiveCache {
                backend,
                configuration,
            })
        })?;
        Ok(Arc::clone(&active.backend))
    }

    /// Configuration the running backend was built from, if built.
    pub fn active_configuration(&self) -> Option<CacheConfiguration> {
        self.active.get().map(|active| active.configuration.clone())
    }

    /// Configuration currently persisted, which may differ from the active one.
    pub fn stored_configuration(&self) -> CacheConfiguration {
        load_configuration(self.preferences.as_ref())
    }

    /// Persists `configuration` without touching the running backend.
    pub fn save_configuration(&self, configuration: &CacheConfiguration) -> Result<()> {
        save_configuration(self.preferences.as_ref(), configuration)?;
        if self.restart_required() {
            warn!("cache configuration saved; restart required for it to take effect");
        }
        Ok(())
    }

    /// True when the persisted configuration differs from the running one.
    pub fn restart_required(&self) -> bool {
        match self.active.get() {
            Some(active) => active.configuration != self.stored_configuration(),
            None => false,
        }
    }

    pub fn memory(&self) -> MemoryInfo {
        self.memory
    }
}

impl<K: BlockLocalKey, V: BlockValue> fmt::Debug for CacheRegistry<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheRegistry")
            .field("memory", &self.memory)
            .field("initialized", &self.active.get().is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{BackendKind, BlockKey, GridCell, SizingRule, SourceId, MIB};
    use crate::error::CacheError;

    fn registry(store: Arc<MemoryPreferenceStore>) -> CacheRegistry<GridCell, Vec<u8>> {
        CacheRegistry::new(store, MemoryInfo::from_total(1024 * MIB))
    }

    #[test]
    fn test_backend_is_built_once() {
        let registry = registry(Arc::new(MemoryPreferenceStore::new()));
        assert!(registry.active_configuration().is_none());

        let first = registry.backend().unwrap();
        let second = registry.backend().unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(
            registry.active_configuration(),
            Some(CacheConfiguration::default())
        );
        assert_eq!(first.budget(), 512 * MIB);
    }

    #[test]
    fn test_uses_persisted_configuration() {
        let store = Arc::new(MemoryPreferenceStore::new());
        let config = CacheConfiguration::new(
            BackendKind::SimpleBounded,
            SizingRule::FixedCacheBudget { mib: 32 },
        );
        save_configuration(&*store, &config).unwrap();

        let backend = registry(store).backend().unwrap();
        assert_eq!(backend.kind(), BackendKind::SimpleBounded);
        assert_eq!(backend.budget(), 32 * MIB);
    }

    #[test]
    fn test_saving_does_not_rebuild() {
        let registry = registry(Arc::new(MemoryPreferenceStore::new()));
        let before = registry.backend().unwrap();
        let source = SourceId::new();
        let key = BlockKey::new(source, 0, 0, GridCell::default());
        before.get_or_load(&key, &mut || Ok(vec![1u8; 4])).unwrap();

        let mut edited = CacheConfiguration::default();
        edited.set_fixed_budget_mb(8);
        edited.set_backend(BackendKind::SimpleBounded);
        registry.save_configuration(&edited).unwrap();

        let after = registry.backend().unwrap();
        assert!(Arc::ptr_eq(&before, &after));
        assert_eq!(after.kind(), BackendKind::WeightedConcurrent);
        assert!(after.get_if_present(&key).is_some());
        assert!(registry.restart_required());
        assert_eq!(registry.stored_configuration(), edited);
    }

    #[test]
    fn test_no_restart_required_before_build() {
        let registry = registry(Arc::new(MemoryPreferenceStore::new()));
        registry.save_configuration(&CacheConfiguration::default()).unwrap();
        assert!(!registry.restart_required());
    }

    #[test]
    fn test_unusable_budget_is_an_error() {
        let store = Arc::new(MemoryPreferenceStore::new());
        let config = CacheConfiguration::new(
            BackendKind::WeightedConcurrent,
            SizingRule::FixedReservedForRest { mib: 4096 },
        );
        save_configuration(&*store, &config).unwrap();

        let registry = registry(store);
        assert!(matches!(
            registry.backend(),
            Err(CacheError::InvalidConfiguration(_))
        ));
        assert!(registry.active_configuration().is_none());
    }

    #[test]
    fn test_saved_zero_budget_fails_the_build() {
        let store = Arc::new(MemoryPreferenceStore::new());
        let mut config = CacheConfiguration::default();
        config.set_backend(BackendKind::SimpleBounded);
        config.set_fixed_budget_mb(0);
        registry(Arc::clone(&store)).save_configuration(&config).unwrap();

        let restarted = registry(store);
        assert_eq!(restarted.stored_configuration(), config);
        assert!(matches!(
            restarted.backend(),
            Err(CacheError::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn test_corrupt_preference_file_is_recovered() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("prefs.json");
        std::fs::write(&path, "{ corrupt").unwrap();
        let registry: CacheRegistry<GridCell, Vec<u8>> = CacheRegistry::new(
            Arc::new(FilePreferenceStore::new(&path)),
            MemoryInfo::from_total(1024 * MIB),
        );

        assert_eq!(registry.backend().unwrap().budget(), 512 * MIB);
        registry
            .save_configuration(&CacheConfiguration::default())
            .unwrap();
        assert!(!registry.restart_required());
        assert!(FilePreferenceStore::new(&path)
            .get(CACHE_PREFERENCE_KEY)
            .unwrap()
            .is_some());
    }

    #[test]
    fn test_malformed_preference_uses_default() {
        let store = Arc::new(MemoryPreferenceStore::new());
        store.set(CACHE_PREFERENCE_KEY, "{\"cache_type\":42}").unwrap();
        let registry = registry(store);
        registry.backend().unwrap();
        assert_eq!(
            registry.active_configuration(),
            Some(CacheConfiguration::default())
        );
    }
}
