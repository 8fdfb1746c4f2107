//! In-memory configuration and factory cache
//!
//! Each map has its own lock, held only for the map operation itself.
//! Loading happens outside the lock; `put_*` is insert-if-absent so the
//! first of two concurrent loaders wins and the other adopts its record.

use crate::configuration::Configuration;
use crate::factory::Factory;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

/// Cache of live configuration and factory records
#[derive(Debug, Default)]
pub struct ConfigStore {
    configurations: Mutex<HashMap<String, Arc<Configuration>>>,
    factories: Mutex<HashMap<String, Arc<Factory>>>,
}

impl ConfigStore {
    /// Create an empty store
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Cached configuration
    #[must_use]
    pub fn get(&self, pid: &str) -> Option<Arc<Configuration>> {
        self.configurations.lock().get(pid).cloned()
    }

    /// All cached configurations
    #[must_use]
    pub fn get_all(&self) -> Vec<Arc<Configuration>> {
        self.configurations.lock().values().cloned().collect()
    }

    /// Insert if absent; returns the cached record
    pub fn put(&self, config: Arc<Configuration>) -> Arc<Configuration> {
        self.configurations
            .lock()
            .entry(config.pid().to_string())
            .or_insert(config)
            .clone()
    }

    /// Drop a configuration from the cache
    pub fn remove(&self, pid: &str) -> Option<Arc<Configuration>> {
        self.configurations.lock().remove(pid)
    }

    /// Cached factory
    #[must_use]
    pub fn get_factory(&self, factory_pid: &str) -> Option<Arc<Factory>> {
        self.factories.lock().get(factory_pid).cloned()
    }

    /// Insert if absent; returns the cached factory
    pub fn put_factory(&self, factory: Arc<Factory>) -> Arc<Factory> {
        self.factories
            .lock()
            .entry(factory.factory_pid().to_string())
            .or_insert(factory)
            .clone()
    }

    /// All cached factories
    #[must_use]
    pub fn get_all_factories(&self) -> Vec<Arc<Factory>> {
        self.factories.lock().values().cloned().collect()
    }

    /// Drop a factory from the cache; the persisted record is untouched
    pub fn remove_factory(&self, factory_pid: &str) -> Option<Arc<Factory>> {
        self.factories.lock().remove(factory_pid)
    }

    /// Empty both caches
    pub fn clear(&self) {
        self.configurations.lock().clear();
        self.factories.lock().clear();
    }
}
