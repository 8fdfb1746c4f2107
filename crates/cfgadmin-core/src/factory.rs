//! Factory records
//!
//! A factory groups the member configurations created for one factory pid.
//! Membership is persisted under `<factoryPid>.factory` with the members
//! listed under `factory.pidList`.

use crate::error::StorageError;
use crate::persistence::PersistenceManager;
use crate::properties::{Properties, Value};
use parking_lot::Mutex;
use std::collections::BTreeSet;
use std::sync::Arc;

/// Suffix of the identifier a factory is persisted under
pub const FACTORY_ID_SUFFIX: &str = ".factory";

/// Key holding the member list in a persisted factory
pub const FACTORY_PID_LIST: &str = "factory.pidList";

/// Persistence identifier of a factory
#[inline]
#[must_use]
pub fn factory_id(factory_pid: &str) -> String {
    format!("{factory_pid}{FACTORY_ID_SUFFIX}")
}

/// A factory and its member pids
pub struct Factory {
    factory_pid: String,
    backend: Arc<dyn PersistenceManager>,
    members: Mutex<BTreeSet<String>>,
}

impl std::fmt::Debug for Factory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Factory")
            .field("factory_pid", &self.factory_pid)
            .field("members", &*self.members.lock())
            .finish_non_exhaustive()
    }
}

impl Factory {
    /// Create an empty factory
    #[must_use]
    pub fn new(factory_pid: impl Into<String>, backend: Arc<dyn PersistenceManager>) -> Self {
        Self {
            factory_pid: factory_pid.into(),
            backend,
            members: Mutex::new(BTreeSet::new()),
        }
    }

    /// Load a persisted factory
    ///
    /// # Errors
    /// Storage failures from the backend.
    pub fn load(
        factory_pid: &str,
        backend: Arc<dyn PersistenceManager>,
    ) -> Result<Self, StorageError> {
        let stored = backend.load(&factory_id(factory_pid))?;
        let members = match stored.get(FACTORY_PID_LIST) {
            Some(Value::List(items)) => items
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect(),
            Some(Value::String(single)) => BTreeSet::from([single.clone()]),
            _ => BTreeSet::new(),
        };
        let factory = Self::new(factory_pid, backend);
        *factory.members.lock() = members;
        Ok(factory)
    }

    /// Factory pid
    #[inline]
    #[must_use]
    pub fn factory_pid(&self) -> &str {
        &self.factory_pid
    }

    /// Current members in pid order
    #[must_use]
    pub fn members(&self) -> Vec<String> {
        self.members.lock().iter().cloned().collect()
    }

    /// Check membership
    #[must_use]
    pub fn contains(&self, pid: &str) -> bool {
        self.members.lock().contains(pid)
    }

    /// Add a member, returning whether it was absent
    pub fn add_pid(&self, pid: &str) -> bool {
        self.members.lock().insert(pid.to_string())
    }

    /// Remove a member, returning whether it was present
    pub fn remove_pid(&self, pid: &str) -> bool {
        self.members.lock().remove(pid)
    }

    /// Persist the member list
    ///
    /// # Errors
    /// Storage failures from the backend.
    pub fn store(&self) -> Result<(), StorageError> {
        let members: Vec<Value> = self
            .members
            .lock()
            .iter()
            .map(|pid| Value::String(pid.clone()))
            .collect();
        let dict = Properties::new().with(FACTORY_PID_LIST, Value::List(members));
        self.backend.store(&factory_id(&self.factory_pid), &dict)
    }

    /// Persist the member list, logging instead of failing
    pub fn store_silently(&self) {
        if let Err(e) = self.store() {
            tracing::error!(factory_pid = %self.factory_pid, error = %e, "failed to store factory");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::MemoryPersistence;

    #[test]
    fn store_and_load_members() {
        let backend: Arc<dyn PersistenceManager> = Arc::new(MemoryPersistence::new());
        let factory = Factory::new("svc.F", backend.clone());
        assert!(factory.add_pid("svc.F.b"));
        assert!(factory.add_pid("svc.F.a"));
        assert!(!factory.add_pid("svc.F.a"));
        factory.store().unwrap();

        assert!(backend.exists(&factory_id("svc.F")));
        let loaded = Factory::load("svc.F", backend).unwrap();
        assert_eq!(loaded.members(), vec!["svc.F.a", "svc.F.b"]);
    }

    #[test]
    fn remove_member() {
        let factory = Factory::new("svc.F", Arc::new(MemoryPersistence::new()));
        factory.add_pid("svc.F.a");
        assert!(factory.remove_pid("svc.F.a"));
        assert!(!factory.remove_pid("svc.F.a"));
        assert!(!factory.contains("svc.F.a"));
    }

    #[test]
    fn persisted_identifier() {
        assert_eq!(factory_id("svc.F"), "svc.F.factory");
    }
}
