//! Persisted dynamic bindings
//!
//! Remembers which location a configuration was dynamically bound to, so
//! the binding survives the record being evicted or reloaded. Every change
//! is written through to the primary backend.
//!
//! Pids are exact identifiers while property keys are not, so the record
//! keeps its bindings as a list of `[pid, location]` pairs under
//! [`BINDINGS_KEY`] rather than one property per pid.

use crate::persistence::PersistenceManager;
use crate::properties::{Properties, Value};
use indexmap::IndexMap;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;

/// Key holding the `[pid, location]` pairs in the persisted record
pub const BINDINGS_KEY: &str = "bindings";

/// Persisted form of `(pid, location)` pairs
#[must_use]
pub fn encode_bindings<'a, I>(pairs: I) -> Properties
where
    I: IntoIterator<Item = (&'a str, &'a str)>,
{
    let pairs = pairs
        .into_iter()
        .map(|(pid, location)| Value::List(vec![pid.into(), location.into()]))
        .collect();
    Properties::new().with(BINDINGS_KEY, Value::List(pairs))
}

/// `(pid, location)` pairs of a persisted record; malformed entries are
/// left out
#[must_use]
pub fn decode_bindings(record: &Properties) -> Vec<(String, String)> {
    let Some(Value::List(pairs)) = record.get(BINDINGS_KEY) else {
        return Vec::new();
    };
    pairs
        .iter()
        .filter_map(|pair| match pair {
            Value::List(fields) => match fields.as_slice() {
                [Value::String(pid), Value::String(location)] => Some((pid.clone(), location.clone())),
                _ => None,
            },
            _ => None,
        })
        .collect()
}

/// `pid -> location` record of dynamic bindings
pub struct DynamicBindings {
    id: String,
    backend: Arc<dyn PersistenceManager>,
    bindings: Mutex<IndexMap<String, String>>,
}

impl std::fmt::Debug for DynamicBindings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DynamicBindings")
            .field("id", &self.id)
            .field("bindings", &*self.bindings.lock())
            .finish_non_exhaustive()
    }
}

impl DynamicBindings {
    /// Load the record from `backend`, dropping bindings to locations that
    /// are not installed. A record that cannot be read starts empty.
    #[must_use]
    pub fn load(
        id: impl Into<String>,
        backend: Arc<dyn PersistenceManager>,
        installed_locations: &[String],
    ) -> Self {
        let id = id.into();
        let stored = if backend.exists(&id) {
            backend.load(&id).unwrap_or_else(|e| {
                tracing::error!(id = %id, error = %e, "failed to load dynamic bindings");
                Properties::new()
            })
        } else {
            Properties::new()
        };

        let installed: HashSet<&str> = installed_locations.iter().map(String::as_str).collect();
        let stored_pairs = decode_bindings(&stored);
        let total = stored_pairs.len();
        let bindings: IndexMap<String, String> = stored_pairs
            .into_iter()
            .filter(|(_, location)| installed.contains(location.as_str()))
            .collect();
        let dropped = total - bindings.len();

        let record = Self {
            id,
            backend,
            bindings: Mutex::new(IndexMap::new()),
        };
        {
            let mut guard = record.bindings.lock();
            *guard = bindings;
            if dropped > 0 {
                tracing::debug!(dropped, "dropped dynamic bindings to uninstalled locations");
                record.persist(&guard);
            }
        }
        record
    }

    /// Bound location of `pid`
    #[must_use]
    pub fn get(&self, pid: &str) -> Option<String> {
        self.bindings.lock().get(pid).cloned()
    }

    /// Set or clear the binding of `pid`; persisted when it changes.
    ///
    /// The lock is held through the write so the backend always ends up
    /// with the latest state.
    pub fn put(&self, pid: &str, location: Option<&str>) {
        let mut bindings = self.bindings.lock();
        let changed = match location {
            Some(location) => {
                bindings.insert(pid.to_string(), location.to_string()).as_deref() != Some(location)
            }
            None => bindings.shift_remove(pid).is_some(),
        };
        if changed {
            self.persist(&bindings);
        }
    }

    /// Pids bound to `location`
    #[must_use]
    pub fn pids_bound_to(&self, location: &str) -> Vec<String> {
        self.bindings
            .lock()
            .iter()
            .filter(|(_, l)| l.as_str() == location)
            .map(|(pid, _)| pid.clone())
            .collect()
    }

    /// Number of bindings
    #[must_use]
    pub fn len(&self) -> usize {
        self.bindings.lock().len()
    }

    /// Check if there are no bindings
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bindings.lock().is_empty()
    }

    fn persist(&self, bindings: &IndexMap<String, String>) {
        let record = encode_bindings(bindings.iter().map(|(pid, location)| (pid.as_str(), location.as_str())));
        if let Err(e) = self.backend.store(&self.id, &record) {
            tracing::error!(id = %self.id, error = %e, "failed to store dynamic bindings");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StorageError;
    use crate::persistence::MemoryPersistence;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    fn stored(backend: &MemoryPersistence, id: &str) -> Vec<(String, String)> {
        decode_bindings(&backend.load(id).unwrap())
    }

    #[test]
    fn put_writes_through() {
        let backend = Arc::new(MemoryPersistence::new());
        let bindings = DynamicBindings::load("b", backend.clone(), &[]);
        bindings.put("svc.A", Some("loc"));

        assert_eq!(stored(&backend, "b"), vec![("svc.A".to_string(), "loc".to_string())]);

        bindings.put("svc.A", None);
        assert!(stored(&backend, "b").is_empty());
        assert_eq!(bindings.get("svc.A"), None);
    }

    #[test]
    fn load_drops_uninstalled_locations() {
        let backend = Arc::new(MemoryPersistence::new());
        backend
            .store("b", &encode_bindings([("svc.A", "kept"), ("svc.B", "gone")]))
            .unwrap();

        let bindings = DynamicBindings::load("b", backend.clone(), &["kept".to_string()]);
        assert_eq!(bindings.get("svc.A").as_deref(), Some("kept"));
        assert_eq!(bindings.get("svc.B"), None);
        assert_eq!(bindings.len(), 1);
        assert_eq!(stored(&backend, "b"), vec![("svc.A".to_string(), "kept".to_string())]);
    }

    #[test]
    fn pids_differing_in_case_stay_distinct() {
        let backend = Arc::new(MemoryPersistence::new());
        let installed = vec!["loc.lower".to_string(), "loc.upper".to_string()];
        let bindings = DynamicBindings::load("b", backend.clone(), &installed);
        bindings.put("svc.a", Some("loc.lower"));
        bindings.put("SVC.A", Some("loc.upper"));

        let reloaded = DynamicBindings::load("b", backend, &installed);
        assert_eq!(reloaded.get("svc.a").as_deref(), Some("loc.lower"));
        assert_eq!(reloaded.get("SVC.A").as_deref(), Some("loc.upper"));
        assert_eq!(reloaded.len(), 2);
    }

    #[test]
    fn malformed_entries_are_ignored() {
        let record = Properties::new().with(
            BINDINGS_KEY,
            Value::List(vec![
                Value::List(vec!["svc.A".into(), "loc".into()]),
                Value::List(vec!["svc.B".into()]),
                Value::Integer(3),
            ]),
        );
        assert_eq!(decode_bindings(&record), vec![("svc.A".to_string(), "loc".to_string())]);
        assert!(decode_bindings(&Properties::new()).is_empty());
    }

    #[test]
    fn pids_bound_to_location() {
        let bindings = DynamicBindings::load("b", Arc::new(MemoryPersistence::new()), &[]);
        bindings.put("a", Some("x"));
        bindings.put("b", Some("y"));
        bindings.put("c", Some("x"));
        assert_eq!(bindings.pids_bound_to("x"), vec!["a", "c"]);
    }

    /// Backend whose first store stalls
    #[derive(Default)]
    struct StallingBackend {
        inner: MemoryPersistence,
        stalled: AtomicBool,
    }

    impl PersistenceManager for StallingBackend {
        fn exists(&self, id: &str) -> bool {
            self.inner.exists(id)
        }

        fn load(&self, id: &str) -> Result<Properties, StorageError> {
            self.inner.load(id)
        }

        fn store(&self, id: &str, properties: &Properties) -> Result<(), StorageError> {
            if !self.stalled.swap(true, Ordering::SeqCst) {
                std::thread::sleep(Duration::from_millis(200));
            }
            self.inner.store(id, properties)
        }

        fn delete(&self, id: &str) -> Result<(), StorageError> {
            self.inner.delete(id)
        }

        fn list_all(&self) -> Result<Vec<Properties>, StorageError> {
            self.inner.list_all()
        }
    }

    #[test]
    fn concurrent_puts_persist_latest_state() {
        let backend = Arc::new(StallingBackend::default());
        let bindings = Arc::new(DynamicBindings::load("b", backend.clone(), &[]));

        let slow = {
            let bindings = Arc::clone(&bindings);
            std::thread::spawn(move || bindings.put("svc.A", Some("x")))
        };
        std::thread::sleep(Duration::from_millis(50));
        let fast = {
            let bindings = Arc::clone(&bindings);
            std::thread::spawn(move || bindings.put("svc.B", Some("y")))
        };
        slow.join().unwrap();
        fast.join().unwrap();

        let mut persisted = decode_bindings(&backend.load("b").unwrap());
        persisted.sort();
        assert_eq!(
            persisted,
            vec![
                ("svc.A".to_string(), "x".to_string()),
                ("svc.B".to_string(), "y".to_string()),
            ]
        );
    }
}
