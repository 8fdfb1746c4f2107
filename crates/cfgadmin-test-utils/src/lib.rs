//! Testing utilities for cfgadmin workspace
//!
//! Shared fixtures: an in-memory service directory, consumers and
//! listeners that record every callback, and a persistence backend that
//! can be told to fail.

#![allow(missing_docs)]

use cfgadmin_core::{
    CallbackError, ConfigurationEvent, ConfigurationListener, ConfigurationManager, ConsumerKind,
    ConsumerRef, ListenerRef, ManagedService, ManagedServiceFactory, MemoryPersistence,
    PersistenceManager, Properties, Provider, ProviderState, ServiceDirectory, ServiceId,
    ServiceRef, StorageError,
};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Once};

/// Install a fmt subscriber honouring `RUST_LOG`, once per process
pub fn init_tracing() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let filter = tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .try_init();
    });
}

/// How a recording callback behaves
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Behavior {
    #[default]
    Accept,
    Reject(String),
    Fail,
    Panic,
}

impl Behavior {
    fn outcome(&self) -> Result<(), CallbackError> {
        match self {
            Self::Accept => Ok(()),
            Self::Reject(property) => Err(CallbackError::rejected(property.clone(), "rejected by test")),
            Self::Fail => Err(CallbackError::Unexpected("test failure".to_string())),
            Self::Panic => panic!("test consumer panicked"),
        }
    }
}

/// Records `ManagedService::updated` calls
#[derive(Debug, Default)]
pub struct RecordingConsumer {
    calls: Mutex<Vec<Option<Properties>>>,
    behavior: Mutex<Behavior>,
}

impl RecordingConsumer {
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    #[must_use]
    pub fn with_behavior(behavior: Behavior) -> Arc<Self> {
        let consumer = Self::default();
        *consumer.behavior.lock() = behavior;
        Arc::new(consumer)
    }

    pub fn set_behavior(&self, behavior: Behavior) {
        *self.behavior.lock() = behavior;
    }

    /// Every call in order; `None` is a removal
    #[must_use]
    pub fn calls(&self) -> Vec<Option<Properties>> {
        self.calls.lock().clone()
    }

    /// Calls that carried properties
    #[must_use]
    pub fn updates(&self) -> Vec<Properties> {
        self.calls.lock().iter().flatten().cloned().collect()
    }

    /// Calls with `None`
    #[must_use]
    pub fn removals(&self) -> usize {
        self.calls.lock().iter().filter(|c| c.is_none()).count()
    }

    pub fn clear(&self) {
        self.calls.lock().clear();
    }
}

impl ManagedService for RecordingConsumer {
    fn updated(&self, properties: Option<&Properties>) -> Result<(), CallbackError> {
        self.calls.lock().push(properties.cloned());
        let behavior = self.behavior.lock().clone();
        behavior.outcome()
    }
}

/// One factory callback
#[derive(Debug, Clone, PartialEq)]
pub enum FactoryCall {
    Updated(String, Properties),
    Deleted(String),
}

/// Records `ManagedServiceFactory` calls
#[derive(Debug, Default)]
pub struct RecordingFactoryConsumer {
    calls: Mutex<Vec<FactoryCall>>,
    behavior: Mutex<Behavior>,
}

impl RecordingFactoryConsumer {
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_behavior(&self, behavior: Behavior) {
        *self.behavior.lock() = behavior;
    }

    #[must_use]
    pub fn calls(&self) -> Vec<FactoryCall> {
        self.calls.lock().clone()
    }

    /// Pids passed to `updated`, in call order
    #[must_use]
    pub fn updated_pids(&self) -> Vec<String> {
        self.calls
            .lock()
            .iter()
            .filter_map(|c| match c {
                FactoryCall::Updated(pid, _) => Some(pid.clone()),
                FactoryCall::Deleted(_) => None,
            })
            .collect()
    }

    /// Pids passed to `deleted`, in call order
    #[must_use]
    pub fn deleted_pids(&self) -> Vec<String> {
        self.calls
            .lock()
            .iter()
            .filter_map(|c| match c {
                FactoryCall::Deleted(pid) => Some(pid.clone()),
                FactoryCall::Updated(..) => None,
            })
            .collect()
    }
}

impl ManagedServiceFactory for RecordingFactoryConsumer {
    fn updated(&self, pid: &str, properties: &Properties) -> Result<(), CallbackError> {
        self.calls
            .lock()
            .push(FactoryCall::Updated(pid.to_string(), properties.clone()));
        let behavior = self.behavior.lock().clone();
        behavior.outcome()
    }

    fn deleted(&self, pid: &str) -> Result<(), CallbackError> {
        self.calls.lock().push(FactoryCall::Deleted(pid.to_string()));
        let behavior = self.behavior.lock().clone();
        behavior.outcome()
    }
}

/// Records configuration events
#[derive(Debug, Default)]
pub struct RecordingListener {
    events: Mutex<Vec<ConfigurationEvent>>,
    behavior: Mutex<Behavior>,
}

impl RecordingListener {
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    #[must_use]
    pub fn with_behavior(behavior: Behavior) -> Arc<Self> {
        let listener = Self::default();
        *listener.behavior.lock() = behavior;
        Arc::new(listener)
    }

    #[must_use]
    pub fn events(&self) -> Vec<ConfigurationEvent> {
        self.events.lock().clone()
    }
}

impl ConfigurationListener for RecordingListener {
    fn configuration_event(&self, event: &ConfigurationEvent) -> Result<(), CallbackError> {
        self.events.lock().push(event.clone());
        let behavior = self.behavior.lock().clone();
        behavior.outcome()
    }
}

/// In-memory service directory
#[derive(Debug, Default)]
pub struct MemoryDirectory {
    next_id: AtomicU64,
    providers: Mutex<HashMap<String, Arc<Provider>>>,
    consumers: Mutex<Vec<ConsumerRef>>,
    listeners: Mutex<Vec<ListenerRef>>,
}

impl MemoryDirectory {
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            next_id: AtomicU64::new(1),
            ..Self::default()
        })
    }

    /// Provider at `location`, installed and active on first use
    pub fn provider(&self, location: &str) -> Arc<Provider> {
        self.providers
            .lock()
            .entry(location.to_string())
            .or_insert_with(|| Provider::new(location, ProviderState::Active))
            .clone()
    }

    pub fn set_state(&self, location: &str, state: ProviderState) {
        self.provider(location).set_state(state);
    }

    /// Mark the provider uninstalled and forget it
    pub fn uninstall(&self, location: &str) {
        if let Some(provider) = self.providers.lock().remove(location) {
            provider.set_state(ProviderState::Uninstalled);
        }
    }

    fn service(&self, location: &str, pids: &[&str], ranking: i32) -> ServiceRef {
        let id: ServiceId = self.next_id.fetch_add(1, Ordering::Relaxed);
        let pids = pids.iter().map(|p| (*p).to_string()).collect();
        ServiceRef::new(id, ranking, pids, self.provider(location))
    }

    /// Register a single-configuration consumer
    pub fn register_consumer(
        &self,
        location: &str,
        pids: &[&str],
        ranking: i32,
        consumer: Arc<dyn ManagedService>,
    ) -> ConsumerRef {
        let consumer = ConsumerRef::single(self.service(location, pids, ranking), consumer);
        self.consumers.lock().push(consumer.clone());
        consumer
    }

    /// Register a factory consumer
    pub fn register_factory(
        &self,
        location: &str,
        factory_pids: &[&str],
        ranking: i32,
        consumer: Arc<dyn ManagedServiceFactory>,
    ) -> ConsumerRef {
        let consumer = ConsumerRef::factory(self.service(location, factory_pids, ranking), consumer);
        self.consumers.lock().push(consumer.clone());
        consumer
    }

    /// Register a listener
    pub fn register_listener(
        &self,
        location: &str,
        listener: Arc<dyn ConfigurationListener>,
    ) -> ListenerRef {
        let listener = ListenerRef {
            service: self.service(location, &[], 0),
            listener,
        };
        self.listeners.lock().push(listener.clone());
        listener
    }

    /// Unregister any service
    pub fn unregister(&self, service: &ServiceRef) {
        service.unregister();
        self.consumers.lock().retain(|c| &c.service != service);
        self.listeners.lock().retain(|l| &l.service != service);
    }
}

impl ServiceDirectory for MemoryDirectory {
    fn find_consumers(&self, identity: &str, kind: ConsumerKind) -> Vec<ConsumerRef> {
        self.consumers
            .lock()
            .iter()
            .filter(|c| c.consumer.kind() == kind && c.service.pids().iter().any(|p| p == identity))
            .cloned()
            .collect()
    }

    fn find_listeners(&self) -> Vec<ListenerRef> {
        self.listeners.lock().clone()
    }

    fn installed_locations(&self) -> Vec<String> {
        self.providers
            .lock()
            .iter()
            .filter(|(_, p)| p.state() != ProviderState::Uninstalled)
            .map(|(location, _)| location.clone())
            .collect()
    }
}

/// In-memory backend whose writes can be made to fail, for every
/// identifier or for selected ones
#[derive(Debug, Default)]
pub struct FailingPersistence {
    inner: MemoryPersistence,
    fail_writes: AtomicBool,
    failing_ids: Mutex<HashSet<String>>,
}

impl FailingPersistence {
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Fail writes to `id` only
    pub fn fail_writes_for(&self, id: &str) {
        self.failing_ids.lock().insert(id.to_string());
    }

    fn check(&self, id: &str) -> Result<(), StorageError> {
        if self.fail_writes.load(Ordering::SeqCst) || self.failing_ids.lock().contains(id) {
            return Err(StorageError::io(id, "injected failure"));
        }
        Ok(())
    }
}

impl PersistenceManager for FailingPersistence {
    fn exists(&self, id: &str) -> bool {
        self.inner.exists(id)
    }

    fn load(&self, id: &str) -> Result<Properties, StorageError> {
        self.inner.load(id)
    }

    fn store(&self, id: &str, properties: &Properties) -> Result<(), StorageError> {
        self.check(id)?;
        self.inner.store(id, properties)
    }

    fn delete(&self, id: &str) -> Result<(), StorageError> {
        self.check(id)?;
        self.inner.delete(id)
    }

    fn list_all(&self) -> Result<Vec<Properties>, StorageError> {
        self.inner.list_all()
    }
}

/// Start a manager over `directory` with one in-memory backend
///
/// # Panics
/// If the manager cannot be started.
#[must_use]
pub fn setup_manager(directory: &Arc<MemoryDirectory>) -> (ConfigurationManager, Arc<MemoryPersistence>) {
    init_tracing();
    let backend = Arc::new(MemoryPersistence::new());
    let manager = ConfigurationManager::builder(directory.clone())
        .persistence(0, backend.clone())
        .start()
        .expect("manager starts");
    (manager, backend)
}

/// Properties built from `(key, value)` pairs of integers
#[must_use]
pub fn int_props(pairs: &[(&str, i64)]) -> Properties {
    pairs.iter().map(|(k, v)| (*k, *v)).collect()
}
