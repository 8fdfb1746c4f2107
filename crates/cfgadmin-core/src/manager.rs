//! Configuration manager
//!
//! The administrative surface and consumer lifecycle hooks. Every mutation
//! is persisted first, then applied to the cached record, then turned into
//! a work item on the update queue. Listener notifications go through the
//! separate event queue.
//!
//! ```rust
//! use cfgadmin_core::{ConfigurationManager, ConsumerKind, ConsumerRef, ListenerRef,
//!     MemoryPersistence, Properties, ServiceDirectory};
//! use std::sync::Arc;
//!
//! struct NoConsumers;
//!
//! impl ServiceDirectory for NoConsumers {
//!     fn find_consumers(&self, _: &str, _: ConsumerKind) -> Vec<ConsumerRef> { Vec::new() }
//!     fn find_listeners(&self) -> Vec<ListenerRef> { Vec::new() }
//!     fn installed_locations(&self) -> Vec<String> { Vec::new() }
//! }
//!
//! let manager = ConfigurationManager::builder(Arc::new(NoConsumers))
//!     .persistence(0, Arc::new(MemoryPersistence::new()))
//!     .start()
//!     .unwrap();
//!
//! manager.get_or_create("svc.A", None).unwrap();
//! let generation = manager.update("svc.A", Properties::new().with("level", 5)).unwrap();
//! assert_eq!(generation, 1);
//! manager.shutdown();
//! ```

use crate::bindings::DynamicBindings;
use crate::configuration::Configuration;
use crate::delivery::{DeliveryStats, StatsCounters};
use crate::directory::{ConsumerKind, ConsumerRef, ListenerRef, ServiceDirectory, ServiceRef};
use crate::error::{AdminError, Result, StorageError};
use crate::events::{ConfigurationEvent, EventKind};
use crate::factory::{factory_id, Factory};
use crate::persistence::{MemoryPersistence, PersistenceChain, PersistenceManager};
use crate::pid::create_pid;
use crate::plugin::PluginPipeline;
use crate::policy::{AccessControl, BindingPolicy};
use crate::properties::{Properties, SERVICE_PID};
use crate::queue::WorkQueue;
use crate::settings::AdminConfig;
use crate::store::ConfigStore;
use crate::tasks::{AttachedConfig, EventTask, UpdateTask};
use cfgadmin_filter::Filter;
use parking_lot::RwLock;
use std::collections::HashSet;
use std::sync::Arc;

/// Shared state of a running manager; workers hold it weakly
pub(crate) struct Engine {
    pub(crate) store: ConfigStore,
    pub(crate) persistence: PersistenceChain,
    pub(crate) directory: Arc<dyn ServiceDirectory>,
    pub(crate) plugins: PluginPipeline,
    pub(crate) policy: BindingPolicy,
    pub(crate) bindings: DynamicBindings,
    pub(crate) listeners: RwLock<Vec<ListenerRef>>,
    pub(crate) stats: StatsCounters,
    pub(crate) update_queue: WorkQueue<UpdateTask>,
    pub(crate) event_queue: WorkQueue<EventTask>,
}

impl Engine {
    /// Cached factory, loaded or created on first reference
    pub(crate) fn factory(&self, factory_pid: &str) -> std::result::Result<Arc<Factory>, StorageError> {
        if let Some(factory) = self.store.get_factory(factory_pid) {
            return Ok(factory);
        }
        let factory = match self.persistence.first_having(&factory_id(factory_pid)) {
            Some(backend) => Factory::load(factory_pid, Arc::clone(backend))?,
            None => Factory::new(factory_pid, Arc::clone(self.persistence.primary()?)),
        };
        Ok(self.store.put_factory(Arc::new(factory)))
    }

    /// Cached configuration, loaded from the first backend holding it
    pub(crate) fn configuration(
        &self,
        pid: &str,
    ) -> std::result::Result<Option<Arc<Configuration>>, StorageError> {
        if let Some(config) = self.store.get(pid) {
            return Ok(Some(config));
        }
        let Some(backend) = self.persistence.first_having(pid) else {
            return Ok(None);
        };
        let stored = backend.load(pid)?;
        if !stored.contains_key(SERVICE_PID) {
            return Ok(None);
        }
        let config = Configuration::from_persisted(pid, stored, Arc::clone(backend))?;
        config.restore_dynamic_location(self.bindings.get(pid));
        Ok(Some(self.store.put(Arc::new(config))))
    }

    /// Queue an event for the listeners tracked right now
    pub(crate) fn fire_event(&self, kind: EventKind, pid: &str, factory_pid: Option<&str>) {
        let listeners = self.listeners.read().clone();
        if listeners.is_empty() {
            tracing::debug!(pid, %kind, "no configuration listeners to send event to");
            return;
        }
        let event = ConfigurationEvent::new(kind, pid, factory_pid.map(str::to_string));
        self.event_queue.schedule(EventTask { event, listeners });
    }

    fn schedule(&self, task: UpdateTask) {
        tracing::debug!(task = %task, "scheduling update task");
        self.update_queue.schedule(task);
    }
}

/// Assembles a [`ConfigurationManager`]
pub struct ConfigurationManagerBuilder {
    directory: Arc<dyn ServiceDirectory>,
    persistence: PersistenceChain,
    access: Option<Arc<dyn AccessControl>>,
    config: AdminConfig,
}

impl std::fmt::Debug for ConfigurationManagerBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConfigurationManagerBuilder")
            .field("persistence", &self.persistence)
            .field("access_control", &self.access.is_some())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl ConfigurationManagerBuilder {
    /// Add a persistence backend; higher ranks are queried first
    #[must_use]
    pub fn persistence(mut self, rank: i32, backend: Arc<dyn PersistenceManager>) -> Self {
        self.persistence.add(rank, backend);
        self
    }

    /// Delegate multi-location visibility to `access`
    #[must_use]
    pub fn access_control(mut self, access: Arc<dyn AccessControl>) -> Self {
        self.access = Some(access);
        self
    }

    /// Use `config` instead of the defaults
    #[must_use]
    pub fn config(mut self, config: AdminConfig) -> Self {
        self.config = config;
        self
    }

    /// Load the dynamic bindings and start both workers.
    ///
    /// Without any backend an in-memory one is used.
    ///
    /// # Errors
    /// Invalid settings or a worker thread that cannot be spawned.
    pub fn start(mut self) -> Result<ConfigurationManager> {
        self.config.validate()?;
        if self.persistence.is_empty() {
            tracing::info!("no persistence backend registered; using in-memory storage");
            self.persistence.add(0, Arc::new(MemoryPersistence::new()));
        }

        let primary = Arc::clone(self.persistence.primary()?);
        let bindings = DynamicBindings::load(
            self.config.dynamic_bindings_id.clone(),
            primary,
            &self.directory.installed_locations(),
        );
        let policy = self
            .access
            .map_or_else(BindingPolicy::new, BindingPolicy::with_access_control);
        let listeners = self.directory.find_listeners();

        let engine = Arc::new(Engine {
            store: ConfigStore::new(),
            persistence: self.persistence,
            directory: self.directory,
            plugins: PluginPipeline::new(),
            policy,
            bindings,
            listeners: RwLock::new(listeners),
            stats: StatsCounters::default(),
            update_queue: WorkQueue::new(
                self.config.update_thread_name.clone(),
                self.config.queue_capacity,
            ),
            event_queue: WorkQueue::new(
                self.config.event_thread_name.clone(),
                self.config.queue_capacity,
            ),
        });

        let weak = Arc::downgrade(&engine);
        engine.update_queue.start(move |task| {
            if let Some(engine) = weak.upgrade() {
                engine.run_update(task);
            }
        })?;
        let weak = Arc::downgrade(&engine);
        engine.event_queue.start(move |task| {
            if let Some(engine) = weak.upgrade() {
                engine.run_event(task);
            }
        })?;

        tracing::info!(
            backends = engine.persistence.len(),
            dynamic_bindings = engine.bindings.len(),
            "configuration manager started"
        );
        Ok(ConfigurationManager { engine, config: self.config })
    }
}

/// Configuration reconciliation and delivery engine
pub struct ConfigurationManager {
    engine: Arc<Engine>,
    config: AdminConfig,
}

impl std::fmt::Debug for ConfigurationManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConfigurationManager")
            .field("config", &self.config)
            .field("update_queue", &self.engine.update_queue)
            .field("event_queue", &self.engine.event_queue)
            .finish_non_exhaustive()
    }
}

impl ConfigurationManager {
    /// Start assembling a manager for `directory`
    #[must_use]
    pub fn builder(directory: Arc<dyn ServiceDirectory>) -> ConfigurationManagerBuilder {
        ConfigurationManagerBuilder {
            directory,
            persistence: PersistenceChain::new(),
            access: None,
            config: AdminConfig::default(),
        }
    }

    /// Settings the manager runs with
    #[inline]
    #[must_use]
    pub fn config(&self) -> &AdminConfig {
        &self.config
    }

    /// The plugin pipeline, for registering and unregistering plugins
    #[inline]
    #[must_use]
    pub fn plugins(&self) -> &PluginPipeline {
        &self.engine.plugins
    }

    /// Delivery counters
    #[must_use]
    pub fn stats(&self) -> DeliveryStats {
        self.engine.stats.snapshot()
    }

    /// Existing configuration, or a new one bound to `location`.
    ///
    /// A new configuration is persisted immediately. Without a location it
    /// picks up a persisted dynamic binding, if any.
    ///
    /// # Errors
    /// Storage failures; an invalid pid.
    pub fn get_or_create(&self, pid: &str, location: Option<&str>) -> Result<Arc<Configuration>> {
        self.ensure_running()?;
        validate_pid(pid)?;
        if let Some(config) = self.engine.configuration(pid)? {
            return Ok(config);
        }

        let backend = Arc::clone(self.engine.persistence.primary()?);
        let config = Configuration::new(pid, None, location.map(str::to_string), backend);
        if location.is_none() {
            config.restore_dynamic_location(self.engine.bindings.get(pid));
        }
        config.backend().store(pid, &config.to_persisted())?;
        tracing::debug!(pid, location, "configuration created");
        Ok(self.engine.store.put(Arc::new(config)))
    }

    /// Existing configuration, without creating one
    ///
    /// # Errors
    /// Storage failures.
    pub fn get_existing(&self, pid: &str) -> Result<Option<Arc<Configuration>>> {
        self.ensure_running()?;
        Ok(self.engine.configuration(pid)?)
    }

    /// Mint a new member of `factory_pid`.
    ///
    /// The member is cached but not persisted, and does not join the
    /// factory, until its first update.
    ///
    /// # Errors
    /// Storage failures; an invalid factory pid.
    pub fn create_factory_member(
        &self,
        factory_pid: &str,
        location: Option<&str>,
    ) -> Result<Arc<Configuration>> {
        self.ensure_running()?;
        validate_pid(factory_pid)?;
        self.engine.factory(factory_pid)?;

        let mut rng = rand::rng();
        loop {
            let pid = create_pid(factory_pid, &mut rng);
            if self.engine.configuration(&pid)?.is_some() {
                continue;
            }
            let backend = Arc::clone(self.engine.persistence.primary()?);
            let config = Configuration::new(
                pid.as_str(),
                Some(factory_pid.to_string()),
                location.map(str::to_string),
                backend,
            );
            tracing::debug!(pid = %pid, factory_pid, "factory member created");
            return Ok(self.engine.store.put(Arc::new(config)));
        }
    }

    /// Member pids of `factory_pid`, in pid order
    ///
    /// # Errors
    /// Storage failures.
    pub fn factory_members(&self, factory_pid: &str) -> Result<Vec<String>> {
        self.ensure_running()?;
        Ok(self.engine.factory(factory_pid)?.members())
    }

    /// Configurations whose persisted properties match `filter`.
    ///
    /// Records that were never updated are not listed. `None` lists all.
    ///
    /// # Errors
    /// Filter syntax errors; storage failures.
    pub fn list(&self, filter: Option<&str>) -> Result<Vec<Arc<Configuration>>> {
        self.ensure_running()?;
        let filter = filter.map(Filter::parse).transpose()?;

        let mut seen = HashSet::new();
        let mut listed = Vec::new();
        for backend in self.engine.persistence.iter() {
            for dict in backend.list_all()? {
                let Some(pid) = dict.get_str(SERVICE_PID) else {
                    continue;
                };
                if seen.contains(pid) {
                    continue;
                }
                if filter.as_ref().is_some_and(|f| !f.matches(&dict)) {
                    continue;
                }
                seen.insert(pid.to_string());
                let config = match self.engine.store.get(pid) {
                    Some(config) => config,
                    None => {
                        let config = Configuration::from_persisted(pid, dict.clone(), Arc::clone(backend))?;
                        config.restore_dynamic_location(self.engine.bindings.get(pid));
                        Arc::new(config)
                    }
                };
                if !config.is_new() && !config.is_deleted() {
                    listed.push(config);
                }
            }
        }
        listed.sort_by(|a, b| a.pid().cmp(b.pid()));
        Ok(listed)
    }

    /// Replace the properties of `pid` and deliver them.
    ///
    /// Returns the new generation. On a storage failure nothing changes.
    ///
    /// # Errors
    /// [`AdminError::NotFound`], [`AdminError::Deleted`], storage failures.
    pub fn update(&self, pid: &str, properties: Properties) -> Result<u64> {
        self.ensure_running()?;
        let config = self.require(pid)?;

        if let Some(factory_pid) = config.factory_pid() {
            let factory = self.engine.factory(factory_pid)?;
            if factory.add_pid(pid) {
                if let Err(e) = factory.store() {
                    factory.remove_pid(pid);
                    tracing::error!(pid, factory_pid, error = %e, "failed to store factory");
                    return Err(e.into());
                }
            }
        }

        if let Err(e) = config.backend().store(pid, &config.persisted_with(&properties)) {
            tracing::error!(pid, error = %e, "failed to store configuration");
            return Err(e.into());
        }
        let (generation, stored) = config.commit_properties(properties);
        tracing::debug!(pid, generation, "configuration updated");

        self.engine
            .fire_event(EventKind::Updated, pid, config.factory_pid());
        self.engine.schedule(UpdateTask::Update {
            config,
            generation,
            properties: stored,
        });
        Ok(generation)
    }

    /// Delete `pid` and tell its consumers.
    ///
    /// # Errors
    /// [`AdminError::NotFound`], [`AdminError::Deleted`], storage failures.
    pub fn delete(&self, pid: &str) -> Result<()> {
        self.ensure_running()?;
        let config = self.require(pid)?;

        if let Err(e) = config.backend().delete(pid) {
            tracing::error!(pid, error = %e, "failed to delete configuration");
            return Err(e.into());
        }
        config.mark_deleted();
        self.engine.store.remove(pid);
        self.engine.bindings.put(pid, None);
        tracing::debug!(pid, "configuration removed from cache");

        self.engine
            .fire_event(EventKind::Deleted, pid, config.factory_pid());
        let owner = config.owner();
        self.engine.schedule(UpdateTask::Delete { config, owner });
        Ok(())
    }

    /// Set or clear the static location of `pid`.
    ///
    /// Consumers are re-evaluated when a previous location existed.
    ///
    /// # Errors
    /// [`AdminError::NotFound`], [`AdminError::Deleted`], storage failures.
    pub fn set_location(&self, pid: &str, location: Option<&str>) -> Result<()> {
        self.ensure_running()?;
        let config = self.require(pid)?;

        let unsaved_member = config.factory_pid().is_some() && config.is_new();
        if !unsaved_member {
            let persisted = config.persisted_with_location(location);
            if let Err(e) = config.backend().store(pid, &persisted) {
                tracing::error!(pid, error = %e, "failed to store configuration location");
                return Err(e.into());
            }
        }
        let (old_location, generation) = config.set_static_location(location.map(str::to_string));
        self.engine.bindings.put(pid, None);
        tracing::debug!(pid, generation, old = ?old_location, new = ?location, "configuration location set");

        if old_location.as_deref() != location {
            self.engine
                .fire_event(EventKind::LocationChanged, pid, config.factory_pid());
            if old_location.is_some() {
                self.engine.schedule(UpdateTask::LocationChanged {
                    config,
                    old_location,
                });
            }
        }
        Ok(())
    }

    /// Owner location of `pid`
    ///
    /// # Errors
    /// [`AdminError::NotFound`], [`AdminError::Deleted`], storage failures.
    pub fn get_location(&self, pid: &str) -> Result<Option<String>> {
        self.ensure_running()?;
        Ok(self.require(pid)?.owner())
    }

    /// A consumer was registered; schedule its first delivery for each of
    /// its pids
    pub fn on_consumer_registered(&self, consumer: &ConsumerRef) {
        if !self.engine.update_queue.is_accepting() {
            return;
        }
        for identity in consumer.service.pids() {
            let task = match consumer.consumer.kind() {
                ConsumerKind::Single => Some(self.attach_single(consumer, identity)),
                ConsumerKind::Factory => self.attach_factory(consumer, identity),
            };
            if let Some(task) = task {
                self.engine.schedule(task);
            }
        }
    }

    /// A consumer went away; forget what it has seen
    pub fn on_consumer_unregistered(&self, service: &ServiceRef) {
        for config in self.engine.store.get_all() {
            config.forget_consumer(service.id());
        }
        tracing::debug!(service = %service, "consumer unregistered");
    }

    /// Start sending events to `listener`
    pub fn on_listener_registered(&self, listener: ListenerRef) {
        let mut listeners = self.engine.listeners.write();
        if listeners.iter().all(|l| l.service != listener.service) {
            listeners.push(listener);
        }
    }

    /// Stop sending events to the listener registered as `service`
    pub fn on_listener_unregistered(&self, service: &ServiceRef) {
        self.engine
            .listeners
            .write()
            .retain(|l| &l.service != service);
    }

    /// A provider was uninstalled; release every dynamic binding to its
    /// location and rebind the affected configurations
    pub fn on_location_uninstalled(&self, location: &str) {
        for pid in self.engine.bindings.pids_bound_to(location) {
            self.engine.bindings.put(&pid, None);
        }
        for config in self.engine.store.get_all() {
            if config.clear_dynamic_location(location) {
                tracing::debug!(pid = config.pid(), location, "dynamic binding released");
                self.engine
                    .fire_event(EventKind::LocationChanged, config.pid(), config.factory_pid());
                self.engine.schedule(UpdateTask::LocationChanged {
                    config,
                    old_location: Some(location.to_string()),
                });
            }
        }
    }

    /// Put a work item on the update queue as-is.
    ///
    /// Returns `false` once the manager is shut down. The worker applies the
    /// same staleness and visibility checks as for internally created work.
    pub fn submit(&self, task: UpdateTask) -> bool {
        tracing::debug!(task = %task, "work item submitted");
        self.engine.update_queue.schedule(task)
    }

    /// Block until everything queued so far has been delivered
    pub fn flush(&self) {
        self.engine.update_queue.flush();
        self.engine.event_queue.flush();
    }

    /// Stop both workers after draining their queues, then empty the
    /// caches. Later calls are no-ops.
    pub fn shutdown(&self) {
        if !self.engine.update_queue.is_accepting() && !self.engine.event_queue.is_accepting() {
            return;
        }
        self.engine.update_queue.terminate();
        self.engine.event_queue.terminate();
        self.engine.store.clear();
        tracing::info!("configuration manager stopped");
    }

    fn attach_single(&self, consumer: &ConsumerRef, pid: &str) -> UpdateTask {
        let config = match self.engine.configuration(pid) {
            Ok(config) => config,
            Err(e) => {
                tracing::error!(pid, error = %e, "error loading configuration");
                None
            }
        };
        UpdateTask::ConsumerAttached {
            consumer: consumer.clone(),
            pid: pid.to_string(),
            config: config.map(AttachedConfig::capture),
        }
    }

    fn attach_factory(&self, consumer: &ConsumerRef, factory_pid: &str) -> Option<UpdateTask> {
        let factory = match self.engine.factory(factory_pid) {
            Ok(factory) => factory,
            Err(e) => {
                tracing::error!(factory_pid, error = %e, "error loading factory");
                return None;
            }
        };

        let mut members = Vec::new();
        let mut pruned = false;
        for pid in factory.members() {
            match self.engine.configuration(&pid) {
                Ok(Some(config)) if config.factory_pid() == Some(factory_pid) => {
                    if !config.is_new() {
                        members.push(AttachedConfig::capture(config));
                    }
                }
                Ok(_) => {
                    tracing::debug!(pid = %pid, factory_pid, "removing invalid member from factory");
                    factory.remove_pid(&pid);
                    pruned = true;
                }
                Err(e) => {
                    tracing::error!(pid = %pid, factory_pid, error = %e, "error loading factory member");
                }
            }
        }
        if pruned {
            factory.store_silently();
        }

        Some(UpdateTask::FactoryAttached {
            consumer: consumer.clone(),
            factory_pid: factory_pid.to_string(),
            members,
        })
    }

    fn require(&self, pid: &str) -> Result<Arc<Configuration>> {
        let config = self
            .engine
            .configuration(pid)?
            .ok_or_else(|| AdminError::NotFound(pid.to_string()))?;
        if config.is_deleted() {
            return Err(AdminError::Deleted(pid.to_string()));
        }
        Ok(config)
    }

    fn ensure_running(&self) -> Result<()> {
        if self.engine.update_queue.is_accepting() {
            Ok(())
        } else {
            Err(AdminError::ShutDown)
        }
    }
}

impl Drop for ConfigurationManager {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn validate_pid(pid: &str) -> Result<()> {
    if pid.trim().is_empty() {
        return Err(AdminError::InvalidPid(pid.to_string()));
    }
    Ok(())
}
