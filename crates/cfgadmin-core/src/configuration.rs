//! Configuration records
//!
//! A [`Configuration`] owns its mutable state behind one lock. Work items
//! take a [`ConfigSnapshot`] under that lock and do everything slow
//! (resolution, plugins, callbacks) without holding it.

use crate::directory::ServiceId;
use crate::error::StorageError;
use crate::persistence::PersistenceManager;
use crate::properties::{
    Properties, Value, SERVICE_BUNDLE_LOCATION, SERVICE_FACTORY_PID, SERVICE_PID,
};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Point-in-time copy of a configuration's deliverable state
#[derive(Debug, Clone, PartialEq)]
pub struct ConfigSnapshot {
    /// Configuration pid
    pub pid: String,
    /// Factory pid of a factory member
    pub factory_pid: Option<String>,
    /// Current properties; `None` until the first update
    pub properties: Option<Properties>,
    /// Owner location; `None` when unbound
    pub owner: Option<String>,
    /// Modification counter at snapshot time
    pub generation: u64,
}

#[derive(Debug, Default)]
struct ConfigState {
    properties: Option<Properties>,
    static_location: Option<String>,
    dynamic_location: Option<String>,
    modification_counter: u64,
    last_delivered: u64,
    consumer_watermarks: HashMap<ServiceId, u64>,
    deleted: bool,
}

impl ConfigState {
    fn owner(&self) -> Option<&str> {
        self.static_location
            .as_deref()
            .or(self.dynamic_location.as_deref())
    }
}

/// One configuration object
pub struct Configuration {
    pid: String,
    factory_pid: Option<String>,
    backend: Arc<dyn PersistenceManager>,
    state: Mutex<ConfigState>,
}

impl fmt::Debug for Configuration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("Configuration")
            .field("pid", &self.pid)
            .field("factory_pid", &self.factory_pid)
            .field("owner", &state.owner())
            .field("generation", &state.modification_counter)
            .field("last_delivered", &state.last_delivered)
            .finish_non_exhaustive()
    }
}

impl Configuration {
    /// Create a configuration that has never been updated
    #[must_use]
    pub fn new(
        pid: impl Into<String>,
        factory_pid: Option<String>,
        static_location: Option<String>,
        backend: Arc<dyn PersistenceManager>,
    ) -> Self {
        Self {
            pid: pid.into(),
            factory_pid,
            backend,
            state: Mutex::new(ConfigState {
                static_location,
                ..ConfigState::default()
            }),
        }
    }

    /// Rebuild a configuration from its persisted dictionary.
    ///
    /// A dictionary holding only automatic properties is a configuration
    /// that was created but never updated.
    ///
    /// # Errors
    /// [`StorageError::Corrupt`] if the stored pid disagrees with `pid`.
    pub fn from_persisted(
        pid: &str,
        mut stored: Properties,
        backend: Arc<dyn PersistenceManager>,
    ) -> Result<Self, StorageError> {
        if let Some(stored_pid) = stored.get_str(SERVICE_PID) {
            if stored_pid != pid {
                return Err(StorageError::Corrupt {
                    id: pid.to_string(),
                    reason: format!("stored under pid '{stored_pid}'"),
                });
            }
        }
        let factory_pid = stored.get_str(SERVICE_FACTORY_PID).map(str::to_string);
        let static_location = match stored.remove(SERVICE_BUNDLE_LOCATION) {
            Some(Value::String(location)) => Some(location),
            _ => None,
        };

        let has_user_properties = stored
            .keys()
            .any(|k| !k.eq_ignore_ascii_case(SERVICE_PID) && !k.eq_ignore_ascii_case(SERVICE_FACTORY_PID));

        let config = Self::new(pid, factory_pid, static_location, backend);
        if has_user_properties {
            let mut state = config.state.lock();
            state.properties = Some(config.stamp(stored));
            state.modification_counter = 1;
        }
        Ok(config)
    }

    /// Configuration pid
    #[inline]
    #[must_use]
    pub fn pid(&self) -> &str {
        &self.pid
    }

    /// Factory pid of a factory member
    #[inline]
    #[must_use]
    pub fn factory_pid(&self) -> Option<&str> {
        self.factory_pid.as_deref()
    }

    /// Backend this configuration is stored in
    #[inline]
    #[must_use]
    pub fn backend(&self) -> &Arc<dyn PersistenceManager> {
        &self.backend
    }

    /// Copy the deliverable state
    #[must_use]
    pub fn snapshot(&self) -> ConfigSnapshot {
        let state = self.state.lock();
        ConfigSnapshot {
            pid: self.pid.clone(),
            factory_pid: self.factory_pid.clone(),
            properties: state.properties.clone(),
            owner: state.owner().map(str::to_string),
            generation: state.modification_counter,
        }
    }

    /// Current properties
    #[must_use]
    pub fn properties(&self) -> Option<Properties> {
        self.state.lock().properties.clone()
    }

    /// Current owner location
    #[must_use]
    pub fn owner(&self) -> Option<String> {
        self.state.lock().owner().map(str::to_string)
    }

    /// Check if the owner was inferred from a consumer
    #[must_use]
    pub fn is_dynamically_bound(&self) -> bool {
        let state = self.state.lock();
        state.static_location.is_none() && state.dynamic_location.is_some()
    }

    /// Current modification counter
    #[must_use]
    pub fn modification_counter(&self) -> u64 {
        self.state.lock().modification_counter
    }

    /// Highest generation delivered to all targets
    #[must_use]
    pub fn last_delivered(&self) -> u64 {
        self.state.lock().last_delivered
    }

    /// Check if the configuration has never been updated
    #[must_use]
    pub fn is_new(&self) -> bool {
        self.state.lock().properties.is_none()
    }

    /// Check if the configuration has been deleted
    #[must_use]
    pub fn is_deleted(&self) -> bool {
        self.state.lock().deleted
    }

    /// Replace the properties and bump the counter, returning the new
    /// generation and the stored copy.
    pub(crate) fn commit_properties(&self, properties: Properties) -> (u64, Properties) {
        let stamped = self.stamp(properties);
        let mut state = self.state.lock();
        state.properties = Some(stamped.clone());
        state.modification_counter += 1;
        (state.modification_counter, stamped)
    }

    /// Set or clear the static location and bump the counter.
    ///
    /// Returns the owner before the change and the new generation. An
    /// explicit location replaces any dynamic binding.
    pub(crate) fn set_static_location(&self, location: Option<String>) -> (Option<String>, u64) {
        let mut state = self.state.lock();
        let previous = state.owner().map(str::to_string);
        state.static_location = location;
        state.dynamic_location = None;
        state.modification_counter += 1;
        (previous, state.modification_counter)
    }

    /// Bind to `candidate` if unbound. The counter is not bumped.
    pub(crate) fn try_bind_location(&self, candidate: &str) -> bool {
        let mut state = self.state.lock();
        if state.owner().is_some() {
            return false;
        }
        state.dynamic_location = Some(candidate.to_string());
        true
    }

    /// Restore a dynamic binding when loading
    pub(crate) fn restore_dynamic_location(&self, location: Option<String>) {
        let mut state = self.state.lock();
        if state.static_location.is_none() {
            state.dynamic_location = location;
        }
    }

    /// Drop a dynamic binding to `location`, returning whether one existed
    pub(crate) fn clear_dynamic_location(&self, location: &str) -> bool {
        let mut state = self.state.lock();
        if state.static_location.is_none() && state.dynamic_location.as_deref() == Some(location) {
            state.dynamic_location = None;
            return true;
        }
        false
    }

    /// Check if a task captured at `generation` has been superseded
    #[must_use]
    pub fn is_stale(&self, generation: u64) -> bool {
        generation <= self.state.lock().last_delivered
    }

    /// Raise the global watermark; never lowers it
    pub(crate) fn advance_watermark(&self, generation: u64) {
        let mut state = self.state.lock();
        let capped = generation.min(state.modification_counter);
        state.last_delivered = state.last_delivered.max(capped);
    }

    /// Check if `consumer` has already seen `generation`
    #[must_use]
    pub fn delivered_to(&self, consumer: ServiceId, generation: u64) -> bool {
        self.state
            .lock()
            .consumer_watermarks
            .get(&consumer)
            .is_some_and(|seen| *seen >= generation)
    }

    /// Record that `consumer` took delivery of `generation`
    pub(crate) fn record_delivery(&self, consumer: ServiceId, generation: u64) {
        let mut state = self.state.lock();
        let seen = state.consumer_watermarks.entry(consumer).or_insert(generation);
        *seen = (*seen).max(generation);
    }

    /// Forget what a departed consumer has seen
    pub(crate) fn forget_consumer(&self, consumer: ServiceId) {
        self.state.lock().consumer_watermarks.remove(&consumer);
    }

    /// Mark deleted; a deleted configuration is never delivered again
    pub(crate) fn mark_deleted(&self) {
        self.state.lock().deleted = true;
    }

    /// Dictionary to persist: properties, automatic properties and the
    /// static location
    #[must_use]
    pub fn to_persisted(&self) -> Properties {
        let state = self.state.lock();
        self.persisted_form(state.properties.clone(), state.static_location.as_deref())
    }

    /// Dictionary to persist if `properties` were committed
    #[must_use]
    pub fn persisted_with(&self, properties: &Properties) -> Properties {
        let state = self.state.lock();
        self.persisted_form(Some(properties.clone()), state.static_location.as_deref())
    }

    /// Dictionary to persist if the static location were `location`
    #[must_use]
    pub fn persisted_with_location(&self, location: Option<&str>) -> Properties {
        let state = self.state.lock();
        self.persisted_form(state.properties.clone(), location)
    }

    fn persisted_form(&self, properties: Option<Properties>, location: Option<&str>) -> Properties {
        let mut persisted = self.stamp(properties.unwrap_or_default());
        if let Some(location) = location {
            persisted.insert(SERVICE_BUNDLE_LOCATION, location);
        }
        persisted
    }

    /// Overwrite the automatic properties
    #[must_use]
    pub fn stamp(&self, mut properties: Properties) -> Properties {
        stamp_automatic(&mut properties, &self.pid, self.factory_pid.as_deref());
        properties
    }
}

/// Write `service.pid` and, for factory members, `service.factoryPid`
pub fn stamp_automatic(properties: &mut Properties, pid: &str, factory_pid: Option<&str>) {
    properties.insert(SERVICE_PID, pid);
    match factory_pid {
        Some(factory_pid) => {
            properties.insert(SERVICE_FACTORY_PID, factory_pid);
        }
        None => {
            properties.remove(SERVICE_FACTORY_PID);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::MemoryPersistence;

    fn config(pid: &str) -> Configuration {
        Configuration::new(pid, None, None, Arc::new(MemoryPersistence::new()))
    }

    #[test]
    fn new_configuration_is_unbound_and_new() {
        let cfg = config("svc.A");
        let snap = cfg.snapshot();
        assert!(cfg.is_new());
        assert_eq!(snap.generation, 0);
        assert_eq!(snap.owner, None);
        assert_eq!(snap.properties, None);
    }

    #[test]
    fn commit_bumps_counter_and_stamps() {
        let cfg = config("svc.A");
        let (generation, stored) = cfg.commit_properties(Properties::new().with("level", 5));
        assert_eq!(generation, 1);
        assert_eq!(stored.get_str(SERVICE_PID), Some("svc.A"));
        assert!(!cfg.is_new());

        let (generation, _) = cfg.commit_properties(Properties::new().with("level", 6));
        assert_eq!(generation, 2);
    }

    #[test]
    fn dynamic_binding_is_first_writer_wins() {
        let cfg = config("svc.A");
        assert!(cfg.try_bind_location("loc-1"));
        assert!(!cfg.try_bind_location("loc-2"));
        assert_eq!(cfg.owner().as_deref(), Some("loc-1"));
        assert!(cfg.is_dynamically_bound());
        assert_eq!(cfg.modification_counter(), 0);
    }

    #[test]
    fn static_location_replaces_dynamic() {
        let cfg = config("svc.A");
        cfg.try_bind_location("dyn");
        let (previous, generation) = cfg.set_static_location(Some("static".into()));
        assert_eq!(previous.as_deref(), Some("dyn"));
        assert_eq!(generation, 1);
        assert!(!cfg.is_dynamically_bound());
        assert!(!cfg.clear_dynamic_location("dyn"));
        assert_eq!(cfg.owner().as_deref(), Some("static"));
    }

    #[test]
    fn watermark_is_monotonic_and_capped() {
        let cfg = config("svc.A");
        cfg.commit_properties(Properties::new());
        cfg.commit_properties(Properties::new());
        cfg.advance_watermark(2);
        cfg.advance_watermark(1);
        assert_eq!(cfg.last_delivered(), 2);
        cfg.advance_watermark(9);
        assert_eq!(cfg.last_delivered(), 2);
        assert!(cfg.is_stale(2));
        assert!(!cfg.is_stale(3));
    }

    #[test]
    fn consumer_watermarks() {
        let cfg = config("svc.A");
        assert!(!cfg.delivered_to(7, 0));
        cfg.record_delivery(7, 2);
        cfg.record_delivery(7, 1);
        assert!(cfg.delivered_to(7, 2));
        assert!(!cfg.delivered_to(7, 3));
        cfg.forget_consumer(7);
        assert!(!cfg.delivered_to(7, 1));
    }

    #[test]
    fn persisted_round_trip_keeps_location_and_properties() {
        let backend: Arc<dyn PersistenceManager> = Arc::new(MemoryPersistence::new());
        let cfg = Configuration::new(
            "svc.F.1",
            Some("svc.F".into()),
            Some("loc".into()),
            backend.clone(),
        );
        cfg.commit_properties(Properties::new().with("level", 5));
        let persisted = cfg.to_persisted();
        assert_eq!(persisted.get_str(SERVICE_BUNDLE_LOCATION), Some("loc"));
        assert_eq!(persisted.get_str(SERVICE_FACTORY_PID), Some("svc.F"));

        let loaded = Configuration::from_persisted("svc.F.1", persisted, backend).unwrap();
        assert_eq!(loaded.factory_pid(), Some("svc.F"));
        assert_eq!(loaded.owner().as_deref(), Some("loc"));
        assert_eq!(loaded.modification_counter(), 1);
        let props = loaded.properties().unwrap();
        assert_eq!(props.get("level"), Some(&Value::Integer(5)));
        assert!(!props.contains_key(SERVICE_BUNDLE_LOCATION));
    }

    #[test]
    fn persisted_without_user_properties_loads_as_new() {
        let backend: Arc<dyn PersistenceManager> = Arc::new(MemoryPersistence::new());
        let stored = Properties::new().with(SERVICE_PID, "svc.A");
        let loaded = Configuration::from_persisted("svc.A", stored, backend).unwrap();
        assert!(loaded.is_new());
        assert_eq!(loaded.modification_counter(), 0);
    }

    #[test]
    fn persisted_pid_mismatch_is_corrupt() {
        let backend: Arc<dyn PersistenceManager> = Arc::new(MemoryPersistence::new());
        let stored = Properties::new().with(SERVICE_PID, "other");
        let err = Configuration::from_persisted("svc.A", stored, backend).unwrap_err();
        assert!(matches!(err, StorageError::Corrupt { .. }));
    }
}
