//! Plugin pipeline
//!
//! Plugins see a private copy of the properties just before delivery to a
//! consumer. They run in ascending rank; equal ranks run in registration
//! order. A failing plugin is logged and skipped.

use crate::directory::ServiceRef;
use crate::error::{guarded, CallbackError};
use crate::properties::{Properties, Value, SERVICE_FACTORY_PID, SERVICE_PID};
use parking_lot::RwLock;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Handle returned by [`PluginPipeline::register`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PluginId(u64);

impl fmt::Display for PluginId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "plugin-{}", self.0)
    }
}

/// Transforms properties before delivery
pub trait ConfigurationPlugin: Send + Sync {
    /// Modify `properties` for delivery to `target`
    ///
    /// # Errors
    /// Any failure; the pipeline logs it and continues.
    fn modify_configuration(
        &self,
        target: &ServiceRef,
        properties: &mut Properties,
    ) -> Result<(), CallbackError>;
}

#[derive(Clone)]
struct PluginEntry {
    id: PluginId,
    rank: i32,
    target: Option<String>,
    plugin: Arc<dyn ConfigurationPlugin>,
}

/// Rank-ordered plugin chain
#[derive(Default)]
pub struct PluginPipeline {
    entries: RwLock<Vec<PluginEntry>>,
    next_id: AtomicU64,
}

impl fmt::Debug for PluginPipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginPipeline")
            .field("plugins", &self.len())
            .finish()
    }
}

impl PluginPipeline {
    /// Create an empty pipeline
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a plugin. A `target` restricts it to one pid or factory pid.
    pub fn register(
        &self,
        rank: i32,
        target: Option<&str>,
        plugin: Arc<dyn ConfigurationPlugin>,
    ) -> PluginId {
        let id = PluginId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let mut entries = self.entries.write();
        let idx = entries
            .iter()
            .position(|e| e.rank > rank)
            .unwrap_or(entries.len());
        entries.insert(
            idx,
            PluginEntry {
                id,
                rank,
                target: target.map(str::to_string),
                plugin,
            },
        );
        tracing::debug!(plugin = %id, rank, plugin_target = ?target, "plugin registered");
        id
    }

    /// Remove a plugin, returning whether it was registered
    pub fn unregister(&self, id: PluginId) -> bool {
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|e| e.id != id);
        before != entries.len()
    }

    /// Number of registered plugins
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Check if no plugin is registered
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Run the matching plugins over a copy of `properties`.
    ///
    /// `None` passes through without calling any plugin. The automatic
    /// properties of the input are restored after every plugin.
    #[must_use]
    pub fn apply(
        &self,
        properties: Option<&Properties>,
        target_pid: &str,
        consumer: &ServiceRef,
    ) -> Option<Properties> {
        let mut working = properties?.clone();

        let matching: Vec<PluginEntry> = self
            .entries
            .read()
            .iter()
            .filter(|e| e.target.as_deref().map_or(true, |t| t == target_pid))
            .cloned()
            .collect();
        if matching.is_empty() {
            return Some(working);
        }

        let pid = working.get(SERVICE_PID).cloned();
        let factory_pid = working.get(SERVICE_FACTORY_PID).cloned();

        for entry in matching {
            if let Err(e) = guarded(|| entry.plugin.modify_configuration(consumer, &mut working)) {
                tracing::error!(
                    plugin = %entry.id,
                    target_pid,
                    service = consumer.id(),
                    error = %e,
                    "configuration plugin failed"
                );
            }
            restore(&mut working, SERVICE_PID, pid.as_ref());
            restore(&mut working, SERVICE_FACTORY_PID, factory_pid.as_ref());
        }
        Some(working)
    }
}

fn restore(properties: &mut Properties, key: &str, value: Option<&Value>) {
    match value {
        Some(value) => {
            properties.insert(key, value.clone());
        }
        None => {
            properties.remove(key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::{Provider, ProviderState};
    use parking_lot::Mutex;

    struct Tag(&'static str, Arc<Mutex<Vec<&'static str>>>);

    impl ConfigurationPlugin for Tag {
        fn modify_configuration(
            &self,
            _: &ServiceRef,
            properties: &mut Properties,
        ) -> Result<(), CallbackError> {
            self.1.lock().push(self.0);
            properties.insert("tag", self.0);
            properties.insert(SERVICE_PID, "hijacked");
            Ok(())
        }
    }

    struct Failing;

    impl ConfigurationPlugin for Failing {
        fn modify_configuration(&self, _: &ServiceRef, _: &mut Properties) -> Result<(), CallbackError> {
            Err(CallbackError::Unexpected("broken plugin".into()))
        }
    }

    struct Panicking;

    impl ConfigurationPlugin for Panicking {
        fn modify_configuration(&self, _: &ServiceRef, _: &mut Properties) -> Result<(), CallbackError> {
            panic!("plugin exploded")
        }
    }

    fn consumer() -> ServiceRef {
        ServiceRef::new(1, 0, vec!["svc.A".into()], Provider::new("loc", ProviderState::Active))
    }

    fn stored() -> Properties {
        Properties::new().with(SERVICE_PID, "svc.A").with("level", 5)
    }

    #[test]
    fn absent_properties_skip_plugins() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let pipeline = PluginPipeline::new();
        pipeline.register(0, None, Arc::new(Tag("a", calls.clone())));
        assert!(pipeline.apply(None, "svc.A", &consumer()).is_none());
        assert!(calls.lock().is_empty());
    }

    #[test]
    fn plugins_run_by_rank_then_registration() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let pipeline = PluginPipeline::new();
        pipeline.register(10, None, Arc::new(Tag("late", calls.clone())));
        pipeline.register(0, None, Arc::new(Tag("first", calls.clone())));
        pipeline.register(0, None, Arc::new(Tag("second", calls.clone())));

        let out = pipeline.apply(Some(&stored()), "svc.A", &consumer()).unwrap();
        assert_eq!(*calls.lock(), vec!["first", "second", "late"]);
        assert_eq!(out.get_str("tag"), Some("late"));
        assert_eq!(out.get_str(SERVICE_PID), Some("svc.A"));
    }

    #[test]
    fn target_filter_selects_plugins() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let pipeline = PluginPipeline::new();
        pipeline.register(0, Some("svc.B"), Arc::new(Tag("b", calls.clone())));
        pipeline.register(0, Some("svc.A"), Arc::new(Tag("a", calls.clone())));
        let _ = pipeline.apply(Some(&stored()), "svc.A", &consumer());
        assert_eq!(*calls.lock(), vec!["a"]);
    }

    #[test]
    fn original_is_never_mutated() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let pipeline = PluginPipeline::new();
        pipeline.register(0, None, Arc::new(Tag("a", calls)));
        let original = stored();
        let before = original.clone();
        let out = pipeline.apply(Some(&original), "svc.A", &consumer()).unwrap();
        assert_eq!(original, before);
        assert_ne!(out, before);
    }

    #[test]
    fn failures_are_skipped() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let pipeline = PluginPipeline::new();
        pipeline.register(0, None, Arc::new(Failing));
        pipeline.register(1, None, Arc::new(Panicking));
        pipeline.register(2, None, Arc::new(Tag("after", calls.clone())));
        let out = pipeline.apply(Some(&stored()), "svc.A", &consumer()).unwrap();
        assert_eq!(*calls.lock(), vec!["after"]);
        assert_eq!(out.get("level"), Some(&Value::Integer(5)));
    }

    #[test]
    fn unregister_removes_plugin() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let pipeline = PluginPipeline::new();
        let id = pipeline.register(0, None, Arc::new(Tag("a", calls.clone())));
        assert!(pipeline.unregister(id));
        assert!(!pipeline.unregister(id));
        assert!(pipeline.is_empty());
        let _ = pipeline.apply(Some(&stored()), "svc.A", &consumer());
        assert!(calls.lock().is_empty());
    }
}
