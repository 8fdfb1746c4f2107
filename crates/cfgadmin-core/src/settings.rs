//! Manager settings

use crate::error::AdminError;
use serde::{Deserialize, Serialize};

/// Default identifier of the persisted dynamic binding record
pub const DEFAULT_DYNAMIC_BINDINGS_ID: &str = "cfgadmin.dynamic-bindings";

/// Settings for a [`ConfigurationManager`](crate::ConfigurationManager)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdminConfig {
    /// Name of the update worker thread
    pub update_thread_name: String,
    /// Name of the event worker thread
    pub event_thread_name: String,
    /// Queue capacity; `None` for unbounded queues
    pub queue_capacity: Option<usize>,
    /// Identifier the dynamic bindings are persisted under
    pub dynamic_bindings_id: String,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            update_thread_name: "cfgadmin-updater".to_string(),
            event_thread_name: "cfgadmin-events".to_string(),
            queue_capacity: None,
            dynamic_bindings_id: DEFAULT_DYNAMIC_BINDINGS_ID.to_string(),
        }
    }
}

impl AdminConfig {
    /// Create default settings
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the update worker thread name
    #[inline]
    #[must_use]
    pub fn with_update_thread_name(mut self, name: impl Into<String>) -> Self {
        self.update_thread_name = name.into();
        self
    }

    /// Set the event worker thread name
    #[inline]
    #[must_use]
    pub fn with_event_thread_name(mut self, name: impl Into<String>) -> Self {
        self.event_thread_name = name.into();
        self
    }

    /// Bound both queues
    #[inline]
    #[must_use]
    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = Some(capacity);
        self
    }

    /// Set the dynamic bindings identifier
    #[inline]
    #[must_use]
    pub fn with_dynamic_bindings_id(mut self, id: impl Into<String>) -> Self {
        self.dynamic_bindings_id = id.into();
        self
    }

    /// Parse settings from TOML; missing keys take their defaults
    ///
    /// # Errors
    /// Returns [`AdminError::Config`] on malformed input or invalid values.
    pub fn from_toml_str(input: &str) -> Result<Self, AdminError> {
        let config: Self = toml::from_str(input).map_err(|e| AdminError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Check the settings are usable
    ///
    /// # Errors
    /// Returns [`AdminError::Config`] naming the offending setting.
    pub fn validate(&self) -> Result<(), AdminError> {
        if self.queue_capacity == Some(0) {
            return Err(AdminError::Config(
                "queue_capacity must be greater than zero".to_string(),
            ));
        }
        if self.dynamic_bindings_id.trim().is_empty() {
            return Err(AdminError::Config(
                "dynamic_bindings_id must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}
