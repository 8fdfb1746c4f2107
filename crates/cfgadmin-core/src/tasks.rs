//! Work items
//!
//! Tasks are plain data: a reference to the live record plus whatever was
//! captured when the task was submitted. The update worker interprets them
//! in [`crate::delivery`].

use crate::configuration::Configuration;
use crate::directory::{ConsumerRef, ListenerRef};
use crate::events::ConfigurationEvent;
use crate::properties::Properties;
use std::fmt;
use std::sync::Arc;

/// A configuration captured for a freshly attached consumer
#[derive(Debug, Clone)]
pub struct AttachedConfig {
    /// Live record
    pub config: Arc<Configuration>,
    /// Properties at attach time; `None` if never updated
    pub properties: Option<Properties>,
    /// Modification counter at attach time
    pub generation: u64,
}

impl AttachedConfig {
    /// Capture the current state of `config`
    #[must_use]
    pub fn capture(config: Arc<Configuration>) -> Self {
        let snapshot = config.snapshot();
        Self {
            config,
            properties: snapshot.properties,
            generation: snapshot.generation,
        }
    }
}

/// Item on the update queue
#[derive(Debug, Clone)]
pub enum UpdateTask {
    /// Deliver new properties to every visible consumer
    Update {
        config: Arc<Configuration>,
        generation: u64,
        properties: Properties,
    },
    /// Tell every consumer that could see the configuration it is gone
    Delete {
        config: Arc<Configuration>,
        owner: Option<String>,
    },
    /// Re-evaluate visibility after the owner location changed
    LocationChanged {
        config: Arc<Configuration>,
        old_location: Option<String>,
    },
    /// First delivery to a newly registered single-configuration consumer
    ConsumerAttached {
        consumer: ConsumerRef,
        pid: String,
        config: Option<AttachedConfig>,
    },
    /// First delivery of every member to a newly registered factory
    /// consumer
    FactoryAttached {
        consumer: ConsumerRef,
        factory_pid: String,
        members: Vec<AttachedConfig>,
    },
}

impl fmt::Display for UpdateTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Update {
                config, generation, ..
            } => write!(f, "Update: pid={} generation={generation}", config.pid()),
            Self::Delete { config, .. } => write!(f, "Delete: pid={}", config.pid()),
            Self::LocationChanged {
                config,
                old_location,
            } => write!(
                f,
                "Location Changed (pid={}): {} ==> {}",
                config.pid(),
                old_location.as_deref().unwrap_or("<unbound>"),
                config.owner().as_deref().unwrap_or("<unbound>")
            ),
            Self::ConsumerAttached { consumer, pid, .. } => {
                write!(f, "Consumer Attached: pid={pid} service={}", consumer.service)
            }
            Self::FactoryAttached {
                consumer,
                factory_pid,
                members,
            } => write!(
                f,
                "Factory Attached: factoryPid={factory_pid} members={} service={}",
                members.len(),
                consumer.service
            ),
        }
    }
}

/// Item on the event queue
#[derive(Debug, Clone)]
pub struct EventTask {
    /// Event to deliver
    pub event: ConfigurationEvent,
    /// Listeners tracked when the event was fired
    pub listeners: Vec<ListenerRef>,
}

impl fmt::Display for EventTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fire Event: {} to {} listeners", self.event, self.listeners.len())
    }
}
