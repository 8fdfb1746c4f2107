//! cfgadmin Core - configuration reconciliation and delivery
//!
//! Distributes named configurations to consumers that come and go while
//! the process runs:
//! - Caches configuration and factory records loaded from ranked backends
//! - Binds configurations to the location of the consumer that first takes them
//! - Runs rank-ordered plugins over a private copy before each delivery
//! - Serializes deliveries on an update queue and listener events on an
//!   event queue, each with a single worker thread
//! - Skips stale work by comparing captured generations with delivery
//!   watermarks
//!
//! # Example
//!
//! ```rust,ignore
//! use cfgadmin_core::{ConfigurationManager, Properties};
//!
//! let manager = ConfigurationManager::builder(directory).start()?;
//! manager.get_or_create("svc.A", None)?;
//! manager.update("svc.A", Properties::new().with("level", 5))?;
//!
//! // a consumer for svc.A appears
//! manager.on_consumer_registered(&consumer);
//! manager.flush();
//! ```

#![warn(unreachable_pub)]
#![allow(missing_docs)]

// Data model
pub mod configuration;
pub mod factory;
pub mod pid;
pub mod properties;
pub mod store;

// Collaborators
pub mod directory;
pub mod persistence;

// Delivery
pub mod bindings;
pub mod delivery;
pub mod events;
pub mod plugin;
pub mod policy;
pub mod queue;
pub mod resolver;
pub mod tasks;

// Surface
pub mod error;
pub mod manager;
pub mod settings;

// Re-exports for convenience
pub use bindings::{decode_bindings, encode_bindings, DynamicBindings, BINDINGS_KEY};
pub use configuration::{ConfigSnapshot, Configuration};
pub use delivery::DeliveryStats;
pub use directory::{
    rank_order, ConfigurationListener, Consumer, ConsumerKind, ConsumerRef, ListenerRef,
    ManagedService, ManagedServiceFactory, Provider, ProviderState, ServiceDirectory, ServiceId,
    ServiceRef,
};
pub use error::{AdminError, CallbackError, StorageError};
pub use events::{ConfigurationEvent, EventKind};
pub use factory::Factory;
pub use manager::{ConfigurationManager, ConfigurationManagerBuilder};
pub use persistence::{MemoryPersistence, PersistenceChain, PersistenceManager};
pub use pid::create_pid;
pub use plugin::{ConfigurationPlugin, PluginId, PluginPipeline};
pub use policy::{can_deliver, AccessControl, BindingPolicy, MULTI_LOCATION_PREFIX};
pub use properties::{Properties, Value, SERVICE_BUNDLE_LOCATION, SERVICE_FACTORY_PID, SERVICE_PID};
pub use resolver::TargetResolver;
pub use settings::AdminConfig;
pub use store::ConfigStore;
pub use tasks::{AttachedConfig, EventTask, UpdateTask};

/// Prelude module for common imports
pub mod prelude {
    //! Common imports for working with cfgadmin Core
    pub use crate::{
        AdminConfig, AdminError, CallbackError, ConfigurationEvent, ConfigurationListener,
        ConfigurationManager, ConfigurationPlugin, ConsumerRef, ManagedService,
        ManagedServiceFactory, Properties, ServiceDirectory, ServiceRef, Value,
    };
}

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
