//! Service directory contracts
//!
//! The directory announces consumers and listeners and answers identity
//! queries. Handles carry the provider that registered them so the engine
//! can check liveness and location at delivery time.

use crate::error::CallbackError;
use crate::events::ConfigurationEvent;
use crate::properties::Properties;
use parking_lot::RwLock;
use std::cmp::Ordering;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
use std::sync::Arc;

/// Directory-assigned service identifier
pub type ServiceId = u64;

/// Lifecycle state of a provider
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProviderState {
    Installed,
    Resolved,
    Starting,
    Active,
    Stopping,
    Uninstalled,
}

/// The deployable unit that registered a service
#[derive(Debug)]
pub struct Provider {
    location: String,
    state: RwLock<ProviderState>,
}

impl Provider {
    /// Create a provider in the given state
    #[must_use]
    pub fn new(location: impl Into<String>, state: ProviderState) -> Arc<Self> {
        Arc::new(Self {
            location: location.into(),
            state: RwLock::new(state),
        })
    }

    /// Provider location
    #[inline]
    #[must_use]
    pub fn location(&self) -> &str {
        &self.location
    }

    /// Current state
    #[inline]
    #[must_use]
    pub fn state(&self) -> ProviderState {
        *self.state.read()
    }

    /// Change state
    pub fn set_state(&self, state: ProviderState) {
        *self.state.write() = state;
    }
}

/// Kind of configuration consumer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConsumerKind {
    /// Receives the configuration named by its pid
    Single,
    /// Receives every member of the factory named by its pid
    Factory,
}

/// Consumer of a single configuration
pub trait ManagedService: Send + Sync {
    /// New properties, or `None` when there is no configuration
    ///
    /// # Errors
    /// [`CallbackError::Rejected`] when the properties are unacceptable.
    fn updated(&self, properties: Option<&Properties>) -> Result<(), CallbackError>;
}

/// Consumer of factory member configurations
pub trait ManagedServiceFactory: Send + Sync {
    /// A member was created or changed
    ///
    /// # Errors
    /// [`CallbackError::Rejected`] when the properties are unacceptable.
    fn updated(&self, pid: &str, properties: &Properties) -> Result<(), CallbackError>;

    /// A member was deleted or is no longer visible
    ///
    /// # Errors
    /// Any failure of the consumer.
    fn deleted(&self, pid: &str) -> Result<(), CallbackError>;
}

/// Receiver of configuration change events
pub trait ConfigurationListener: Send + Sync {
    /// Handle one event
    ///
    /// # Errors
    /// Any failure of the listener; it is logged and isolated.
    fn configuration_event(&self, event: &ConfigurationEvent) -> Result<(), CallbackError>;
}

struct ServiceInner {
    id: ServiceId,
    ranking: i32,
    pids: Vec<String>,
    provider: Arc<Provider>,
    registered: AtomicBool,
}

/// Registration handle of a service
#[derive(Clone)]
pub struct ServiceRef {
    inner: Arc<ServiceInner>,
}

impl fmt::Debug for ServiceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceRef")
            .field("id", &self.inner.id)
            .field("ranking", &self.inner.ranking)
            .field("pids", &self.inner.pids)
            .field("location", &self.inner.provider.location())
            .finish()
    }
}

impl fmt::Display for ServiceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "service#{} ({})", self.inner.id, self.inner.provider.location())
    }
}

impl PartialEq for ServiceRef {
    fn eq(&self, other: &Self) -> bool {
        self.inner.id == other.inner.id
    }
}

impl Eq for ServiceRef {}

impl ServiceRef {
    /// Create a registered handle
    #[must_use]
    pub fn new(id: ServiceId, ranking: i32, pids: Vec<String>, provider: Arc<Provider>) -> Self {
        Self {
            inner: Arc::new(ServiceInner {
                id,
                ranking,
                pids,
                provider,
                registered: AtomicBool::new(true),
            }),
        }
    }

    /// Service id
    #[inline]
    #[must_use]
    pub fn id(&self) -> ServiceId {
        self.inner.id
    }

    /// Service ranking
    #[inline]
    #[must_use]
    pub fn ranking(&self) -> i32 {
        self.inner.ranking
    }

    /// Identities the service consumes
    #[inline]
    #[must_use]
    pub fn pids(&self) -> &[String] {
        &self.inner.pids
    }

    /// Registering provider
    #[inline]
    #[must_use]
    pub fn provider(&self) -> &Arc<Provider> {
        &self.inner.provider
    }

    /// Location of the registering provider
    #[inline]
    #[must_use]
    pub fn location(&self) -> &str {
        self.inner.provider.location()
    }

    /// State of the registering provider
    #[inline]
    #[must_use]
    pub fn provider_state(&self) -> ProviderState {
        self.inner.provider.state()
    }

    /// Check the registration is still valid
    #[must_use]
    pub fn is_live(&self) -> bool {
        self.inner.registered.load(AtomicOrdering::Acquire)
            && self.provider_state() != ProviderState::Uninstalled
    }

    /// Invalidate the registration
    pub fn unregister(&self) {
        self.inner.registered.store(false, AtomicOrdering::Release);
    }
}

/// Delivery order: ranking descending, then service id ascending
#[must_use]
pub fn rank_order(a: &ServiceRef, b: &ServiceRef) -> Ordering {
    b.ranking().cmp(&a.ranking()).then(a.id().cmp(&b.id()))
}

/// Callback surface of a consumer
#[derive(Clone)]
pub enum Consumer {
    Single(Arc<dyn ManagedService>),
    Factory(Arc<dyn ManagedServiceFactory>),
}

impl Consumer {
    /// Consumer kind
    #[inline]
    #[must_use]
    pub fn kind(&self) -> ConsumerKind {
        match self {
            Self::Single(_) => ConsumerKind::Single,
            Self::Factory(_) => ConsumerKind::Factory,
        }
    }
}

/// A consumer together with its registration
#[derive(Clone)]
pub struct ConsumerRef {
    /// Registration handle
    pub service: ServiceRef,
    /// Callback surface
    pub consumer: Consumer,
}

impl fmt::Debug for ConsumerRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConsumerRef")
            .field("service", &self.service)
            .field("kind", &self.consumer.kind())
            .finish()
    }
}

impl ConsumerRef {
    /// Single-configuration consumer
    #[must_use]
    pub fn single(service: ServiceRef, consumer: Arc<dyn ManagedService>) -> Self {
        Self {
            service,
            consumer: Consumer::Single(consumer),
        }
    }

    /// Factory consumer
    #[must_use]
    pub fn factory(service: ServiceRef, consumer: Arc<dyn ManagedServiceFactory>) -> Self {
        Self {
            service,
            consumer: Consumer::Factory(consumer),
        }
    }
}

/// A listener together with its registration
#[derive(Clone)]
pub struct ListenerRef {
    /// Registration handle
    pub service: ServiceRef,
    /// Callback surface
    pub listener: Arc<dyn ConfigurationListener>,
}

impl fmt::Debug for ListenerRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ListenerRef")
            .field("service", &self.service)
            .finish_non_exhaustive()
    }
}

/// Registry of consumers and listeners
pub trait ServiceDirectory: Send + Sync {
    /// Consumers of `kind` registered for `identity`
    fn find_consumers(&self, identity: &str, kind: ConsumerKind) -> Vec<ConsumerRef>;

    /// Registered configuration listeners
    fn find_listeners(&self) -> Vec<ListenerRef>;

    /// Locations of every installed provider
    fn installed_locations(&self) -> Vec<String>;
}
