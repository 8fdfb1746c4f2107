//! Target resolution
//!
//! A configuration is delivered either to single-configuration consumers
//! registered under its pid, or to factory consumers registered under its
//! factory pid. [`TargetResolver`] picks the variant once per configuration
//! and hides the difference from the work items.

use crate::configuration::Configuration;
use crate::directory::{rank_order, Consumer, ConsumerKind, ConsumerRef, ServiceDirectory};
use crate::error::{guarded, CallbackError};
use crate::properties::Properties;

/// Delivery strategy for one configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TargetResolver {
    /// Consumers registered under the pid itself
    Single { pid: String },
    /// Factory consumers registered under the factory pid
    Factory { factory_pid: String, pid: String },
}

impl TargetResolver {
    /// Pick the variant for `config`
    #[must_use]
    pub fn for_configuration(config: &Configuration) -> Self {
        Self::new(config.pid(), config.factory_pid())
    }

    /// Pick the variant for a pid and optional factory pid
    #[must_use]
    pub fn new(pid: &str, factory_pid: Option<&str>) -> Self {
        match factory_pid {
            Some(factory_pid) => Self::Factory {
                factory_pid: factory_pid.to_string(),
                pid: pid.to_string(),
            },
            None => Self::Single {
                pid: pid.to_string(),
            },
        }
    }

    /// Identity consumers are registered under, and plugins matched against
    #[must_use]
    pub fn target_pid(&self) -> &str {
        match self {
            Self::Single { pid } => pid,
            Self::Factory { factory_pid, .. } => factory_pid,
        }
    }

    /// Configuration pid
    #[must_use]
    pub fn pid(&self) -> &str {
        match self {
            Self::Single { pid } | Self::Factory { pid, .. } => pid,
        }
    }

    /// Consumer kind this resolver delivers to
    #[must_use]
    pub fn kind(&self) -> ConsumerKind {
        match self {
            Self::Single { .. } => ConsumerKind::Single,
            Self::Factory { .. } => ConsumerKind::Factory,
        }
    }

    /// Live consumers in delivery order; empty is a normal outcome
    #[must_use]
    pub fn resolve(&self, directory: &dyn ServiceDirectory) -> Vec<ConsumerRef> {
        let kind = self.kind();
        let mut targets: Vec<ConsumerRef> = directory
            .find_consumers(self.target_pid(), kind)
            .into_iter()
            .filter(|t| t.consumer.kind() == kind && t.service.is_live())
            .collect();
        targets.sort_by(|a, b| rank_order(&a.service, &b.service));
        targets
    }

    /// Hand `properties` to `target`; `None` tells a single consumer there
    /// is no configuration and a factory consumer that the member is gone
    ///
    /// # Errors
    /// The consumer's failure, with panics turned into
    /// [`CallbackError::Unexpected`].
    pub fn provide(
        &self,
        target: &ConsumerRef,
        properties: Option<&Properties>,
    ) -> Result<(), CallbackError> {
        match (self, &target.consumer) {
            (Self::Single { .. }, Consumer::Single(service)) => {
                guarded(|| service.updated(properties))
            }
            (Self::Factory { pid, .. }, Consumer::Factory(factory)) => match properties {
                Some(properties) => guarded(|| factory.updated(pid, properties)),
                None => guarded(|| factory.deleted(pid)),
            },
            _ => Err(mismatch(target)),
        }
    }

    /// Tell `target` the configuration is gone
    ///
    /// # Errors
    /// See [`TargetResolver::provide`].
    pub fn remove(&self, target: &ConsumerRef) -> Result<(), CallbackError> {
        self.provide(target, None)
    }
}

fn mismatch(target: &ConsumerRef) -> CallbackError {
    CallbackError::Unexpected(format!(
        "{} is a {:?} consumer",
        target.service,
        target.consumer.kind()
    ))
}
