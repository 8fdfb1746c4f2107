//! Work item execution
//!
//! Everything here runs on one of the two worker threads. Each task
//! re-validates against the live record before doing anything:
//! - stale generations are skipped
//! - visibility is checked per target at delivery time
//! - callback failures are reported and never stop sibling targets

use crate::configuration::Configuration;
use crate::directory::{ConsumerRef, ProviderState, ServiceRef};
use crate::error::{guarded, CallbackError};
use crate::events::EventKind;
use crate::manager::Engine;
use crate::properties::Properties;
use crate::resolver::TargetResolver;
use crate::tasks::{AttachedConfig, EventTask, UpdateTask};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Delivery counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeliveryStats {
    /// Successful property deliveries
    pub delivered: u64,
    /// Successful remove callbacks
    pub removed: u64,
    /// Deliveries skipped because a newer generation was already seen
    pub skipped_stale: u64,
    /// Deliveries refused by the binding policy
    pub denied: u64,
    /// Consumer or listener callbacks that failed
    pub callback_failures: u64,
    /// Events handed to listeners
    pub events_sent: u64,
}

#[derive(Debug, Default)]
pub(crate) struct StatsCounters {
    delivered: AtomicU64,
    removed: AtomicU64,
    skipped_stale: AtomicU64,
    denied: AtomicU64,
    callback_failures: AtomicU64,
    events_sent: AtomicU64,
}

impl StatsCounters {
    pub(crate) fn snapshot(&self) -> DeliveryStats {
        DeliveryStats {
            delivered: self.delivered.load(Ordering::Relaxed),
            removed: self.removed.load(Ordering::Relaxed),
            skipped_stale: self.skipped_stale.load(Ordering::Relaxed),
            denied: self.denied.load(Ordering::Relaxed),
            callback_failures: self.callback_failures.load(Ordering::Relaxed),
            events_sent: self.events_sent.load(Ordering::Relaxed),
        }
    }
}

fn bump(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

impl Engine {
    pub(crate) fn run_update(&self, task: UpdateTask) {
        tracing::debug!(task = %task, "running update task");
        match task {
            UpdateTask::Update {
                config,
                generation,
                properties,
            } => self.deliver_update(&config, generation, &properties),
            UpdateTask::Delete { config, owner } => self.deliver_delete(&config, owner.as_deref()),
            UpdateTask::LocationChanged {
                config,
                old_location,
            } => self.deliver_location_changed(&config, old_location.as_deref()),
            UpdateTask::ConsumerAttached {
                consumer,
                pid,
                config,
            } => self.deliver_attached(&consumer, &pid, config),
            UpdateTask::FactoryAttached {
                consumer,
                factory_pid,
                members,
            } => self.deliver_factory_attached(&consumer, &factory_pid, members),
        }
    }

    pub(crate) fn run_event(&self, task: EventTask) {
        tracing::debug!(task = %task, "running event task");
        for listener in &task.listeners {
            let state = listener.service.provider_state();
            if state != ProviderState::Active {
                tracing::debug!(
                    listener = %listener.service,
                    ?state,
                    "listener provider not active; event not sent"
                );
                continue;
            }
            match guarded(|| listener.listener.configuration_event(&task.event)) {
                Ok(()) => bump(&self.stats.events_sent),
                Err(e) => self.report_callback_error(&listener.service, &task.event.pid, &e),
            }
        }
    }

    fn deliver_update(&self, config: &Arc<Configuration>, generation: u64, properties: &Properties) {
        let pid = config.pid();
        if config.is_deleted() {
            tracing::debug!(pid, generation, "configuration deleted; update dropped");
            return;
        }
        if config.is_stale(generation) {
            bump(&self.stats.skipped_stale);
            tracing::debug!(
                pid,
                generation,
                last_delivered = config.last_delivered(),
                "configuration already delivered; nothing to be done"
            );
            return;
        }

        let resolver = TargetResolver::for_configuration(config);
        let targets = resolver.resolve(self.directory.as_ref());
        if targets.is_empty() {
            tracing::debug!(pid, generation, "no consumers for configuration");
            config.advance_watermark(generation);
            return;
        }

        if let Some(first) = targets.first() {
            self.bind(config, first.service.location());
        }
        let owner = config.owner();

        for target in &targets {
            let service = &target.service;
            if config.delivered_to(service.id(), generation) {
                bump(&self.stats.skipped_stale);
                tracing::debug!(pid, generation, service = %service, "consumer already has this generation");
                continue;
            }
            if !self.policy.can_deliver(service.location(), owner.as_deref()) {
                self.report_denied(service, pid, owner.as_deref());
                continue;
            }
            let delivered = self
                .plugins
                .apply(Some(properties), resolver.target_pid(), service);
            match resolver.provide(target, delivered.as_ref()) {
                Ok(()) => bump(&self.stats.delivered),
                Err(e) => self.report_callback_error(service, pid, &e),
            }
            config.record_delivery(service.id(), generation);
        }

        config.advance_watermark(generation);
        tracing::debug!(pid, generation, "configuration delivered");
    }

    fn deliver_delete(&self, config: &Arc<Configuration>, owner: Option<&str>) {
        let pid = config.pid();
        let resolver = TargetResolver::for_configuration(config);
        for target in resolver.resolve(self.directory.as_ref()) {
            let service = &target.service;
            if !self.policy.can_deliver(service.location(), owner) {
                continue;
            }
            match resolver.remove(&target) {
                Ok(()) => bump(&self.stats.removed),
                Err(e) => self.report_callback_error(service, pid, &e),
            }
        }

        if let Some(factory_pid) = config.factory_pid() {
            match self.factory(factory_pid) {
                Ok(factory) => {
                    if factory.remove_pid(pid) {
                        if let Err(e) = factory.store() {
                            tracing::error!(
                                pid,
                                factory_pid,
                                error = %e,
                                "failed to store factory after removing member"
                            );
                        }
                    }
                }
                Err(e) => {
                    tracing::error!(pid, factory_pid, error = %e, "failed to load factory of deleted member");
                }
            }
        }
        tracing::debug!(pid, "configuration deleted");
    }

    fn deliver_location_changed(&self, config: &Arc<Configuration>, old_location: Option<&str>) {
        let pid = config.pid();
        if config.is_deleted() {
            return;
        }
        let resolver = TargetResolver::for_configuration(config);
        let targets = resolver.resolve(self.directory.as_ref());
        if targets.is_empty() {
            tracing::debug!(pid, "no consumers to rebind");
            return;
        }

        if let Some(first) = targets.first() {
            self.bind(config, first.service.location());
        }
        let snapshot = config.snapshot();
        let current = snapshot.owner.as_deref();

        for target in &targets {
            let service = &target.service;
            let was_visible = self.policy.can_deliver(service.location(), old_location);
            let is_visible = self.policy.can_deliver(service.location(), current);

            if was_visible && !is_visible {
                match resolver.remove(target) {
                    Ok(()) => {
                        bump(&self.stats.removed);
                        tracing::debug!(pid, service = %service, "configuration revoked after location change");
                    }
                    Err(e) => self.report_callback_error(service, pid, &e),
                }
                config.forget_consumer(service.id());
            } else if !was_visible && is_visible {
                let Some(properties) = snapshot.properties.as_ref() else {
                    continue;
                };
                let delivered = self
                    .plugins
                    .apply(Some(properties), resolver.target_pid(), service);
                match resolver.provide(target, delivered.as_ref()) {
                    Ok(()) => bump(&self.stats.delivered),
                    Err(e) => self.report_callback_error(service, pid, &e),
                }
                config.record_delivery(service.id(), snapshot.generation);
            }
        }
    }

    fn deliver_attached(&self, consumer: &ConsumerRef, pid: &str, attached: Option<AttachedConfig>) {
        let service = &consumer.service;
        if !service.is_live() {
            tracing::info!(pid, service = %service, "consumer already unregistered; not updating");
            return;
        }
        let resolver = TargetResolver::new(pid, None);

        let Some(attached) = attached else {
            if let Err(e) = resolver.provide(consumer, None) {
                self.report_callback_error(service, pid, &e);
            }
            return;
        };

        let config = &attached.config;
        if config.is_deleted() {
            tracing::debug!(pid, "configuration deleted before first delivery");
            return;
        }
        if attached.properties.is_some() && config.delivered_to(service.id(), attached.generation) {
            bump(&self.stats.skipped_stale);
            tracing::debug!(
                pid,
                generation = attached.generation,
                service = %service,
                "consumer already has this generation"
            );
            return;
        }
        let owner = config.owner();
        if !self.policy.can_deliver(service.location(), owner.as_deref()) {
            self.report_denied(service, pid, owner.as_deref());
            return;
        }
        self.bind(config, service.location());

        let delivered = self
            .plugins
            .apply(attached.properties.as_ref(), resolver.target_pid(), service);
        match resolver.provide(consumer, delivered.as_ref()) {
            Ok(()) if delivered.is_some() => bump(&self.stats.delivered),
            Ok(()) => {}
            Err(e) => self.report_callback_error(service, pid, &e),
        }
        if attached.properties.is_some() {
            config.record_delivery(service.id(), attached.generation);
        }
    }

    fn deliver_factory_attached(
        &self,
        consumer: &ConsumerRef,
        factory_pid: &str,
        members: Vec<AttachedConfig>,
    ) {
        let service = &consumer.service;
        if !service.is_live() {
            tracing::info!(factory_pid, service = %service, "factory consumer already unregistered; not updating");
            return;
        }

        for member in members {
            let config = &member.config;
            let pid = config.pid();
            let Some(properties) = member.properties.as_ref() else {
                continue;
            };
            if config.is_deleted() {
                continue;
            }
            if config.delivered_to(service.id(), member.generation) {
                bump(&self.stats.skipped_stale);
                continue;
            }
            let owner = config.owner();
            if !self.policy.can_deliver(service.location(), owner.as_deref()) {
                self.report_denied(service, pid, owner.as_deref());
                continue;
            }
            self.bind(config, service.location());

            let resolver = TargetResolver::for_configuration(config);
            let delivered = self
                .plugins
                .apply(Some(properties), resolver.target_pid(), service);
            match resolver.provide(consumer, delivered.as_ref()) {
                Ok(()) => bump(&self.stats.delivered),
                Err(e) => self.report_callback_error(service, pid, &e),
            }
            config.record_delivery(service.id(), member.generation);
        }
    }

    /// Dynamically bind an unbound configuration to `location`
    fn bind(&self, config: &Configuration, location: &str) {
        if config.try_bind_location(location) {
            tracing::debug!(pid = config.pid(), location, "configuration dynamically bound");
            self.bindings.put(config.pid(), Some(location));
            self.fire_event(EventKind::LocationChanged, config.pid(), config.factory_pid());
        }
    }

    fn report_denied(&self, service: &ServiceRef, pid: &str, owner: Option<&str>) {
        bump(&self.stats.denied);
        tracing::error!(
            pid,
            service = %service,
            owner = owner.unwrap_or_default(),
            "cannot use configuration: no visibility to configuration bound to another location"
        );
    }

    fn report_callback_error(&self, service: &ServiceRef, pid: &str, error: &CallbackError) {
        bump(&self.stats.callback_failures);
        match error {
            CallbackError::Rejected {
                property: Some(property),
                reason,
            } => tracing::error!(
                pid,
                service = %service,
                property = %property,
                reason = %reason,
                "configuration rejected: property is invalid"
            ),
            CallbackError::Rejected {
                property: None,
                reason,
            } => tracing::error!(pid, service = %service, reason = %reason, "configuration rejected"),
            CallbackError::Unexpected(message) => tracing::error!(
                pid,
                service = %service,
                error = %message,
                "unexpected problem updating consumer"
            ),
        }
    }
}
