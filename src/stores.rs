//! Contracts for the client-side stores fed by the event stream.
//!
//! Stores never see the transport. A `bind_*` function subscribes a store to
//! the kinds it cares about and returns a [`StoreBinding`] that unsubscribes
//! when dropped, so a store can be mounted and unmounted freely.

use crate::event::{Event, EventKind, SystemMetrics};
use crate::handler::{ConnectionObserver, HandlerResult, TerminalFailure};
use crate::registry::{SubscriptionGuard, SubscriptionId, SubscriptionRegistry};
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// Severity of a user-facing notification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Severity {
    Success,
    Info,
    Warning,
    Error,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Severity::Success => "success",
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::Error => "error",
        };
        f.write_str(name)
    }
}

/// Holds the proxy configuration and surfaces notifications.
pub trait ConfigStore: Send + Sync + 'static {
    /// Reload the configuration from the API
    fn refetch(&self) -> HandlerResult;

    /// Show a notification to the operator
    fn apply_notification(&self, message: &str, severity: Severity);
}

/// Holds the forwarding rules.
pub trait RulesStore: Send + Sync + 'static {
    /// Reload the rule list from the API
    fn refetch(&self) -> HandlerResult;
}

/// Holds the latest metrics snapshot.
pub trait MetricsStore: Send + Sync + 'static {
    fn set_latest(&self, snapshot: SystemMetrics);
}

/// Subscriptions made on behalf of one store; dropping it unbinds the store.
#[must_use = "dropping the binding unsubscribes the store immediately"]
pub struct StoreBinding {
    guards: Vec<SubscriptionGuard>,
}

impl StoreBinding {
    /// Tokens of the underlying subscriptions
    pub fn ids(&self) -> Vec<SubscriptionId> {
        self.guards.iter().map(SubscriptionGuard::id).collect()
    }

    /// Unsubscribe now
    pub fn unbind(self) {
        debug!("[WS-EVENTS] Unbinding store ({} subscriptions)", self.guards.len());
    }
}

impl fmt::Debug for StoreBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreBinding")
            .field("ids", &self.ids())
            .finish()
    }
}

/// Refetch on `ConfigChanged`; show server `Error` events as notifications.
pub fn bind_config_store<S>(registry: &SubscriptionRegistry, store: Arc<S>) -> StoreBinding
where
    S: ConfigStore + ?Sized,
{
    let on_change = store.clone();
    let changed = registry.subscribe_scoped(EventKind::ConfigChanged, move |_| {
        on_change.refetch()
    });

    let errors = registry.subscribe_scoped(EventKind::Error, move |event| {
        if let Event::Error(error) = event {
            store.apply_notification(&error.message, Severity::Error);
        }
        Ok(())
    });

    StoreBinding {
        guards: vec![changed, errors],
    }
}

/// Refetch the rule list on `RuleUpdated`.
pub fn bind_rules_store<S>(registry: &SubscriptionRegistry, store: Arc<S>) -> StoreBinding
where
    S: RulesStore + ?Sized,
{
    let updated = registry.subscribe_scoped(EventKind::RuleUpdated, move |_| store.refetch());
    StoreBinding {
        guards: vec![updated],
    }
}

/// Replace the metrics snapshot on every `MetricsUpdate`.
pub fn bind_metrics_store<S>(registry: &SubscriptionRegistry, store: Arc<S>) -> StoreBinding
where
    S: MetricsStore + ?Sized,
{
    let update = registry.subscribe_scoped(EventKind::MetricsUpdate, move |event| {
        if let Event::MetricsUpdate(metrics) = event {
            store.set_latest(metrics.clone());
        }
        Ok(())
    });
    StoreBinding {
        guards: vec![update],
    }
}

/// Observer that reports the terminal connection failure through a
/// [`ConfigStore`] notification.
pub struct TerminalFailureNotifier<S: ConfigStore + ?Sized> {
    store: Arc<S>,
}

impl<S: ConfigStore + ?Sized> TerminalFailureNotifier<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }
}

impl<S: ConfigStore + ?Sized> ConnectionObserver for TerminalFailureNotifier<S> {
    fn on_terminal_failure(&self, failure: &TerminalFailure) {
        let message = format!(
            "Lost connection to the proxy after {} attempts: {}",
            failure.attempts, failure.last_error
        );
        self.store.apply_notification(&message, Severity::Error);
    }
}
