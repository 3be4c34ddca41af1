//! # ws-event-sync
//!
//! Real-time event synchronization client for the reverse proxy's dashboard.
//!
//! Keeps one long-lived WebSocket connection to the proxy's `/ws/events`
//! stream, reconnects with capped exponential backoff, and fans every event
//! out to the stores that subscribed to its type.
//!
//! ## Features
//!
//! - **Auto-reconnection** with deterministic exponential backoff and an optional retry ceiling
//! - **Typed events** decoded from `{"type": ..., "data": ...}` envelopes
//! - **Fan-out dispatch** over copy-on-write handler lists, safe to mutate from inside a handler
//! - **Handler isolation** - an erroring or panicking handler never affects the others
//! - **Health monitoring** via ping/pong and data timeouts
//! - **Metrics** for observability
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use ws_event_sync::{bind_rules_store, ClientConfig, ConnectionManager};
//!
//! let config = ClientConfig::from_api_base("http://localhost:8081/api")?;
//! let manager = ConnectionManager::new(config);
//!
//! let _rules = bind_rules_store(manager.registry(), Arc::new(MyRulesStore::default()));
//! manager.connect()?;
//! // ...
//! manager.shutdown().await;
//! ```

mod config;
mod connection;
mod error;
mod event;
mod handler;
mod health;
mod lifecycle;
mod manager;
mod metrics;
mod reconnect;
mod registry;
mod router;
mod stores;
mod transport;

#[cfg(test)]
mod test_support;

pub use config::{
    events_url, ClientConfig, ClientConfigBuilder, ConfigError, HealthConfig, EVENTS_PATH,
};
pub use error::{Error, ErrorKind};
pub use event::{
    BackendHealth, BackendHealthChanged, CacheOperation, CacheStats, DecodeError, Event, EventKind,
    RuleMetrics, RuleUpdated, ServerError, SystemMetrics,
};
pub use handler::{
    ConnectionObserver, EventHandler, HandlerError, HandlerResult, StateChange, TerminalFailure,
};
pub use lifecycle::ConnectionState;
pub use manager::ConnectionManager;
pub use metrics::{Metrics, MetricsSnapshot};
pub use reconnect::ReconnectPolicy;
pub use registry::{SubscriptionGuard, SubscriptionId, SubscriptionRegistry};
pub use router::{EventRouter, RouteOutcome};
pub use stores::{
    bind_config_store, bind_metrics_store, bind_rules_store, ConfigStore, MetricsStore,
    RulesStore, Severity, StoreBinding, TerminalFailureNotifier,
};
pub use transport::{Frame, Session, Transport, WsSession, WsTransport};

/// Result type for ws-event-sync operations
pub type Result<T> = std::result::Result<T, Error>;
