//! Example: follow a running proxy's event stream
//!
//! Binds logging stores to the registry, prints every event until Ctrl+C,
//! then shuts down and prints the metrics.
//!
//! Run with: cargo run --example tail_events -- http://localhost:8081/api
//! (`RUST_LOG=ws_event_sync=debug` shows lifecycle details)

use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use ws_event_sync::{
    bind_config_store, bind_metrics_store, bind_rules_store, ClientConfig, ConfigStore,
    ConnectionManager, EventKind, HandlerResult, MetricsStore, RulesStore, Severity,
    SystemMetrics, TerminalFailureNotifier,
};

/// Store that logs instead of calling the API
struct LoggingStore;

impl ConfigStore for LoggingStore {
    fn refetch(&self) -> HandlerResult {
        info!("Config changed, would GET /api/config");
        Ok(())
    }

    fn apply_notification(&self, message: &str, severity: Severity) {
        match severity {
            Severity::Error | Severity::Warning => warn!("[{}] {}", severity, message),
            Severity::Success | Severity::Info => info!("[{}] {}", severity, message),
        }
    }
}

impl RulesStore for LoggingStore {
    fn refetch(&self) -> HandlerResult {
        info!("Rules changed, would GET /api/rules");
        Ok(())
    }
}

impl MetricsStore for LoggingStore {
    fn set_latest(&self, snapshot: SystemMetrics) {
        info!(
            "Metrics: {} requests, {} errors, {:.1}ms avg, {} active",
            snapshot.request_count,
            snapshot.error_count,
            snapshot.avg_response_time,
            snapshot.active_connections
        );
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let base = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "http://localhost:8081/api".to_string());
    let config = ClientConfig::from_api_base(&base)?;
    info!("Following {}", config.url);

    let manager = ConnectionManager::new(config);
    let store = Arc::new(LoggingStore);

    let _config_binding = bind_config_store(manager.registry(), store.clone());
    let _rules_binding = bind_rules_store(manager.registry(), store.clone());
    let _metrics_binding = bind_metrics_store(manager.registry(), store.clone());
    manager.set_observer(Arc::new(TerminalFailureNotifier::new(store)));

    let _cache = manager.registry().subscribe_scoped(EventKind::CacheOperation, |event| {
        info!("{:?}", event);
        Ok(())
    });
    let _backends = manager
        .registry()
        .subscribe_scoped(EventKind::BackendHealthChanged, |event| {
            info!("{:?}", event);
            Ok(())
        });

    manager.connect()?;

    info!("Running... Press Ctrl+C to stop");
    tokio::signal::ctrl_c().await?;

    manager.shutdown().await;

    let snapshot = manager.metrics().snapshot();
    info!("Final metrics:");
    info!("  Connections: {}", snapshot.connections_total);
    info!("  Reconnect attempts: {}", snapshot.reconnect_attempts_total);
    info!("  Frames received: {}", snapshot.frames_received_total);
    info!("  Frames dropped: {}", snapshot.frames_dropped_total);
    info!("  Handler failures: {}", snapshot.handler_failures_total);

    Ok(())
}
