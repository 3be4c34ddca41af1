use crate::config::ClientConfig;
use crate::connection::Connection;
use crate::error::Error;
use crate::event::{Event, EventKind};
use crate::handler::{ConnectionObserver, HandlerResult};
use crate::lifecycle::{ConnectionState, Shared};
use crate::metrics::Metrics;
use crate::registry::{SubscriptionId, SubscriptionRegistry};
use crate::router::EventRouter;
use crate::transport::{Transport, WsTransport};
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Owns the single connection to the proxy's event stream.
///
/// Created once at application start and torn down with
/// [`shutdown`](Self::shutdown). Frames received on the connection are routed
/// to the handlers in [`registry`](Self::registry).
///
/// # Thread Safety
///
/// `ConnectionManager` is `Send + Sync` and every method may be called from
/// any task. Lifecycle transitions are serialized under one
/// `parking_lot::Mutex` that is never held across an `.await` or a callback.
///
/// # Example
///
/// ```ignore
/// let config = ClientConfig::from_api_base("http://localhost:8081/api")?;
/// let manager = ConnectionManager::new(config);
///
/// manager.subscribe(EventKind::RuleUpdated, |event| {
///     println!("{:?}", event);
///     Ok(())
/// });
/// manager.connect()?;
/// // ...
/// manager.shutdown().await;
/// ```
pub struct ConnectionManager<T: Transport = WsTransport> {
    config: ClientConfig,
    transport: Arc<T>,
    router: EventRouter,
    shared: Arc<Shared>,
}

impl ConnectionManager<WsTransport> {
    /// Create a manager over the WebSocket transport
    pub fn new(config: ClientConfig) -> Self {
        Self::with_transport(config, WsTransport::default())
    }
}

impl<T: Transport> ConnectionManager<T> {
    /// Create a manager over a custom transport
    pub fn with_transport(config: ClientConfig, transport: T) -> Self {
        let metrics = Arc::new(Metrics::new());
        let router = EventRouter::new(SubscriptionRegistry::new(), metrics.clone());
        Self {
            config,
            transport: Arc::new(transport),
            router,
            shared: Arc::new(Shared::new(metrics)),
        }
    }

    /// Open the connection.
    ///
    /// From Disconnected or Failed this starts a fresh connection task with a
    /// zero attempt count. In any other state it does nothing.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NoRuntime`] when called outside a Tokio runtime.
    pub fn connect(&self) -> Result<(), Error> {
        let runtime = Handle::try_current().map_err(|_| Error::NoRuntime)?;

        {
            let mut inner = self.shared.inner.lock();
            let Some((generation, change)) = inner.lifecycle.begin() else {
                debug!(
                    "[WS-EVENTS] connect() ignored while {}",
                    inner.lifecycle.state()
                );
                return Ok(());
            };

            let (shutdown_tx, shutdown_rx) = oneshot::channel();
            let connection = Connection::new(
                generation,
                &self.config,
                self.transport.clone(),
                self.router.clone(),
                self.shared.clone(),
                shutdown_rx,
                inner.task.take(),
            );
            inner.shutdown = Some(shutdown_tx);
            inner.task = Some(runtime.spawn(connection.run()));
            self.shared.publish(&mut inner, change);
        }

        info!("[WS-EVENTS] Connecting to {}", self.config.url);
        self.shared.flush();
        Ok(())
    }

    /// Close the connection and cancel any pending reconnect.
    ///
    /// Takes effect immediately: no reconnect timer can fire afterwards. The
    /// transport finishes closing in the background; use
    /// [`shutdown`](Self::shutdown) to wait for it.
    pub fn disconnect(&self) {
        self.end_generation(false);
    }

    /// Disconnect and wait for the connection task to finish
    pub async fn shutdown(&self) {
        if let Some(task) = self.end_generation(true) {
            let _ = task.await;
        }
        debug!("[WS-EVENTS] Connection task finished");
    }

    /// Invalidate the running generation and signal its task. With `take_task`
    /// the task handle is taken under the same lock, so a concurrent
    /// `connect()` cannot swap in a newer task.
    fn end_generation(&self, take_task: bool) -> Option<JoinHandle<()>> {
        let (ended, task) = {
            let mut inner = self.shared.inner.lock();
            let ended = match inner.lifecycle.end() {
                Some(change) => {
                    if let Some(shutdown) = inner.shutdown.take() {
                        let _ = shutdown.send(());
                    }
                    self.shared.publish(&mut inner, change);
                    true
                }
                None => false,
            };
            let task = if take_task { inner.task.take() } else { None };
            (ended, task)
        };

        if ended {
            info!("[WS-EVENTS] Disconnected");
            self.shared.flush();
        }
        task
    }

    /// Current lifecycle state
    pub fn state(&self) -> ConnectionState {
        self.shared.inner.lock().lifecycle.state()
    }

    /// Consecutive failed attempts since the last successful open
    pub fn attempt_count(&self) -> u32 {
        self.shared.inner.lock().lifecycle.attempt()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Receiver that observes every state change
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.shared.watch()
    }

    /// Install the observer for state changes and the terminal failure.
    ///
    /// Replaces any previous observer.
    pub fn set_observer(&self, observer: Arc<dyn ConnectionObserver>) {
        self.shared.set_observer(observer);
    }

    /// Shared handle to the subscription registry
    pub fn registry(&self) -> &SubscriptionRegistry {
        self.router.registry()
    }

    /// Subscribe `handler` to events of `kind`
    pub fn subscribe<F>(&self, kind: EventKind, handler: F) -> SubscriptionId
    where
        F: Fn(&Event) -> HandlerResult + Send + Sync + 'static,
    {
        self.registry().subscribe(kind, handler)
    }

    /// Remove one subscription
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.registry().unsubscribe(id)
    }

    /// The router frames are dispatched through
    pub fn router(&self) -> &EventRouter {
        &self.router
    }

    /// Get the metrics for this manager
    pub fn metrics(&self) -> Arc<Metrics> {
        self.shared.metrics.clone()
    }

    /// The configuration this manager was built with
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }
}

impl<T: Transport> Drop for ConnectionManager<T> {
    fn drop(&mut self) {
        // Abort the task to prevent an orphaned connection
        let task = self.shared.inner.lock().task.take();
        if let Some(task) = task {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HealthConfig;
    use crate::event::RuleUpdated;
    use crate::test_support::{RecordingObserver, ScriptedTransport};
    use crate::transport::Frame;
    use crate::ErrorKind;
    use tokio::time::Duration;
    use url::Url;

    fn config() -> ClientConfig {
        ClientConfig::builder(Url::parse("ws://localhost:8081/ws/events").unwrap())
            .health(HealthConfig {
                data_timeout: None,
                ..HealthConfig::default()
            })
            .build()
            .unwrap()
    }

    fn manager(
        transport: &ScriptedTransport,
    ) -> (ConnectionManager<ScriptedTransport>, Arc<RecordingObserver>) {
        let manager = ConnectionManager::with_transport(config(), transport.clone());
        let observer = Arc::new(RecordingObserver::default());
        manager.set_observer(observer.clone());
        (manager, observer)
    }

    async fn wait_for<T: Transport>(manager: &ConnectionManager<T>, state: ConnectionState) {
        let mut rx = manager.watch_state();
        rx.wait_for(|s| *s == state).await.unwrap();
    }

    #[test]
    fn test_connect_outside_runtime() {
        let transport = ScriptedTransport::new();
        let (manager, observer) = manager(&transport);
        assert!(matches!(manager.connect(), Err(Error::NoRuntime)));
        assert_eq!(manager.state(), ConnectionState::Disconnected);
        assert!(observer.changes().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_is_idempotent() {
        let transport = ScriptedTransport::new();
        let _server = transport.accept();
        let (manager, observer) = manager(&transport);

        manager.connect().unwrap();
        wait_for(&manager, ConnectionState::Connected).await;
        let changes = observer.changes().len();

        manager.connect().unwrap();
        manager.connect().unwrap();
        tokio::time::sleep(Duration::from_secs(5)).await;

        assert_eq!(transport.opens(), 1);
        assert_eq!(transport.max_live(), 1);
        assert_eq!(observer.changes().len(), changes);
        assert!(manager.is_connected());
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_while_connecting_is_noop() {
        let transport = ScriptedTransport::new();
        let _server = transport.accept();
        let (manager, observer) = manager(&transport);

        manager.connect().unwrap();
        manager.connect().unwrap();
        assert_eq!(manager.state(), ConnectionState::Connecting);

        wait_for(&manager, ConnectionState::Connected).await;
        assert_eq!(transport.opens(), 1);
        assert_eq!(
            observer.states(),
            vec![ConnectionState::Connecting, ConnectionState::Connected]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_three_failures_then_success() {
        let transport = ScriptedTransport::new();
        transport.refuse(3);
        let _server = transport.accept();
        let (manager, observer) = manager(&transport);

        let started = tokio::time::Instant::now();
        manager.connect().unwrap();
        wait_for(&manager, ConnectionState::Connected).await;

        assert_eq!(transport.opens(), 4);
        assert_eq!(manager.attempt_count(), 0);
        // 1s + 2s + 4s of backoff
        assert!(started.elapsed() >= Duration::from_secs(7));

        let changes = observer.changes();
        let retries: Vec<u32> = changes
            .iter()
            .filter(|c| c.current == ConnectionState::Reconnecting)
            .map(|c| c.attempt)
            .collect();
        assert_eq!(retries, vec![1, 2, 3]);

        let connected: Vec<_> = changes
            .iter()
            .filter(|c| c.current == ConnectionState::Connected)
            .collect();
        assert_eq!(connected.len(), 1);
        assert_eq!(connected[0].attempt, 0);
        assert_eq!(manager.metrics().reconnect_attempts(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_gives_up_after_ceiling() {
        let transport = ScriptedTransport::new();
        let (manager, observer) = manager(&transport);

        manager.connect().unwrap();
        wait_for(&manager, ConnectionState::Failed).await;

        assert_eq!(transport.opens(), 11);
        let failures = observer.terminal_failures();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].attempts, 11);
        assert_eq!(failures[0].kind, ErrorKind::ConnectionFailed);
        assert_eq!(manager.metrics().terminal_failures(), 1);

        // No automatic retries once failed
        tokio::time::sleep(Duration::from_secs(3600)).await;
        assert_eq!(transport.opens(), 11);
        assert_eq!(manager.state(), ConnectionState::Failed);
        assert_eq!(observer.terminal_failures().len(), 1);

        // ...until connect() is called again
        let _server = transport.accept();
        manager.connect().unwrap();
        wait_for(&manager, ConnectionState::Connected).await;
        assert_eq!(transport.opens(), 12);
        assert_eq!(observer.terminal_failures().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_cancels_pending_retry() {
        let transport = ScriptedTransport::new();
        let (manager, observer) = manager(&transport);

        manager.connect().unwrap();
        wait_for(&manager, ConnectionState::Reconnecting).await;
        manager.disconnect();
        assert_eq!(manager.state(), ConnectionState::Disconnected);
        assert_eq!(manager.attempt_count(), 0);

        tokio::time::sleep(Duration::from_secs(3600)).await;
        assert_eq!(transport.opens(), 1);
        assert_eq!(manager.state(), ConnectionState::Disconnected);
        assert_eq!(
            observer.states().last(),
            Some(&ConnectionState::Disconnected)
        );
        assert!(observer.terminal_failures().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_server_close_reconnects() {
        let transport = ScriptedTransport::new();
        let first = transport.accept();
        let _second = transport.accept();
        let (manager, observer) = manager(&transport);

        manager.connect().unwrap();
        wait_for(&manager, ConnectionState::Connected).await;

        first
            .send(Frame::Close(Some("going away".to_string())))
            .unwrap();
        wait_for(&manager, ConnectionState::Reconnecting).await;
        wait_for(&manager, ConnectionState::Connected).await;

        assert_eq!(transport.opens(), 2);
        assert_eq!(transport.max_live(), 1);
        assert_eq!(manager.metrics().connections(), 2);
        assert_eq!(
            observer.states(),
            vec![
                ConnectionState::Connecting,
                ConnectionState::Connected,
                ConnectionState::Reconnecting,
                ConnectionState::Connecting,
                ConnectionState::Connected,
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_frames_reach_subscribers() {
        let transport = ScriptedTransport::new();
        let server = transport.accept();
        let (manager, _observer) = manager(&transport);

        let (seen_tx, mut seen_rx) = tokio::sync::mpsc::unbounded_channel();
        manager.subscribe(EventKind::RuleUpdated, move |event| {
            seen_tx.send(event.clone())?;
            Ok(())
        });

        manager.connect().unwrap();
        server.send(Frame::Text("not json".to_string())).unwrap();
        server
            .send(Frame::Text(
                r#"{"type":"RuleUpdated","data":{"name":"api_proxy"}}"#.to_string(),
            ))
            .unwrap();

        assert_eq!(
            seen_rx.recv().await.unwrap(),
            Event::RuleUpdated(RuleUpdated {
                name: "api_proxy".to_string()
            })
        );
        assert!(manager.is_connected());
        assert_eq!(manager.metrics().frames_received(), 2);
        assert_eq!(manager.metrics().frames_dropped(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_missed_pongs_trigger_reconnect() {
        let transport = ScriptedTransport::new();
        let _silent = transport.accept_silent();
        let (manager, observer) = manager(&transport);

        manager.connect().unwrap();
        wait_for(&manager, ConnectionState::Reconnecting).await;

        let metrics = manager.metrics();
        assert_eq!(metrics.pings_sent(), 3);
        assert_eq!(metrics.health_failures(), 3);
        assert_eq!(transport.live(), 0);
        assert!(observer
            .states()
            .starts_with(&[ConnectionState::Connecting, ConnectionState::Connected]));
    }

    #[tokio::test(start_paused = true)]
    async fn test_answered_pings_keep_connection() {
        let transport = ScriptedTransport::new();
        let _server = transport.accept();
        let (manager, _observer) = manager(&transport);

        manager.connect().unwrap();
        wait_for(&manager, ConnectionState::Connected).await;
        tokio::time::sleep(Duration::from_secs(300)).await;

        assert!(manager.is_connected());
        assert!(manager.metrics().pongs_received() >= 10);
        assert_eq!(manager.metrics().health_failures(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_timeout_counts_as_failure() {
        let transport = ScriptedTransport::new();
        transport.stall();
        let _server = transport.accept();
        let (manager, observer) = manager(&transport);

        manager.connect().unwrap();
        wait_for(&manager, ConnectionState::Connected).await;

        assert_eq!(transport.opens(), 2);
        assert_eq!(
            observer.states(),
            vec![
                ConnectionState::Connecting,
                ConnectionState::Reconnecting,
                ConnectionState::Connecting,
                ConnectionState::Connected,
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnect_after_disconnect_keeps_one_transport() {
        let transport = ScriptedTransport::new();
        let _first = transport.accept();
        let _second = transport.accept();
        let (manager, _observer) = manager(&transport);

        manager.connect().unwrap();
        wait_for(&manager, ConnectionState::Connected).await;

        manager.disconnect();
        manager.connect().unwrap();
        wait_for(&manager, ConnectionState::Connected).await;

        assert_eq!(transport.opens(), 2);
        assert_eq!(transport.max_live(), 1);
        assert_eq!(transport.live(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnect_after_disconnect_with_stuck_close() {
        let transport = ScriptedTransport::new();
        let _first = transport.accept_unclosable();
        let _second = transport.accept();
        let (manager, _observer) = manager(&transport);

        manager.connect().unwrap();
        wait_for(&manager, ConnectionState::Connected).await;

        manager.disconnect();
        manager.connect().unwrap();
        tokio::time::timeout(
            Duration::from_secs(60),
            wait_for(&manager, ConnectionState::Connected),
        )
        .await
        .expect("new generation connects once the stuck close is cut short");

        assert_eq!(transport.opens(), 2);
        assert_eq!(transport.max_live(), 1);
        assert_eq!(transport.live(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_with_stuck_close_finishes() {
        let transport = ScriptedTransport::new();
        let _server = transport.accept_unclosable();
        let (manager, _observer) = manager(&transport);

        manager.connect().unwrap();
        wait_for(&manager, ConnectionState::Connected).await;

        tokio::time::timeout(Duration::from_secs(60), manager.shutdown())
            .await
            .expect("shutdown returns");
        assert_eq!(manager.state(), ConnectionState::Disconnected);
        assert_eq!(transport.live(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_waits_only_for_its_own_task() {
        let transport = ScriptedTransport::new();
        let _first = transport.accept();
        let _second = transport.accept();
        let (manager, _observer) = manager(&transport);

        manager.connect().unwrap();
        wait_for(&manager, ConnectionState::Connected).await;

        let reconnect = async {
            tokio::task::yield_now().await;
            manager.connect().unwrap();
        };
        tokio::time::timeout(
            Duration::from_secs(60),
            async { tokio::join!(manager.shutdown(), reconnect) },
        )
        .await
        .expect("shutdown does not wait on the newer generation");

        wait_for(&manager, ConnectionState::Connected).await;
        assert_eq!(transport.opens(), 2);
        assert_eq!(transport.live(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_closes_transport() {
        let transport = ScriptedTransport::new();
        let _server = transport.accept();
        let (manager, _observer) = manager(&transport);

        manager.connect().unwrap();
        wait_for(&manager, ConnectionState::Connected).await;
        manager.shutdown().await;

        assert_eq!(manager.state(), ConnectionState::Disconnected);
        assert_eq!(transport.live(), 0);

        // Disconnect while already disconnected changes nothing
        manager.disconnect();
        assert_eq!(manager.state(), ConnectionState::Disconnected);
    }
}
