use crate::config::{ClientConfig, HealthConfig};
use crate::error::Error;
use crate::health::{HealthAction, HealthMonitor};
use crate::lifecycle::Shared;
use crate::reconnect::ReconnectPolicy;
use crate::router::EventRouter;
use crate::transport::{Frame, Session, Transport};
use std::sync::Arc;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{timeout, Duration};
use tracing::{debug, info, warn};
use url::Url;

/// Upper bound on a graceful close before the session is dropped
const CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

/// Upper bound on waiting for the previous generation's task. Longer than
/// `CLOSE_TIMEOUT`, so a stuck close is normally cut short by that task itself.
const PREVIOUS_TASK_TIMEOUT: Duration = Duration::from_secs(10);

/// Why a live session ended
enum SessionEnd {
    /// Shutdown was requested, or this generation went stale; the task exits
    Exit,
    /// The transport failed; apply the reconnect policy
    Lost(Error),
}

/// Supervisor task for one generation of the connection.
///
/// Opens the transport, pumps frames into the router, keeps the session alive
/// and retries with backoff until shutdown, staleness or the retry ceiling.
pub(crate) struct Connection<T: Transport> {
    generation: u64,
    url: Url,
    connect_timeout: Duration,
    policy: ReconnectPolicy,
    health_config: HealthConfig,
    transport: Arc<T>,
    router: EventRouter,
    shared: Arc<Shared>,
    shutdown_rx: oneshot::Receiver<()>,
    /// Task of the previous generation, awaited before the first open
    previous: Option<JoinHandle<()>>,
}

impl<T: Transport> Connection<T> {
    pub(crate) fn new(
        generation: u64,
        config: &ClientConfig,
        transport: Arc<T>,
        router: EventRouter,
        shared: Arc<Shared>,
        shutdown_rx: oneshot::Receiver<()>,
        previous: Option<JoinHandle<()>>,
    ) -> Self {
        Self {
            generation,
            url: config.url.clone(),
            connect_timeout: config.connect_timeout,
            policy: config.reconnect,
            health_config: config.health.clone(),
            transport,
            router,
            shared,
            shutdown_rx,
            previous,
        }
    }

    /// Run the connection loop (reconnects on failure)
    pub(crate) async fn run(mut self) {
        if let Some(mut previous) = self.previous.take() {
            // At most one live transport: let the old task finish closing first
            match timeout(PREVIOUS_TASK_TIMEOUT, &mut previous).await {
                Ok(Ok(())) => debug!("[WS-EVENTS] Previous connection task finished"),
                Ok(Err(e)) => warn!("[WS-EVENTS] Previous connection task failed: {}", e),
                Err(_) => {
                    warn!(
                        "[WS-EVENTS] Previous connection task still running after {:?}, aborting it",
                        PREVIOUS_TASK_TIMEOUT
                    );
                    previous.abort();
                    let _ = previous.await;
                }
            }
        }

        loop {
            let opened = tokio::select! {
                biased;
                _ = &mut self.shutdown_rx => {
                    debug!("[WS-EVENTS] Shutdown while connecting (generation {})", self.generation);
                    return;
                }
                result = timeout(self.connect_timeout, self.transport.open(&self.url)) => result,
            };

            let error = match opened {
                Ok(Ok(session)) => match self.serve(session).await {
                    SessionEnd::Exit => return,
                    SessionEnd::Lost(e) => e,
                },
                Ok(Err(e)) => e,
                Err(_) => Error::Timeout(self.connect_timeout),
            };
            debug!("[WS-EVENTS] Connection attempt ended: {}", error);

            let Some(delay) = self.shared.failed(self.generation, &self.policy, &error) else {
                return;
            };

            tokio::select! {
                biased;
                _ = &mut self.shutdown_rx => {
                    debug!("[WS-EVENTS] Reconnect timer cancelled (generation {})", self.generation);
                    return;
                }
                _ = tokio::time::sleep(delay) => {}
            }

            if !self.shared.retry(self.generation) {
                return;
            }
        }
    }

    /// Pump one open session until it ends
    async fn serve(&mut self, mut session: T::Session) -> SessionEnd {
        if !self.shared.opened(self.generation) {
            debug!("[WS-EVENTS] Opened a stale session, closing it");
            close_bounded(&mut session).await;
            return SessionEnd::Exit;
        }

        let metrics = self.shared.metrics.clone();
        metrics.record_connection();
        info!("[WS-EVENTS] Connected to {}", self.url);

        let mut health = HealthMonitor::new(self.health_config.clone());

        loop {
            let next_health_check = health.next_deadline();

            tokio::select! {
                biased;

                _ = &mut self.shutdown_rx => {
                    info!("[WS-EVENTS] Closing connection");
                    close_bounded(&mut session).await;
                    return SessionEnd::Exit;
                }

                frame = session.recv() => {
                    match frame {
                        Some(Ok(Frame::Text(text))) => {
                            metrics.record_frame_received();
                            health.data_received();
                            self.router.route(&text);
                        }
                        Some(Ok(Frame::Binary(data))) => {
                            metrics.record_frame_received();
                            health.data_received();
                            self.router.route_bytes(&data);
                        }
                        Some(Ok(Frame::Pong)) => {
                            health.pong_received();
                            metrics.record_pong();
                        }
                        Some(Ok(Frame::Close(reason))) => {
                            info!(
                                "[WS-EVENTS] Server closed the stream: {}",
                                reason.as_deref().unwrap_or("no reason")
                            );
                            return SessionEnd::Lost(Error::Closed(reason));
                        }
                        Some(Err(e)) => {
                            warn!("[WS-EVENTS] WebSocket error: {}", e);
                            return SessionEnd::Lost(e);
                        }
                        None => {
                            info!("[WS-EVENTS] WebSocket stream ended");
                            return SessionEnd::Lost(Error::Closed(None));
                        }
                    }
                }

                _ = tokio::time::sleep(next_health_check) => {
                    match health.poll() {
                        HealthAction::Wait => {}
                        HealthAction::Ping => {
                            if let Err(e) = session.ping().await {
                                warn!("[WS-EVENTS] Failed to send ping: {}", e);
                                return SessionEnd::Lost(e);
                            }
                            health.ping_sent();
                            metrics.record_ping();
                        }
                        HealthAction::MissedPong { missed } => {
                            metrics.record_health_failure();
                            warn!("[WS-EVENTS] Pong timeout (failures: {})", missed);
                        }
                        HealthAction::Unresponsive { missed } => {
                            metrics.record_health_failure();
                            warn!("[WS-EVENTS] {} pongs missed, reconnecting", missed);
                            close_bounded(&mut session).await;
                            return SessionEnd::Lost(Error::HealthCheckFailed(format!(
                                "{} consecutive pongs missed",
                                missed
                            )));
                        }
                        HealthAction::Silent => {
                            metrics.record_health_failure();
                            warn!("[WS-EVENTS] Data timeout, reconnecting");
                            close_bounded(&mut session).await;
                            return SessionEnd::Lost(Error::HealthCheckFailed(
                                "no data received within timeout".to_string(),
                            ));
                        }
                    }
                }
            }
        }
    }
}

/// Close gracefully, giving up after `CLOSE_TIMEOUT`. The caller drops the
/// session either way.
async fn close_bounded<S: Session>(session: &mut S) {
    if timeout(CLOSE_TIMEOUT, session.close()).await.is_err() {
        warn!(
            "[WS-EVENTS] Close did not finish within {:?}, dropping the session",
            CLOSE_TIMEOUT
        );
    }
}
