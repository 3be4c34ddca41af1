use crate::event::{DecodeError, Event};
use crate::handler::call_guarded;
use crate::metrics::Metrics;
use crate::registry::SubscriptionRegistry;
use std::sync::Arc;
use tracing::{debug, trace, warn};

/// What happened to one routed frame
#[derive(Debug)]
pub enum RouteOutcome {
    /// The frame could not be decoded and was dropped
    Dropped(DecodeError),
    /// The event was handed to every handler in the dispatch snapshot
    Delivered {
        /// Handlers invoked
        handlers: usize,
        /// Handlers that returned an error or panicked
        failures: usize,
    },
}

impl RouteOutcome {
    /// Returns `true` if the frame decoded into an event
    pub fn is_delivered(&self) -> bool {
        matches!(self, RouteOutcome::Delivered { .. })
    }
}

/// Decodes frames and fans each event out to its subscribers.
///
/// The router holds no per-dispatch state; it reads the registry snapshot for
/// the event's kind and invokes the handlers in registration order.
#[derive(Debug, Clone)]
pub struct EventRouter {
    registry: SubscriptionRegistry,
    metrics: Arc<Metrics>,
}

impl EventRouter {
    pub fn new(registry: SubscriptionRegistry, metrics: Arc<Metrics>) -> Self {
        Self { registry, metrics }
    }

    /// The registry this router dispatches from
    pub fn registry(&self) -> &SubscriptionRegistry {
        &self.registry
    }

    /// Decode a text frame and dispatch it.
    ///
    /// Undecodable frames are logged and dropped; this never fails.
    pub fn route(&self, frame: &str) -> RouteOutcome {
        match Event::decode(frame) {
            Ok(event) => self.dispatch(&event),
            Err(e) => {
                self.metrics.record_frame_dropped();
                warn!(
                    "[WS-EVENTS] Dropping frame ({} bytes): {}",
                    frame.len(),
                    e
                );
                RouteOutcome::Dropped(e)
            }
        }
    }

    /// Route a binary frame holding UTF-8 JSON.
    pub fn route_bytes(&self, frame: &[u8]) -> RouteOutcome {
        match std::str::from_utf8(frame) {
            Ok(text) => self.route(text),
            Err(_) => {
                self.metrics.record_frame_dropped();
                warn!(
                    "[WS-EVENTS] Dropping binary frame ({} bytes): not UTF-8",
                    frame.len()
                );
                RouteOutcome::Dropped(DecodeError::InvalidUtf8)
            }
        }
    }

    /// Invoke every handler registered for `event`'s kind at this moment.
    pub fn dispatch(&self, event: &Event) -> RouteOutcome {
        let kind = event.kind();
        self.metrics.record_event_dispatched();

        let Some(snapshot) = self.registry.snapshot(kind) else {
            trace!("[WS-EVENTS] No subscribers for {}", kind);
            return RouteOutcome::Delivered {
                handlers: 0,
                failures: 0,
            };
        };

        let mut failures = 0;
        for registration in snapshot.iter() {
            if let Err(e) = call_guarded(|| (registration.handler)(event)) {
                failures += 1;
                self.metrics.record_handler_failure();
                warn!(
                    "[WS-EVENTS] Handler {} for {} failed: {}",
                    registration.id, kind, e
                );
            }
        }

        debug!(
            "[WS-EVENTS] Dispatched {} to {} handlers ({} failed)",
            kind,
            snapshot.len(),
            failures
        );
        RouteOutcome::Delivered {
            handlers: snapshot.len(),
            failures,
        }
    }
}
