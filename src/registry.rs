use crate::event::{Event, EventKind};
use crate::handler::{EventHandler, HandlerResult};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Weak};
use tracing::trace;

/// Token identifying exactly one registration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

/// One handler in a kind's dispatch list
#[derive(Clone)]
pub(crate) struct Registration {
    pub(crate) id: SubscriptionId,
    pub(crate) handler: EventHandler,
}

/// Immutable view of a kind's handlers at the moment a dispatch began
pub(crate) type Snapshot = Arc<Vec<Registration>>;

#[derive(Default)]
struct RegistryState {
    /// Copy-on-write handler lists. A dispatch holds an `Arc` clone of the list;
    /// mutation clones the list if a dispatch is still using it.
    handlers: HashMap<EventKind, Snapshot>,
    /// Reverse index for removal by token
    kinds: HashMap<SubscriptionId, EventKind>,
    next_id: u64,
}

/// Shared mapping from event kind to its ordered handlers.
///
/// Cloning is cheap and every clone refers to the same registry, so stores can
/// be handed their own handle. Mutation never invalidates a dispatch in
/// progress: the router iterates a snapshot, and subscribe/unsubscribe only
/// affect dispatches that start afterwards, even when called from inside a
/// handler.
///
/// # Example
///
/// ```ignore
/// let id = registry.subscribe(EventKind::RuleUpdated, |event| {
///     if let Event::RuleUpdated(rule) = event {
///         rules.mark_stale(&rule.name);
///     }
///     Ok(())
/// });
/// // ...
/// registry.unsubscribe(id);
/// ```
#[derive(Clone, Default)]
pub struct SubscriptionRegistry {
    state: Arc<RwLock<RegistryState>>,
}

impl SubscriptionRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `handler` to the dispatch list for `kind`.
    pub fn subscribe<F>(&self, kind: EventKind, handler: F) -> SubscriptionId
    where
        F: Fn(&Event) -> HandlerResult + Send + Sync + 'static,
    {
        self.subscribe_handler(kind, Arc::new(handler))
    }

    /// Append an already shared handler to the dispatch list for `kind`.
    pub fn subscribe_handler(&self, kind: EventKind, handler: EventHandler) -> SubscriptionId {
        let mut state = self.state.write();
        state.next_id += 1;
        let id = SubscriptionId(state.next_id);

        let list = state.handlers.entry(kind).or_default();
        Arc::make_mut(list).push(Registration { id, handler });
        state.kinds.insert(id, kind);

        trace!("[WS-EVENTS] Subscribed {} to {}", id, kind);
        id
    }

    /// Like [`subscribe`](Self::subscribe), but the registration is removed
    /// when the returned guard is dropped.
    pub fn subscribe_scoped<F>(&self, kind: EventKind, handler: F) -> SubscriptionGuard
    where
        F: Fn(&Event) -> HandlerResult + Send + Sync + 'static,
    {
        let id = self.subscribe(kind, handler);
        SubscriptionGuard {
            registry: Arc::downgrade(&self.state),
            id,
        }
    }

    /// Remove exactly the registration identified by `id`.
    ///
    /// Other handlers for the same kind are untouched. Returns `false` if the
    /// token was already removed.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        remove(&self.state, id)
    }

    /// Number of handlers currently registered for `kind`
    pub fn handler_count(&self, kind: EventKind) -> usize {
        self.state
            .read()
            .handlers
            .get(&kind)
            .map_or(0, |list| list.len())
    }

    /// Returns `true` if no handler is registered for any kind
    pub fn is_empty(&self) -> bool {
        self.state.read().kinds.is_empty()
    }

    /// Handlers registered for `kind` right now, for one dispatch.
    pub(crate) fn snapshot(&self, kind: EventKind) -> Option<Snapshot> {
        self.state.read().handlers.get(&kind).cloned()
    }
}

impl fmt::Debug for SubscriptionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.read();
        let mut counts: Vec<_> = state
            .handlers
            .iter()
            .map(|(kind, list)| (*kind, list.len()))
            .collect();
        counts.sort();
        f.debug_struct("SubscriptionRegistry")
            .field("handlers", &counts)
            .finish()
    }
}

fn remove(state: &RwLock<RegistryState>, id: SubscriptionId) -> bool {
    let mut state = state.write();
    let Some(kind) = state.kinds.remove(&id) else {
        return false;
    };

    let now_empty = match state.handlers.get_mut(&kind) {
        Some(list) => {
            Arc::make_mut(list).retain(|r| r.id != id);
            list.is_empty()
        }
        None => false,
    };
    if now_empty {
        state.handlers.remove(&kind);
    }

    trace!("[WS-EVENTS] Unsubscribed {} from {}", id, kind);
    true
}

/// Registration that is removed when dropped.
///
/// Holds only a weak reference, so an outstanding guard does not keep the
/// registry alive.
#[must_use = "dropping the guard unsubscribes immediately"]
pub struct SubscriptionGuard {
    registry: Weak<RwLock<RegistryState>>,
    id: SubscriptionId,
}

impl SubscriptionGuard {
    /// The token of the guarded registration
    pub fn id(&self) -> SubscriptionId {
        self.id
    }
}

impl fmt::Debug for SubscriptionGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("SubscriptionGuard").field(&self.id).finish()
    }
}

impl Drop for SubscriptionGuard {
    fn drop(&mut self) {
        if let Some(state) = self.registry.upgrade() {
            remove(&state, self.id);
        }
    }
}
