//! Owner lifecycle events
//!
//! Host code reports scenes being unloaded and objects being destroyed
//! through a [`LifecycleEvents`] hub. Subscribers (the addressables
//! facade among them) react by releasing what those owners held.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::dock::{ObjectId, OwnerId, SceneId};

/// An owner went away
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LifecycleEvent {
    /// A scene finished unloading
    SceneUnloaded(SceneId),
    /// A game object was destroyed
    ObjectDestroyed(ObjectId),
}

impl LifecycleEvent {
    /// The owner this event is about
    pub fn owner(&self) -> OwnerId {
        match *self {
            Self::SceneUnloaded(id) => OwnerId::Scene(id),
            Self::ObjectDestroyed(id) => OwnerId::Object(id),
        }
    }
}

impl From<OwnerId> for LifecycleEvent {
    fn from(owner: OwnerId) -> Self {
        match owner {
            OwnerId::Scene(id) => Self::SceneUnloaded(id),
            OwnerId::Object(id) => Self::ObjectDestroyed(id),
        }
    }
}

/// Subscription handle returned by [`LifecycleEvents::subscribe_fn`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SubscriptionId(u64);

type Handler = Arc<dyn Fn(&LifecycleEvent) + Send + Sync>;

struct HandlerEntry {
    id: SubscriptionId,
    handler: Handler,
    priority: i32,
}

/// Hub statistics
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LifecycleStats {
    /// Total events published
    pub events_published: u64,
    /// Total handler invocations
    pub handlers_invoked: u64,
    /// Currently registered handlers
    pub handlers_registered: usize,
}

#[derive(Default)]
struct HubState {
    handlers: Vec<HandlerEntry>,
    queue: Vec<LifecycleEvent>,
    stats: LifecycleStats,
}

/// Publish/subscribe hub for owner lifecycle events
///
/// Cloning yields another handle to the same hub.
#[derive(Clone, Default)]
pub struct LifecycleEvents {
    state: Arc<RwLock<HubState>>,
    next_id: Arc<AtomicU64>,
}

impl LifecycleEvents {
    /// Create a new hub
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe a closure handler with normal priority
    pub fn subscribe_fn<F>(&self, handler: F) -> SubscriptionId
    where
        F: Fn(&LifecycleEvent) + Send + Sync + 'static,
    {
        self.subscribe_with_priority(handler, 0)
    }

    /// Subscribe a closure handler; higher priorities are called first
    pub fn subscribe_with_priority<F>(&self, handler: F, priority: i32) -> SubscriptionId
    where
        F: Fn(&LifecycleEvent) + Send + Sync + 'static,
    {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let mut state = self.state.write();
        state.handlers.push(HandlerEntry {
            id,
            handler: Arc::new(handler),
            priority,
        });
        state.handlers.sort_by(|a, b| b.priority.cmp(&a.priority));
        state.stats.handlers_registered = state.handlers.len();
        id
    }

    /// Remove a handler; returns `false` if it was not registered
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut state = self.state.write();
        let before = state.handlers.len();
        state.handlers.retain(|entry| entry.id != id);
        state.stats.handlers_registered = state.handlers.len();
        state.handlers.len() != before
    }

    /// Deliver an event to every handler now
    ///
    /// Handlers run without the hub lock held, so they may subscribe,
    /// unsubscribe or publish themselves. Returns the number of handlers
    /// invoked.
    pub fn publish(&self, event: LifecycleEvent) -> usize {
        let handlers: Vec<Handler> = {
            let mut state = self.state.write();
            state.stats.events_published += 1;
            state.handlers.iter().map(|entry| entry.handler.clone()).collect()
        };

        log::debug!("Lifecycle event {:?} -> {} handler(s)", event, handlers.len());
        for handler in &handlers {
            handler(&event);
        }

        self.state.write().stats.handlers_invoked += handlers.len() as u64;
        handlers.len()
    }

    /// Queue an event for [`process_queue`](Self::process_queue)
    pub fn queue(&self, event: LifecycleEvent) {
        self.state.write().queue.push(event);
    }

    /// Publish all queued events in arrival order
    pub fn process_queue(&self) -> usize {
        let events: Vec<LifecycleEvent> = self.state.write().queue.drain(..).collect();
        for event in &events {
            self.publish(*event);
        }
        events.len()
    }

    /// Get queue length
    pub fn queue_len(&self) -> usize {
        self.state.read().queue.len()
    }

    /// Number of registered handlers
    pub fn subscriber_count(&self) -> usize {
        self.state.read().handlers.len()
    }

    /// Get statistics
    pub fn stats(&self) -> LifecycleStats {
        self.state.read().stats.clone()
    }
}
