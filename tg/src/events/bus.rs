//! Event Bus - pub/sub for scheduler events
//!
//! Uses a tokio broadcast channel; emitting never blocks and events with no
//! subscribers are dropped.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use tokio::sync::broadcast;
use tracing::debug;

use super::types::SchedulerEvent;

/// Default channel capacity (events)
pub const DEFAULT_CHANNEL_CAPACITY: usize = 1024;

/// Broadcast bus for scheduler activity
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<SchedulerEvent>,
}

impl EventBus {
    /// Create a new event bus with the given capacity
    pub fn new(capacity: usize) -> Self {
        debug!(capacity, "EventBus::new: creating event bus");
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Emit an event to all subscribers
    ///
    /// Fire-and-forget: with no subscribers the event is dropped, and slow
    /// subscribers lose the oldest events.
    pub fn emit(&self, event: SchedulerEvent) {
        debug!(event_type = event.event_type(), item_id = event.item_id(), "EventBus::emit");
        let _ = self.tx.send(event);
    }

    /// Subscribe to events emitted from now on
    pub fn subscribe(&self) -> broadcast::Receiver<SchedulerEvent> {
        debug!("EventBus::subscribe: new subscriber");
        self.tx.subscribe()
    }

    /// Create an emitter bound to one item
    pub fn emitter_for(&self, item_id: impl Into<String>) -> EventEmitter {
        EventEmitter {
            tx: self.tx.clone(),
            item_id: item_id.into(),
            started: Arc::new(AtomicU32::new(0)),
        }
    }

    /// Get the number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CHANNEL_CAPACITY)
    }
}

/// Emits events for one item without owning the bus
///
/// Clones share the count of attempts started.
#[derive(Clone)]
pub struct EventEmitter {
    tx: broadcast::Sender<SchedulerEvent>,
    item_id: String,
    started: Arc<AtomicU32>,
}

impl EventEmitter {
    pub fn item_id(&self) -> &str {
        &self.item_id
    }

    /// Attempts announced through this emitter or any clone of it
    pub fn attempts_started(&self) -> u32 {
        self.started.load(Ordering::SeqCst)
    }

    pub fn attempt_started(&self, attempt: u32, max_attempts: u32) {
        self.started.fetch_max(attempt, Ordering::SeqCst);
        let _ = self.tx.send(SchedulerEvent::AttemptStarted {
            item_id: self.item_id.clone(),
            attempt,
            max_attempts,
        });
    }
}
