//! # Broadcast of appended events.
//!
//! [`Bus`] wraps [`tokio::sync::broadcast`]. The [`EventStore`](crate::EventStore)
//! publishes every appended [`Event`] here, after it has been recorded, so
//! collaborators (alerting, dashboards, the orchestrator's subscriber fan-out)
//! see the same sequence the log holds.
//!
//! ```text
//! CircuitBreaker ──┐
//! Recovery       ──┼──► EventStore::add ──► Bus ──► receivers (SubscriberSet, ...)
//! Orchestrator   ──┘     (log + memory)
//! ```
//!
//! ## Rules
//! - `publish()` never blocks.
//! - Receivers that fall behind get `RecvError::Lagged(n)` and skip `n` events;
//!   the store itself still holds them.
//! - With no receivers the event is simply not broadcast.

use tokio::sync::broadcast;

use super::event::Event;

/// Broadcast channel for recorded events.
#[derive(Clone, Debug)]
pub struct Bus {
    tx: broadcast::Sender<Event>,
}

impl Bus {
    /// Creates a new bus; capacity is clamped to at least 1.
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel::<Event>(capacity.max(1));
        Self { tx }
    }

    /// Publishes an event to all active receivers.
    pub fn publish(&self, ev: Event) {
        let _ = self.tx.send(ev);
    }

    /// Creates a receiver observing events published from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.tx.subscribe()
    }

    /// Number of live receivers.
    pub fn receiver_count(&self) -> usize {
        self.tx.receiver_count()
    }
}
