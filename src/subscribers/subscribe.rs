//! # Subscriber trait
//!
//! `Subscribe` is the extension point for external collaborators (alerting,
//! dashboards, reaction modules) that want every recorded [`Event`]. Each
//! subscriber is driven by a dedicated worker fed by a bounded queue owned by
//! the [`SubscriberSet`](crate::SubscriberSet).
//!
//! ## Contract
//! - Implementations may be slow; they never block the event store or other subscribers.
//! - On queue overflow the event is dropped for that subscriber (logged).
//!
//! ## Example
//! ```rust
//! use faultvisor::{Event, EventType, Subscribe};
//!
//! struct Pager;
//!
//! #[async_trait::async_trait]
//! impl Subscribe for Pager {
//!     async fn on_event(&self, ev: &Event) {
//!         if ev.event_type == EventType::StateChange && ev.data["to"] == "open" {
//!             // page the on-call engineer...
//!         }
//!     }
//!     fn name(&self) -> &'static str { "pager" }
//! }
//! ```

use async_trait::async_trait;

use crate::events::Event;

/// Contract for event subscribers.
#[async_trait]
pub trait Subscribe: Send + Sync + 'static {
    /// Handle a single event.
    async fn on_event(&self, event: &Event);

    /// Human-readable name (for logs).
    fn name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }

    /// Preferred capacity of this subscriber's queue.
    fn queue_capacity(&self) -> usize {
        1024
    }
}
