//! # LogWriter: events as `tracing` records
//!
//! Renders every recorded [`Event`] through `tracing`, picking the level from the
//! event type: failures and blocked calls at `warn`, system errors at `error`,
//! everything else at `info`. Installing a `tracing` subscriber is left to the
//! application.

use async_trait::async_trait;
use tracing::{error, info, warn};

use crate::events::{Event, EventType};
use crate::subscribers::Subscribe;

/// Event writer subscriber.
#[derive(Default)]
pub struct LogWriter;

impl LogWriter {
    /// Construct a new [`LogWriter`].
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Subscribe for LogWriter {
    async fn on_event(&self, e: &Event) {
        let kind = e.event_type.as_str();
        match e.event_type {
            EventType::SystemError => {
                error!(event_id = %e.id, module = %e.module, kind, data = %e.data, "event");
            }
            EventType::CircuitFailure | EventType::CallBlocked | EventType::ContradictionDetected => {
                warn!(event_id = %e.id, module = %e.module, kind, data = %e.data, "event");
            }
            _ => {
                info!(event_id = %e.id, module = %e.module, kind, data = %e.data, "event");
            }
        }
    }

    fn name(&self) -> &'static str {
        "LogWriter"
    }
}
