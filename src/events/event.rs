//! # Audit events recorded by the core.
//!
//! [`EventType`] classifies what happened; [`Event`] is the immutable record
//! appended to the [`EventStore`](crate::EventStore).
//!
//! ## Identity and ordering
//! Each event carries the store's monotonic sequence number (`seq`) and an id of
//! the form `<module>_<event_type>_<seq>`. Both are assigned under the store's
//! writer lock, so ids are unique and `seq` follows insertion order.
//!
//! ## Wire format
//! ```json
//! {"id":"alpha_circuit_failure_7","seq":7,"event_type":"circuit_failure",
//!  "timestamp":"2026-01-01T00:00:00Z","module":"alpha",
//!  "data":{"consecutive_failures":3},"version":"1.0"}
//! ```

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Schema version written into every event.
pub const SCHEMA_VERSION: &str = "1.0";

/// Classification of recorded events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    /// A module produced a result (or the recovery system took a decision).
    DecisionMade,
    /// A call through a circuit breaker succeeded.
    CircuitSuccess,
    /// A call through a circuit breaker failed.
    CircuitFailure,
    /// A breaker transitioned, or the orchestrator changed phase.
    StateChange,
    /// A breaker rejected a call without executing it.
    CallBlocked,
    /// A breaker was reset by an operator.
    ManualReset,
    /// An error was handed to recovery, or orchestrator bookkeeping failed.
    SystemError,
    /// A module reported a confidence change.
    ConfidenceUpdate,
    /// A threshold was tuned at runtime.
    ThresholdAdjusted,
    /// Two modules produced contradicting decisions.
    ContradictionDetected,
}

impl EventType {
    /// Every event type, in declaration order.
    pub const ALL: [EventType; 10] = [
        EventType::DecisionMade,
        EventType::CircuitSuccess,
        EventType::CircuitFailure,
        EventType::StateChange,
        EventType::CallBlocked,
        EventType::ManualReset,
        EventType::SystemError,
        EventType::ConfidenceUpdate,
        EventType::ThresholdAdjusted,
        EventType::ContradictionDetected,
    ];

    /// Stable snake_case name (also used in event ids).
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::DecisionMade => "decision_made",
            EventType::CircuitSuccess => "circuit_success",
            EventType::CircuitFailure => "circuit_failure",
            EventType::StateChange => "state_change",
            EventType::CallBlocked => "call_blocked",
            EventType::ManualReset => "manual_reset",
            EventType::SystemError => "system_error",
            EventType::ConfidenceUpdate => "confidence_update",
            EventType::ThresholdAdjusted => "threshold_adjusted",
            EventType::ContradictionDetected => "contradiction_detected",
        }
    }

    /// Types that external alerting subsystems react to.
    pub fn is_health_signal(&self) -> bool {
        matches!(
            self,
            EventType::StateChange
                | EventType::CircuitFailure
                | EventType::SystemError
                | EventType::CallBlocked
        )
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Immutable audit record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// `<module>_<event_type>_<seq>`.
    pub id: String,
    /// Store-wide monotonic sequence number.
    pub seq: u64,
    pub event_type: EventType,
    pub timestamp: DateTime<Utc>,
    /// Component or module that emitted the event.
    pub module: String,
    /// Free-form payload (a JSON object in practice).
    pub data: Value,
    /// Groups events belonging to one logical operation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
    pub version: String,
}

impl Event {
    pub(crate) fn record(
        seq: u64,
        event_type: EventType,
        module: &str,
        data: Value,
        correlation_id: Option<&str>,
    ) -> Self {
        Self {
            id: format!("{module}_{}_{seq}", event_type.as_str()),
            seq,
            event_type,
            timestamp: Utc::now(),
            module: module.to_string(),
            data,
            correlation_id: correlation_id.map(str::to_string),
            version: SCHEMA_VERSION.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_id_format() {
        let ev = Event::record(42, EventType::CallBlocked, "alpha", json!({}), None);
        assert_eq!(ev.id, "alpha_call_blocked_42");
        assert_eq!(ev.version, "1.0");
    }

    #[test]
    fn test_serde_names_match_as_str() {
        for t in EventType::ALL {
            let encoded = serde_json::to_string(&t).unwrap();
            assert_eq!(encoded, format!("\"{}\"", t.as_str()));
        }
    }

    #[test]
    fn test_correlation_id_is_optional_on_the_wire() {
        let line = r#"{"id":"a_state_change_1","seq":1,"event_type":"state_change",
            "timestamp":"2026-01-01T00:00:00Z","module":"a","data":{},"version":"1.0"}"#;
        let ev: Event = serde_json::from_str(line).unwrap();
        assert_eq!(ev.correlation_id, None);
        assert_eq!(ev.event_type, EventType::StateChange);
    }
}
