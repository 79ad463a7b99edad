//! Breaker state, counters and the persisted snapshot.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Position of a circuit breaker's state machine.
///
/// ```text
/// CLOSED ──(consecutive_failures ≥ threshold)──► OPEN
/// OPEN ──(cooldown elapsed, next call)──► HALF_OPEN
/// HALF_OPEN ──(probe ok)──► CLOSED
/// HALF_OPEN ──(probe failed)──► OPEN
/// any ──(reset)──► CLOSED
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Calls pass through.
    #[default]
    Closed,
    /// Calls are rejected without running.
    Open,
    /// A single probe call is allowed.
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half_open",
        }
    }
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Counters owned by one breaker.
///
/// `total_calls` counts operations that actually ran; rejected calls are
/// counted in `blocked_calls` only.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CircuitMetrics {
    pub total_calls: u64,
    pub successful_calls: u64,
    pub failed_calls: u64,
    pub consecutive_failures: u32,
    pub state_changes: u64,
    /// Transitions into OPEN plus newly seen contradiction pairs.
    pub total_trips: u64,
    pub blocked_calls: u64,
}

impl CircuitMetrics {
    /// `failed / total`, `0.0` before the first call.
    pub fn failure_rate(&self) -> f64 {
        if self.total_calls == 0 {
            0.0
        } else {
            self.failed_calls as f64 / self.total_calls as f64
        }
    }

    /// `1 - failure_rate`.
    pub fn success_rate(&self) -> f64 {
        1.0 - self.failure_rate()
    }
}

/// Persisted form of a breaker, keyed by breaker name.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BreakerSnapshot {
    pub failure_count: u32,
    pub state: CircuitState,
    pub last_failure_time: Option<DateTime<Utc>>,
}
