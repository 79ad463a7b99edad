//! Circuit breaker: per-call-path fault isolation.
//!
//! - [`CircuitBreaker`] the guard itself
//! - [`CircuitState`], [`CircuitMetrics`] state machine position and counters
//! - [`BreakerSnapshot`] persisted form, [`BreakerStatus`] monitoring view

#[allow(clippy::module_inception)]
mod breaker;
mod state;

pub use breaker::{BreakerStatus, BreakerStatusConfig, CircuitBreaker};
pub use state::{BreakerSnapshot, CircuitMetrics, CircuitState};
