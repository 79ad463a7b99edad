//! # CircuitBreaker: fault isolation for one call path.
//!
//! Wraps an async operation and stops invoking it after `failure_threshold`
//! consecutive failures. While OPEN, calls fail fast with [`BreakerError::Open`]
//! until `timeout` has elapsed since the last failure; the next call is then
//! admitted as the single HALF_OPEN probe.
//!
//! ## Event flow
//! ```text
//! call ─► admit? ──no──► call_blocked ─► Err(Open)
//!           │yes
//!           ▼
//!       op().await ──ok──► circuit_success   (HALF_OPEN → CLOSED: state_change)
//!                  └─err─► circuit_failure   (threshold / failed probe → OPEN: state_change)
//! reset() ─► manual_reset
//! ```
//!
//! ## Persistence
//! With a [`SnapshotStore`](crate::SnapshotStore) attached, the
//! [`BreakerSnapshot`] is saved under `breaker.<name>` after every state-affecting
//! call and restored by [`CircuitBreaker::with_store`]. A missing or corrupt
//! snapshot falls back to CLOSED with zeroed counters.
//!
//! Cooldowns use wall-clock time and cannot be cancelled.

use std::collections::HashSet;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use super::state::{BreakerSnapshot, CircuitMetrics, CircuitState};
use crate::config::BreakerConfig;
use crate::error::{BreakerError, ModuleError};
use crate::events::{EventStore, EventType};
use crate::persist::{self, StoreRef};

/// Serializable view returned by [`CircuitBreaker::status`].
#[derive(Debug, Clone, Serialize)]
pub struct BreakerStatus {
    pub name: String,
    pub state: CircuitState,
    pub metrics: CircuitMetrics,
    pub failure_rate: f64,
    pub success_rate: f64,
    pub config: BreakerStatusConfig,
    pub last_failure_time: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct BreakerStatusConfig {
    pub failure_threshold: u32,
    pub timeout_ms: u64,
}

/// Circuit breaker guarding one call path.
pub struct CircuitBreaker {
    name: String,
    cfg: BreakerConfig,
    inner: Mutex<Inner>,
    events: Arc<EventStore>,
    store: Option<StoreRef>,
}

#[derive(Default)]
struct Inner {
    state: CircuitState,
    metrics: CircuitMetrics,
    last_failure: Option<DateTime<Utc>>,
    probe_in_flight: bool,
    contradictions: HashSet<String>,
}

/// Clears the probe slot if a HALF_OPEN call is dropped before completing.
struct ProbeGuard<'a> {
    breaker: &'a CircuitBreaker,
    armed: bool,
}

impl Drop for ProbeGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.breaker.lock().probe_in_flight = false;
        }
    }
}

impl CircuitBreaker {
    /// Creates a CLOSED breaker that records its events into `events`.
    pub fn new(name: impl Into<String>, cfg: BreakerConfig, events: Arc<EventStore>) -> Self {
        Self {
            name: name.into(),
            cfg,
            inner: Mutex::new(Inner::default()),
            events,
            store: None,
        }
    }

    /// Attaches a snapshot store and restores the last persisted state from it.
    pub fn with_store(mut self, store: StoreRef) -> Self {
        let key = self.snapshot_key();
        match persist::load_as::<BreakerSnapshot>(store.as_ref(), &key) {
            Ok(Some(snap)) => {
                let mut inner = self.lock();
                inner.state = snap.state;
                inner.metrics.consecutive_failures = snap.failure_count;
                inner.last_failure = snap.last_failure_time;
                drop(inner);
                debug!(breaker = %self.name, state = %snap.state, "breaker state restored");
            }
            Ok(None) => {}
            Err(e) => {
                warn!(breaker = %self.name, error = %e, "breaker snapshot unreadable; starting closed");
            }
        }
        self.store = Some(store);
        self
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Breaker name (also the `module` of the events it records).
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Key of the persisted snapshot.
    pub fn snapshot_key(&self) -> String {
        format!("breaker.{}", self.name)
    }

    /// Runs `op` through the breaker.
    ///
    /// Returns [`BreakerError::Open`] without invoking `op` while the circuit is
    /// open (or while another HALF_OPEN probe is in flight).
    pub async fn call<T, F, Fut>(&self, op: F) -> Result<T, BreakerError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, ModuleError>>,
    {
        let probe = self.admit()?;
        let mut guard = ProbeGuard {
            breaker: self,
            armed: probe,
        };
        let res = op().await;
        guard.armed = false;

        match res {
            Ok(v) => {
                self.on_success();
                Ok(v)
            }
            Err(e) => {
                self.on_failure(&e);
                Err(BreakerError::Operation(e))
            }
        }
    }

    /// Decides whether a call may run. `Ok(true)` marks the HALF_OPEN probe.
    fn admit(&self) -> Result<bool, BreakerError> {
        let mut inner = self.lock();
        match inner.state {
            CircuitState::Closed => Ok(false),
            CircuitState::Open => {
                let remaining = self.remaining_cooldown(&inner);
                if remaining.is_zero() {
                    self.transition(&mut inner, CircuitState::HalfOpen, "recovery_timeout_reached");
                    inner.probe_in_flight = true;
                    self.persist(&inner);
                    Ok(true)
                } else {
                    Err(self.block(&mut inner, remaining))
                }
            }
            CircuitState::HalfOpen => {
                if inner.probe_in_flight {
                    Err(self.block(&mut inner, Duration::ZERO))
                } else {
                    inner.probe_in_flight = true;
                    Ok(true)
                }
            }
        }
    }

    fn block(&self, inner: &mut Inner, retry_in: Duration) -> BreakerError {
        inner.metrics.blocked_calls += 1;
        let since_failure_ms = inner
            .last_failure
            .map(|t| (Utc::now() - t).num_milliseconds().max(0));
        self.emit(
            EventType::CallBlocked,
            json!({
                "state": inner.state,
                "time_since_failure_ms": since_failure_ms,
                "retry_in_ms": retry_in.as_millis() as u64,
                "blocked_calls": inner.metrics.blocked_calls,
            }),
        );
        debug!(breaker = %self.name, retry_in = ?retry_in, "call blocked");
        BreakerError::Open {
            breaker: self.name.clone(),
            retry_in,
        }
    }

    fn on_success(&self) {
        let mut inner = self.lock();
        inner.probe_in_flight = false;
        inner.metrics.total_calls += 1;
        inner.metrics.successful_calls += 1;
        inner.metrics.consecutive_failures = 0;
        if inner.state != CircuitState::Closed {
            self.transition(&mut inner, CircuitState::Closed, "recovery_successful");
        }
        self.emit(
            EventType::CircuitSuccess,
            json!({ "state": inner.state, "metrics": metrics_json(&inner.metrics) }),
        );
        self.persist(&inner);
    }

    fn on_failure(&self, err: &ModuleError) {
        let mut inner = self.lock();
        inner.probe_in_flight = false;
        inner.metrics.total_calls += 1;
        inner.metrics.failed_calls += 1;
        inner.metrics.consecutive_failures += 1;
        inner.last_failure = Some(Utc::now());

        match inner.state {
            CircuitState::HalfOpen => {
                self.transition(&mut inner, CircuitState::Open, "probe_failed");
            }
            CircuitState::Closed
                if inner.metrics.consecutive_failures >= self.cfg.failure_threshold =>
            {
                self.transition(&mut inner, CircuitState::Open, "failure_threshold_exceeded");
            }
            _ => {}
        }

        self.emit(
            EventType::CircuitFailure,
            json!({
                "state": inner.state,
                "error": err.to_string(),
                "error_label": err.as_label(),
                "consecutive_failures": inner.metrics.consecutive_failures,
                "failure_rate": inner.metrics.failure_rate(),
                "metrics": metrics_json(&inner.metrics),
            }),
        );
        self.persist(&inner);
    }

    fn transition(&self, inner: &mut Inner, to: CircuitState, reason: &str) {
        let from = inner.state;
        inner.state = to;
        inner.metrics.state_changes += 1;
        if to == CircuitState::Open {
            inner.metrics.total_trips += 1;
        }
        info!(breaker = %self.name, %from, %to, reason, "circuit state change");
        self.emit(
            EventType::StateChange,
            json!({
                "from": from,
                "to": to,
                "reason": reason,
                "consecutive_failures": inner.metrics.consecutive_failures,
            }),
        );
    }

    /// Forces CLOSED and zeroes every counter, whatever the current state.
    pub fn reset(&self) {
        let mut inner = self.lock();
        let previous = inner.state;
        inner.state = CircuitState::Closed;
        inner.metrics = CircuitMetrics::default();
        inner.last_failure = None;
        inner.probe_in_flight = false;
        info!(breaker = %self.name, %previous, "circuit manually reset");
        self.emit(EventType::ManualReset, json!({ "previous_state": previous }));
        self.persist(&inner);
    }

    /// Forces OPEN and restarts the cooldown (operator isolation).
    pub fn trip(&self, reason: &str) {
        let mut inner = self.lock();
        inner.last_failure = Some(Utc::now());
        if inner.state != CircuitState::Open {
            self.transition(&mut inner, CircuitState::Open, reason);
        }
        self.persist(&inner);
    }

    /// Records a contradiction between two services' decisions.
    ///
    /// Returns `true` the first time a pair is seen; a new pair increments
    /// `total_trips` and records `contradiction_detected`. Never gates calls.
    pub fn record_contradiction(
        &self,
        service_a: &str,
        service_b: &str,
        decision_a: &str,
        decision_b: &str,
    ) -> bool {
        let key = format!("{service_a}:{service_b}:{decision_a}:{decision_b}");
        let mut inner = self.lock();
        if !inner.contradictions.insert(key.clone()) {
            return false;
        }
        inner.metrics.total_trips += 1;
        self.emit(
            EventType::ContradictionDetected,
            json!({
                "pair": key,
                "service_a": service_a,
                "service_b": service_b,
                "decision_a": decision_a,
                "decision_b": decision_b,
                "total_trips": inner.metrics.total_trips,
            }),
        );
        true
    }

    /// Current state.
    pub fn state(&self) -> CircuitState {
        self.lock().state
    }

    /// Copy of the counters.
    pub fn metrics(&self) -> CircuitMetrics {
        self.lock().metrics.clone()
    }

    /// Wall-clock time of the last failure, if any.
    pub fn last_failure_time(&self) -> Option<DateTime<Utc>> {
        self.lock().last_failure
    }

    /// True while OPEN and inside the cooldown window (calls would be rejected).
    pub fn is_quarantining(&self) -> bool {
        let inner = self.lock();
        inner.state == CircuitState::Open && !self.remaining_cooldown(&inner).is_zero()
    }

    /// Serializable view for dashboards and the orchestrator snapshot.
    pub fn status(&self) -> BreakerStatus {
        let inner = self.lock();
        BreakerStatus {
            name: self.name.clone(),
            state: inner.state,
            metrics: inner.metrics.clone(),
            failure_rate: inner.metrics.failure_rate(),
            success_rate: inner.metrics.success_rate(),
            config: BreakerStatusConfig {
                failure_threshold: self.cfg.failure_threshold,
                timeout_ms: self.cfg.timeout.as_millis() as u64,
            },
            last_failure_time: inner.last_failure,
        }
    }

    fn remaining_cooldown(&self, inner: &Inner) -> Duration {
        match inner.last_failure {
            None => Duration::ZERO,
            Some(t) => {
                let elapsed = (Utc::now() - t).to_std().unwrap_or(Duration::ZERO);
                self.cfg.timeout.saturating_sub(elapsed)
            }
        }
    }

    fn emit(&self, event_type: EventType, data: Value) {
        self.events.add(event_type, data, &self.name, None);
    }

    fn persist(&self, inner: &Inner) {
        let Some(store) = self.store.as_ref() else {
            return;
        };
        let snap = BreakerSnapshot {
            failure_count: inner.metrics.consecutive_failures,
            state: inner.state,
            last_failure_time: inner.last_failure,
        };
        if let Err(e) = persist::save_as(store.as_ref(), &self.snapshot_key(), &snap) {
            warn!(breaker = %self.name, error = %e, "breaker snapshot not saved");
        }
    }
}

fn metrics_json(m: &CircuitMetrics) -> Value {
    json!({
        "total_calls": m.total_calls,
        "successful_calls": m.successful_calls,
        "failed_calls": m.failed_calls,
        "consecutive_failures": m.consecutive_failures,
        "state_changes": m.state_changes,
        "total_trips": m.total_trips,
        "blocked_calls": m.blocked_calls,
        "failure_rate": m.failure_rate(),
        "success_rate": m.success_rate(),
    })
}
