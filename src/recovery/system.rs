//! # ErrorRecoverySystem: classification-driven recovery.
//!
//! ```text
//! handle(kind, msg)
//!   ├─► lock: count error, look up classification, bump the chain's attempt count
//!   │         (chain exhausted ─► Exhausted + incident, failed_recoveries += 1)
//!   ├─► system_error event
//!   ├─► strategy::execute (static match; waits are cancellable)
//!   └─► lock: count outcome ─► decision_made | system_error(recovery_failed) ─► save metrics
//! ```
//!
//! Attempt chains are keyed: [`handle`](ErrorRecoverySystem::handle) by kind and
//! message, [`handle_for_module`](ErrorRecoverySystem::handle_for_module) by module
//! and kind. A chain closes when the caller resolves it. An exhausted chain
//! escalates to an operator incident; later errors on the same chain report the
//! same incident id.
//!
//! [`recover`](ErrorRecoverySystem::recover) guards full recovery passes: two
//! passes are at least `cooldown` apart, and after `max_consecutive_failures`
//! failed passes the system refuses until [`reset_metrics`](ErrorRecoverySystem::reset_metrics).

use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::classify::{ErrorKind, RecoveryStrategy};
use super::strategy::{self, ErrorContext, RecoveryOutcome};
use crate::config::RecoveryConfig;
use crate::error::{ModuleError, RecoveryError};
use crate::events::{EventStore, EventType};
use crate::persist::{self, StoreRef};

/// Snapshot key of the persisted metrics.
pub const METRICS_KEY: &str = "recovery.metrics";

const EVENT_MODULE: &str = "error_recovery";

/// Recovery counters (persisted after every handling call).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RecoveryMetrics {
    pub total_errors: u64,
    pub successful_recoveries: u64,
    pub failed_recoveries: u64,
    pub contradiction_count: u64,
    pub last_error_time: Option<DateTime<Utc>>,
}

impl RecoveryMetrics {
    /// `successful / (successful + failed)`, `1.0` when nothing was handled.
    pub fn recovery_rate(&self) -> f64 {
        let done = self.successful_recoveries + self.failed_recoveries;
        if done == 0 {
            1.0
        } else {
            self.successful_recoveries as f64 / done as f64
        }
    }
}

/// Serializable view returned by [`ErrorRecoverySystem::status`].
#[derive(Debug, Clone, Serialize)]
pub struct RecoveryStatus {
    pub metrics: RecoveryMetrics,
    pub recovery_rate: f64,
    pub strategies_used: BTreeMap<String, u64>,
    pub consecutive_recover_failures: u32,
    pub locked: bool,
    /// `healthy` (rate ≥ 0.8), `degraded` (≥ 0.5) or `critical`.
    pub health: &'static str,
}

#[derive(Default)]
struct Chain {
    attempts: u32,
    incident: Option<String>,
}

#[derive(Default)]
struct State {
    metrics: RecoveryMetrics,
    chains: HashMap<String, Chain>,
    strategies_used: BTreeMap<RecoveryStrategy, u64>,
    recover_failures: u32,
    last_recover: Option<DateTime<Utc>>,
}

/// Classifies errors and runs the matching recovery strategy.
pub struct ErrorRecoverySystem {
    cfg: RecoveryConfig,
    state: Mutex<State>,
    events: Arc<EventStore>,
    store: Option<StoreRef>,
    token: CancellationToken,
    incidents: AtomicU64,
}

impl ErrorRecoverySystem {
    /// Creates a recovery system recording into `events`.
    pub fn new(cfg: RecoveryConfig, events: Arc<EventStore>) -> Self {
        Self {
            cfg,
            state: Mutex::new(State::default()),
            events,
            store: None,
            token: CancellationToken::new(),
            incidents: AtomicU64::new(0),
        }
    }

    /// Attaches a snapshot store and restores persisted metrics from it.
    pub fn with_store(mut self, store: StoreRef) -> Self {
        match persist::load_as::<RecoveryMetrics>(store.as_ref(), METRICS_KEY) {
            Ok(Some(metrics)) => self.lock().metrics = metrics,
            Ok(None) => {}
            Err(e) => warn!(error = %e, "recovery metrics unreadable; starting from zero"),
        }
        self.store = Some(store);
        self
    }

    /// Uses `token` to cut strategy waits short (e.g. a child of the shutdown token).
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.token = token;
        self
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Handles an error chain keyed by kind and message.
    pub async fn handle(&self, kind: ErrorKind, message: &str) -> RecoveryOutcome {
        self.handle_keyed(format!("{kind}:{message}"), kind, message, None)
            .await
    }

    /// Handles an error raised by `module`; the chain is keyed by module and kind.
    pub async fn handle_for_module(
        &self,
        module: &str,
        kind: ErrorKind,
        message: &str,
    ) -> RecoveryOutcome {
        self.handle_keyed(format!("{module}:{kind}"), kind, message, Some(module))
            .await
    }

    async fn handle_keyed(
        &self,
        key: String,
        kind: ErrorKind,
        message: &str,
        module: Option<&str>,
    ) -> RecoveryOutcome {
        let now = Utc::now();
        let classification = self.cfg.classifications.lookup(kind);

        let ctx = {
            let mut guard = self.lock();
            let st = &mut *guard;
            st.metrics.total_errors += 1;
            st.metrics.last_error_time = Some(now);

            let chain = st.chains.entry(key.clone()).or_default();
            let prior = chain.attempts;
            if prior >= classification.max_attempts {
                let incident_id = match &chain.incident {
                    Some(id) => id.clone(),
                    None => {
                        let id = self.next_incident();
                        chain.incident = Some(id.clone());
                        id
                    }
                };
                st.metrics.failed_recoveries += 1;
                let outcome = RecoveryOutcome::Exhausted {
                    attempts: prior,
                    incident_id,
                    contact: self.cfg.contact.clone(),
                };
                warn!(%kind, key = %key, attempts = prior, "recovery attempts exhausted");
                self.emit(
                    EventType::SystemError,
                    json!({
                        "kind": kind,
                        "message": message,
                        "module": module,
                        "recovery_failed": true,
                        "result": outcome,
                    }),
                );
                self.persist(&st.metrics);
                return outcome;
            }

            chain.attempts += 1;
            *st.strategies_used.entry(classification.strategy).or_default() += 1;
            ErrorContext {
                kind,
                message: message.to_string(),
                module: module.map(str::to_string),
                timestamp: now,
                attempt_count: prior,
                max_retries: classification.max_attempts,
                classification,
            }
        };

        info!(
            %kind,
            strategy = %classification.strategy,
            attempt = ctx.attempt_count + 1,
            max_attempts = ctx.max_retries,
            "handling error"
        );
        self.emit(
            EventType::SystemError,
            json!({
                "kind": kind,
                "message": message,
                "module": module,
                "severity": classification.severity,
                "strategy": classification.strategy,
                "attempt": ctx.attempt_count + 1,
                "max_attempts": ctx.max_retries,
            }),
        );

        let incident = match classification.strategy {
            RecoveryStrategy::ManualIntervention => self.incidents.fetch_add(1, Ordering::Relaxed) + 1,
            _ => 0,
        };
        let outcome = strategy::execute(&ctx, &self.cfg, &self.token, incident).await;
        if let RecoveryOutcome::ManualIntervention { incident_id, .. } = &outcome {
            if let Some(chain) = self.lock().chains.get_mut(&key) {
                chain.incident = Some(incident_id.clone());
            }
        }
        self.record(&ctx, &outcome);
        outcome
    }

    fn next_incident(&self) -> String {
        strategy::incident_id(self.incidents.fetch_add(1, Ordering::Relaxed) + 1)
    }

    /// Handles an error by re-invoking `op` right away when the kind's strategy is
    /// IMMEDIATE_RETRY (up to max attempts). Other strategies behave like [`handle`](Self::handle).
    ///
    /// Returns the outcome and, when a retry succeeded, its value.
    pub async fn handle_with_retry<T, F, Fut>(
        &self,
        kind: ErrorKind,
        message: &str,
        op: F,
    ) -> (RecoveryOutcome, Option<T>)
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ModuleError>>,
    {
        let classification = self.cfg.classifications.lookup(kind);
        if classification.strategy != RecoveryStrategy::ImmediateRetry {
            return (self.handle(kind, message).await, None);
        }
        self.retry_immediately(None, kind, message, op).await
    }

    /// [`handle_with_retry`](Self::handle_with_retry) for an error raised by `module`;
    /// other strategies behave like [`handle_for_module`](Self::handle_for_module).
    pub async fn handle_for_module_with_retry<T, F, Fut>(
        &self,
        module: &str,
        kind: ErrorKind,
        message: &str,
        op: F,
    ) -> (RecoveryOutcome, Option<T>)
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ModuleError>>,
    {
        let classification = self.cfg.classifications.lookup(kind);
        if classification.strategy != RecoveryStrategy::ImmediateRetry {
            return (self.handle_for_module(module, kind, message).await, None);
        }
        self.retry_immediately(Some(module), kind, message, op).await
    }

    async fn retry_immediately<T, F, Fut>(
        &self,
        module: Option<&str>,
        kind: ErrorKind,
        message: &str,
        mut op: F,
    ) -> (RecoveryOutcome, Option<T>)
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ModuleError>>,
    {
        let classification = self.cfg.classifications.lookup(kind);

        let now = Utc::now();
        {
            let mut st = self.lock();
            st.metrics.total_errors += 1;
            st.metrics.last_error_time = Some(now);
            *st.strategies_used.entry(classification.strategy).or_default() += 1;
        }
        let mut ctx = ErrorContext {
            kind,
            message: message.to_string(),
            module: module.map(str::to_string),
            timestamp: now,
            attempt_count: 0,
            max_retries: classification.max_attempts,
            classification,
        };
        self.emit(
            EventType::SystemError,
            json!({
                "kind": kind,
                "message": message,
                "module": module,
                "severity": classification.severity,
                "strategy": classification.strategy,
                "max_attempts": ctx.max_retries,
            }),
        );

        while ctx.attempt_count < ctx.max_retries {
            if self.token.is_cancelled() {
                return (RecoveryOutcome::Interrupted, None);
            }
            ctx.attempt_count += 1;
            match op().await {
                Ok(value) => {
                    let outcome = RecoveryOutcome::Retried {
                        attempts: ctx.attempt_count,
                    };
                    self.record(&ctx, &outcome);
                    return (outcome, Some(value));
                }
                Err(e) => debug!(%kind, attempt = ctx.attempt_count, error = %e, "immediate retry failed"),
            }
        }

        let outcome = RecoveryOutcome::Exhausted {
            attempts: ctx.attempt_count,
            incident_id: self.next_incident(),
            contact: self.cfg.contact.clone(),
        };
        self.record(&ctx, &outcome);
        (outcome, None)
    }

    fn record(&self, ctx: &ErrorContext, outcome: &RecoveryOutcome) {
        let mut st = self.lock();
        let data = json!({
            "decision": "recovery",
            "kind": ctx.kind,
            "module": ctx.module,
            "strategy": ctx.classification.strategy,
            "attempt": ctx.attempt_count + 1,
            "result": outcome,
        });
        if outcome.is_recovered() {
            st.metrics.successful_recoveries += 1;
            self.emit(EventType::DecisionMade, data);
        } else if outcome.is_terminal() {
            st.metrics.failed_recoveries += 1;
            warn!(kind = %ctx.kind, outcome = outcome.as_label(), "recovery failed");
            let mut data = data;
            data["recovery_failed"] = Value::Bool(true);
            self.emit(EventType::SystemError, data);
        }
        self.persist(&st.metrics);
    }

    /// Closes the chain opened by [`handle`](Self::handle) for this kind and message.
    pub fn resolve(&self, kind: ErrorKind, message: &str) {
        self.lock().chains.remove(&format!("{kind}:{message}"));
    }

    /// Closes every chain opened for `module`.
    pub fn resolve_module(&self, module: &str) {
        let prefix = format!("{module}:");
        self.lock().chains.retain(|k, _| !k.starts_with(&prefix));
    }

    /// Records a contradiction between two module states; returns the new count.
    pub fn handle_contradiction(&self, state_a: &Value, state_b: &Value) -> u64 {
        let mut st = self.lock();
        st.metrics.contradiction_count += 1;
        let count = st.metrics.contradiction_count;
        self.emit(
            EventType::ContradictionDetected,
            json!({ "state_a": state_a, "state_b": state_b, "contradiction_count": count }),
        );
        self.persist(&st.metrics);
        count
    }

    /// Runs a full recovery pass, subject to the cooldown and the failure lock.
    ///
    /// `op` reports whether the pass succeeded.
    pub async fn recover<F, Fut>(&self, op: F) -> Result<bool, RecoveryError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = bool>,
    {
        {
            let mut st = self.lock();
            if st.recover_failures >= self.cfg.max_consecutive_failures {
                return Err(RecoveryError::Locked {
                    consecutive_failures: st.recover_failures,
                });
            }
            let now = Utc::now();
            if let Some(last) = st.last_recover {
                let elapsed = (now - last).to_std().unwrap_or(Duration::ZERO);
                let remaining = self.cfg.cooldown.saturating_sub(elapsed);
                if !remaining.is_zero() {
                    return Err(RecoveryError::CoolingDown { remaining });
                }
            }
            st.last_recover = Some(now);
        }

        let ok = op().await;

        let mut st = self.lock();
        if ok {
            st.recover_failures = 0;
            st.metrics.successful_recoveries += 1;
            info!("recovery pass succeeded");
            self.emit(
                EventType::DecisionMade,
                json!({ "decision": "recovery_pass", "success": true }),
            );
        } else {
            st.recover_failures += 1;
            st.metrics.failed_recoveries += 1;
            warn!(consecutive_failures = st.recover_failures, "recovery pass failed");
            self.emit(
                EventType::SystemError,
                json!({
                    "decision": "recovery_pass",
                    "recovery_failed": true,
                    "consecutive_failures": st.recover_failures,
                }),
            );
        }
        self.persist(&st.metrics);
        Ok(ok)
    }

    /// Zeroes metrics, closes all chains and lifts the failure lock.
    pub fn reset_metrics(&self) {
        let mut st = self.lock();
        *st = State::default();
        info!("recovery metrics reset");
        self.persist(&st.metrics);
    }

    /// True while full recovery passes are refused.
    pub fn is_locked(&self) -> bool {
        self.lock().recover_failures >= self.cfg.max_consecutive_failures
    }

    /// Copy of the counters.
    pub fn metrics(&self) -> RecoveryMetrics {
        self.lock().metrics.clone()
    }

    /// Serializable view for dashboards and the orchestrator snapshot.
    pub fn status(&self) -> RecoveryStatus {
        let st = self.lock();
        let rate = st.metrics.recovery_rate();
        RecoveryStatus {
            metrics: st.metrics.clone(),
            recovery_rate: rate,
            strategies_used: st
                .strategies_used
                .iter()
                .map(|(s, n)| (s.to_string(), *n))
                .collect(),
            consecutive_recover_failures: st.recover_failures,
            locked: st.recover_failures >= self.cfg.max_consecutive_failures,
            health: if rate >= 0.8 {
                "healthy"
            } else if rate >= 0.5 {
                "degraded"
            } else {
                "critical"
            },
        }
    }

    fn emit(&self, event_type: EventType, data: Value) {
        self.events.add(event_type, data, EVENT_MODULE, None);
    }

    fn persist(&self, metrics: &RecoveryMetrics) {
        let Some(store) = self.store.as_ref() else {
            return;
        };
        if let Err(e) = persist::save_as(store.as_ref(), METRICS_KEY, metrics) {
            warn!(error = %e, "recovery metrics not saved");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persist::MemoryStore;
    use crate::recovery::{Classification, ErrorSeverity};
    use std::sync::atomic::AtomicU32;

    fn fast_cfg() -> RecoveryConfig {
        RecoveryConfig {
            stabilization: Duration::from_millis(1),
            restart_delay: Duration::from_millis(1),
            ..RecoveryConfig::default()
        }
    }

    fn system(cfg: RecoveryConfig) -> (ErrorRecoverySystem, Arc<EventStore>) {
        let events = Arc::new(EventStore::in_memory());
        (ErrorRecoverySystem::new(cfg, Arc::clone(&events)), events)
    }

    #[tokio::test]
    async fn test_cognitive_overload_defers_then_exhausts() {
        let (sys, _) = system(fast_cfg());
        for _ in 0..2 {
            let out = sys.handle(ErrorKind::CognitiveOverload, "queue saturated").await;
            assert!(matches!(out, RecoveryOutcome::DeferToBreaker { .. }));
        }
        let out = sys.handle(ErrorKind::CognitiveOverload, "queue saturated").await;
        assert!(out.is_terminal());
        let incident = match &out {
            RecoveryOutcome::Exhausted {
                attempts: 2,
                incident_id,
                contact,
            } => {
                assert!(incident_id.starts_with("INC-"));
                assert_eq!(contact, "ops@localhost");
                incident_id.clone()
            }
            other => panic!("unexpected outcome {other:?}"),
        };
        let again = sys.handle(ErrorKind::CognitiveOverload, "queue saturated").await;
        assert_eq!(again.incident_id(), Some(incident.as_str()));

        let m = sys.metrics();
        assert_eq!(m.total_errors, 4);
        assert_eq!(m.successful_recoveries, 2);
        assert_eq!(m.failed_recoveries, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_waits_power_of_two_seconds() {
        let (sys, _) = system(RecoveryConfig::default());
        let started = tokio::time::Instant::now();
        let first = sys.handle(ErrorKind::Generic, "db down").await;
        let second = sys.handle(ErrorKind::Generic, "db down").await;
        let third = sys.handle(ErrorKind::Generic, "db down").await;
        assert_eq!(first, RecoveryOutcome::RetryReady { delay: Duration::from_secs(1) });
        assert_eq!(second, RecoveryOutcome::RetryReady { delay: Duration::from_secs(2) });
        assert_eq!(third, RecoveryOutcome::RetryReady { delay: Duration::from_secs(4) });
        assert!(started.elapsed() >= Duration::from_secs(7));

        let fourth = sys.handle(ErrorKind::Generic, "db down").await;
        assert!(matches!(fourth, RecoveryOutcome::Exhausted { attempts: 3, .. }));
    }

    #[tokio::test]
    async fn test_degradation_and_restart() {
        let (sys, _) = system(fast_cfg());
        match sys.handle(ErrorKind::DecisionIntegrity, "checksum mismatch").await {
            RecoveryOutcome::Degraded { available, disabled } => {
                assert_eq!(available, vec!["basic", "monitoring"]);
                assert_eq!(disabled, vec!["advanced", "analytics"]);
            }
            other => panic!("unexpected outcome {other:?}"),
        }
        let out = sys.handle(ErrorKind::SystemRebootRequired, "heap corrupted").await;
        assert!(matches!(out, RecoveryOutcome::Restarted { .. }));
        let again = sys.handle(ErrorKind::SystemRebootRequired, "heap corrupted").await;
        assert!(matches!(again, RecoveryOutcome::Exhausted { attempts: 1, .. }));
    }

    #[tokio::test]
    async fn test_unclassified_opens_incident() {
        let (sys, events) = system(fast_cfg());
        match sys.handle(ErrorKind::parse("disk-on-fire"), "smoke").await {
            RecoveryOutcome::ManualIntervention { incident_id, contact } => {
                assert!(incident_id.starts_with("INC-"));
                assert_eq!(contact, "ops@localhost");
            }
            other => panic!("unexpected outcome {other:?}"),
        }
        assert_eq!(sys.metrics().failed_recoveries, 1);
        let failed = events
            .get_by_type(EventType::SystemError, 10, None)
            .into_iter()
            .filter(|e| e.data["recovery_failed"] == true)
            .count();
        assert_eq!(failed, 1);
    }

    #[tokio::test]
    async fn test_module_chain_resolves() {
        let (sys, _) = system(fast_cfg());
        let first = sys.handle_for_module("alpha", ErrorKind::Unclassified, "x").await;
        assert!(matches!(first, RecoveryOutcome::ManualIntervention { .. }));
        let second = sys.handle_for_module("alpha", ErrorKind::Unclassified, "y").await;
        assert!(matches!(second, RecoveryOutcome::Exhausted { .. }));
        assert_eq!(second.incident_id(), first.incident_id());

        sys.resolve_module("alpha");
        let third = sys.handle_for_module("alpha", ErrorKind::Unclassified, "z").await;
        assert!(matches!(third, RecoveryOutcome::ManualIntervention { .. }));
    }

    #[tokio::test]
    async fn test_immediate_retry_reinvokes_operation() {
        let mut cfg = fast_cfg();
        cfg.classifications = cfg.classifications.with(
            ErrorKind::Generic,
            Classification::new(ErrorSeverity::Low, RecoveryStrategy::ImmediateRetry, 3),
        );
        let (sys, _) = system(cfg);
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let (out, value) = sys
            .handle_with_retry(ErrorKind::Generic, "flaky", move || async move {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                if n < 2 {
                    Err(ModuleError::fail("again"))
                } else {
                    Ok(n)
                }
            })
            .await;
        assert_eq!(out, RecoveryOutcome::Retried { attempts: 3 });
        assert_eq!(value, Some(2));
        assert_eq!(calls.load(Ordering::SeqCst), 3);

        let (never, value) = sys
            .handle_with_retry(ErrorKind::Generic, "broken", || async {
                Err::<(), _>(ModuleError::fail("no"))
            })
            .await;
        assert!(matches!(never, RecoveryOutcome::Exhausted { attempts: 3, .. }));
        assert!(never.incident_id().is_some());
        assert_eq!(value, None);
    }

    #[tokio::test]
    async fn test_recover_cooldown() {
        let (sys, _) = system(fast_cfg());
        assert_eq!(sys.recover(|| async { true }).await, Ok(true));
        match sys.recover(|| async { true }).await {
            Err(RecoveryError::CoolingDown { remaining }) => {
                assert!(remaining > Duration::from_secs(50));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_recover_locks_after_consecutive_failures() {
        let mut cfg = fast_cfg();
        cfg.cooldown = Duration::ZERO;
        let (sys, _) = system(cfg);
        for _ in 0..3 {
            assert_eq!(sys.recover(|| async { false }).await, Ok(false));
        }
        assert!(sys.is_locked());
        assert_eq!(
            sys.recover(|| async { true }).await,
            Err(RecoveryError::Locked { consecutive_failures: 3 })
        );

        sys.reset_metrics();
        assert!(!sys.is_locked());
        assert_eq!(sys.recover(|| async { true }).await, Ok(true));
    }

    #[tokio::test]
    async fn test_cancellation_interrupts_wait() {
        let token = CancellationToken::new();
        let events = Arc::new(EventStore::in_memory());
        let sys = ErrorRecoverySystem::new(RecoveryConfig::default(), events)
            .with_cancellation(token.clone());
        token.cancel();
        let out = sys.handle(ErrorKind::CognitiveOverload, "busy").await;
        assert_eq!(out, RecoveryOutcome::Interrupted);
        let m = sys.metrics();
        assert_eq!(m.successful_recoveries + m.failed_recoveries, 0);
    }

    #[tokio::test]
    async fn test_metrics_snapshot_persisted_and_restored() {
        let store: StoreRef = Arc::new(MemoryStore::new());
        let events = Arc::new(EventStore::in_memory());
        {
            let sys = ErrorRecoverySystem::new(fast_cfg(), Arc::clone(&events))
                .with_store(Arc::clone(&store));
            sys.handle(ErrorKind::DecisionIntegrity, "bad").await;
            sys.handle_contradiction(&json!({ "verdict": "go" }), &json!({ "verdict": "stop" }));
        }
        let saved: RecoveryMetrics = persist::load_as(store.as_ref(), METRICS_KEY).unwrap().unwrap();
        assert_eq!(saved.total_errors, 1);
        assert_eq!(saved.contradiction_count, 1);
        assert!(saved.last_error_time.is_some());

        let sys = ErrorRecoverySystem::new(fast_cfg(), events).with_store(store);
        assert_eq!(sys.metrics(), saved);
        assert_eq!(sys.status().health, "healthy");
    }
}
