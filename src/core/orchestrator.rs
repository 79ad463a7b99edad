//! # Orchestrator: the adaptive control loop.
//!
//! The [`Orchestrator`] owns one [`ModuleWrapper`] per supervised module and
//! drives the other components: every module call goes through a
//! [`CircuitBreaker`], every fault is routed to the [`ErrorRecoverySystem`], and
//! everything is recorded in the [`EventStore`].
//!
//! ## One cycle
//! ```text
//! run_cycle()
//!   ├─► per wrapper: OFFLINE ─► skip │ not initialized ─► skip │ breaker cooling down ─► quarantine
//!   ├─► spawn one task per remaining module (JoinSet, bounded by the semaphore)
//!   │      └─► breaker.call(timeout(catch_unwind(module.execute)))
//!   │             ├─ Ok  ─► (result)
//!   │             └─ Err ─► recovery.handle_for_module_with_retry(kind, re-run)
//!   │                         ├─ IMMEDIATE_RETRY ─► re-run through the breaker ─► (result)
//!   │                         └─ otherwise ───────► (error, outcome)
//!   ├─► join all; apply results to wrappers (only here are wrappers mutated)
//!   │      ├─ success ─► update_success, close recovery chain, decision_made
//!   │      └─ failure ─► update_error
//!   │             ├─ MANUAL_INTERVENTION ─────────────────► OFFLINE (on hold)
//!   │             └─ exhausted, breaker trial call failed ─► OFFLINE (on hold)
//!   ├─► health checks (every `health_check_every` cycles)
//!   ├─► auto-recovery pass for CRITICAL modules (cooldown-guarded)
//!   ├─► persist status snapshot   (failure ⇒ system_error, cycle aborted)
//!   └─► adapt cycle mode ─► CycleReport
//! ```
//!
//! ## Run loop
//! [`Orchestrator::run`] repeats cycles, sleeping the current mode's interval in
//! between, until the token is cancelled or `max_cycles` is reached. It never
//! interrupts a cycle in flight: modules see their context token cancelled and
//! recovery waits end early, then the loop emits a final `state_change`
//! (`phase = "shutdown"`), flushes the event store, persists the status and
//! waits for subscribers to handle the remaining events.
//!
//! ## Example
//! ```rust
//! use std::time::Duration;
//! use serde_json::json;
//! use tokio_util::sync::CancellationToken;
//! use faultvisor::{CycleContext, CycleIntervals, ModuleError, ModuleFn, ModuleRef, Orchestrator, OrchestratorConfig};
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut cfg = OrchestratorConfig::default();
//!     cfg.intervals = CycleIntervals::uniform(Duration::from_millis(1));
//!     cfg.max_cycles = Some(3);
//!
//!     let orch = Orchestrator::builder(cfg).build()?;
//!     let echo: ModuleRef = ModuleFn::arc("echo", |ctx: CycleContext| async move {
//!         Ok::<_, ModuleError>(json!({ "cycle": ctx.cycle }))
//!     });
//!     assert!(orch.initialize(vec![echo]).await);
//!
//!     let report = orch.run(CancellationToken::new()).await?;
//!     assert_eq!(report.cycles, 3);
//!     assert_eq!(report.resilience_score, 1.0);
//!     Ok(())
//! }
//! ```

use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde_json::{json, Value};
use tokio::sync::Semaphore;
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::builder::{Listener, OrchestratorBuilder};
use super::mode::{self, CycleMode, ModeSignals};
use super::report::{
    resilience, CycleReport, ModuleResult, OrchestratorStatus, RunReport, SessionStats, STATUS_KEY,
};
use super::runner;
use super::shutdown;
use super::wrapper::{ModuleSnapshot, ModuleStatus, ModuleWrapper};
use crate::breaker::{BreakerStatus, CircuitBreaker, CircuitState};
use crate::config::OrchestratorConfig;
use crate::error::{BreakerError, ModuleError, OrchestratorError, RecoveryError, StoreError};
use crate::events::{EventStore, EventType};
use crate::modules::{CycleContext, HealthSignal, ModuleRef};
use crate::persist::{self, StoreRef};
use crate::recovery::{ErrorRecoverySystem, RecoveryOutcome};
use crate::subscribers::SubscriberSet;

const EVENT_MODULE: &str = "orchestrator";
/// A module with no success for this many intervals is reported stale.
const STALE_INTERVALS: u32 = 10;
/// Upper bound on waiting for subscribers at shutdown.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, Default)]
pub(super) enum InitState {
    #[default]
    Pending,
    Ready,
    Insufficient {
        healthy: usize,
    },
}

#[derive(Debug, Default)]
pub(super) struct LoopState {
    pub(super) init: InitState,
    pub(super) mode: CycleMode,
    pub(super) cycle_count: u64,
    pub(super) stable_streak: u64,
    pub(super) bookkeeping_failures: u32,
    pub(super) session: SessionStats,
}

enum Attempt {
    Ran {
        res: Result<Value, BreakerError>,
        recovery: Option<RecoveryOutcome>,
        /// The breaker had already opened: this call was its trial call.
        tripped: bool,
    },
    Cancelled,
}

/// Coordinates supervised modules, their breakers, error recovery and the audit trail.
pub struct Orchestrator {
    pub(super) cfg: OrchestratorConfig,
    pub(super) events: Arc<EventStore>,
    pub(super) store: Option<StoreRef>,
    pub(super) recovery: Arc<ErrorRecoverySystem>,
    pub(super) shared_breaker: Option<Arc<CircuitBreaker>>,
    pub(super) semaphore: Option<Arc<Semaphore>>,
    pub(super) subs: Arc<SubscriberSet>,
    pub(super) listener: Option<Listener>,
    pub(super) modules: Mutex<Vec<ModuleWrapper>>,
    pub(super) state: Mutex<LoopState>,
    pub(super) cycle_lock: tokio::sync::Mutex<()>,
    pub(super) running: AtomicBool,
    pub(super) shutdown: CancellationToken,
    pub(super) started_at: DateTime<Utc>,
    pub(super) started: Instant,
}

/// Clears the running flag and stops the token link when `run` returns.
struct RunGuard<'a> {
    running: &'a AtomicBool,
    link: Option<JoinHandle<()>>,
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        if let Some(link) = self.link.take() {
            link.abort();
        }
        self.running.store(false, Ordering::SeqCst);
    }
}

impl Orchestrator {
    /// Starts building an orchestrator.
    pub fn builder(cfg: OrchestratorConfig) -> OrchestratorBuilder {
        OrchestratorBuilder::new(cfg)
    }

    fn modules(&self) -> MutexGuard<'_, Vec<ModuleWrapper>> {
        self.modules.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn state(&self) -> MutexGuard<'_, LoopState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn breaker_for(&self, name: &str) -> Arc<CircuitBreaker> {
        if let Some(shared) = &self.shared_breaker {
            return Arc::clone(shared);
        }
        let breaker = CircuitBreaker::new(name, self.cfg.breaker.clone(), Arc::clone(&self.events));
        match &self.store {
            Some(store) => Arc::new(breaker.with_store(Arc::clone(store))),
            None => Arc::new(breaker),
        }
    }

    /// Wraps and initializes `modules`, replacing any previous set.
    ///
    /// Returns `true` if at least `min_initialized_modules` initialized. Modules
    /// that fail are kept as CRITICAL and become candidates for auto-recovery.
    pub async fn initialize(&self, modules: Vec<ModuleRef>) -> bool {
        let _cycle = self.cycle_lock.lock().await;

        let mut seen = HashSet::new();
        let mut wrappers = Vec::with_capacity(modules.len());
        for module in modules {
            let name = module.name().to_string();
            if !seen.insert(name.clone()) {
                warn!(module = %name, "duplicate module name ignored");
                continue;
            }
            let breaker = self.breaker_for(&name);
            wrappers.push(ModuleWrapper::new(module, breaker));
        }

        let timeout = self.cfg.call_timeout();
        let results = join_all(wrappers.iter().map(|w| {
            let module = Arc::clone(&w.module);
            async move { runner::contain(module.initialize(), timeout, None).await }
        }))
        .await;

        let mut healthy = 0;
        for (w, res) in wrappers.iter_mut().zip(results) {
            let (ok, err) = match res {
                Ok(ok) => (ok, None),
                Err(e) => (false, Some(e.to_string())),
            };
            let prev = w.mark_initialized(ok, err);
            self.note_status(&w.name, prev, w.status(), "initialize");
            if ok {
                healthy += 1;
            } else {
                warn!(module = %w.name, error = ?w.snapshot().last_error, "module failed to initialize");
            }
        }

        let total = wrappers.len();
        let ready = healthy >= self.cfg.min_initialized_modules;
        *self.modules() = wrappers;
        self.state().init = if ready {
            InitState::Ready
        } else {
            InitState::Insufficient { healthy }
        };

        info!(healthy, total, ready, "modules initialized");
        self.emit(
            EventType::StateChange,
            json!({ "phase": "initialized", "healthy": healthy, "total": total, "ready": ready }),
        );
        if let Err(e) = self.persist_status() {
            warn!(error = %e, "status snapshot not saved");
        }
        ready
    }

    fn ensure_ready(&self) -> Result<(), OrchestratorError> {
        match self.state().init {
            InitState::Pending => Err(OrchestratorError::NotInitialized),
            InitState::Insufficient { healthy } => Err(OrchestratorError::InsufficientModules {
                required: self.cfg.min_initialized_modules,
                healthy,
            }),
            InitState::Ready => Ok(()),
        }
    }

    /// Runs one cycle over every registered module.
    ///
    /// A failing module never aborts the cycle for the others; only the
    /// orchestrator's own bookkeeping can end it early (`report.aborted`).
    pub async fn run_cycle(&self) -> Result<CycleReport, OrchestratorError> {
        let _cycle = self.cycle_lock.lock().await;
        self.ensure_ready()?;

        let started = Instant::now();
        let (cycle, mode) = {
            let mut st = self.state();
            st.cycle_count += 1;
            (st.cycle_count, st.mode)
        };
        debug!(cycle, %mode, "cycle started");

        let mut outcomes = BTreeMap::new();
        let mut jobs = Vec::new();
        let mut watched: Vec<(Arc<CircuitBreaker>, CircuitState)> = Vec::new();
        {
            let mut mods = self.modules();
            for w in mods.iter_mut() {
                if !watched.iter().any(|(b, _)| Arc::ptr_eq(b, &w.breaker)) {
                    watched.push((Arc::clone(&w.breaker), w.breaker.state()));
                }
                if w.is_offline() {
                    let reason = w.offline_reason().unwrap_or("offline").to_string();
                    outcomes.insert(w.name.clone(), ModuleResult::Offline { reason });
                } else if !w.is_initialized() {
                    outcomes.insert(w.name.clone(), ModuleResult::NotInitialized);
                } else if w.breaker.is_quarantining() {
                    let prev = w.quarantine();
                    self.note_status(&w.name, prev, w.status(), "quarantined");
                    outcomes.insert(
                        w.name.clone(),
                        ModuleResult::Quarantined {
                            breaker: w.breaker.name().to_string(),
                        },
                    );
                } else {
                    jobs.push((w.name.clone(), Arc::clone(&w.module), Arc::clone(&w.breaker)));
                }
            }
        }

        let mut set = JoinSet::new();
        for (name, module, breaker) in jobs {
            let recovery = Arc::clone(&self.recovery);
            let semaphore = self.semaphore.clone();
            let shutdown = self.shutdown.clone();
            let timeout = self.cfg.call_timeout();

            set.spawn(async move {
                if shutdown.is_cancelled() {
                    return (name, Attempt::Cancelled);
                }
                let Some(permit) = runner::acquire(semaphore.as_ref(), &shutdown).await else {
                    return (name, Attempt::Cancelled);
                };

                let tripped = breaker.state() != CircuitState::Closed;
                let ctx = CycleContext {
                    cycle,
                    mode,
                    token: shutdown.child_token(),
                };
                let mut res = runner::guarded_execute(module.as_ref(), &breaker, ctx, timeout).await;
                drop(permit);

                let failure = match &res {
                    Err(BreakerError::Operation(ModuleError::Canceled)) if shutdown.is_cancelled() => None,
                    Err(BreakerError::Operation(e)) => Some((e.kind(), e.to_string())),
                    _ => None,
                };
                let recovery = match failure {
                    None => None,
                    Some((kind, message)) => {
                        let (m, b, sem, token) = (module.as_ref(), &*breaker, &semaphore, &shutdown);
                        let retry = move || async move {
                            let Some(_permit) = runner::acquire(sem.as_ref(), token).await else {
                                return Err(ModuleError::Canceled);
                            };
                            let ctx = CycleContext {
                                cycle,
                                mode,
                                token: token.child_token(),
                            };
                            runner::guarded_execute(m, b, ctx, timeout)
                                .await
                                .map_err(|e| match e {
                                    BreakerError::Operation(e) => e,
                                    other => ModuleError::fail(other.to_string()),
                                })
                        };
                        let (outcome, value) = recovery
                            .handle_for_module_with_retry(&name, kind, &message, retry)
                            .await;
                        if let Some(value) = value {
                            res = Ok(value);
                        }
                        Some(outcome)
                    }
                };
                (name, Attempt::Ran { res, recovery, tripped })
            });
        }

        let mut aborted = false;
        let mut finished = Vec::new();
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok(done) => finished.push(done),
                Err(e) => {
                    aborted = true;
                    self.bookkeeping_error(cycle, "module_task", &e.to_string());
                }
            }
        }

        {
            let mut mods = self.modules();
            for (name, attempt) in finished {
                let Some(w) = mods.iter_mut().find(|w| w.name == name) else {
                    continue;
                };
                let result = self.apply_attempt(w, cycle, mode, attempt);
                outcomes.insert(name, result);
            }
        }

        let circuit_reopens = watched
            .iter()
            .filter(|(b, before)| *before != CircuitState::Open && b.state() == CircuitState::Open)
            .count() as u64;

        if !aborted && self.cfg.health_check_due(cycle) {
            self.run_health_checks(mode).await;
        }
        if !aborted && self.cfg.auto_recovery {
            self.recover_critical_locked().await;
        }

        let successes = outcomes.values().filter(|r| r.is_success()).count();
        let failures = outcomes.values().filter(|r| r.is_failure()).count();
        {
            let mut st = self.state();
            st.session.cycles += 1;
            st.session.total_decisions += (successes + failures) as u64;
            st.session.successful_decisions += successes as u64;
            st.session.failed_decisions += failures as u64;
            st.session.circuit_reopens += circuit_reopens;
        }

        if let Err(e) = self.persist_status() {
            aborted = true;
            self.bookkeeping_error(cycle, "status_snapshot", &e.to_string());
        }
        {
            let mut st = self.state();
            st.bookkeeping_failures = if aborted { st.bookkeeping_failures + 1 } else { 0 };
        }

        let mut report = CycleReport {
            cycle_number: cycle,
            cycle_mode: mode,
            next_mode: mode,
            duration: started.elapsed(),
            outcomes,
            successes,
            failures,
            circuit_reopens,
            aborted,
        };
        report.next_mode = self.adapt_cycle_mode(&report, successes, successes + failures);

        info!(
            cycle,
            mode = %mode,
            next_mode = %report.next_mode,
            successes,
            failures,
            circuit_reopens,
            aborted,
            duration_ms = report.duration.as_millis() as u64,
            "cycle completed"
        );
        Ok(report)
    }

    fn apply_attempt(
        &self,
        w: &mut ModuleWrapper,
        cycle: u64,
        mode: CycleMode,
        attempt: Attempt,
    ) -> ModuleResult {
        match attempt {
            Attempt::Cancelled => ModuleResult::Cancelled,
            Attempt::Ran { res: Ok(result), .. } => {
                let prev = w.update_success();
                self.note_status(&w.name, prev, w.status(), "execution_succeeded");
                self.recovery.resolve_module(&w.name);
                self.events.add(
                    EventType::DecisionMade,
                    json!({
                        "decision": "module_executed",
                        "cycle": cycle,
                        "mode": mode,
                        "result": result,
                    }),
                    &w.name,
                    None,
                );
                ModuleResult::Success { result }
            }
            Attempt::Ran {
                res: Err(BreakerError::Open { breaker, .. }),
                ..
            } => {
                let prev = w.quarantine();
                self.note_status(&w.name, prev, w.status(), "quarantined");
                ModuleResult::Quarantined { breaker }
            }
            Attempt::Ran {
                res: Err(BreakerError::Operation(ModuleError::Canceled)),
                recovery: None,
                ..
            } => ModuleResult::Cancelled,
            Attempt::Ran {
                res: Err(BreakerError::Operation(e)),
                recovery,
                tripped,
            } => {
                let prev = w.update_error(&e);
                // An exhausted chain waits for the breaker: the module goes on hold
                // only once its trial call after the cooldown has failed too.
                let hold = match &recovery {
                    Some(RecoveryOutcome::ManualIntervention { incident_id, .. }) => Some(incident_id),
                    Some(RecoveryOutcome::Exhausted { incident_id, .. }) if tripped => Some(incident_id),
                    _ => None,
                };
                if let Some(incident_id) = hold {
                    warn!(module = %w.name, incident = %incident_id, "module put on hold");
                    w.mark_offline(incident_id.clone());
                }
                self.note_status(&w.name, prev, w.status(), e.as_label());
                ModuleResult::Failed {
                    error: e.to_string(),
                    recovery,
                }
            }
        }
    }

    async fn run_health_checks(&self, mode: CycleMode) {
        let targets: Vec<(String, ModuleRef)> = self
            .modules()
            .iter()
            .filter(|w| !w.is_offline() && w.is_initialized())
            .map(|w| (w.name.clone(), Arc::clone(&w.module)))
            .collect();

        let timeout = self.cfg.call_timeout();
        let results = join_all(targets.iter().map(|(name, module)| async move {
            let res = runner::contain(
                async { Ok::<_, ModuleError>(module.health_check().await) },
                timeout,
                None,
            )
            .await;
            (name.clone(), res)
        }))
        .await;

        let stale_after = self.cfg.intervals.for_mode(mode) * STALE_INTERVALS;
        let now = Utc::now();
        let mut mods = self.modules();
        for (name, res) in results {
            let Some(w) = mods.iter_mut().find(|w| w.name == name) else {
                continue;
            };
            let signal = match res {
                Ok(Some(signal)) => signal,
                Ok(None) => continue,
                Err(e) => HealthSignal::Unhealthy(e.to_string()),
            };
            match &signal {
                HealthSignal::Healthy => {}
                HealthSignal::Degraded(detail) => {
                    warn!(module = %name, detail = %detail, "module reports degraded health");
                }
                HealthSignal::Unhealthy(detail) => {
                    warn!(module = %name, detail = %detail, "module reports unhealthy");
                    self.events.add(
                        EventType::SystemError,
                        json!({ "source": "health_check", "health": signal }),
                        &name,
                        None,
                    );
                }
            }
            w.record_health(signal);
        }

        for w in mods.iter() {
            let stale = w
                .last_success()
                .and_then(|t| (now - t).to_std().ok())
                .is_some_and(|elapsed| elapsed > stale_after);
            if stale {
                warn!(module = %w.name, last_success = ?w.last_success(), "module is stale");
            }
        }
    }

    /// Re-initializes CRITICAL modules whose breaker is not cooling down.
    ///
    /// Returns `None` when there was nothing to recover.
    async fn recover_critical_locked(&self) -> Option<Result<bool, RecoveryError>> {
        let candidates: Vec<(String, ModuleRef)> = self
            .modules()
            .iter()
            .filter(|w| w.status() == ModuleStatus::Critical && !w.breaker.is_quarantining())
            .map(|w| (w.name.clone(), Arc::clone(&w.module)))
            .collect();
        if candidates.is_empty() {
            return None;
        }

        let timeout = self.cfg.call_timeout();
        let mut results: Vec<(String, Result<bool, ModuleError>)> = Vec::new();
        let sink = &mut results;
        let cands = &candidates;
        let pass = self
            .recovery
            .recover(move || async move {
                {
                    let mut mods = self.modules();
                    for w in mods.iter_mut().filter(|w| cands.iter().any(|(n, _)| *n == w.name)) {
                        let prev = w.start_recovery();
                        self.note_status(&w.name, prev, w.status(), "recovery_started");
                    }
                }
                let mut all_ok = true;
                for (name, module) in cands {
                    let res = runner::contain(module.initialize(), timeout, None).await;
                    all_ok &= matches!(res, Ok(true));
                    sink.push((name.clone(), res));
                }
                all_ok
            })
            .await;

        if let Err(e) = &pass {
            debug!(reason = e.as_label(), "recovery pass skipped");
        }
        if pass.is_err() {
            return Some(pass);
        }

        let mut mods = self.modules();
        for (name, res) in results {
            let Some(w) = mods.iter_mut().find(|w| w.name == name) else {
                continue;
            };
            let prev = w.status();
            match res {
                Ok(true) => {
                    w.recovered();
                    if self.shared_breaker.is_none() {
                        w.breaker.reset();
                    }
                    self.recovery.resolve_module(&name);
                    info!(module = %name, "module re-initialized");
                }
                Ok(false) => {
                    w.mark_offline("re-initialization declined");
                }
                Err(e) => {
                    w.mark_offline(format!("re-initialization failed: {e}"));
                }
            }
            self.note_status(&name, prev, w.status(), "recovery_finished");
        }
        Some(pass)
    }

    /// Runs a recovery pass for CRITICAL modules now (outside the cycle schedule).
    ///
    /// `Ok(true)` when every candidate re-initialized, or when there was none.
    pub async fn recover_critical_modules(&self) -> Result<bool, RecoveryError> {
        let _cycle = self.cycle_lock.lock().await;
        self.recover_critical_locked().await.unwrap_or(Ok(true))
    }

    /// Picks the next cycle mode from a cycle's outcome and applies it.
    pub fn adapt_cycle_mode(&self, report: &CycleReport, success_count: usize, total_count: usize) -> CycleMode {
        let any_critical = self
            .modules()
            .iter()
            .any(|w| w.status() == ModuleStatus::Critical);

        let (from, to) = {
            let mut st = self.state();
            if total_count > 0 {
                if success_count == total_count {
                    st.stable_streak += 1;
                } else {
                    st.stable_streak = 0;
                }
            }
            let signals = ModeSignals {
                successes: success_count,
                total: total_count,
                any_critical,
                stable_streak: st.stable_streak,
                bookkeeping_failures: st.bookkeeping_failures,
            };
            let from = st.mode;
            st.mode = mode::adapt(from, &signals, &self.cfg);
            (from, st.mode)
        };

        if from != to {
            info!(%from, %to, cycle = report.cycle_number, "cycle mode changed");
            self.emit(
                EventType::StateChange,
                json!({
                    "scope": "orchestrator",
                    "from": from,
                    "to": to,
                    "cycle": report.cycle_number,
                    "successes": success_count,
                    "total": total_count,
                }),
            );
        }
        to
    }

    /// Takes an OFFLINE module off hold; it runs again from the next cycle.
    ///
    /// A module that never initialized is re-initialized first; returns `false`
    /// if that fails or if no OFFLINE module has this name.
    pub async fn release_module(&self, name: &str) -> bool {
        let _cycle = self.cycle_lock.lock().await;
        let found = self
            .modules()
            .iter()
            .find(|w| w.name == name && w.is_offline())
            .map(|w| (Arc::clone(&w.module), !w.is_initialized()));
        let Some((module, needs_init)) = found else {
            return false;
        };

        if needs_init {
            let res = runner::contain(module.initialize(), self.cfg.call_timeout(), None).await;
            if !matches!(res, Ok(true)) {
                warn!(module = %name, "release refused: module did not initialize");
                return false;
            }
        }

        let mut mods = self.modules();
        let Some(w) = mods.iter_mut().find(|w| w.name == name) else {
            return false;
        };
        let prev = w.release();
        if needs_init {
            w.recovered();
        }
        if self.shared_breaker.is_none() {
            w.breaker.reset();
        }
        self.recovery.resolve_module(name);
        self.note_status(name, prev, w.status(), "released");
        true
    }

    /// Runs cycles until `token` is cancelled or `max_cycles` is reached.
    ///
    /// Cancelling `token` also cancels the orchestrator's shutdown token, which is
    /// terminal: module contexts and recovery waits stay cancelled afterwards.
    pub async fn run(&self, token: CancellationToken) -> Result<RunReport, OrchestratorError> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(OrchestratorError::AlreadyRunning);
        }
        let mut guard = RunGuard {
            running: &self.running,
            link: None,
        };
        self.ensure_ready()?;

        let shutdown = self.shutdown.clone();
        guard.link = Some(tokio::spawn({
            let shutdown = shutdown.clone();
            async move {
                token.cancelled().await;
                shutdown.cancel();
            }
        }));

        info!(max_cycles = ?self.cfg.max_cycles, "orchestrator loop started");
        self.emit(EventType::StateChange, json!({ "phase": "running" }));

        let (mut cycles, mut successes, mut failures, mut reopens) = (0u64, 0u64, 0u64, 0u64);
        loop {
            if shutdown.is_cancelled() || self.cfg.max_cycles.is_some_and(|max| cycles >= max) {
                break;
            }
            let report = self.run_cycle().await?;
            cycles += 1;
            successes += report.successes as u64;
            failures += report.failures as u64;
            reopens += report.circuit_reopens;

            if self.cfg.max_cycles.is_some_and(|max| cycles >= max) {
                break;
            }
            let interval = self.cfg.intervals.for_mode(report.next_mode);
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(interval) => {}
            }
        }

        let report = RunReport {
            cycles,
            successes,
            failures,
            circuit_reopens: reopens,
            resilience_score: resilience(successes, failures),
            final_mode: self.mode(),
        };
        self.finish(&report).await;
        Ok(report)
    }

    /// Like [`run`](Self::run), stopping on SIGINT/SIGTERM/SIGQUIT (Ctrl-C elsewhere).
    pub async fn run_until_signal(&self) -> Result<RunReport, OrchestratorError> {
        let token = CancellationToken::new();
        let trigger = token.clone();
        let watcher = tokio::spawn(async move {
            match shutdown::wait_for_shutdown_signal().await {
                Ok(signal) => {
                    info!(signal, "shutdown signal received");
                    trigger.cancel();
                }
                Err(e) => error!(error = %e, "signal handlers unavailable"),
            }
        });
        let res = self.run(token).await;
        watcher.abort();
        res
    }

    /// Requests shutdown of a running loop (same effect as cancelling its token).
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    async fn finish(&self, report: &RunReport) {
        info!(
            cycles = report.cycles,
            successes = report.successes,
            failures = report.failures,
            circuit_reopens = report.circuit_reopens,
            resilience_score = report.resilience_score,
            "orchestrator loop stopped"
        );
        self.emit(
            EventType::StateChange,
            json!({ "phase": "shutdown", "report": report }),
        );
        if let Err(e) = self.events.flush() {
            warn!(error = %e, "event log flush failed");
        }
        if let Err(e) = self.persist_status() {
            warn!(error = %e, "status snapshot not saved");
        }
        if let Some(listener) = &self.listener {
            if tokio::time::timeout(DRAIN_TIMEOUT, listener.drain()).await.is_err() {
                warn!(subscribers = self.subs.len(), "subscribers not drained before shutdown");
            }
        }
    }

    /// Monitoring snapshot: uptime, mode, wrappers, breakers, recovery and session stats.
    pub fn status(&self) -> OrchestratorStatus {
        let (modules, breakers) = {
            let mods = self.modules();
            let modules: BTreeMap<String, ModuleSnapshot> =
                mods.iter().map(|w| (w.name.clone(), w.snapshot())).collect();
            let mut seen: Vec<&Arc<CircuitBreaker>> = Vec::new();
            for w in mods.iter() {
                if !seen.iter().any(|b| Arc::ptr_eq(b, &w.breaker)) {
                    seen.push(&w.breaker);
                }
            }
            let breakers: Vec<BreakerStatus> = seen.iter().map(|b| b.status()).collect();
            (modules, breakers)
        };
        let recovery = self.recovery.status();
        let st = self.state();
        OrchestratorStatus {
            started_at: self.started_at,
            uptime_ms: self.started.elapsed().as_millis() as u64,
            cycle_mode: st.mode,
            cycle_count: st.cycle_count,
            initialized: matches!(st.init, InitState::Ready),
            modules,
            breakers,
            recovery,
            session: st.session.clone(),
            resilience_score: st.session.resilience_score(),
        }
    }

    fn persist_status(&self) -> Result<(), StoreError> {
        match &self.store {
            Some(store) => persist::save_as(store.as_ref(), STATUS_KEY, &self.status()),
            None => Ok(()),
        }
    }

    /// Current cycle mode.
    pub fn mode(&self) -> CycleMode {
        self.state().mode
    }

    pub fn cycle_count(&self) -> u64 {
        self.state().cycle_count
    }

    /// Snapshot of one module's wrapper.
    pub fn module(&self, name: &str) -> Option<ModuleSnapshot> {
        self.modules().iter().find(|w| w.name == name).map(|w| w.snapshot())
    }

    /// Breaker guarding `module` (the shared breaker in shared mode).
    pub fn breaker(&self, module: &str) -> Option<Arc<CircuitBreaker>> {
        self.modules()
            .iter()
            .find(|w| w.name == module)
            .map(|w| Arc::clone(&w.breaker))
    }

    pub fn event_store(&self) -> &Arc<EventStore> {
        &self.events
    }

    pub fn recovery(&self) -> &Arc<ErrorRecoverySystem> {
        &self.recovery
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.cfg
    }

    /// Number of attached subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.subs.len()
    }

    fn note_status(&self, module: &str, from: ModuleStatus, to: ModuleStatus, reason: &str) {
        if from == to {
            return;
        }
        info!(module, %from, %to, reason, "module status changed");
        self.events.add(
            EventType::StateChange,
            json!({ "scope": "module", "from": from, "to": to, "reason": reason }),
            module,
            None,
        );
    }

    fn bookkeeping_error(&self, cycle: u64, source: &str, err: &str) {
        error!(cycle, source, error = %err, "orchestrator bookkeeping failed");
        self.emit(
            EventType::SystemError,
            json!({ "source": source, "error": err, "cycle": cycle }),
        );
    }

    fn emit(&self, event_type: EventType, data: Value) {
        self.events.add(event_type, data, EVENT_MODULE, None);
    }
}

impl Drop for Orchestrator {
    fn drop(&mut self) {
        if let Some(listener) = &self.listener {
            listener.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CycleIntervals;
    use crate::modules::{Module, ModuleFn};
    use crate::events::Event;
    use crate::persist::{MemoryStore, SnapshotStore};
    use crate::recovery::{Classification, ErrorKind, ErrorSeverity, RecoveryStrategy};
    use crate::subscribers::Subscribe;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, AtomicUsize};
    use std::time::Duration;

    fn fast_cfg() -> OrchestratorConfig {
        let mut cfg = OrchestratorConfig::default();
        cfg.intervals = CycleIntervals::uniform(Duration::from_millis(1));
        cfg.module_timeout = Duration::from_millis(200);
        cfg.auto_recovery = false;
        cfg.health_check_every = 0;
        cfg.recovery.backoff.first = Duration::from_millis(1);
        cfg.recovery.backoff.max = Duration::from_millis(5);
        cfg.recovery.stabilization = Duration::from_millis(1);
        cfg.recovery.restart_delay = Duration::from_millis(1);
        cfg
    }

    fn ok_module(name: &'static str) -> ModuleRef {
        ModuleFn::arc(name, |ctx: CycleContext| async move { Ok(json!({ "cycle": ctx.cycle })) })
    }

    fn failing_module(name: &'static str, err: ModuleError) -> ModuleRef {
        ModuleFn::arc(name, move |_ctx: CycleContext| {
            let err = err.clone();
            async move { Err(err) }
        })
    }

    struct Flaky {
        init_ok: bool,
        inits: AtomicU32,
    }

    #[async_trait]
    impl Module for Flaky {
        fn name(&self) -> &str {
            "flaky"
        }

        async fn initialize(&self) -> Result<bool, ModuleError> {
            let n = self.inits.fetch_add(1, Ordering::SeqCst);
            Ok(self.init_ok || n > 0)
        }

        async fn execute(&self, _ctx: CycleContext) -> Result<Value, ModuleError> {
            Ok(json!("ok"))
        }

        async fn health_check(&self) -> Option<HealthSignal> {
            Some(HealthSignal::Unhealthy("disk full".into()))
        }
    }

    #[tokio::test]
    async fn test_cycle_requires_initialize() {
        let orch = Orchestrator::builder(fast_cfg()).build().unwrap();
        assert!(matches!(
            orch.run_cycle().await,
            Err(OrchestratorError::NotInitialized)
        ));

        let mut cfg = fast_cfg();
        cfg.min_initialized_modules = 2;
        let orch = Orchestrator::builder(cfg).build().unwrap();
        assert!(!orch.initialize(vec![ok_module("a")]).await);
        assert!(matches!(
            orch.run_cycle().await,
            Err(OrchestratorError::InsufficientModules { required: 2, healthy: 1 })
        ));
    }

    #[tokio::test]
    async fn test_success_updates_wrapper_and_records_decision() {
        let orch = Orchestrator::builder(fast_cfg()).build().unwrap();
        assert!(orch.initialize(vec![ok_module("a"), ok_module("a")]).await);

        let report = orch.run_cycle().await.unwrap();
        assert_eq!(report.cycle_number, 1);
        assert_eq!(report.outcomes.len(), 1);
        assert_eq!(
            report.outcome("a"),
            Some(&ModuleResult::Success { result: json!({ "cycle": 1 }) })
        );

        let snap = orch.module("a").unwrap();
        assert_eq!(snap.status, ModuleStatus::Healthy);
        assert_eq!(snap.execution_count, 1);
        assert!((snap.cognitive_score - 0.1).abs() < 1e-9);
        assert_eq!(orch.event_store().decision_history(10).len(), 1);
    }

    #[tokio::test]
    async fn test_manual_intervention_puts_module_on_hold() {
        let orch = Orchestrator::builder(fast_cfg()).build().unwrap();
        let fatal = failing_module("doomed", ModuleError::Fatal { error: "corrupt".into() });
        assert!(orch.initialize(vec![ok_module("a"), fatal]).await);

        let first = orch.run_cycle().await.unwrap();
        match first.outcome("doomed") {
            Some(ModuleResult::Failed {
                recovery: Some(RecoveryOutcome::ManualIntervention { .. }),
                ..
            }) => {}
            other => panic!("unexpected {other:?}"),
        }
        let snap = orch.module("doomed").unwrap();
        assert_eq!(snap.status, ModuleStatus::Offline);
        assert!(snap.offline_reason.unwrap().starts_with("INC-"));

        let second = orch.run_cycle().await.unwrap();
        assert!(matches!(second.outcome("doomed"), Some(ModuleResult::Offline { .. })));
        assert_eq!(second.successes, 1);
        assert_eq!(second.failures, 0);

        assert!(orch.release_module("doomed").await);
        assert!(!orch.release_module("doomed").await);
        assert_eq!(orch.module("doomed").unwrap().status, ModuleStatus::Recovering);
    }

    #[tokio::test]
    async fn test_timeout_counts_as_failure() {
        let mut cfg = fast_cfg();
        cfg.module_timeout = Duration::from_millis(20);
        let orch = Orchestrator::builder(cfg).build().unwrap();
        let slow: ModuleRef = ModuleFn::arc("slow", |ctx: CycleContext| async move {
            tokio::select! {
                _ = ctx.token.cancelled() => Err(ModuleError::Canceled),
                _ = tokio::time::sleep(Duration::from_secs(5)) => Ok(json!(null)),
            }
        });
        assert!(orch.initialize(vec![slow]).await);

        let report = orch.run_cycle().await.unwrap();
        match report.outcome("slow") {
            Some(ModuleResult::Failed { error, .. }) => assert!(error.contains("timed out")),
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(orch.module("slow").unwrap().status, ModuleStatus::Degraded);
    }

    #[tokio::test]
    async fn test_auto_recovery_reinitializes_critical_module() {
        let mut cfg = fast_cfg();
        cfg.auto_recovery = true;
        let orch = Orchestrator::builder(cfg).build().unwrap();
        let flaky = Arc::new(Flaky {
            init_ok: false,
            inits: AtomicU32::new(0),
        });
        let handle: ModuleRef = flaky.clone();
        assert!(orch.initialize(vec![ok_module("a"), handle]).await);
        assert_eq!(orch.module("flaky").unwrap().status, ModuleStatus::Critical);

        let first = orch.run_cycle().await.unwrap();
        assert_eq!(first.outcome("flaky"), Some(&ModuleResult::NotInitialized));
        let snap = orch.module("flaky").unwrap();
        assert_eq!(snap.status, ModuleStatus::Recovering);
        assert_eq!(snap.recovery_attempts, 1);
        assert!(snap.initialized);

        let second = orch.run_cycle().await.unwrap();
        assert!(second.outcome("flaky").unwrap().is_success());
        assert_eq!(orch.module("flaky").unwrap().status, ModuleStatus::Healthy);
        assert_eq!(flaky.inits.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_health_checks_recorded() {
        let mut cfg = fast_cfg();
        cfg.health_check_every = 1;
        let orch = Orchestrator::builder(cfg).build().unwrap();
        let flaky: ModuleRef = Arc::new(Flaky {
            init_ok: true,
            inits: AtomicU32::new(0),
        });
        assert!(orch.initialize(vec![flaky]).await);
        orch.run_cycle().await.unwrap();

        let snap = orch.module("flaky").unwrap();
        assert_eq!(snap.health, Some(HealthSignal::Unhealthy("disk full".into())));
        let errors = orch.event_store().get_by_type(EventType::SystemError, 10, None);
        assert!(errors.iter().any(|e| e.data["source"] == "health_check"));
    }

    #[tokio::test]
    async fn test_status_snapshot_persisted() {
        let store = Arc::new(MemoryStore::new());
        let orch = Orchestrator::builder(fast_cfg())
            .with_store(store.clone())
            .build()
            .unwrap();
        assert!(orch.initialize(vec![ok_module("a")]).await);
        orch.run_cycle().await.unwrap();

        let saved = persist::load_as::<Value>(store.as_ref(), STATUS_KEY)
            .unwrap()
            .unwrap();
        assert_eq!(saved["cycle_count"], 1);
        assert_eq!(saved["modules"]["a"]["status"], "HEALTHY");
        assert_eq!(saved["session"]["successful_decisions"], 1);
        assert!(store.load("breaker.a").unwrap().is_some());
    }

    #[tokio::test]
    async fn test_run_honours_max_cycles_and_reports() {
        let mut cfg = fast_cfg();
        cfg.max_cycles = Some(4);
        let orch = Orchestrator::builder(cfg).build().unwrap();
        let bad = failing_module("bad", ModuleError::Integrity { error: "mismatch".into() });
        assert!(orch.initialize(vec![ok_module("a"), bad]).await);

        let report = orch.run(CancellationToken::new()).await.unwrap();
        assert_eq!(report.cycles, 4);
        assert_eq!(report.successes, 4);
        assert!(report.failures >= 2);
        assert!(report.resilience_score < 1.0);

        let last = orch.event_store().recent(1);
        assert_eq!(last[0].data["phase"], "shutdown");
    }

    #[tokio::test]
    async fn test_run_stops_on_cancel() {
        let mut cfg = fast_cfg();
        cfg.intervals = CycleIntervals::uniform(Duration::from_secs(3600));
        let orch = Orchestrator::builder(cfg).build().unwrap();
        assert!(orch.initialize(vec![ok_module("a")]).await);

        let token = CancellationToken::new();
        let stopper = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            stopper.cancel();
        });
        let report = tokio::time::timeout(Duration::from_secs(5), orch.run(token))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(report.cycles, 1);
        assert_eq!(report.final_mode, CycleMode::Normal);
    }

    #[tokio::test]
    async fn test_shared_breaker_mode() {
        let mut cfg = fast_cfg();
        cfg.breaker.mode = crate::config::BreakerMode::Shared;
        let orch = Orchestrator::builder(cfg).build().unwrap();
        assert!(orch.initialize(vec![ok_module("a"), ok_module("b")]).await);
        let a = orch.breaker("a").unwrap();
        let b = orch.breaker("b").unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(orch.status().breakers.len(), 1);
    }

    #[tokio::test]
    async fn test_exhausted_module_waits_for_breaker_before_hold() {
        let mut cfg = fast_cfg();
        cfg.breaker.timeout = Duration::from_millis(20);
        let orch = Orchestrator::builder(cfg).build().unwrap();
        let broken = failing_module("broken", ModuleError::fail("upstream unavailable"));
        assert!(orch.initialize(vec![ok_module("a"), broken]).await);

        let mut exhausted_at = None;
        for cycle in 1..=5u64 {
            let report = orch.run_cycle().await.unwrap();
            match report.outcome("broken") {
                Some(ModuleResult::Failed {
                    recovery: Some(outcome),
                    ..
                }) => {
                    if cycle <= 3 {
                        assert!(matches!(outcome, RecoveryOutcome::RetryReady { .. }));
                    } else {
                        assert!(matches!(outcome, RecoveryOutcome::Exhausted { .. }));
                        if exhausted_at.is_none() {
                            exhausted_at = outcome.incident_id().map(str::to_string);
                        }
                    }
                }
                other => panic!("cycle {cycle}: unexpected {other:?}"),
            }
            assert_ne!(orch.module("broken").unwrap().status, ModuleStatus::Offline);
        }
        assert_eq!(orch.module("broken").unwrap().status, ModuleStatus::Critical);
        assert_eq!(orch.breaker("broken").unwrap().state(), CircuitState::Open);

        tokio::time::sleep(Duration::from_millis(40)).await;
        let trial = orch.run_cycle().await.unwrap();
        assert!(matches!(trial.outcome("broken"), Some(ModuleResult::Failed { .. })));

        let snap = orch.module("broken").unwrap();
        assert_eq!(snap.status, ModuleStatus::Offline);
        let reason = snap.offline_reason.unwrap();
        assert!(reason.starts_with("INC-"));
        assert_eq!(exhausted_at.as_deref(), Some(reason.as_str()));
        assert_eq!(orch.breaker("broken").unwrap().state(), CircuitState::Open);
    }

    #[tokio::test]
    async fn test_immediate_retry_reruns_module_within_cycle() {
        let mut cfg = fast_cfg();
        cfg.recovery.classifications = cfg.recovery.classifications.with(
            ErrorKind::Generic,
            Classification::new(ErrorSeverity::Low, RecoveryStrategy::ImmediateRetry, 3),
        );
        let orch = Orchestrator::builder(cfg).build().unwrap();
        let calls = Arc::new(AtomicU32::new(0));
        let seen = Arc::clone(&calls);
        let hiccup: ModuleRef = ModuleFn::arc("hiccup", move |ctx: CycleContext| {
            let seen = Arc::clone(&seen);
            async move {
                if seen.fetch_add(1, Ordering::SeqCst) == 0 {
                    Err(ModuleError::fail("connection reset"))
                } else {
                    Ok(json!({ "cycle": ctx.cycle }))
                }
            }
        });
        assert!(orch.initialize(vec![hiccup]).await);

        let report = orch.run_cycle().await.unwrap();
        assert_eq!(
            report.outcome("hiccup"),
            Some(&ModuleResult::Success { result: json!({ "cycle": 1 }) })
        );
        assert_eq!(report.failures, 0);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(orch.module("hiccup").unwrap().status, ModuleStatus::Healthy);
        assert_eq!(orch.recovery().metrics().successful_recoveries, 1);
        assert_eq!(orch.breaker("hiccup").unwrap().metrics().total_calls, 2);
    }

    #[tokio::test]
    async fn test_concurrency_limit_bounds_in_flight_modules() {
        let mut cfg = fast_cfg();
        cfg.max_concurrent_operations = 2;
        let orch = Orchestrator::builder(cfg).build().unwrap();

        let in_flight = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let modules: Vec<ModuleRef> = (0..5)
            .map(|i| {
                let (in_flight, peak) = (Arc::clone(&in_flight), Arc::clone(&peak));
                let module: ModuleRef = ModuleFn::arc(format!("m{i}"), move |_ctx: CycleContext| {
                    let (in_flight, peak) = (Arc::clone(&in_flight), Arc::clone(&peak));
                    async move {
                        let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                        peak.fetch_max(now, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(20)).await;
                        in_flight.fetch_sub(1, Ordering::SeqCst);
                        Ok(json!("done"))
                    }
                });
                module
            })
            .collect();
        assert!(orch.initialize(modules).await);

        let report = orch.run_cycle().await.unwrap();
        assert_eq!(report.successes, 5);
        assert!(peak.load(Ordering::SeqCst) <= 2);
        assert_eq!(in_flight.load(Ordering::SeqCst), 0);
    }

    struct Shutdowns(AtomicUsize);

    #[async_trait]
    impl Subscribe for Shutdowns {
        async fn on_event(&self, e: &Event) {
            tokio::time::sleep(Duration::from_millis(5)).await;
            if e.event_type == EventType::StateChange && e.data["phase"] == "shutdown" {
                self.0.fetch_add(1, Ordering::SeqCst);
            }
        }

        fn name(&self) -> &'static str {
            "shutdowns"
        }
    }

    #[tokio::test]
    async fn test_run_delivers_shutdown_event_to_subscribers() {
        let mut cfg = fast_cfg();
        cfg.max_cycles = Some(2);
        let seen = Arc::new(Shutdowns(AtomicUsize::new(0)));
        let orch = Orchestrator::builder(cfg)
            .with_subscribers(vec![seen.clone()])
            .build()
            .unwrap();
        assert!(orch.initialize(vec![ok_module("a")]).await);

        orch.run(CancellationToken::new()).await.unwrap();
        assert_eq!(seen.0.load(Ordering::SeqCst), 1);
    }
}
