//! # ModuleWrapper: the orchestrator's bookkeeping record for one module.
//!
//! ```text
//! INITIALIZING ──init ok──► HEALTHY ──1-2 errors──► DEGRADED ──≥3 errors──► CRITICAL
//!      │                       ▲                                              │
//!      └──init failed──► CRITICAL                        start_recovery ◄─────┘
//!                                                               │
//!                              HEALTHY ◄──next success── RECOVERING ──re-init failed──► OFFLINE
//! ```
//!
//! OFFLINE modules (failed re-initialization, or put on hold after
//! MANUAL_INTERVENTION / exhausted recovery) are skipped until released.
//!
//! Only the cycle that invoked a module mutates its wrapper.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::breaker::{CircuitBreaker, CircuitState};
use crate::error::ModuleError;
use crate::modules::{HealthSignal, ModuleRef};

/// Health status of a supervised module.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ModuleStatus {
    #[default]
    Initializing,
    Healthy,
    Degraded,
    Critical,
    Recovering,
    Offline,
}

impl ModuleStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ModuleStatus::Initializing => "INITIALIZING",
            ModuleStatus::Healthy => "HEALTHY",
            ModuleStatus::Degraded => "DEGRADED",
            ModuleStatus::Critical => "CRITICAL",
            ModuleStatus::Recovering => "RECOVERING",
            ModuleStatus::Offline => "OFFLINE",
        }
    }
}

impl fmt::Display for ModuleStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Consecutive errors at which a module becomes CRITICAL.
const CRITICAL_AFTER: u32 = 3;
const SCORE_STEP: f64 = 0.1;

/// Serializable copy of a wrapper (part of the status snapshot).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModuleSnapshot {
    pub name: String,
    pub status: ModuleStatus,
    pub initialized: bool,
    pub execution_count: u64,
    pub error_count: u64,
    pub consecutive_errors: u32,
    pub recovery_attempts: u32,
    pub last_execution: Option<DateTime<Utc>>,
    pub last_success: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub cognitive_score: f64,
    pub offline_reason: Option<String>,
    pub health: Option<HealthSignal>,
    pub breaker_state: CircuitState,
}

/// Bookkeeping for one supervised module.
pub struct ModuleWrapper {
    pub(crate) name: String,
    pub(crate) module: ModuleRef,
    pub(crate) breaker: Arc<CircuitBreaker>,
    status: ModuleStatus,
    initialized: bool,
    execution_count: u64,
    error_count: u64,
    consecutive_errors: u32,
    recovery_attempts: u32,
    last_execution: Option<DateTime<Utc>>,
    last_success: Option<DateTime<Utc>>,
    last_error: Option<String>,
    cognitive_score: f64,
    offline_reason: Option<String>,
    health: Option<HealthSignal>,
}

impl ModuleWrapper {
    pub(crate) fn new(module: ModuleRef, breaker: Arc<CircuitBreaker>) -> Self {
        Self {
            name: module.name().to_string(),
            module,
            breaker,
            status: ModuleStatus::Initializing,
            initialized: false,
            execution_count: 0,
            error_count: 0,
            consecutive_errors: 0,
            recovery_attempts: 0,
            last_execution: None,
            last_success: None,
            last_error: None,
            cognitive_score: 0.0,
            offline_reason: None,
            health: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn status(&self) -> ModuleStatus {
        self.status
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    pub fn is_offline(&self) -> bool {
        self.status == ModuleStatus::Offline
    }

    pub fn offline_reason(&self) -> Option<&str> {
        self.offline_reason.as_deref()
    }

    pub fn last_success(&self) -> Option<DateTime<Utc>> {
        self.last_success
    }

    /// Outcome of `initialize`; returns the previous status.
    pub(crate) fn mark_initialized(&mut self, ok: bool, error: Option<String>) -> ModuleStatus {
        let prev = self.status;
        self.initialized = ok;
        if ok {
            self.status = ModuleStatus::Healthy;
        } else {
            self.status = ModuleStatus::Critical;
            self.last_error = error.or_else(|| Some("initialization declined".into()));
        }
        prev
    }

    /// Records a successful execution; returns the previous status.
    pub(crate) fn update_success(&mut self) -> ModuleStatus {
        let prev = self.status;
        let now = Utc::now();
        self.execution_count += 1;
        self.consecutive_errors = 0;
        self.last_execution = Some(now);
        self.last_success = Some(now);
        self.cognitive_score = (self.cognitive_score + SCORE_STEP).min(1.0);
        self.status = ModuleStatus::Healthy;
        prev
    }

    /// Records a failed execution; the cognitive score is left unchanged.
    pub(crate) fn update_error(&mut self, error: &ModuleError) -> ModuleStatus {
        let prev = self.status;
        self.error_count += 1;
        self.consecutive_errors += 1;
        self.last_execution = Some(Utc::now());
        self.last_error = Some(error.to_string());
        self.status = if self.consecutive_errors >= CRITICAL_AFTER {
            ModuleStatus::Critical
        } else {
            ModuleStatus::Degraded
        };
        prev
    }

    /// Breaker is rejecting calls: skip execution and mark CRITICAL.
    pub(crate) fn quarantine(&mut self) -> ModuleStatus {
        let prev = self.status;
        self.status = ModuleStatus::Critical;
        prev
    }

    pub(crate) fn start_recovery(&mut self) -> ModuleStatus {
        let prev = self.status;
        self.recovery_attempts += 1;
        self.status = ModuleStatus::Recovering;
        prev
    }

    /// Re-initialization succeeded; the next successful execution makes it HEALTHY.
    pub(crate) fn recovered(&mut self) {
        self.initialized = true;
        self.consecutive_errors = 0;
    }

    pub(crate) fn mark_offline(&mut self, reason: impl Into<String>) -> ModuleStatus {
        let prev = self.status;
        self.status = ModuleStatus::Offline;
        self.offline_reason = Some(reason.into());
        prev
    }

    /// Takes the module out of OFFLINE; it runs again from the next cycle.
    pub(crate) fn release(&mut self) -> ModuleStatus {
        let prev = self.status;
        self.offline_reason = None;
        self.consecutive_errors = 0;
        self.status = ModuleStatus::Recovering;
        prev
    }

    pub(crate) fn record_health(&mut self, signal: HealthSignal) {
        self.health = Some(signal);
    }

    pub fn snapshot(&self) -> ModuleSnapshot {
        ModuleSnapshot {
            name: self.name.clone(),
            status: self.status,
            initialized: self.initialized,
            execution_count: self.execution_count,
            error_count: self.error_count,
            consecutive_errors: self.consecutive_errors,
            recovery_attempts: self.recovery_attempts,
            last_execution: self.last_execution,
            last_success: self.last_success,
            last_error: self.last_error.clone(),
            cognitive_score: self.cognitive_score,
            offline_reason: self.offline_reason.clone(),
            health: self.health.clone(),
            breaker_state: self.breaker.state(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BreakerConfig;
    use crate::events::EventStore;
    use crate::modules::{CycleContext, ModuleFn};
    use serde_json::json;

    fn wrapper() -> ModuleWrapper {
        let module: ModuleRef =
            ModuleFn::arc("alpha", |_ctx: CycleContext| async { Ok(json!(null)) });
        let breaker = Arc::new(CircuitBreaker::new(
            "alpha",
            BreakerConfig::default(),
            Arc::new(EventStore::in_memory()),
        ));
        ModuleWrapper::new(module, breaker)
    }

    #[test]
    fn test_error_escalation() {
        let mut w = wrapper();
        w.mark_initialized(true, None);
        let err = ModuleError::fail("boom");
        assert_eq!(w.update_error(&err), ModuleStatus::Healthy);
        assert_eq!(w.status(), ModuleStatus::Degraded);
        w.update_error(&err);
        assert_eq!(w.status(), ModuleStatus::Degraded);
        w.update_error(&err);
        assert_eq!(w.status(), ModuleStatus::Critical);

        let snap = w.snapshot();
        assert_eq!(snap.error_count, 3);
        assert_eq!(snap.cognitive_score, 0.0);
        assert_eq!(snap.last_error.as_deref(), Some("execution failed: boom"));
    }

    #[test]
    fn test_score_is_clamped() {
        let mut w = wrapper();
        for _ in 0..20 {
            w.update_success();
        }
        let snap = w.snapshot();
        assert_eq!(snap.cognitive_score, 1.0);
        assert_eq!(snap.execution_count, 20);
        assert_eq!(snap.status, ModuleStatus::Healthy);
    }

    #[test]
    fn test_recovery_path() {
        let mut w = wrapper();
        w.mark_initialized(false, Some("no db".into()));
        assert_eq!(w.status(), ModuleStatus::Critical);
        assert!(!w.is_initialized());

        w.start_recovery();
        w.recovered();
        assert_eq!(w.status(), ModuleStatus::Recovering);
        w.update_success();
        assert_eq!(w.status(), ModuleStatus::Healthy);
        assert_eq!(w.snapshot().recovery_attempts, 1);

        w.mark_offline("INC-1");
        assert!(w.is_offline());
        w.release();
        assert_eq!(w.status(), ModuleStatus::Recovering);
        assert_eq!(w.snapshot().offline_reason, None);
    }
}
