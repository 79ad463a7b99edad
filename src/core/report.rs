//! Cycle, run and status reports.
//!
//! All of them serialize to JSON; [`OrchestratorStatus`] is the shape external
//! dashboards consume and is persisted under [`STATUS_KEY`].

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;

use super::mode::CycleMode;
use super::wrapper::ModuleSnapshot;
use crate::breaker::BreakerStatus;
use crate::config::duration_ms;
use crate::recovery::{RecoveryOutcome, RecoveryStatus};

/// Snapshot key of the persisted [`OrchestratorStatus`].
pub const STATUS_KEY: &str = "orchestrator_status";

/// What happened to one module during a cycle.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ModuleResult {
    Success { result: Value },
    Failed {
        error: String,
        recovery: Option<RecoveryOutcome>,
    },
    /// Skipped: its breaker is rejecting calls.
    Quarantined { breaker: String },
    /// Skipped: initialization never succeeded.
    NotInitialized,
    /// Skipped: on hold until released.
    Offline { reason: String },
    /// Shutdown arrived before the module was admitted.
    Cancelled,
}

impl ModuleResult {
    pub fn is_success(&self) -> bool {
        matches!(self, ModuleResult::Success { .. })
    }

    /// Counted against the cycle's success ratio.
    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            ModuleResult::Failed { .. } | ModuleResult::Quarantined { .. } | ModuleResult::NotInitialized
        )
    }
}

/// Result of [`Orchestrator::run_cycle`](crate::Orchestrator::run_cycle).
#[derive(Debug, Clone, Serialize)]
pub struct CycleReport {
    pub cycle_number: u64,
    /// Mode the cycle ran in.
    pub cycle_mode: CycleMode,
    /// Mode chosen for the next cycle.
    pub next_mode: CycleMode,
    #[serde(with = "duration_ms")]
    pub duration: Duration,
    pub outcomes: BTreeMap<String, ModuleResult>,
    pub successes: usize,
    pub failures: usize,
    pub circuit_reopens: u64,
    /// Bookkeeping failed and the cycle ended early.
    pub aborted: bool,
}

impl CycleReport {
    pub fn outcome(&self, module: &str) -> Option<&ModuleResult> {
        self.outcomes.get(module)
    }

    /// Modules that counted towards the success ratio.
    pub fn total(&self) -> usize {
        self.successes + self.failures
    }
}

/// Aggregate statistics since the orchestrator was built.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SessionStats {
    pub cycles: u64,
    pub total_decisions: u64,
    pub successful_decisions: u64,
    pub failed_decisions: u64,
    pub circuit_reopens: u64,
}

impl SessionStats {
    pub fn resilience_score(&self) -> f64 {
        resilience(self.successful_decisions, self.failed_decisions)
    }
}

/// Final summary returned by [`Orchestrator::run`](crate::Orchestrator::run).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunReport {
    pub cycles: u64,
    pub successes: u64,
    pub failures: u64,
    pub circuit_reopens: u64,
    /// `successes / (successes + failures)`; `1.0` when nothing ran.
    pub resilience_score: f64,
    pub final_mode: CycleMode,
}

/// Monitoring snapshot returned by [`Orchestrator::status`](crate::Orchestrator::status).
#[derive(Debug, Clone, Serialize)]
pub struct OrchestratorStatus {
    pub started_at: DateTime<Utc>,
    pub uptime_ms: u64,
    pub cycle_mode: CycleMode,
    pub cycle_count: u64,
    pub initialized: bool,
    pub modules: BTreeMap<String, ModuleSnapshot>,
    pub breakers: Vec<BreakerStatus>,
    pub recovery: RecoveryStatus,
    pub session: SessionStats,
    pub resilience_score: f64,
}

pub(crate) fn resilience(successes: u64, failures: u64) -> f64 {
    match successes + failures {
        0 => 1.0,
        total => successes as f64 / total as f64,
    }
}
