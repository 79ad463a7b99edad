//! Strategy handlers and their static dispatch.
//!
//! [`execute`] is a plain `match` over [`RecoveryStrategy`]; the mapping is fixed
//! at compile time. Every wait observes the recovery system's cancellation token
//! and yields [`RecoveryOutcome::Interrupted`] when it fires.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use super::classify::{Classification, ErrorKind, RecoveryStrategy};
use crate::config::{duration_ms, RecoveryConfig};

/// Transient description of one handled error.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorContext {
    pub kind: ErrorKind,
    pub message: String,
    /// Module the error came from, when known.
    pub module: Option<String>,
    pub timestamp: DateTime<Utc>,
    /// Attempts already made in this chain (0 on the first call).
    pub attempt_count: u32,
    pub max_retries: u32,
    pub classification: Classification,
}

/// Structured result of a recovery attempt.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RecoveryOutcome {
    /// The caller may retry after `delay` (already waited).
    RetryReady {
        #[serde(with = "duration_ms")]
        delay: Duration,
    },
    /// An immediate retry succeeded after `attempts` invocations.
    Retried { attempts: u32 },
    /// The circuit breaker is authoritative; stabilization was waited out.
    DeferToBreaker {
        #[serde(with = "duration_ms")]
        stabilization: Duration,
    },
    /// Keep running with a reduced capability set.
    Degraded {
        available: Vec<String>,
        disabled: Vec<String>,
    },
    /// A supervised restart was performed.
    Restarted { at: DateTime<Utc> },
    /// An operator must step in; nothing is retried automatically.
    ManualIntervention { incident_id: String, contact: String },
    /// Max attempts used up; escalated to an operator incident (one per chain).
    Exhausted {
        attempts: u32,
        incident_id: String,
        contact: String,
    },
    /// A wait was cut short by shutdown.
    Interrupted,
}

impl RecoveryOutcome {
    /// The error was dealt with and the caller may carry on.
    pub fn is_recovered(&self) -> bool {
        matches!(
            self,
            RecoveryOutcome::RetryReady { .. }
                | RecoveryOutcome::Retried { .. }
                | RecoveryOutcome::DeferToBreaker { .. }
                | RecoveryOutcome::Degraded { .. }
                | RecoveryOutcome::Restarted { .. }
        )
    }

    /// No automatic recovery will follow.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RecoveryOutcome::ManualIntervention { .. } | RecoveryOutcome::Exhausted { .. }
        )
    }

    /// Incident opened for an operator, if any.
    pub fn incident_id(&self) -> Option<&str> {
        match self {
            RecoveryOutcome::ManualIntervention { incident_id, .. }
            | RecoveryOutcome::Exhausted { incident_id, .. } => Some(incident_id),
            _ => None,
        }
    }

    pub fn as_label(&self) -> &'static str {
        match self {
            RecoveryOutcome::RetryReady { .. } => "retry_ready",
            RecoveryOutcome::Retried { .. } => "retried",
            RecoveryOutcome::DeferToBreaker { .. } => "defer_to_breaker",
            RecoveryOutcome::Degraded { .. } => "degraded",
            RecoveryOutcome::Restarted { .. } => "restarted",
            RecoveryOutcome::ManualIntervention { .. } => "manual_intervention",
            RecoveryOutcome::Exhausted { .. } => "exhausted",
            RecoveryOutcome::Interrupted => "interrupted",
        }
    }
}

pub(crate) async fn execute(
    ctx: &ErrorContext,
    cfg: &RecoveryConfig,
    token: &CancellationToken,
    incident_seq: u64,
) -> RecoveryOutcome {
    match ctx.classification.strategy {
        RecoveryStrategy::ImmediateRetry => RecoveryOutcome::RetryReady {
            delay: Duration::ZERO,
        },
        RecoveryStrategy::ExponentialBackoff => {
            let delay = cfg.backoff.next(ctx.attempt_count);
            if wait(delay, token).await {
                RecoveryOutcome::RetryReady { delay }
            } else {
                RecoveryOutcome::Interrupted
            }
        }
        RecoveryStrategy::CircuitBreak => {
            if wait(cfg.stabilization, token).await {
                RecoveryOutcome::DeferToBreaker {
                    stabilization: cfg.stabilization,
                }
            } else {
                RecoveryOutcome::Interrupted
            }
        }
        RecoveryStrategy::GracefulDegradation => RecoveryOutcome::Degraded {
            available: cfg.degraded_available.clone(),
            disabled: cfg.degraded_disabled.clone(),
        },
        RecoveryStrategy::SystemRestart => {
            if wait(cfg.restart_delay, token).await {
                RecoveryOutcome::Restarted { at: Utc::now() }
            } else {
                RecoveryOutcome::Interrupted
            }
        }
        RecoveryStrategy::ManualIntervention => RecoveryOutcome::ManualIntervention {
            incident_id: incident_id(incident_seq),
            contact: cfg.contact.clone(),
        },
    }
}

/// `INC-<yyyymmddHHMMSS>-<seq>`; `seq` keeps ids opened within one second apart.
pub(crate) fn incident_id(seq: u64) -> String {
    format!("INC-{}-{seq}", Utc::now().format("%Y%m%d%H%M%S"))
}

/// Sleeps for `d`; returns `false` if cancelled first.
async fn wait(d: Duration, token: &CancellationToken) -> bool {
    if d.is_zero() {
        return !token.is_cancelled();
    }
    tokio::select! {
        _ = token.cancelled() => false,
        _ = tokio::time::sleep(d) => true,
    }
}
