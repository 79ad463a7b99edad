//! # Cycle modes and their adaptation rules.
//!
//! The orchestrator runs in exactly one [`CycleMode`] at a time. After every
//! cycle, [`adapt`] picks the next mode from the cycle's outcome:
//!
//! ```text
//! bookkeeping failed twice in a row ─────────────────► URGENT
//! any failure:
//!   critical module or ratio < urgent_ratio ─────────► URGENT
//!   ratio < boost_ratio ─────────────────────────────► COGNITIVE_BOOST
//!   otherwise ──────────────────────────────────────► current, at least NORMAL
//! all succeeded:
//!   URGENT ─► COGNITIVE_BOOST ─► NORMAL              (one step per cycle)
//!   streak ≥ maintenance_window ─────────────────────► MAINTENANCE
//!   streak ≥ stable_window ──────────────────────────► DEEP_ANALYSIS
//!   otherwise ──────────────────────────────────────► NORMAL
//! ```
//!
//! Urgency order: URGENT > COGNITIVE_BOOST > NORMAL > DEEP_ANALYSIS > MAINTENANCE.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::config::OrchestratorConfig;

/// Operating cadence of the orchestration loop.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CycleMode {
    Urgent,
    #[default]
    Normal,
    DeepAnalysis,
    Maintenance,
    CognitiveBoost,
}

impl CycleMode {
    /// Higher is more urgent (shorter interval, closer attention).
    pub fn urgency(self) -> u8 {
        match self {
            CycleMode::Urgent => 4,
            CycleMode::CognitiveBoost => 3,
            CycleMode::Normal => 2,
            CycleMode::DeepAnalysis => 1,
            CycleMode::Maintenance => 0,
        }
    }

    pub fn is_more_urgent_than(self, other: CycleMode) -> bool {
        self.urgency() > other.urgency()
    }

    pub fn as_str(self) -> &'static str {
        match self {
            CycleMode::Urgent => "URGENT",
            CycleMode::Normal => "NORMAL",
            CycleMode::DeepAnalysis => "DEEP_ANALYSIS",
            CycleMode::Maintenance => "MAINTENANCE",
            CycleMode::CognitiveBoost => "COGNITIVE_BOOST",
        }
    }
}

impl fmt::Display for CycleMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Inputs of one adaptation step.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct ModeSignals {
    pub successes: usize,
    pub total: usize,
    pub any_critical: bool,
    /// All-success cycles in a row, including this one.
    pub stable_streak: u64,
    /// Consecutive cycles whose bookkeeping failed, including this one.
    pub bookkeeping_failures: u32,
}

/// Next mode after a cycle ran in `current`.
pub(crate) fn adapt(current: CycleMode, s: &ModeSignals, cfg: &OrchestratorConfig) -> CycleMode {
    if s.bookkeeping_failures >= 2 {
        return CycleMode::Urgent;
    }
    if s.total == 0 {
        return current;
    }

    if s.successes < s.total {
        let ratio = s.successes as f64 / s.total as f64;
        return if s.any_critical || ratio < cfg.urgent_ratio {
            CycleMode::Urgent
        } else if ratio < cfg.boost_ratio {
            CycleMode::CognitiveBoost
        } else if current.urgency() >= CycleMode::Normal.urgency() {
            current
        } else {
            CycleMode::Normal
        };
    }

    match current {
        CycleMode::Urgent => CycleMode::CognitiveBoost,
        CycleMode::CognitiveBoost => CycleMode::Normal,
        _ if cfg.maintenance_window > 0 && s.stable_streak >= cfg.maintenance_window => {
            CycleMode::Maintenance
        }
        _ if cfg.stable_window > 0 && s.stable_streak >= cfg.stable_window => {
            CycleMode::DeepAnalysis
        }
        _ => CycleMode::Normal,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn signals(successes: usize, total: usize, streak: u64) -> ModeSignals {
        ModeSignals {
            successes,
            total,
            stable_streak: streak,
            ..ModeSignals::default()
        }
    }

    #[test]
    fn test_urgency_order() {
        use CycleMode::*;
        let order = [Urgent, CognitiveBoost, Normal, DeepAnalysis, Maintenance];
        for pair in order.windows(2) {
            assert!(pair[0].is_more_urgent_than(pair[1]));
        }
    }

    #[test]
    fn test_failures_escalate() {
        let cfg = OrchestratorConfig::default();
        assert_eq!(adapt(CycleMode::Normal, &signals(2, 5, 0), &cfg), CycleMode::Urgent);
        assert_eq!(adapt(CycleMode::Normal, &signals(3, 5, 0), &cfg), CycleMode::CognitiveBoost);
        assert_eq!(adapt(CycleMode::Maintenance, &signals(9, 10, 0), &cfg), CycleMode::Normal);
        assert_eq!(adapt(CycleMode::CognitiveBoost, &signals(9, 10, 0), &cfg), CycleMode::CognitiveBoost);

        let critical = ModeSignals {
            any_critical: true,
            ..signals(9, 10, 0)
        };
        assert_eq!(adapt(CycleMode::Normal, &critical, &cfg), CycleMode::Urgent);
    }

    #[test]
    fn test_success_relaxes_step_by_step() {
        let cfg = OrchestratorConfig::default();
        let mut mode = CycleMode::Urgent;
        mode = adapt(mode, &signals(4, 4, 1), &cfg);
        assert_eq!(mode, CycleMode::CognitiveBoost);
        mode = adapt(mode, &signals(4, 4, 2), &cfg);
        assert_eq!(mode, CycleMode::Normal);
        mode = adapt(mode, &signals(4, 4, 10), &cfg);
        assert_eq!(mode, CycleMode::DeepAnalysis);
        mode = adapt(mode, &signals(4, 4, 60), &cfg);
        assert_eq!(mode, CycleMode::Maintenance);
    }

    #[test]
    fn test_bookkeeping_failures_force_urgent() {
        let cfg = OrchestratorConfig::default();
        let s = ModeSignals {
            bookkeeping_failures: 2,
            ..signals(4, 4, 30)
        };
        assert_eq!(adapt(CycleMode::DeepAnalysis, &s, &cfg), CycleMode::Urgent);
        assert_eq!(adapt(CycleMode::DeepAnalysis, &signals(0, 0, 0), &cfg), CycleMode::DeepAnalysis);
    }

    #[test]
    fn test_serde_names() {
        assert_eq!(
            serde_json::to_value(CycleMode::CognitiveBoost).unwrap(),
            serde_json::json!("COGNITIVE_BOOST")
        );
        assert_eq!(CycleMode::DeepAnalysis.to_string(), "DEEP_ANALYSIS");
    }
}
