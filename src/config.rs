//! # Runtime configuration.
//!
//! [`OrchestratorConfig`] centralizes every knob of the core; the component
//! sections ([`BreakerConfig`], [`RecoveryConfig`], [`EventStoreConfig`]) are
//! also usable on their own when a component is built standalone.
//!
//! All structs deserialize with `#[serde(default)]`, so a partial JSON document
//! only overrides what it names. Durations are milliseconds on the wire.
//!
//! ## Sentinel values
//! - `max_concurrent_operations = 0` → unlimited (no semaphore created)
//! - `module_timeout = 0` → no per-call timeout
//! - `health_check_every = 0` → health checks disabled
//! - `events.max_events = 0` → unbounded event history

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::core::CycleMode;
use crate::error::ConfigError;
use crate::policies::{BackoffPolicy, JitterPolicy};
use crate::recovery::ClassificationTable;

/// Serde adapter encoding a [`Duration`] as integer milliseconds.
pub(crate) mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}

/// Whether modules get their own breaker or share one.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakerMode {
    /// One breaker per supervised module (fault isolation per module).
    #[default]
    PerModule,
    /// A single breaker guards every module call.
    Shared,
}

/// Circuit breaker settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BreakerConfig {
    /// Consecutive failures that open the circuit.
    pub failure_threshold: u32,
    /// Cooldown after the last failure before a probe is admitted.
    #[serde(with = "duration_ms")]
    pub timeout: Duration,
    /// Per-module or shared breakers (orchestrator only).
    pub mode: BreakerMode,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            timeout: Duration::from_secs(60),
            mode: BreakerMode::PerModule,
        }
    }
}

/// Error recovery settings.
///
/// `backoff` drives EXPONENTIAL_BACKOFF: the default (`first = 1s`, `factor = 2`)
/// yields `2^attempt` seconds, capped at `max`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecoveryConfig {
    /// Error kind → severity/strategy/max-attempts table.
    pub classifications: ClassificationTable,
    /// Delay schedule for EXPONENTIAL_BACKOFF.
    pub backoff: BackoffPolicy,
    /// Wait applied by CIRCUIT_BREAK before handing control back.
    #[serde(with = "duration_ms")]
    pub stabilization: Duration,
    /// Wait applied by SYSTEM_RESTART.
    #[serde(with = "duration_ms")]
    pub restart_delay: Duration,
    /// Minimum spacing between two full recovery passes.
    #[serde(with = "duration_ms")]
    pub cooldown: Duration,
    /// Failed passes in a row before recovery locks.
    pub max_consecutive_failures: u32,
    /// Contact channel attached to MANUAL_INTERVENTION incidents.
    pub contact: String,
    /// Capabilities kept under GRACEFUL_DEGRADATION.
    pub degraded_available: Vec<String>,
    /// Capabilities switched off under GRACEFUL_DEGRADATION.
    pub degraded_disabled: Vec<String>,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            classifications: ClassificationTable::default(),
            backoff: BackoffPolicy {
                first: Duration::from_secs(1),
                max: Duration::from_secs(60),
                factor: 2.0,
                jitter: JitterPolicy::None,
            },
            stabilization: Duration::from_secs(5),
            restart_delay: Duration::from_secs(10),
            cooldown: Duration::from_secs(60),
            max_consecutive_failures: 3,
            contact: "ops@localhost".to_string(),
            degraded_available: vec!["basic".to_string(), "monitoring".to_string()],
            degraded_disabled: vec!["advanced".to_string(), "analytics".to_string()],
        }
    }
}

/// Event store settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EventStoreConfig {
    /// JSON Lines log file; `None` keeps events in memory only.
    pub path: Option<PathBuf>,
    /// Capacity of the broadcast ring buffer feeding subscribers.
    pub bus_capacity: usize,
    /// Events kept in memory (oldest dropped first); `0` keeps everything.
    pub max_events: usize,
}

impl EventStoreConfig {
    /// Returns a bus capacity clamped to a minimum of 1.
    #[inline]
    pub fn bus_capacity_clamped(&self) -> usize {
        self.bus_capacity.max(1)
    }
}

impl Default for EventStoreConfig {
    fn default() -> Self {
        Self {
            path: None,
            bus_capacity: 1024,
            max_events: 10_000,
        }
    }
}

/// Tick interval bound to each [`CycleMode`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CycleIntervals {
    #[serde(with = "duration_ms")]
    pub urgent: Duration,
    #[serde(with = "duration_ms")]
    pub normal: Duration,
    #[serde(with = "duration_ms")]
    pub deep_analysis: Duration,
    #[serde(with = "duration_ms")]
    pub maintenance: Duration,
    #[serde(with = "duration_ms")]
    pub cognitive_boost: Duration,
}

impl CycleIntervals {
    /// Interval to sleep after a cycle run in `mode`.
    pub fn for_mode(&self, mode: CycleMode) -> Duration {
        match mode {
            CycleMode::Urgent => self.urgent,
            CycleMode::Normal => self.normal,
            CycleMode::DeepAnalysis => self.deep_analysis,
            CycleMode::Maintenance => self.maintenance,
            CycleMode::CognitiveBoost => self.cognitive_boost,
        }
    }

    /// Same interval for every mode (handy in tests and demos).
    pub fn uniform(d: Duration) -> Self {
        Self {
            urgent: d,
            normal: d,
            deep_analysis: d,
            maintenance: d,
            cognitive_boost: d,
        }
    }
}

impl Default for CycleIntervals {
    fn default() -> Self {
        Self {
            urgent: Duration::from_secs(5),
            normal: Duration::from_secs(30),
            deep_analysis: Duration::from_secs(300),
            maintenance: Duration::from_secs(1800),
            cognitive_boost: Duration::from_secs(60),
        }
    }
}

/// Global configuration for the orchestrator.
///
/// ## Notes
/// All fields are public for flexibility. Prefer the helper accessors over
/// sprinkling sentinel checks (`0`) across the codebase.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Module calls allowed in flight at once (`0` = unlimited).
    pub max_concurrent_operations: usize,
    /// Modules that must initialize for [`Orchestrator::initialize`](crate::Orchestrator::initialize) to succeed.
    pub min_initialized_modules: usize,
    /// Per-call timeout for `initialize`/`execute`/`health_check` (`0` = none).
    #[serde(with = "duration_ms")]
    pub module_timeout: Duration,
    /// Tick interval per cycle mode.
    pub intervals: CycleIntervals,
    /// Success ratio below which the next cycle runs URGENT.
    pub urgent_ratio: f64,
    /// Success ratio below which the next cycle runs COGNITIVE_BOOST.
    pub boost_ratio: f64,
    /// All-success cycles in a row before relaxing to DEEP_ANALYSIS.
    pub stable_window: u64,
    /// All-success cycles in a row before relaxing to MAINTENANCE.
    pub maintenance_window: u64,
    /// Run module health checks every N cycles (`0` = never).
    pub health_check_every: u64,
    /// Attempt a recovery pass for CRITICAL modules after each cycle.
    pub auto_recovery: bool,
    /// Stop [`Orchestrator::run`](crate::Orchestrator::run) after this many cycles.
    pub max_cycles: Option<u64>,
    pub breaker: BreakerConfig,
    pub recovery: RecoveryConfig,
    pub events: EventStoreConfig,
}

impl OrchestratorConfig {
    /// Loads a (possibly partial) configuration from a JSON file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&raw)
    }

    /// Parses a (possibly partial) configuration document.
    pub fn from_json_str(raw: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(raw)?)
    }

    /// Returns the concurrency limit as an `Option`.
    ///
    /// - `None` → unlimited (no semaphore)
    /// - `Some(n)` → at most `n` module calls in flight
    #[inline]
    pub fn concurrency_limit(&self) -> Option<usize> {
        if self.max_concurrent_operations == 0 {
            None
        } else {
            Some(self.max_concurrent_operations)
        }
    }

    /// Returns the per-call timeout as an `Option`.
    #[inline]
    pub fn call_timeout(&self) -> Option<Duration> {
        if self.module_timeout == Duration::ZERO {
            None
        } else {
            Some(self.module_timeout)
        }
    }

    /// True if health checks are due on cycle `cycle` (1-based).
    #[inline]
    pub fn health_check_due(&self, cycle: u64) -> bool {
        self.health_check_every != 0 && cycle % self.health_check_every == 0
    }
}

impl Default for OrchestratorConfig {
    /// Default configuration:
    ///
    /// - `max_concurrent_operations = 8`
    /// - `module_timeout = 30s`
    /// - intervals URGENT=5s, NORMAL=30s, DEEP_ANALYSIS=300s, MAINTENANCE=1800s, COGNITIVE_BOOST=60s
    /// - `urgent_ratio = 0.5`, `boost_ratio = 0.8`
    /// - `stable_window = 10`, `maintenance_window = 60`
    /// - `health_check_every = 5`, `auto_recovery = true`
    fn default() -> Self {
        Self {
            max_concurrent_operations: 8,
            min_initialized_modules: 1,
            module_timeout: Duration::from_secs(30),
            intervals: CycleIntervals::default(),
            urgent_ratio: 0.5,
            boost_ratio: 0.8,
            stable_window: 10,
            maintenance_window: 60,
            health_check_every: 5,
            auto_recovery: true,
            max_cycles: None,
            breaker: BreakerConfig::default(),
            recovery: RecoveryConfig::default(),
            events: EventStoreConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recovery::{ErrorKind, RecoveryStrategy};

    #[test]
    fn test_partial_document_keeps_defaults() {
        let cfg = OrchestratorConfig::from_json_str(
            r#"{ "max_concurrent_operations": 2, "breaker": { "timeout": 1500 } }"#,
        )
        .unwrap();
        assert_eq!(cfg.concurrency_limit(), Some(2));
        assert_eq!(cfg.breaker.timeout, Duration::from_millis(1500));
        assert_eq!(cfg.breaker.failure_threshold, 5);
        assert_eq!(cfg.intervals.for_mode(CycleMode::Maintenance), Duration::from_secs(1800));
    }

    #[test]
    fn test_sentinels() {
        let mut cfg = OrchestratorConfig::default();
        cfg.max_concurrent_operations = 0;
        cfg.module_timeout = Duration::ZERO;
        cfg.health_check_every = 0;
        assert_eq!(cfg.concurrency_limit(), None);
        assert_eq!(cfg.call_timeout(), None);
        assert!(!cfg.health_check_due(10));
    }

    #[test]
    fn test_classification_override_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("faultvisor.json");
        std::fs::write(
            &path,
            r#"{ "recovery": { "classifications": {
                "generic": { "severity": "low", "strategy": "immediate_retry", "max_attempts": 4 }
            } } }"#,
        )
        .unwrap();

        let cfg = OrchestratorConfig::from_json_file(&path).unwrap();
        let generic = cfg.recovery.classifications.lookup(ErrorKind::Generic);
        assert_eq!(generic.strategy, RecoveryStrategy::ImmediateRetry);
        assert_eq!(generic.max_attempts, 4);
        let overload = cfg.recovery.classifications.lookup(ErrorKind::CognitiveOverload);
        assert_eq!(overload.strategy, RecoveryStrategy::CircuitBreak);
    }

    #[test]
    fn test_missing_file_is_read_error() {
        let err = OrchestratorConfig::from_json_file("/nonexistent/faultvisor.json").unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }
}
