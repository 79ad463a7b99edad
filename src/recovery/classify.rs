//! Error taxonomy and the classification table.
//!
//! | kind                   | severity | strategy             | max attempts |
//! |------------------------|----------|----------------------|--------------|
//! | generic                | medium   | exponential_backoff  | 3            |
//! | cognitive-overload     | high     | circuit_break        | 2            |
//! | decision-integrity     | high     | graceful_degradation | 2            |
//! | system-reboot-required | critical | system_restart       | 1            |
//! | unclassified           | fatal    | manual_intervention  | 1            |
//!
//! Entries can be overridden from configuration; kinds absent from an override
//! keep their default row.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Class of an error handed to recovery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorKind {
    Generic,
    CognitiveOverload,
    DecisionIntegrity,
    SystemRebootRequired,
    /// Anything not recognized; treated as fatal.
    Unclassified,
}

impl ErrorKind {
    /// Parses an external label; unknown labels are [`ErrorKind::Unclassified`].
    ///
    /// # Example
    /// ```
    /// use faultvisor::ErrorKind;
    ///
    /// assert_eq!(ErrorKind::parse("cognitive-overload"), ErrorKind::CognitiveOverload);
    /// assert_eq!(ErrorKind::parse("base"), ErrorKind::Generic);
    /// assert_eq!(ErrorKind::parse("disk-on-fire"), ErrorKind::Unclassified);
    /// ```
    pub fn parse(label: &str) -> Self {
        match label.trim().to_ascii_lowercase().replace('_', "-").as_str() {
            "generic" | "base" => ErrorKind::Generic,
            "cognitive-overload" => ErrorKind::CognitiveOverload,
            "decision-integrity" => ErrorKind::DecisionIntegrity,
            "system-reboot-required" => ErrorKind::SystemRebootRequired,
            _ => ErrorKind::Unclassified,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Generic => "generic",
            ErrorKind::CognitiveOverload => "cognitive-overload",
            ErrorKind::DecisionIntegrity => "decision-integrity",
            ErrorKind::SystemRebootRequired => "system-reboot-required",
            ErrorKind::Unclassified => "unclassified",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorSeverity {
    Low,
    Medium,
    High,
    Critical,
    Fatal,
}

/// How an error class is recovered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryStrategy {
    /// Re-invoke the operation right away, up to max attempts.
    ImmediateRetry,
    /// Wait `backoff.next(attempt)` then signal retry-ready.
    ExponentialBackoff,
    /// Defer to the circuit breaker and wait for stabilization.
    CircuitBreak,
    /// Keep running with a reduced capability set.
    GracefulDegradation,
    /// Supervised restart.
    SystemRestart,
    /// Open an incident; never retried automatically.
    ManualIntervention,
}

impl RecoveryStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecoveryStrategy::ImmediateRetry => "immediate_retry",
            RecoveryStrategy::ExponentialBackoff => "exponential_backoff",
            RecoveryStrategy::CircuitBreak => "circuit_break",
            RecoveryStrategy::GracefulDegradation => "graceful_degradation",
            RecoveryStrategy::SystemRestart => "system_restart",
            RecoveryStrategy::ManualIntervention => "manual_intervention",
        }
    }
}

impl fmt::Display for RecoveryStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One row of the classification table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Classification {
    pub severity: ErrorSeverity,
    pub strategy: RecoveryStrategy,
    pub max_attempts: u32,
}

impl Classification {
    pub const fn new(severity: ErrorSeverity, strategy: RecoveryStrategy, max_attempts: u32) -> Self {
        Self {
            severity,
            strategy,
            max_attempts,
        }
    }
}

const FATAL: Classification =
    Classification::new(ErrorSeverity::Fatal, RecoveryStrategy::ManualIntervention, 1);

/// Error kind → classification. Built once, read-only afterwards.
#[derive(Debug, Clone, PartialEq)]
pub struct ClassificationTable {
    entries: BTreeMap<ErrorKind, Classification>,
}

impl ClassificationTable {
    /// Replaces the row for `kind`.
    #[must_use]
    pub fn with(mut self, kind: ErrorKind, classification: Classification) -> Self {
        self.entries.insert(kind, classification);
        self
    }

    /// Row for `kind`; falls back to the unclassified row, then to FATAL.
    pub fn lookup(&self, kind: ErrorKind) -> Classification {
        self.entries
            .get(&kind)
            .or_else(|| self.entries.get(&ErrorKind::Unclassified))
            .copied()
            .unwrap_or(FATAL)
    }
}

impl Default for ClassificationTable {
    fn default() -> Self {
        use ErrorSeverity::*;
        use RecoveryStrategy::*;

        let entries = BTreeMap::from([
            (ErrorKind::Generic, Classification::new(Medium, ExponentialBackoff, 3)),
            (ErrorKind::CognitiveOverload, Classification::new(High, CircuitBreak, 2)),
            (ErrorKind::DecisionIntegrity, Classification::new(High, GracefulDegradation, 2)),
            (ErrorKind::SystemRebootRequired, Classification::new(Critical, SystemRestart, 1)),
            (ErrorKind::Unclassified, FATAL),
        ]);
        Self { entries }
    }
}

impl Serialize for ClassificationTable {
    fn serialize<S: Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        self.entries.serialize(s)
    }
}

impl<'de> Deserialize<'de> for ClassificationTable {
    /// Overrides are merged over the default table.
    fn deserialize<D: Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        let overrides = BTreeMap::<ErrorKind, Classification>::deserialize(d)?;
        let mut table = Self::default();
        table.entries.extend(overrides);
        Ok(table)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_rows() {
        let t = ClassificationTable::default();
        let overload = t.lookup(ErrorKind::CognitiveOverload);
        assert_eq!(overload.strategy, RecoveryStrategy::CircuitBreak);
        assert_eq!(overload.max_attempts, 2);
        assert_eq!(t.lookup(ErrorKind::Unclassified).severity, ErrorSeverity::Fatal);
        assert_eq!(
            t.lookup(ErrorKind::SystemRebootRequired).strategy,
            RecoveryStrategy::SystemRestart
        );
    }

    #[test]
    fn test_serialized_keys_are_kebab_case() {
        let v = serde_json::to_value(ClassificationTable::default()).unwrap();
        assert_eq!(v["decision-integrity"]["strategy"], "graceful_degradation");
        assert_eq!(v["generic"]["severity"], "medium");
    }

    #[test]
    fn test_parse_normalizes_labels() {
        assert_eq!(ErrorKind::parse("Decision_Integrity"), ErrorKind::DecisionIntegrity);
        assert_eq!(ErrorKind::parse("fatal"), ErrorKind::Unclassified);
    }
}
