//! Error recovery: taxonomy, classification table, strategies and the recovery system.
//!
//! - [`ErrorKind`], [`ErrorSeverity`], [`RecoveryStrategy`], [`ClassificationTable`]
//! - [`ErrorContext`], [`RecoveryOutcome`] per-attempt input and structured result
//! - [`ErrorRecoverySystem`] dispatch, attempt chains, metrics, cooldown-guarded passes

mod classify;
mod strategy;
mod system;

pub use classify::{Classification, ClassificationTable, ErrorKind, ErrorSeverity, RecoveryStrategy};
pub use strategy::{ErrorContext, RecoveryOutcome};
pub use system::{ErrorRecoverySystem, RecoveryMetrics, RecoveryStatus, METRICS_KEY};
