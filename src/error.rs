//! Error types used by the faultvisor core and the modules it supervises.
//!
//! - [`ModuleError`]: failures raised by a supervised module's operation.
//! - [`BreakerError`]: result of a call routed through a [`CircuitBreaker`](crate::CircuitBreaker).
//! - [`StoreError`]: persistence failures (snapshots, event log, exports).
//! - [`RecoveryError`]: a full recovery pass was refused.
//! - [`ConfigError`]: configuration file could not be loaded.
//! - [`OrchestratorError`]: errors raised by the orchestration loop itself.
//!
//! Every enum exposes `as_label` for logs.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::recovery::ErrorKind;

/// # Errors produced by supervised module operations.
///
/// The variant decides how the error is classified for recovery (see [`ModuleError::kind`]).
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ModuleError {
    /// Execution failed but may succeed if retried.
    #[error("execution failed: {error}")]
    Fail {
        /// The underlying error message.
        error: String,
    },

    /// Execution exceeded the orchestrator's per-call timeout.
    #[error("timed out after {timeout:?}")]
    Timeout {
        /// The timeout that was exceeded.
        timeout: Duration,
    },

    /// Module is saturated and cannot keep up with its workload.
    #[error("cognitive overload: {error}")]
    Overload {
        /// The underlying error message.
        error: String,
    },

    /// Module produced a decision that failed an integrity check.
    #[error("decision integrity violated: {error}")]
    Integrity {
        /// The underlying error message.
        error: String,
    },

    /// Module state is corrupted and requires a supervised restart.
    #[error("system reboot required: {error}")]
    RebootRequired {
        /// The underlying error message.
        error: String,
    },

    /// Non-recoverable error (should not be retried).
    #[error("fatal error (no retry): {error}")]
    Fatal {
        /// The underlying error message.
        error: String,
    },

    /// The operation panicked; the panic was contained by the orchestrator.
    #[error("module panicked: {info}")]
    Panicked {
        /// Panic payload rendered as text.
        info: String,
    },

    /// Module observed shutdown and stopped early.
    #[error("context cancelled")]
    Canceled,
}

impl ModuleError {
    /// Shorthand for [`ModuleError::Fail`].
    pub fn fail(error: impl Into<String>) -> Self {
        ModuleError::Fail {
            error: error.into(),
        }
    }

    /// Returns a short stable label (snake_case) for use in logs.
    ///
    /// # Example
    /// ```
    /// use faultvisor::ModuleError;
    ///
    /// let err = ModuleError::fail("boom");
    /// assert_eq!(err.as_label(), "module_failed");
    /// ```
    pub fn as_label(&self) -> &'static str {
        match self {
            ModuleError::Fail { .. } => "module_failed",
            ModuleError::Timeout { .. } => "module_timeout",
            ModuleError::Overload { .. } => "module_overload",
            ModuleError::Integrity { .. } => "module_integrity",
            ModuleError::RebootRequired { .. } => "module_reboot_required",
            ModuleError::Fatal { .. } => "module_fatal",
            ModuleError::Panicked { .. } => "module_panicked",
            ModuleError::Canceled => "module_canceled",
        }
    }

    /// Maps the error onto the recovery classification taxonomy.
    ///
    /// # Example
    /// ```
    /// use faultvisor::{ErrorKind, ModuleError};
    ///
    /// let err = ModuleError::Overload { error: "queue saturated".into() };
    /// assert_eq!(err.kind(), ErrorKind::CognitiveOverload);
    /// ```
    pub fn kind(&self) -> ErrorKind {
        match self {
            ModuleError::Fail { .. }
            | ModuleError::Timeout { .. }
            | ModuleError::Panicked { .. }
            | ModuleError::Canceled => ErrorKind::Generic,
            ModuleError::Overload { .. } => ErrorKind::CognitiveOverload,
            ModuleError::Integrity { .. } => ErrorKind::DecisionIntegrity,
            ModuleError::RebootRequired { .. } => ErrorKind::SystemRebootRequired,
            ModuleError::Fatal { .. } => ErrorKind::Unclassified,
        }
    }

    /// Indicates whether the error type is safe to retry.
    ///
    /// Returns `true` for [`ModuleError::Fail`], [`ModuleError::Timeout`] and
    /// [`ModuleError::Overload`], `false` otherwise.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ModuleError::Fail { .. } | ModuleError::Timeout { .. } | ModuleError::Overload { .. }
        )
    }
}

/// # Result of a call rejected by, or failing through, a circuit breaker.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq)]
pub enum BreakerError {
    /// The breaker rejected the call without invoking the operation.
    #[error("circuit '{breaker}' is open; retry in {retry_in:?}")]
    Open {
        /// Name of the rejecting breaker.
        breaker: String,
        /// Remaining cooldown before a probe is admitted.
        retry_in: Duration,
    },

    /// The operation ran and failed.
    #[error(transparent)]
    Operation(#[from] ModuleError),
}

impl BreakerError {
    /// True if the call was rejected without executing the operation.
    pub fn is_open(&self) -> bool {
        matches!(self, BreakerError::Open { .. })
    }

    /// Returns a short stable label (snake_case) for use in logs.
    pub fn as_label(&self) -> &'static str {
        match self {
            BreakerError::Open { .. } => "breaker_open",
            BreakerError::Operation(e) => e.as_label(),
        }
    }
}

/// # Persistence errors.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum StoreError {
    /// Filesystem access failed.
    #[error("io error at {}: {source}", path.display())]
    Io {
        /// File or directory involved.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// A record could not be encoded or decoded.
    #[error("serialization failed: {0}")]
    Serde(#[from] serde_json::Error),
}

impl StoreError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        StoreError::Io {
            path: path.into(),
            source,
        }
    }

    /// Returns a short stable label (snake_case) for use in logs.
    pub fn as_label(&self) -> &'static str {
        match self {
            StoreError::Io { .. } => "store_io",
            StoreError::Serde(_) => "store_serde",
        }
    }
}

/// # Refusals of a full recovery pass.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RecoveryError {
    /// A previous pass ran too recently.
    #[error("recovery cooling down; {remaining:?} remaining")]
    CoolingDown {
        /// Time left until the next pass is allowed.
        remaining: Duration,
    },

    /// Too many consecutive passes failed; metrics must be reset first.
    #[error("recovery locked after {consecutive_failures} consecutive failures")]
    Locked {
        /// Number of failed passes in a row.
        consecutive_failures: u32,
    },
}

impl RecoveryError {
    /// Returns a short stable label (snake_case) for use in logs.
    pub fn as_label(&self) -> &'static str {
        match self {
            RecoveryError::CoolingDown { .. } => "recovery_cooling_down",
            RecoveryError::Locked { .. } => "recovery_locked",
        }
    }
}

/// # Configuration loading errors.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum ConfigError {
    /// The configuration file could not be read.
    #[error("cannot read config {}: {source}", path.display())]
    Read {
        /// Path of the configuration file.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The configuration document is malformed.
    #[error("invalid config: {0}")]
    Parse(#[from] serde_json::Error),
}

/// # Errors produced by the orchestrator.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum OrchestratorError {
    /// A cycle or run was requested before [`Orchestrator::initialize`](crate::Orchestrator::initialize).
    #[error("orchestrator is not initialized")]
    NotInitialized,

    /// [`Orchestrator::run`](crate::Orchestrator::run) was called while a run is active.
    #[error("orchestrator is already running")]
    AlreadyRunning,

    /// Fewer modules initialized than the configured minimum.
    #[error("only {healthy} module(s) initialized; {required} required")]
    InsufficientModules {
        /// Configured minimum.
        required: usize,
        /// Modules that initialized successfully.
        healthy: usize,
    },

    /// Configuration could not be loaded.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Persistence failed while building the orchestrator.
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl OrchestratorError {
    /// Returns a short stable label (snake_case) for use in logs.
    ///
    /// # Example
    /// ```
    /// use faultvisor::OrchestratorError;
    ///
    /// assert_eq!(OrchestratorError::NotInitialized.as_label(), "orchestrator_not_initialized");
    /// ```
    pub fn as_label(&self) -> &'static str {
        match self {
            OrchestratorError::NotInitialized => "orchestrator_not_initialized",
            OrchestratorError::AlreadyRunning => "orchestrator_already_running",
            OrchestratorError::InsufficientModules { .. } => "orchestrator_insufficient_modules",
            OrchestratorError::Config(_) => "orchestrator_config",
            OrchestratorError::Store(_) => "orchestrator_store",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_module_error_kinds() {
        assert_eq!(ModuleError::fail("x").kind(), ErrorKind::Generic);
        assert_eq!(
            ModuleError::Integrity { error: "x".into() }.kind(),
            ErrorKind::DecisionIntegrity
        );
        assert_eq!(
            ModuleError::RebootRequired { error: "x".into() }.kind(),
            ErrorKind::SystemRebootRequired
        );
        assert_eq!(
            ModuleError::Fatal { error: "x".into() }.kind(),
            ErrorKind::Unclassified
        );
    }

    #[test]
    fn test_breaker_error_open_is_distinct() {
        let open = BreakerError::Open {
            breaker: "b".into(),
            retry_in: Duration::from_secs(1),
        };
        let op: BreakerError = ModuleError::fail("boom").into();
        assert!(open.is_open());
        assert!(!op.is_open());
        assert_eq!(op.as_label(), "module_failed");
        assert_eq!(op.to_string(), "execution failed: boom");
    }
}
