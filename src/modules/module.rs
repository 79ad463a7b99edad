//! # Module contract.
//!
//! The orchestrator treats every supervised unit through [`Module`]: it never
//! looks at the concrete type. Only [`execute`](Module::execute) is mandatory;
//! [`initialize`](Module::initialize) defaults to success and
//! [`health_check`](Module::health_check) to "nothing to report".
//!
//! Each call is wrapped by the orchestrator in its circuit breaker, an optional
//! timeout and a panic boundary, so a misbehaving module only ever fails itself.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::core::CycleMode;
use crate::error::ModuleError;

/// What a module sees when it is executed.
///
/// `token` is a child of the orchestrator's shutdown token; it is also cancelled
/// when the call exceeds the configured per-call timeout.
#[derive(Debug, Clone)]
pub struct CycleContext {
    /// 1-based cycle number.
    pub cycle: u64,
    /// Mode the cycle runs in.
    pub mode: CycleMode,
    pub token: CancellationToken,
}

/// Self-reported module health.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "health", content = "detail", rename_all = "snake_case")]
pub enum HealthSignal {
    Healthy,
    Degraded(String),
    Unhealthy(String),
}

impl HealthSignal {
    pub fn is_healthy(&self) -> bool {
        matches!(self, HealthSignal::Healthy)
    }
}

/// # A supervised module.
///
/// # Example
/// ```
/// use async_trait::async_trait;
/// use serde_json::{json, Value};
/// use faultvisor::{CycleContext, Module, ModuleError};
///
/// struct Scorer;
///
/// #[async_trait]
/// impl Module for Scorer {
///     fn name(&self) -> &str { "scorer" }
///
///     async fn execute(&self, ctx: CycleContext) -> Result<Value, ModuleError> {
///         if ctx.token.is_cancelled() {
///             return Err(ModuleError::Canceled);
///         }
///         Ok(json!({ "cycle": ctx.cycle, "score": 0.93 }))
///     }
/// }
/// ```
#[async_trait]
pub trait Module: Send + Sync + 'static {
    /// Stable, unique name (used for breakers, events and snapshots).
    fn name(&self) -> &str;

    /// Prepares the module. `Ok(false)` and `Err(_)` both mark it CRITICAL.
    async fn initialize(&self) -> Result<bool, ModuleError> {
        Ok(true)
    }

    /// Runs one unit of work for the current cycle.
    async fn execute(&self, ctx: CycleContext) -> Result<Value, ModuleError>;

    /// Optional self-assessment, polled every `health_check_every` cycles.
    async fn health_check(&self) -> Option<HealthSignal> {
        None
    }
}

/// Shared handle to a module.
pub type ModuleRef = Arc<dyn Module>;
