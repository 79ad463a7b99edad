//! # Function-backed module (`ModuleFn`)
//!
//! [`ModuleFn`] wraps a closure `F: Fn(CycleContext) -> Fut`, producing a fresh
//! future per execution. Shared state, if any, lives in an `Arc` captured by the
//! closure.
//!
//! ## Example
//! ```rust
//! use serde_json::json;
//! use faultvisor::{CycleContext, ModuleError, ModuleFn, ModuleRef};
//!
//! let m: ModuleRef = ModuleFn::arc("echo", |ctx: CycleContext| async move {
//!     Ok::<_, ModuleError>(json!({ "cycle": ctx.cycle }))
//! });
//!
//! assert_eq!(m.name(), "echo");
//! ```

use std::borrow::Cow;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use super::module::{CycleContext, Module};
use crate::error::ModuleError;

/// Function-backed module; initialization always succeeds.
#[derive(Debug)]
pub struct ModuleFn<F> {
    name: Cow<'static, str>,
    f: F,
}

impl<F> ModuleFn<F> {
    /// Creates a new function-backed module.
    ///
    /// Prefer [`ModuleFn::arc`] when you immediately need a [`ModuleRef`](crate::ModuleRef).
    pub fn new(name: impl Into<Cow<'static, str>>, f: F) -> Self {
        Self { name: name.into(), f }
    }

    /// Creates the module and returns it as a shared handle.
    pub fn arc(name: impl Into<Cow<'static, str>>, f: F) -> Arc<Self> {
        Arc::new(Self::new(name, f))
    }
}

#[async_trait]
impl<F, Fut> Module for ModuleFn<F>
where
    F: Fn(CycleContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value, ModuleError>> + Send + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self, ctx: CycleContext) -> Result<Value, ModuleError> {
        (self.f)(ctx).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::CycleMode;
    use crate::modules::{HealthSignal, ModuleRef};
    use serde_json::json;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio_util::sync::CancellationToken;

    fn ctx(cycle: u64) -> CycleContext {
        CycleContext {
            cycle,
            mode: CycleMode::Normal,
            token: CancellationToken::new(),
        }
    }

    #[tokio::test]
    async fn test_fresh_future_per_execution() {
        let calls = Arc::new(AtomicU32::new(0));
        let c = Arc::clone(&calls);
        let m: ModuleRef = ModuleFn::arc("counter", move |ctx: CycleContext| {
            let c = Arc::clone(&c);
            async move {
                let n = c.fetch_add(1, Ordering::SeqCst) + 1;
                Ok(json!({ "cycle": ctx.cycle, "n": n }))
            }
        });

        assert!(m.initialize().await.unwrap());
        assert_eq!(m.execute(ctx(1)).await.unwrap()["n"], 1);
        assert_eq!(m.execute(ctx(2)).await.unwrap()["cycle"], 2);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(m.health_check().await, None);
    }

    #[test]
    fn test_health_signal_serde() {
        let degraded = HealthSignal::Degraded("slow disk".into());
        let v = serde_json::to_value(&degraded).unwrap();
        assert_eq!(v, json!({ "health": "degraded", "detail": "slow disk" }));
        assert!(!degraded.is_healthy());
    }
}
