//! # Guarded module calls.
//!
//! Every module capability is invoked inside a containment boundary:
//!
//! ```text
//! breaker.call ─► timeout (optional) ─► catch_unwind ─► module.execute(ctx)
//!                     │                      │
//!                     └─ elapsed: cancel ctx.token, Err(Timeout)
//!                                            └─ panic: Err(Panicked)
//! ```
//!
//! A panic or hang in one module therefore surfaces as a [`ModuleError`] for
//! that module only.

use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use serde_json::Value;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::time;
use tokio_util::sync::CancellationToken;

use crate::breaker::CircuitBreaker;
use crate::error::{BreakerError, ModuleError};
use crate::modules::{CycleContext, Module};

/// Waits for a concurrency slot.
///
/// `Some(None)` when there is no limit; `None` if shutdown came first or the
/// semaphore was closed.
pub(crate) async fn acquire(
    sem: Option<&Arc<Semaphore>>,
    shutdown: &CancellationToken,
) -> Option<Option<OwnedSemaphorePermit>> {
    let Some(sem) = sem else {
        return Some(None);
    };
    tokio::select! {
        res = Arc::clone(sem).acquire_owned() => res.ok().map(Some),
        _ = shutdown.cancelled() => None,
    }
}

/// Runs `module.execute` through `breaker` with the per-call timeout.
pub(crate) async fn guarded_execute(
    module: &dyn Module,
    breaker: &CircuitBreaker,
    ctx: CycleContext,
    timeout: Option<Duration>,
) -> Result<Value, BreakerError> {
    breaker
        .call(|| {
            let token = ctx.token.clone();
            contain(module.execute(ctx), timeout, Some(token))
        })
        .await
}

/// Awaits `fut` with an optional timeout, turning panics into [`ModuleError::Panicked`].
///
/// On timeout, `token` (if any) is cancelled so the module can stop cooperatively.
pub(crate) async fn contain<T, F>(
    fut: F,
    timeout: Option<Duration>,
    token: Option<CancellationToken>,
) -> Result<T, ModuleError>
where
    F: Future<Output = Result<T, ModuleError>>,
{
    let guarded = AssertUnwindSafe(fut).catch_unwind();
    let res = match timeout.filter(|d| !d.is_zero()) {
        Some(dur) => match time::timeout(dur, guarded).await {
            Ok(r) => r,
            Err(_elapsed) => {
                if let Some(t) = token {
                    t.cancel();
                }
                return Err(ModuleError::Timeout { timeout: dur });
            }
        },
        None => guarded.await,
    };
    res.unwrap_or_else(|panic| {
        Err(ModuleError::Panicked {
            info: panic_message(panic.as_ref()),
        })
    })
}

/// Renders a panic payload as text.
pub(crate) fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
