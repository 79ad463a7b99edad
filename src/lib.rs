//! # faultvisor
//!
//! **Faultvisor** is the resilience core of a multi-module runtime. It supervises
//! independently failing modules, isolates faults with circuit breakers, keeps
//! an append-only audit trail of every decision and fault, recovers from errors
//! according to a classification table, and adapts its own pace to how healthy
//! the system is.
//!
//! ## Architecture
//! ```text
//!     ┌──────────────┐   ┌──────────────┐   ┌──────────────┐
//!     │   Module A   │   │   Module B   │   │   Module C   │
//!     └──────┬───────┘   └──────┬───────┘   └──────┬───────┘
//!            ▼                  ▼                  ▼
//! ┌───────────────────────────────────────────────────────────────────┐
//! │  Orchestrator (adaptive control loop)                             │
//! │  - ModuleWrapper per module (status, counters, cognitive score)   │
//! │  - CycleMode state machine (URGENT … MAINTENANCE)                 │
//! └──────┬──────────────────┬──────────────────┬──────────────────────┘
//!        ▼                  ▼                  ▼
//!  CircuitBreaker     ErrorRecoverySystem    SnapshotStore
//!  (per module or     (classify ─► strategy  (breaker state, metrics,
//!   shared)            ─► outcome)            status snapshot)
//!        │                  │                  │
//!        └────────┬─────────┴──────────────────┘
//!                 ▼
//! ┌───────────────────────────────────────────────────────────────────┐
//! │  EventStore (append-only, JSON Lines, queries, anomaly rules)     │
//! └─────────────────────────────────┬─────────────────────────────────┘
//!                                   ▼
//!                         Bus (tokio broadcast)
//!                                   ▼
//!                             SubscriberSet
//!                       ┌───────────┼───────────┐
//!                       ▼           ▼           ▼
//!                   LogWriter    alerting      ...
//! ```
//!
//! ### Per cycle
//! ```text
//! for each module (bounded by max_concurrent_operations):
//!   breaker.call(module.execute) ─ ok  ─► update_success, decision_made
//!                                └ err ─► update_error, recovery.handle_for_module
//! aggregate success ratio ─► adapt cycle mode ─► sleep mode interval (cancellable)
//! ```
//!
//! ## Features
//! | Area               | Description                                                  | Key types / traits                           |
//! |--------------------|--------------------------------------------------------------|----------------------------------------------|
//! | **Orchestration**  | Module lifecycle, cycles, adaptive modes, graceful shutdown. | [`Orchestrator`], [`Module`], [`CycleMode`]  |
//! | **Fault isolation**| CLOSED / OPEN / HALF_OPEN breaker with persisted state.      | [`CircuitBreaker`], [`CircuitState`]         |
//! | **Recovery**       | Error classification and strategy dispatch.                  | [`ErrorRecoverySystem`], [`ErrorKind`]       |
//! | **Audit trail**    | Append-only events, queries, anomalies, analytics, export.   | [`EventStore`], [`Event`], [`EventType`]     |
//! | **Subscriber API** | Receive every recorded event.                                | [`Subscribe`]                                |
//! | **Persistence**    | Snapshots that survive restarts.                             | [`SnapshotStore`], [`JsonFileStore`]         |
//! | **Configuration**  | One struct, JSON loadable, partial files allowed.            | [`OrchestratorConfig`]                       |
//! | **Errors**         | Typed errors for modules and the core itself.                | [`ModuleError`], [`OrchestratorError`]       |
//!
//! ## Optional features
//! - `logging` (default): exports [`LogWriter`], a subscriber that renders events through `tracing`.
//!
//! ## Example
//! ```rust
//! use std::sync::Arc;
//! use std::time::Duration;
//! use serde_json::json;
//! use tokio_util::sync::CancellationToken;
//! use faultvisor::{
//!     CycleContext, CycleIntervals, ModuleError, ModuleFn, ModuleRef, Orchestrator,
//!     OrchestratorConfig, Subscribe,
//! };
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut cfg = OrchestratorConfig::default();
//!     cfg.intervals = CycleIntervals::uniform(Duration::from_millis(10));
//!     cfg.max_cycles = Some(2);
//!
//!     #[cfg(feature = "logging")]
//!     let subs: Vec<Arc<dyn Subscribe>> = vec![Arc::new(faultvisor::LogWriter::new())];
//!     #[cfg(not(feature = "logging"))]
//!     let subs: Vec<Arc<dyn Subscribe>> = Vec::new();
//!
//!     let orch = Orchestrator::builder(cfg).with_subscribers(subs).build()?;
//!
//!     let scorer: ModuleRef = ModuleFn::arc("scorer", |ctx: CycleContext| async move {
//!         Ok::<_, ModuleError>(json!({ "cycle": ctx.cycle, "score": 0.9 }))
//!     });
//!     assert!(orch.initialize(vec![scorer]).await);
//!
//!     let report = orch.run(CancellationToken::new()).await?;
//!     assert_eq!(report.successes, 2);
//!     Ok(())
//! }
//! ```

mod breaker;
mod config;
mod core;
mod error;
mod events;
mod modules;
pub mod persist;
mod policies;
mod recovery;
mod subscribers;

// ---- Public re-exports ----

pub use breaker::{BreakerSnapshot, BreakerStatus, BreakerStatusConfig, CircuitBreaker, CircuitMetrics, CircuitState};
pub use config::{
    BreakerConfig, BreakerMode, CycleIntervals, EventStoreConfig, OrchestratorConfig, RecoveryConfig,
};
pub use self::core::{
    wait_for_shutdown_signal, CycleMode, CycleReport, ModuleResult, ModuleSnapshot, ModuleStatus,
    ModuleWrapper, Orchestrator, OrchestratorBuilder, OrchestratorStatus, RunReport, SessionStats,
    SHARED_BREAKER, STATUS_KEY,
};
pub use error::{BreakerError, ConfigError, ModuleError, OrchestratorError, RecoveryError, StoreError};
pub use events::{Analytics, Anomaly, AnomalyReport, AnomalySeverity, Bus, Event, EventStore, EventType, SCHEMA_VERSION};
pub use modules::{CycleContext, HealthSignal, Module, ModuleFn, ModuleRef};
pub use persist::{JsonFileStore, MemoryStore, SnapshotStore, StoreRef};
pub use policies::{BackoffPolicy, JitterPolicy};
pub use recovery::{
    Classification, ClassificationTable, ErrorContext, ErrorKind, ErrorRecoverySystem, ErrorSeverity,
    RecoveryMetrics, RecoveryOutcome, RecoveryStatus, RecoveryStrategy, METRICS_KEY,
};
pub use subscribers::{Subscribe, SubscriberSet};

// Optional: a built-in subscriber that renders events through `tracing`.
// Enabled by default with the `logging` feature.
#[cfg(feature = "logging")]
pub use subscribers::LogWriter;
