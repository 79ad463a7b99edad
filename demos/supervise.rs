//! # Example: supervise
//!
//! Supervises three modules for a dozen short cycles:
//! - `planner` always succeeds,
//! - `sensor` fails every call, so its breaker opens and it is quarantined,
//! - `scorer` overloads on every fourth cycle and recovers through the breaker.
//!
//! Events are rendered through `tracing` by [`LogWriter`], breaker state and
//! recovery metrics are persisted under the system temp directory, and the final
//! status snapshot is printed as JSON.
//!
//! ## Flow
//! ```text
//! Orchestrator::run()
//!   ├─► run_cycle() ×12
//!   │     ├─► breaker.call(module.execute)
//!   │     ├─► recovery.handle_for_module_with_retry(kind)   (on failure)
//!   │     └─► adapt cycle mode
//!   └─► state_change(phase = "shutdown") ─► flush event log
//! ```
//!
//! ## Run
//! ```bash
//! RUST_LOG=info cargo run --example supervise
//! ```

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

use faultvisor::{
    CycleContext, CycleIntervals, Event, EventType, JsonFileStore, LogWriter, Module, ModuleError,
    ModuleFn, ModuleRef, Orchestrator, OrchestratorConfig, StoreRef, Subscribe,
};

/// Counts breaker openings as they happen.
#[derive(Default)]
struct TripCounter(AtomicU64);

#[async_trait]
impl Subscribe for TripCounter {
    async fn on_event(&self, e: &Event) {
        if e.event_type == EventType::StateChange && e.data["to"] == "open" {
            let n = self.0.fetch_add(1, Ordering::Relaxed) + 1;
            println!("[trips] {} opened (total {n})", e.module);
        }
    }

    fn name(&self) -> &'static str {
        "trip-counter"
    }
}

struct Scorer;

#[async_trait]
impl Module for Scorer {
    fn name(&self) -> &str {
        "scorer"
    }

    async fn execute(&self, ctx: CycleContext) -> Result<Value, ModuleError> {
        if ctx.cycle % 4 == 0 {
            return Err(ModuleError::Overload {
                error: format!("queue saturated at cycle {}", ctx.cycle),
            });
        }
        Ok(json!({ "cycle": ctx.cycle, "mode": ctx.mode, "score": 0.8 }))
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init()
        .ok();

    let dir = std::env::temp_dir().join("faultvisor-demo");
    let mut cfg = OrchestratorConfig::default();
    cfg.intervals = CycleIntervals::uniform(Duration::from_millis(50));
    cfg.max_cycles = Some(12);
    cfg.breaker.failure_threshold = 3;
    cfg.breaker.timeout = Duration::from_millis(300);
    cfg.recovery.backoff.first = Duration::from_millis(10);
    cfg.recovery.stabilization = Duration::from_millis(20);
    cfg.events.path = Some(dir.join("events.jsonl"));

    let store: StoreRef = Arc::new(JsonFileStore::new(dir.join("state"))?);
    let trips = Arc::new(TripCounter::default());
    let subs: Vec<Arc<dyn Subscribe>> = vec![Arc::new(LogWriter::new()), trips.clone()];

    let orch = Orchestrator::builder(cfg)
        .with_subscribers(subs)
        .with_store(store)
        .build()?;

    let planner: ModuleRef = ModuleFn::arc("planner", |ctx: CycleContext| async move {
        Ok::<_, ModuleError>(json!({ "cycle": ctx.cycle, "plan": "steady" }))
    });
    let sensor: ModuleRef = ModuleFn::arc("sensor", |_ctx: CycleContext| async move {
        Err::<Value, _>(ModuleError::fail("device not responding"))
    });
    let scorer: ModuleRef = Arc::new(Scorer);

    if !orch.initialize(vec![planner, sensor, scorer]).await {
        return Err("not enough modules initialized".into());
    }

    let report = orch.run(CancellationToken::new()).await?;
    println!(
        "cycles={} successes={} failures={} reopens={} resilience={:.2} final_mode={}",
        report.cycles,
        report.successes,
        report.failures,
        report.circuit_reopens,
        report.resilience_score,
        report.final_mode,
    );
    println!("breaker openings seen by subscriber: {}", trips.0.load(Ordering::Relaxed));

    let anomalies = orch.event_store().detect_anomalies(60);
    for a in &anomalies.anomalies {
        println!("[anomaly] {} ({:?}): {}", a.kind, a.severity, a.description);
    }
    println!("{}", serde_json::to_string_pretty(&orch.status())?);
    Ok(())
}
