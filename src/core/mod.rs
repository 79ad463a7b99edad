//! Orchestration core.
//!
//! The public entry point is [`Orchestrator`], built with [`OrchestratorBuilder`].
//!
//! Internal modules:
//! - [`mode`]: cycle modes and the adaptation rules;
//! - [`wrapper`]: per-module bookkeeping and status transitions;
//! - [`runner`]: breaker + timeout + panic containment around module calls;
//! - [`report`]: cycle/run reports and the status snapshot;
//! - [`orchestrator`]: the control loop;
//! - [`shutdown`]: cross-platform shutdown signal handling.

mod builder;
mod mode;
mod orchestrator;
mod report;
mod runner;
mod shutdown;
mod wrapper;

pub use builder::{OrchestratorBuilder, SHARED_BREAKER};
pub use mode::CycleMode;
pub use orchestrator::Orchestrator;
pub use report::{CycleReport, ModuleResult, OrchestratorStatus, RunReport, SessionStats, STATUS_KEY};
pub use shutdown::wait_for_shutdown_signal;
pub use wrapper::{ModuleSnapshot, ModuleStatus, ModuleWrapper};

pub(crate) use runner::panic_message;
