//! Audit trail: event model, append-only store and broadcast.
//!
//! ## Contents
//! - [`EventType`], [`Event`] the immutable record and its classification
//! - [`EventStore`] append-only log with queries, anomaly rules, analytics, retention and export
//! - [`Bus`] thin wrapper over `tokio::sync::broadcast`, fed by the store
//!
//! ## Writers
//! `CircuitBreaker` (transitions, calls), `ErrorRecoverySystem` (handled errors,
//! outcomes) and `Orchestrator` (decisions, phases, bookkeeping errors).

mod analysis;
mod bus;
mod event;
mod store;

pub use analysis::{Analytics, Anomaly, AnomalyReport, AnomalySeverity};
pub use bus::Bus;
pub use event::{Event, EventType, SCHEMA_VERSION};
pub use store::EventStore;
