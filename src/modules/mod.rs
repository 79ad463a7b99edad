//! Supervised modules.
//!
//! - [`Module`] the capability contract every supervised module implements
//! - [`ModuleFn`] closure-backed implementation for quick wiring and tests
//! - [`ModuleRef`] shared handle stored by the orchestrator
//! - [`CycleContext`], [`HealthSignal`] what a module receives and may report

mod module;
mod module_fn;

pub use module::{CycleContext, HealthSignal, Module, ModuleRef};
pub use module_fn::ModuleFn;
