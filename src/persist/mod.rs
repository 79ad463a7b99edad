//! # Snapshot persistence.
//!
//! Small key/value records that let components survive a process restart:
//! breaker state, recovery metrics and the orchestrator status snapshot.
//!
//! Each component receives a [`StoreRef`] at construction and owns the keys it
//! writes; nothing here is global.
//!
//! ## Implementations
//! - [`JsonFileStore`] one pretty-printed JSON file per key, replaced atomically
//! - [`MemoryStore`] process-local map (tests, ephemeral deployments)

mod file;
mod memory;

use std::sync::Arc;

use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;

use crate::error::StoreError;

pub use file::JsonFileStore;
pub use memory::MemoryStore;

/// Load/save contract for persisted snapshots.
pub trait SnapshotStore: Send + Sync + 'static {
    /// Returns the record stored under `key`, or `None` if there is none.
    fn load(&self, key: &str) -> Result<Option<Value>, StoreError>;

    /// Replaces the record stored under `key`.
    fn save(&self, key: &str, value: &Value) -> Result<(), StoreError>;
}

/// Shared handle to a snapshot store.
pub type StoreRef = Arc<dyn SnapshotStore>;

/// Loads `key` and decodes it as `T`.
pub fn load_as<T: DeserializeOwned>(
    store: &dyn SnapshotStore,
    key: &str,
) -> Result<Option<T>, StoreError> {
    match store.load(key)? {
        Some(v) => Ok(Some(serde_json::from_value(v)?)),
        None => Ok(None),
    }
}

/// Encodes `value` and saves it under `key`.
pub fn save_as<T: Serialize>(store: &dyn SnapshotStore, key: &str, value: &T) -> Result<(), StoreError> {
    let v = serde_json::to_value(value)?;
    store.save(key, &v)
}
