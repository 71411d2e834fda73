//! Persistent state store collaborator.
//!
//! Every durable artifact of the batch engine lives here: status records,
//! queue snapshots, scan results, stop signals, and per-unit claim/terminal
//! markers. The trait is the seam; the in-memory implementation backs tests
//! and single-process deployments, while embedding applications can provide
//! their own durable backend.

pub mod memory;

pub use memory::MemoryStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Marker name for "a worker began processing this unit at T".
pub const CLAIM_MARKER: &str = "claim";

/// Marker name for a permanent per-unit outcome.
pub const TERMINAL_MARKER: &str = "terminal";

/// A persisted per-unit marker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Marker {
    /// When the marker was recorded
    pub recorded_at: DateTime<Utc>,

    /// Optional note (truncated failure reason for terminal markers)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

impl Marker {
    /// Create a marker stamped with the current time.
    pub fn now() -> Self {
        Self {
            recorded_at: Utc::now(),
            note: None,
        }
    }

    /// Create a marker with an attached note.
    pub fn with_note(note: impl Into<String>) -> Self {
        Self {
            recorded_at: Utc::now(),
            note: Some(note.into()),
        }
    }

    /// Create a marker with an explicit timestamp.
    pub fn at(recorded_at: DateTime<Utc>) -> Self {
        Self {
            recorded_at,
            note: None,
        }
    }
}

/// Trait for persistent state store backends.
///
/// Values are JSON documents keyed by string; markers are small per-unit
/// records keyed by `(unit_id, marker_name)`. No partial-update API is
/// assumed: callers persist whole documents.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Get a value by key.
    async fn get(&self, key: &str) -> Result<Option<serde_json::Value>>;

    /// Set a value by key.
    async fn set(&self, key: &str, value: serde_json::Value) -> Result<()>;

    /// Delete a value by key.
    async fn delete(&self, key: &str) -> Result<()>;

    /// Atomically replace `key` with `new` if its current value equals
    /// `expected` (`None` meaning "key absent"). Returns whether the swap
    /// happened.
    async fn compare_and_swap(
        &self,
        key: &str,
        expected: Option<&serde_json::Value>,
        new: serde_json::Value,
    ) -> Result<bool>;

    /// Record a marker for a unit.
    async fn set_marker(&self, unit: &str, marker: &str, value: Marker) -> Result<()>;

    /// Fetch a marker for a unit.
    async fn get_marker(&self, unit: &str, marker: &str) -> Result<Option<Marker>>;

    /// Remove a marker for a unit.
    async fn clear_marker(&self, unit: &str, marker: &str) -> Result<()>;

    /// Scan for units whose `marker` was recorded before `cutoff`, limited
    /// to unit ids starting with `unit_prefix`.
    async fn markers_older_than(
        &self,
        marker: &str,
        cutoff: DateTime<Utc>,
        unit_prefix: &str,
    ) -> Result<Vec<String>>;
}

impl dyn StateStore {
    /// Get and deserialize a typed value.
    pub async fn get_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        match self.get(key).await? {
            Some(value) => Ok(Some(serde_json::from_value(value)?)),
            None => Ok(None),
        }
    }

    /// Serialize and set a typed value.
    pub async fn set_json<T: Serialize>(&self, key: &str, value: &T) -> Result<()> {
        self.set(key, serde_json::to_value(value)?).await
    }
}
