//! In-memory state store for testing and development.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use super::{Marker, StateStore};
use crate::error::Result;

/// In-memory store backed by concurrent hash maps.
///
/// Suitable for tests and single-process embedding. All operations are
/// linearizable per key; `compare_and_swap` holds the shard lock for the
/// duration of the comparison.
#[derive(Debug, Default)]
pub struct MemoryStore {
    values: DashMap<String, serde_json::Value>,
    markers: DashMap<(String, String), Marker>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored values (markers excluded).
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether the store holds no values.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

#[async_trait]
impl StateStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<serde_json::Value>> {
        Ok(self.values.get(key).map(|entry| entry.value().clone()))
    }

    async fn set(&self, key: &str, value: serde_json::Value) -> Result<()> {
        self.values.insert(key.to_string(), value);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.values.remove(key);
        Ok(())
    }

    async fn compare_and_swap(
        &self,
        key: &str,
        expected: Option<&serde_json::Value>,
        new: serde_json::Value,
    ) -> Result<bool> {
        match self.values.entry(key.to_string()) {
            Entry::Occupied(mut entry) => {
                if expected == Some(entry.get()) {
                    entry.insert(new);
                    Ok(true)
                } else {
                    Ok(false)
                }
            }
            Entry::Vacant(entry) => {
                if expected.is_none() {
                    entry.insert(new);
                    Ok(true)
                } else {
                    Ok(false)
                }
            }
        }
    }

    async fn set_marker(&self, unit: &str, marker: &str, value: Marker) -> Result<()> {
        self.markers
            .insert((unit.to_string(), marker.to_string()), value);
        Ok(())
    }

    async fn get_marker(&self, unit: &str, marker: &str) -> Result<Option<Marker>> {
        Ok(self
            .markers
            .get(&(unit.to_string(), marker.to_string()))
            .map(|entry| entry.value().clone()))
    }

    async fn clear_marker(&self, unit: &str, marker: &str) -> Result<()> {
        self.markers.remove(&(unit.to_string(), marker.to_string()));
        Ok(())
    }

    async fn markers_older_than(
        &self,
        marker: &str,
        cutoff: DateTime<Utc>,
        unit_prefix: &str,
    ) -> Result<Vec<String>> {
        let mut units: Vec<String> = self
            .markers
            .iter()
            .filter(|entry| {
                let (unit, name) = entry.key();
                name == marker && unit.starts_with(unit_prefix) && entry.value().recorded_at < cutoff
            })
            .map(|entry| entry.key().0.clone())
            .collect();
        units.sort();
        Ok(units)
    }
}
