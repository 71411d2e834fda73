//! Per-item processing contract.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Opaque identifier for one unit of work.
///
/// Content ids for enrichment batches, directory paths for scan batches.
/// The engine never interprets the value.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkUnitId(String);

impl WorkUnitId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for WorkUnitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for WorkUnitId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for WorkUnitId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Result of processing one work unit.
///
/// This is the whole contract between a processor and the engine: the three
/// variants map to "count it and move on", "record a terminal marker and
/// move on", and "requeue it and back off".
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// The unit was handled; count it and continue.
    Success,

    /// The unit can never succeed. The engine records a terminal marker with
    /// the reason and skips the unit in future batches.
    PermanentFailure(String),

    /// An upstream dependency is throttling. The engine requeues the unit at
    /// the queue front and suspends the whole batch for a cool-down.
    RateLimited,
}

/// Trait for batch item processors.
///
/// Implementations hold their own collaborators (providers, content sources,
/// scan policy) and must be safe to call for the same unit more than once:
/// the engine replays units after crashes and rate-limit requeues.
#[async_trait]
pub trait ItemProcessor: Send + Sync {
    /// Stable batch kind name. Used as the trigger callback id and in every
    /// store key for this batch.
    fn kind(&self) -> &str;

    /// Optional pause inserted after each handled unit, for pacing calls to
    /// quota-limited upstreams.
    fn throttle(&self) -> Option<Duration> {
        None
    }

    /// Process one unit to a tri-state outcome. Systemic faults belong in
    /// `PermanentFailure` or a panic, never in a silent success.
    async fn process(&self, unit: &WorkUnitId) -> Outcome;
}
