//! Self-rescheduling batch engine.
//!
//! This module provides:
//!
//! - Batch status records with a five-state machine ([`status`])
//! - A persisted work queue with front-requeue support ([`queue`])
//! - The per-item processing contract ([`processor`])
//! - Batch lifecycle operations: start, resume, stop, status ([`controller`])
//! - The time-boxed slice executor ([`slice`])
//! - Rate-limit backoff handling ([`backoff`])
//! - Trigger wiring and crash isolation ([`runtime`])
//!
//! There is no resident worker. Each trigger firing runs one slice; the
//! slice processes units until its wall-clock budget runs out, then decides
//! whether to schedule another firing, back off, or halt. All coordination
//! state lives in the [`StateStore`](crate::store::StateStore), so progress
//! survives process restarts.

pub mod backoff;
pub mod controller;
pub mod processor;
pub mod queue;
pub mod runtime;
pub mod slice;
pub mod status;

pub use backoff::BackoffHandler;
pub use controller::{BatchController, StatusCell, StopFlag};
pub use processor::{ItemProcessor, Outcome, WorkUnitId};
pub use queue::QueueManager;
pub use runtime::BatchRuntime;
pub use slice::{NextAction, SliceExecutor};
pub use status::{BatchState, BatchStatus};

/// Store key layout for one batch kind.
///
/// All durable engine state for a kind hangs off four keys plus a per-unit
/// marker namespace.
#[derive(Debug, Clone)]
pub struct BatchKeys {
    kind: String,
}

impl BatchKeys {
    pub fn new(kind: impl Into<String>) -> Self {
        Self { kind: kind.into() }
    }

    /// The batch kind these keys belong to.
    pub fn kind(&self) -> &str {
        &self.kind
    }

    /// Key holding the [`BatchStatus`] record.
    pub fn status_key(&self) -> String {
        format!("suite:{}:status", self.kind)
    }

    /// Key holding the queue snapshot.
    pub fn queue_key(&self) -> String {
        format!("suite:{}:queue", self.kind)
    }

    /// Key holding the cooperative stop signal.
    pub fn stop_key(&self) -> String {
        format!("suite:{}:stop", self.kind)
    }

    /// Key holding accumulated per-batch results (scan findings).
    pub fn results_key(&self) -> String {
        format!("suite:{}:results", self.kind)
    }

    /// Namespace markers by kind so a stale-claim sweep for one batch kind
    /// never reclaims another kind's units.
    pub fn scoped_unit(&self, unit: &str) -> String {
        format!("{}/{}", self.kind, unit)
    }

    /// Prefix matching every unit scoped by [`scoped_unit`](Self::scoped_unit).
    pub fn unit_prefix(&self) -> String {
        format!("{}/", self.kind)
    }

    /// Strip the kind namespace from a scoped unit id.
    pub fn unscoped_unit<'a>(&self, scoped: &'a str) -> Option<&'a str> {
        scoped.strip_prefix(&format!("{}/", self.kind))
    }
}
