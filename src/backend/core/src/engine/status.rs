//! Batch status records and the batch state machine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Lifecycle state of a batch kind.
///
/// Legal transitions:
///
/// ```text
/// Idle ──> Running ──> Paused ──> Running
///              │           │
///              ├──> Stopped <┘
///              └──> Complete
/// ```
///
/// Starting a new batch and resuming both write `Running` directly instead
/// of stepping through the machine; they replace or revive the record rather
/// than advance it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchState {
    /// No batch has run yet
    Idle,
    /// A batch is in progress
    Running,
    /// Suspended after a rate-limited outcome, resume pending
    Paused,
    /// Halted early by a stop request or a systemic fault
    Stopped,
    /// All queued units were handled
    Complete,
}

impl BatchState {
    /// Whether this state ends slice execution for good.
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Stopped | Self::Complete)
    }

    /// Whether the slice executor may move a batch from `self` to `next`.
    pub const fn can_transition_to(&self, next: BatchState) -> bool {
        matches!(
            (self, next),
            (Self::Idle, Self::Running)
                | (Self::Running, Self::Paused)
                | (Self::Running, Self::Stopped)
                | (Self::Running, Self::Complete)
                | (Self::Paused, Self::Running)
                | (Self::Paused, Self::Stopped)
        )
    }
}

impl fmt::Display for BatchState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Running => "running",
            Self::Paused => "paused",
            Self::Stopped => "stopped",
            Self::Complete => "complete",
        };
        write!(f, "{}", name)
    }
}

/// Persisted progress record for one batch kind.
///
/// Counters are monotonically non-decreasing for the lifetime of a batch;
/// only a fresh start resets them. `processed + failed <= total` holds for
/// every snapshot while the batch is live; completion sets
/// `processed = total`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchStatus {
    /// Identifies one batch run across log lines and restarts
    pub batch_id: Uuid,

    /// Current lifecycle state
    pub state: BatchState,

    /// Workload size captured at batch start
    pub total: u64,

    /// Units handled successfully
    pub processed: u64,

    /// Units that failed permanently
    pub failed: u64,

    /// Operator-facing progress message
    pub message: String,

    /// When this batch started
    pub started_at: DateTime<Utc>,

    /// When this record last changed
    pub last_updated_at: DateTime<Utc>,
}

impl BatchStatus {
    /// The record reported when no batch has ever been started.
    pub fn idle() -> Self {
        let now = Utc::now();
        Self {
            batch_id: Uuid::nil(),
            state: BatchState::Idle,
            total: 0,
            processed: 0,
            failed: 0,
            message: "No batch has been started.".to_string(),
            started_at: now,
            last_updated_at: now,
        }
    }

    /// A fresh `Running` record for a workload of `total` units.
    pub fn starting(total: u64, message: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            batch_id: Uuid::new_v4(),
            state: BatchState::Running,
            total,
            processed: 0,
            failed: 0,
            message: message.into(),
            started_at: now,
            last_updated_at: now,
        }
    }

    /// Record one successfully handled unit.
    pub fn record_success(&mut self, message: impl Into<String>) {
        self.processed = (self.processed + 1).min(self.total);
        self.message = message.into();
        self.touch();
    }

    /// Record one permanently failed unit.
    pub fn record_failure(&mut self, message: impl Into<String>) {
        self.failed = (self.failed + 1).min(self.total.saturating_sub(self.processed));
        self.message = message.into();
        self.touch();
    }

    /// Mark the batch complete. Every queued unit was handled, so the
    /// processed counter absorbs the remainder.
    pub fn mark_complete(&mut self, message: impl Into<String>) {
        self.state = BatchState::Complete;
        self.processed = self.total;
        self.message = message.into();
        self.touch();
    }

    /// Mark the batch stopped with a diagnostic message.
    pub fn mark_stopped(&mut self, message: impl Into<String>) {
        self.state = BatchState::Stopped;
        self.message = message.into();
        self.touch();
    }

    /// Mark the batch paused pending a scheduled resume.
    pub fn mark_paused(&mut self, message: impl Into<String>) {
        self.state = BatchState::Paused;
        self.message = message.into();
        self.touch();
    }

    /// Flip a paused batch back to running.
    pub fn mark_running(&mut self, message: impl Into<String>) {
        self.state = BatchState::Running;
        self.message = message.into();
        self.touch();
    }

    /// Units not yet accounted for.
    pub fn remaining(&self) -> u64 {
        self.total.saturating_sub(self.processed + self.failed)
    }

    fn touch(&mut self) {
        self.last_updated_at = Utc::now();
    }
}
