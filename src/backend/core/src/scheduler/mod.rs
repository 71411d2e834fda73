//! One-shot trigger scheduling.
//!
//! The batch engine never holds a long-lived worker loop. Progress happens
//! when an external trigger fires; each firing runs exactly one slice, and
//! the slice decides whether to schedule another firing. This module defines
//! the scheduling seam plus two implementations:
//!
//! - [`TokioScheduler`]: timers backed by spawned tasks, for real deployments
//! - [`ManualScheduler`]: records requests without firing, for testing and
//!   development

use async_trait::async_trait;
use dashmap::DashMap;
use futures::future::BoxFuture;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::error::{ErrorCode, Result, SuiteError};

/// Callback invoked when a trigger fires.
pub type TriggerHandler = Arc<dyn Fn() -> BoxFuture<'static, ()> + Send + Sync>;

/// Trait for one-shot trigger schedulers.
///
/// `callback_id` names the batch kind; at most one pending trigger exists
/// per id at any time.
#[async_trait]
pub trait TriggerScheduler: Send + Sync {
    /// Register the handler invoked whenever `callback_id` fires.
    fn register(&self, callback_id: &str, handler: TriggerHandler);

    /// Arrange a single firing of `callback_id` after `delay`, replacing any
    /// trigger already pending for that id.
    async fn schedule_once(&self, callback_id: &str, delay: Duration) -> Result<()>;

    /// Cancel the pending trigger for `callback_id`, if any.
    async fn cancel_pending(&self, callback_id: &str) -> Result<()>;
}

// ═══════════════════════════════════════════════════════════════════════════
// Tokio-backed scheduler
// ═══════════════════════════════════════════════════════════════════════════

/// Scheduler that fires triggers from spawned tokio tasks.
#[derive(Default)]
pub struct TokioScheduler {
    handlers: DashMap<String, TriggerHandler>,
    pending: Arc<DashMap<String, JoinHandle<()>>>,
}

impl TokioScheduler {
    /// Create a scheduler with no registered handlers.
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a trigger is currently pending for `callback_id`.
    pub fn has_pending(&self, callback_id: &str) -> bool {
        self.pending
            .get(callback_id)
            .map(|handle| !handle.is_finished())
            .unwrap_or(false)
    }
}

#[async_trait]
impl TriggerScheduler for TokioScheduler {
    fn register(&self, callback_id: &str, handler: TriggerHandler) {
        self.handlers.insert(callback_id.to_string(), handler);
    }

    async fn schedule_once(&self, callback_id: &str, delay: Duration) -> Result<()> {
        let handler = self
            .handlers
            .get(callback_id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| {
                SuiteError::new(
                    ErrorCode::TriggerNotRegistered,
                    format!("No handler registered for trigger '{}'", callback_id),
                )
            })?;

        // Replace any pending firing; a doubled trigger would run two slices
        // concurrently against the same status record.
        if let Some((_, previous)) = self.pending.remove(callback_id) {
            previous.abort();
        }

        let id = callback_id.to_string();
        let pending = Arc::clone(&self.pending);
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            pending.remove(&id);
            handler().await;
        });

        debug!(callback_id = %callback_id, delay_ms = delay.as_millis() as u64, "Trigger scheduled");
        self.pending.insert(callback_id.to_string(), handle);
        Ok(())
    }

    async fn cancel_pending(&self, callback_id: &str) -> Result<()> {
        if let Some((_, handle)) = self.pending.remove(callback_id) {
            handle.abort();
            debug!(callback_id = %callback_id, "Pending trigger cancelled");
        }
        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Manual scheduler
// ═══════════════════════════════════════════════════════════════════════════

/// A recorded scheduling request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduledTrigger {
    pub callback_id: String,
    pub delay: Duration,
}

/// Scheduler that records requests without firing them, for testing and
/// development. Tests drive slices directly and inspect what the engine
/// asked to be scheduled.
#[derive(Default)]
pub struct ManualScheduler {
    handlers: DashMap<String, TriggerHandler>,
    scheduled: std::sync::Mutex<Vec<ScheduledTrigger>>,
    cancelled: std::sync::Mutex<Vec<String>>,
}

impl ManualScheduler {
    /// Create an empty manual scheduler.
    pub fn new() -> Self {
        Self::default()
    }

    /// All scheduling requests recorded so far, oldest first.
    pub fn scheduled(&self) -> Vec<ScheduledTrigger> {
        self.scheduled.lock().expect("scheduler lock").clone()
    }

    /// All cancellation requests recorded so far, oldest first.
    pub fn cancelled(&self) -> Vec<String> {
        self.cancelled.lock().expect("scheduler lock").clone()
    }

    /// Remove and return the oldest recorded scheduling request.
    pub fn pop_scheduled(&self) -> Option<ScheduledTrigger> {
        let mut scheduled = self.scheduled.lock().expect("scheduler lock");
        if scheduled.is_empty() {
            None
        } else {
            Some(scheduled.remove(0))
        }
    }

    /// Fire the registered handler for `callback_id` immediately.
    pub async fn fire(&self, callback_id: &str) -> Result<()> {
        let handler = self
            .handlers
            .get(callback_id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| {
                SuiteError::new(
                    ErrorCode::TriggerNotRegistered,
                    format!("No handler registered for trigger '{}'", callback_id),
                )
            })?;
        handler().await;
        Ok(())
    }
}

#[async_trait]
impl TriggerScheduler for ManualScheduler {
    fn register(&self, callback_id: &str, handler: TriggerHandler) {
        self.handlers.insert(callback_id.to_string(), handler);
    }

    async fn schedule_once(&self, callback_id: &str, delay: Duration) -> Result<()> {
        self.scheduled
            .lock()
            .expect("scheduler lock")
            .push(ScheduledTrigger {
                callback_id: callback_id.to_string(),
                delay,
            });
        Ok(())
    }

    async fn cancel_pending(&self, callback_id: &str) -> Result<()> {
        self.cancelled
            .lock()
            .expect("scheduler lock")
            .push(callback_id.to_string());
        Ok(())
    }
}
