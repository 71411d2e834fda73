//! Rate-limit backoff handling.
//!
//! A single rate-limited outcome suspends the whole batch: the provider is
//! throttling us, so hammering it with the remaining units would only burn
//! quota. The handler pauses the batch, cancels any pending trigger, and
//! schedules a one-shot resume after the cool-down.

use metrics::counter;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

use crate::engine::controller::StatusCell;
use crate::engine::processor::WorkUnitId;
use crate::error::Result;
use crate::scheduler::TriggerScheduler;

pub struct BackoffHandler {
    scheduler: Arc<dyn TriggerScheduler>,
    status: StatusCell,
    kind: String,
    cooldown: Duration,
}

impl BackoffHandler {
    pub fn new(
        scheduler: Arc<dyn TriggerScheduler>,
        status: StatusCell,
        kind: impl Into<String>,
        cooldown: Duration,
    ) -> Self {
        Self {
            scheduler,
            status,
            kind: kind.into(),
            cooldown,
        }
    }

    /// Suspend the batch after `unit` came back rate-limited.
    ///
    /// The unit itself has already been requeued at the front by the caller;
    /// once the scheduled trigger fires, the next slice flips the batch back
    /// to running and retries it first.
    pub async fn engage(&self, unit: &WorkUnitId) -> Result<Duration> {
        warn!(
            kind = %self.kind,
            unit = %unit,
            cooldown_secs = self.cooldown.as_secs(),
            "Rate limited; pausing batch"
        );

        self.status
            .update(|status| {
                status.mark_paused(format!(
                    "Rate limited while processing '{}'; resuming in {}s.",
                    unit,
                    self.cooldown.as_secs()
                ));
            })
            .await?;

        // One pending trigger per kind: drop any continuation before
        // scheduling the resume.
        self.scheduler.cancel_pending(&self.kind).await?;
        self.scheduler.schedule_once(&self.kind, self.cooldown).await?;

        counter!("shopsuite_batch_backoffs_total", "kind" => self.kind.clone()).increment(1);
        Ok(self.cooldown)
    }
}
