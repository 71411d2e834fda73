//! Time-boxed slice execution.
//!
//! One slice is the unit of forward progress: claim a unit, process it,
//! record the outcome, repeat until the wall-clock budget runs out or the
//! batch reaches a terminal state. The slice never owns the decision to run
//! again; it returns a [`NextAction`] and lets the runtime act on it.

use chrono::Utc;
use metrics::counter;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, instrument, warn};

use crate::config::EngineConfig;
use crate::engine::backoff::BackoffHandler;
use crate::engine::controller::{StatusCell, StopFlag};
use crate::engine::processor::{ItemProcessor, Outcome, WorkUnitId};
use crate::engine::queue::QueueManager;
use crate::engine::status::BatchState;
use crate::engine::BatchKeys;
use crate::error::Result;
use crate::scheduler::TriggerScheduler;
use crate::store::{Marker, StateStore, CLAIM_MARKER, TERMINAL_MARKER};

/// What the trigger runtime should do after a slice returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NextAction {
    /// Work remains; schedule the next slice after this delay.
    Reschedule(Duration),

    /// The batch was paused for a rate-limit cool-down; the resume trigger
    /// is already scheduled.
    Backoff(Duration),

    /// The batch reached a terminal state (or never existed); schedule
    /// nothing.
    Halt,
}

/// Runs slices for one batch kind.
pub struct SliceExecutor {
    store: Arc<dyn StateStore>,
    processor: Arc<dyn ItemProcessor>,
    keys: BatchKeys,
    status: StatusCell,
    stop: StopFlag,
    queue: QueueManager,
    backoff: BackoffHandler,
    slice_budget: Duration,
    reschedule_delay: Duration,
    claim_staleness: Duration,
    max_failure_reason_len: usize,
}

impl SliceExecutor {
    pub fn new(
        store: Arc<dyn StateStore>,
        scheduler: Arc<dyn TriggerScheduler>,
        processor: Arc<dyn ItemProcessor>,
        config: &EngineConfig,
    ) -> Self {
        let keys = BatchKeys::new(processor.kind());
        let status = StatusCell::new(Arc::clone(&store), &keys, config.max_cas_retries);
        let stop = StopFlag::new(Arc::clone(&store), &keys);
        let queue = QueueManager::new(Arc::clone(&store), keys.queue_key());
        let backoff = BackoffHandler::new(
            scheduler,
            status.clone(),
            keys.kind(),
            config.backoff_cooldown,
        );
        Self {
            store,
            processor,
            keys,
            status,
            stop,
            queue,
            backoff,
            slice_budget: config.slice_budget,
            reschedule_delay: config.reschedule_delay,
            claim_staleness: config.claim_staleness,
            max_failure_reason_len: config.max_failure_reason_len,
        }
    }

    /// The batch kind this executor serves.
    pub fn kind(&self) -> &str {
        self.keys.kind()
    }

    /// Shared access to the status record, for the runtime's fault path.
    pub(crate) fn status_cell(&self) -> &StatusCell {
        &self.status
    }

    /// Run one slice to completion.
    ///
    /// Safe to call from any trigger firing, including spurious ones: a
    /// slice that finds nothing runnable halts without side effects.
    #[instrument(skip(self), fields(kind = %self.keys.kind()))]
    pub async fn run_slice(&self) -> Result<NextAction> {
        self.reclaim_stale_claims().await?;

        if self.stop.is_raised().await? {
            return self.halt_stopped().await;
        }

        let status = match self.status.load().await? {
            Some(status) => status,
            None => {
                debug!(kind = %self.keys.kind(), "Trigger fired with no batch; halting");
                return Ok(NextAction::Halt);
            }
        };

        match status.state {
            BatchState::Running => {}
            BatchState::Paused => {
                self.status
                    .transition(BatchState::Running, "Batch resumed after cool-down.")
                    .await?;
            }
            _ => return Ok(NextAction::Halt),
        }

        counter!("shopsuite_slices_total", "kind" => self.keys.kind().to_string()).increment(1);
        let started = Instant::now();

        loop {
            if started.elapsed() >= self.slice_budget {
                debug!(kind = %self.keys.kind(), "Slice budget exhausted; rescheduling");
                return Ok(NextAction::Reschedule(self.reschedule_delay));
            }

            if self.stop.is_raised().await? {
                return self.halt_stopped().await;
            }

            // Another actor may have rewritten the record since the last unit
            let state = self.status.load().await?.map(|status| status.state);
            if state != Some(BatchState::Running) {
                return Ok(NextAction::Halt);
            }

            let unit = match self.queue.pop_front().await? {
                Some(unit) => unit,
                None => {
                    self.status
                        .update(|status| status.mark_complete("Batch complete."))
                        .await?;
                    counter!("shopsuite_batches_completed_total", "kind" => self.keys.kind().to_string())
                        .increment(1);
                    info!(kind = %self.keys.kind(), "Batch complete");
                    return Ok(NextAction::Halt);
                }
            };

            let scoped = self.keys.scoped_unit(unit.as_str());
            self.store
                .set_marker(&scoped, CLAIM_MARKER, Marker::now())
                .await?;

            match self.processor.process(&unit).await {
                Outcome::Success => {
                    self.store.clear_marker(&scoped, CLAIM_MARKER).await?;
                    // A success supersedes any earlier permanent verdict
                    self.store.clear_marker(&scoped, TERMINAL_MARKER).await?;
                    self.status
                        .update(|status| {
                            status.record_success(format!("Processed '{}'.", unit))
                        })
                        .await?;
                    counter!(
                        "shopsuite_units_total",
                        "kind" => self.keys.kind().to_string(),
                        "outcome" => "success",
                    )
                    .increment(1);
                    debug!(kind = %self.keys.kind(), unit = %unit, "Unit processed");
                }
                Outcome::PermanentFailure(reason) => {
                    self.store.clear_marker(&scoped, CLAIM_MARKER).await?;
                    let reason = truncate(&reason, self.max_failure_reason_len);
                    self.store
                        .set_marker(&scoped, TERMINAL_MARKER, Marker::with_note(reason.clone()))
                        .await?;
                    self.status
                        .update(|status| {
                            status.record_failure(format!("Failed '{}': {}", unit, reason))
                        })
                        .await?;
                    counter!(
                        "shopsuite_units_total",
                        "kind" => self.keys.kind().to_string(),
                        "outcome" => "permanent_failure",
                    )
                    .increment(1);
                    warn!(kind = %self.keys.kind(), unit = %unit, reason = %reason, "Unit failed permanently");
                }
                Outcome::RateLimited => {
                    self.store.clear_marker(&scoped, CLAIM_MARKER).await?;
                    self.queue.push_front(unit.clone()).await?;
                    counter!(
                        "shopsuite_units_total",
                        "kind" => self.keys.kind().to_string(),
                        "outcome" => "rate_limited",
                    )
                    .increment(1);
                    let cooldown = self.backoff.engage(&unit).await?;
                    return Ok(NextAction::Backoff(cooldown));
                }
            }

            if let Some(pause) = self.processor.throttle() {
                tokio::time::sleep(pause).await;
            }
        }
    }

    /// Stop was requested: move a live batch to `Stopped`, leave terminal
    /// batches untouched.
    async fn halt_stopped(&self) -> Result<NextAction> {
        if let Some(status) = self.status.load().await? {
            if !status.state.is_terminal() {
                self.status
                    .update(|status| status.mark_stopped("Batch stopped by request."))
                    .await?;
                counter!("shopsuite_batches_stopped_total", "kind" => self.keys.kind().to_string())
                    .increment(1);
                info!(kind = %self.keys.kind(), "Batch stopped");
            }
        }
        Ok(NextAction::Halt)
    }

    /// Requeue units whose claim outlived the staleness window without a
    /// terminal verdict. Covers slices that died between claiming a unit
    /// and recording its outcome.
    async fn reclaim_stale_claims(&self) -> Result<()> {
        let cutoff = Utc::now() - chrono::Duration::seconds(self.claim_staleness.as_secs() as i64);
        let stale = self
            .store
            .markers_older_than(CLAIM_MARKER, cutoff, &self.keys.unit_prefix())
            .await?;

        for scoped in stale {
            self.store.clear_marker(&scoped, CLAIM_MARKER).await?;

            if self
                .store
                .get_marker(&scoped, TERMINAL_MARKER)
                .await?
                .is_some()
            {
                continue;
            }

            let Some(unit) = self.keys.unscoped_unit(&scoped) else {
                continue;
            };
            let unit = WorkUnitId::new(unit);
            if !self.queue.contains(&unit).await? {
                warn!(kind = %self.keys.kind(), unit = %unit, "Reclaiming abandoned unit");
                self.queue.push_front(unit).await?;
                counter!("shopsuite_units_reclaimed_total", "kind" => self.keys.kind().to_string())
                    .increment(1);
            }
        }
        Ok(())
    }
}

fn truncate(reason: &str, max_len: usize) -> String {
    if reason.len() <= max_len {
        return reason.to_string();
    }
    let mut end = max_len;
    while !reason.is_char_boundary(end) {
        end -= 1;
    }
    reason[..end].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::controller::BatchController;
    use crate::scheduler::ManualScheduler;
    use crate::store::MemoryStore;
    use async_trait::async_trait;
    use std::collections::HashMap;

    struct ScriptedProcessor {
        outcomes: HashMap<String, Outcome>,
    }

    impl ScriptedProcessor {
        fn new(outcomes: &[(&str, Outcome)]) -> Self {
            Self {
                outcomes: outcomes
                    .iter()
                    .map(|(unit, outcome)| (unit.to_string(), outcome.clone()))
                    .collect(),
            }
        }
    }

    #[async_trait]
    impl ItemProcessor for ScriptedProcessor {
        fn kind(&self) -> &str {
            "scripted"
        }

        async fn process(&self, unit: &WorkUnitId) -> Outcome {
            self.outcomes
                .get(unit.as_str())
                .cloned()
                .unwrap_or(Outcome::Success)
        }
    }

    fn executor(
        outcomes: &[(&str, Outcome)],
        config: EngineConfig,
    ) -> (Arc<MemoryStore>, Arc<ManualScheduler>, BatchController, SliceExecutor) {
        let store = Arc::new(MemoryStore::new());
        let scheduler = Arc::new(ManualScheduler::new());
        let controller = BatchController::new(
            Arc::clone(&store) as Arc<dyn StateStore>,
            Arc::clone(&scheduler) as Arc<dyn TriggerScheduler>,
            &config,
            "scripted",
        );
        let executor = SliceExecutor::new(
            Arc::clone(&store) as Arc<dyn StateStore>,
            Arc::clone(&scheduler) as Arc<dyn TriggerScheduler>,
            Arc::new(ScriptedProcessor::new(outcomes)),
            &config,
        );
        (store, scheduler, controller, executor)
    }

    #[tokio::test]
    async fn test_slice_without_batch_halts() {
        let (_, _, _, executor) = executor(&[], EngineConfig::default());
        assert_eq!(executor.run_slice().await.unwrap(), NextAction::Halt);
    }

    #[tokio::test]
    async fn test_exhausted_budget_reschedules() {
        let mut config = EngineConfig::default();
        config.slice_budget = Duration::ZERO;
        config.reschedule_delay = Duration::from_secs(1);
        let (_, _, controller, executor) = executor(&[], config);

        controller
            .start_batch(vec!["a".into(), "b".into()])
            .await
            .unwrap();

        assert_eq!(
            executor.run_slice().await.unwrap(),
            NextAction::Reschedule(Duration::from_secs(1))
        );

        // Nothing was processed and the queue is intact
        let status = controller.status().await.unwrap();
        assert_eq!(status.processed, 0);
        assert_eq!(status.state, BatchState::Running);
    }

    #[tokio::test]
    async fn test_terminal_state_halts_without_side_effects() {
        let (_, _, controller, executor) = executor(&[], EngineConfig::default());
        controller.start_batch(vec!["a".into()]).await.unwrap();
        executor.run_slice().await.unwrap();

        let completed = controller.status().await.unwrap();
        assert_eq!(completed.state, BatchState::Complete);

        // A spurious trigger after completion changes nothing
        assert_eq!(executor.run_slice().await.unwrap(), NextAction::Halt);
        assert_eq!(controller.status().await.unwrap(), completed);
    }

    #[test]
    fn test_truncate_respects_char_boundaries() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("abcdef", 3), "abc");
        // 'é' is two bytes; cutting inside it backs off to the boundary
        assert_eq!(truncate("caféteria", 4), "caf");
    }
}
