//! Batch lifecycle operations: start, resume, stop, status.

use metrics::counter;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, instrument};

use crate::config::EngineConfig;
use crate::engine::processor::WorkUnitId;
use crate::engine::queue::QueueManager;
use crate::engine::status::{BatchState, BatchStatus};
use crate::engine::BatchKeys;
use crate::error::{ErrorCode, Result, SuiteError};
use crate::scheduler::TriggerScheduler;
use crate::store::{StateStore, TERMINAL_MARKER};

// ═══════════════════════════════════════════════════════════════════════════
// Status cell
// ═══════════════════════════════════════════════════════════════════════════

/// Optimistic read-modify-write access to one batch status record.
///
/// Every mutation re-reads the stored document and swaps it in with a
/// compare-and-swap, retrying a bounded number of times when a concurrent
/// writer got there first.
#[derive(Clone)]
pub struct StatusCell {
    store: Arc<dyn StateStore>,
    key: String,
    kind: String,
    max_retries: u32,
}

impl StatusCell {
    pub fn new(store: Arc<dyn StateStore>, keys: &BatchKeys, max_retries: u32) -> Self {
        Self {
            store,
            key: keys.status_key(),
            kind: keys.kind().to_string(),
            max_retries,
        }
    }

    /// Read the current status record, if one was ever written.
    pub async fn load(&self) -> Result<Option<BatchStatus>> {
        self.store.as_ref().get_json(&self.key).await
    }

    /// Overwrite the record unconditionally. Used when starting a fresh
    /// batch, where whatever was there before is superseded.
    pub async fn replace(&self, status: &BatchStatus) -> Result<()> {
        self.store.as_ref().set_json(&self.key, status).await
    }

    /// Apply `mutate` to the current record under optimistic concurrency.
    ///
    /// Fails with [`ErrorCode::BatchNotFound`] if no record exists and with
    /// [`ErrorCode::StatusConflict`] once retries are exhausted.
    pub async fn update<F>(&self, mutate: F) -> Result<BatchStatus>
    where
        F: Fn(&mut BatchStatus),
    {
        for _ in 0..self.max_retries {
            let current = self.store.get(&self.key).await?.ok_or_else(|| {
                SuiteError::new(
                    ErrorCode::BatchNotFound,
                    format!("No status record for batch '{}'", self.kind),
                )
            })?;

            let mut status: BatchStatus = serde_json::from_value(current.clone())?;
            mutate(&mut status);
            let new = serde_json::to_value(&status)?;

            if self
                .store
                .compare_and_swap(&self.key, Some(&current), new)
                .await?
            {
                return Ok(status);
            }
        }

        Err(SuiteError::status_conflict(self.kind.clone()))
    }

    /// Transition the record to `next`, validating the state machine.
    pub async fn transition(
        &self,
        next: BatchState,
        message: impl Into<String>,
    ) -> Result<BatchStatus> {
        let message = message.into();
        let current = self
            .load()
            .await?
            .map(|status| status.state)
            .unwrap_or(BatchState::Idle);

        if !current.can_transition_to(next) {
            return Err(SuiteError::invalid_transition(current, next));
        }

        self.update(move |status| match next {
            BatchState::Running => status.mark_running(message.clone()),
            BatchState::Paused => status.mark_paused(message.clone()),
            BatchState::Stopped => status.mark_stopped(message.clone()),
            BatchState::Complete => status.mark_complete(message.clone()),
            BatchState::Idle => {}
        })
        .await
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Stop flag
// ═══════════════════════════════════════════════════════════════════════════

/// Persisted cooperative stop signal for one batch kind.
#[derive(Clone)]
pub struct StopFlag {
    store: Arc<dyn StateStore>,
    key: String,
}

impl StopFlag {
    pub fn new(store: Arc<dyn StateStore>, keys: &BatchKeys) -> Self {
        Self {
            store,
            key: keys.stop_key(),
        }
    }

    /// Raise the signal. The running slice observes it between units.
    pub async fn raise(&self) -> Result<()> {
        self.store.set(&self.key, serde_json::json!(true)).await
    }

    /// Clear the signal so a new or resumed batch can run.
    pub async fn clear(&self) -> Result<()> {
        self.store.delete(&self.key).await
    }

    /// Whether a stop has been requested.
    pub async fn is_raised(&self) -> Result<bool> {
        Ok(matches!(
            self.store.get(&self.key).await?,
            Some(serde_json::Value::Bool(true))
        ))
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Batch controller
// ═══════════════════════════════════════════════════════════════════════════

/// Entry points for operating one batch kind.
///
/// The controller owns no execution; it writes state and schedules triggers.
/// Slices run inside trigger firings, driven by the
/// [`BatchRuntime`](crate::engine::runtime::BatchRuntime).
pub struct BatchController {
    store: Arc<dyn StateStore>,
    scheduler: Arc<dyn TriggerScheduler>,
    keys: BatchKeys,
    status: StatusCell,
    stop: StopFlag,
    queue: QueueManager,
}

impl BatchController {
    pub fn new(
        store: Arc<dyn StateStore>,
        scheduler: Arc<dyn TriggerScheduler>,
        config: &EngineConfig,
        kind: impl Into<String>,
    ) -> Self {
        let keys = BatchKeys::new(kind);
        let status = StatusCell::new(Arc::clone(&store), &keys, config.max_cas_retries);
        let stop = StopFlag::new(Arc::clone(&store), &keys);
        let queue = QueueManager::new(Arc::clone(&store), keys.queue_key());
        Self {
            store,
            scheduler,
            keys,
            status,
            stop,
            queue,
        }
    }

    /// Start a new batch over `units`, superseding any previous batch of
    /// this kind.
    ///
    /// Units carrying a terminal marker from an earlier batch are skipped.
    /// An empty workload completes immediately without scheduling a trigger.
    #[instrument(skip(self, units), fields(kind = %self.keys.kind()))]
    pub async fn start_batch(&self, units: Vec<WorkUnitId>) -> Result<BatchStatus> {
        let mut workload = Vec::with_capacity(units.len());
        for unit in units {
            let scoped = self.keys.scoped_unit(unit.as_str());
            if self
                .store
                .get_marker(&scoped, TERMINAL_MARKER)
                .await?
                .is_none()
            {
                workload.push(unit);
            }
        }

        self.stop.clear().await?;
        self.store.delete(&self.keys.results_key()).await?;

        counter!("shopsuite_batches_started_total", "kind" => self.keys.kind().to_string())
            .increment(1);

        if workload.is_empty() {
            let mut status = BatchStatus::starting(0, "");
            status.mark_complete("No items to process.");
            self.status.replace(&status).await?;
            self.queue.enqueue_all(Vec::new()).await?;
            info!(kind = %self.keys.kind(), "Batch started with empty workload; complete");
            return Ok(status);
        }

        let total = workload.len() as u64;
        let status = BatchStatus::starting(total, format!("Batch started: {} items.", total));
        self.status.replace(&status).await?;
        self.queue.enqueue_all(workload).await?;
        self.scheduler
            .schedule_once(self.keys.kind(), Duration::ZERO)
            .await?;

        info!(
            kind = %self.keys.kind(),
            batch_id = %status.batch_id,
            total = total,
            "Batch started"
        );
        Ok(status)
    }

    /// Resume a paused or stopped batch from its persisted queue.
    ///
    /// Clears the stop signal, forces the state to `Running`, and schedules
    /// an immediate trigger. Resuming a completed batch is harmless; the
    /// next slice observes the drained queue and re-completes without
    /// touching counters.
    #[instrument(skip(self), fields(kind = %self.keys.kind()))]
    pub async fn resume_batch(&self) -> Result<BatchStatus> {
        if self.status.load().await?.is_none() {
            return Err(SuiteError::new(
                ErrorCode::BatchNotFound,
                format!("No batch of kind '{}' to resume", self.keys.kind()),
            ));
        }

        self.stop.clear().await?;
        let status = self
            .status
            .update(|status| status.mark_running("Batch resumed."))
            .await?;

        self.scheduler.cancel_pending(self.keys.kind()).await?;
        self.scheduler
            .schedule_once(self.keys.kind(), Duration::ZERO)
            .await?;

        counter!("shopsuite_batches_resumed_total", "kind" => self.keys.kind().to_string())
            .increment(1);
        info!(kind = %self.keys.kind(), "Batch resumed");
        Ok(status)
    }

    /// Request a cooperative stop. Returns immediately; the running slice
    /// observes the signal at its next check and transitions to `Stopped`.
    #[instrument(skip(self), fields(kind = %self.keys.kind()))]
    pub async fn request_stop(&self) -> Result<()> {
        self.stop.raise().await?;
        info!(kind = %self.keys.kind(), "Stop requested");
        Ok(())
    }

    /// Current status record, or the idle record if no batch ever ran.
    pub async fn status(&self) -> Result<BatchStatus> {
        Ok(self.status.load().await?.unwrap_or_else(BatchStatus::idle))
    }

    /// The key layout used by this controller.
    pub fn keys(&self) -> &BatchKeys {
        &self.keys
    }
}
