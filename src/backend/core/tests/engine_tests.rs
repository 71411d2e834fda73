//! Integration tests for the batch engine lifecycle.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use shopsuite_core::prelude::*;

// ============================================================================
// Test Harness
// ============================================================================

/// Processor driven by a per-unit script of outcomes. Units without a script
/// succeed. Optionally raises the stop signal after handling a given unit,
/// simulating an operator pressing stop mid-batch.
struct ScriptedProcessor {
    store: Arc<MemoryStore>,
    outcomes: Mutex<HashMap<String, Vec<Outcome>>>,
    raise_stop_after: Option<String>,
    processed_log: Mutex<Vec<String>>,
}

impl ScriptedProcessor {
    fn new(store: Arc<MemoryStore>) -> Self {
        Self {
            store,
            outcomes: Mutex::new(HashMap::new()),
            raise_stop_after: None,
            processed_log: Mutex::new(Vec::new()),
        }
    }

    fn script(self, unit: &str, outcomes: Vec<Outcome>) -> Self {
        self.outcomes
            .lock()
            .expect("outcomes lock")
            .insert(unit.to_string(), outcomes);
        self
    }

    fn stop_after(mut self, unit: &str) -> Self {
        self.raise_stop_after = Some(unit.to_string());
        self
    }

    fn processed(&self) -> Vec<String> {
        self.processed_log.lock().expect("log lock").clone()
    }
}

#[async_trait]
impl ItemProcessor for ScriptedProcessor {
    fn kind(&self) -> &str {
        "batch"
    }

    async fn process(&self, unit: &WorkUnitId) -> Outcome {
        self.processed_log
            .lock()
            .expect("log lock")
            .push(unit.as_str().to_string());

        let outcome = {
            let mut outcomes = self.outcomes.lock().expect("outcomes lock");
            match outcomes.get_mut(unit.as_str()) {
                Some(script) if !script.is_empty() => script.remove(0),
                _ => Outcome::Success,
            }
        };

        if self.raise_stop_after.as_deref() == Some(unit.as_str()) {
            let stop = StopFlag::new(
                Arc::clone(&self.store) as Arc<dyn StateStore>,
                &BatchKeys::new("batch"),
            );
            stop.raise().await.expect("raise stop");
        }

        outcome
    }
}

struct Harness {
    store: Arc<MemoryStore>,
    scheduler: Arc<ManualScheduler>,
    controller: BatchController,
    executor: SliceExecutor,
    processor: Arc<ScriptedProcessor>,
}

fn harness(processor: ScriptedProcessor) -> Harness {
    harness_with_config(processor, EngineConfig::default())
}

fn harness_with_config(processor: ScriptedProcessor, config: EngineConfig) -> Harness {
    let store = Arc::clone(&processor.store);
    let scheduler = Arc::new(ManualScheduler::new());
    let processor = Arc::new(processor);

    let controller = BatchController::new(
        Arc::clone(&store) as Arc<dyn StateStore>,
        Arc::clone(&scheduler) as Arc<dyn TriggerScheduler>,
        &config,
        "batch",
    );
    let executor = SliceExecutor::new(
        Arc::clone(&store) as Arc<dyn StateStore>,
        Arc::clone(&scheduler) as Arc<dyn TriggerScheduler>,
        Arc::clone(&processor) as Arc<dyn ItemProcessor>,
        &config,
    );

    Harness {
        store,
        scheduler,
        controller,
        executor,
        processor,
    }
}

impl Harness {
    /// Run slices until the engine halts, the way trigger firings would.
    async fn drive_to_halt(&self) -> NextAction {
        loop {
            match self.executor.run_slice().await.expect("slice failed") {
                NextAction::Reschedule(_) => continue,
                other => return other,
            }
        }
    }

    async fn status(&self) -> BatchStatus {
        self.controller.status().await.expect("status read")
    }
}

fn units(ids: &[&str]) -> Vec<WorkUnitId> {
    ids.iter().map(|id| WorkUnitId::new(*id)).collect()
}

// ============================================================================
// Happy Path
// ============================================================================

#[tokio::test]
async fn test_happy_path_processes_all_units() {
    let h = harness(ScriptedProcessor::new(Arc::new(MemoryStore::new())));

    let started = h
        .controller
        .start_batch(units(&["a", "b", "c"]))
        .await
        .unwrap();
    assert_eq!(started.state, BatchState::Running);
    assert_eq!(started.total, 3);

    assert_eq!(h.drive_to_halt().await, NextAction::Halt);

    let status = h.status().await;
    assert_eq!(status.state, BatchState::Complete);
    assert_eq!(status.processed, 3);
    assert_eq!(status.failed, 0);
    assert_eq!(h.processor.processed(), vec!["a", "b", "c"]);
}

#[tokio::test]
async fn test_empty_workload_completes_without_trigger() {
    let h = harness(ScriptedProcessor::new(Arc::new(MemoryStore::new())));

    let status = h.controller.start_batch(Vec::new()).await.unwrap();

    assert_eq!(status.state, BatchState::Complete);
    assert_eq!(status.total, 0);
    assert!(h.scheduler.scheduled().is_empty());
}

// ============================================================================
// Rate Limiting and Resume
// ============================================================================

#[tokio::test]
async fn test_rate_limit_pauses_then_resume_completes() {
    let processor = ScriptedProcessor::new(Arc::new(MemoryStore::new()))
        .script("b", vec![Outcome::RateLimited, Outcome::Success]);
    let h = harness(processor);

    h.controller
        .start_batch(units(&["a", "b", "c"]))
        .await
        .unwrap();

    // First slice: a succeeds, b hits the rate limit
    let action = h.drive_to_halt().await;
    assert!(matches!(action, NextAction::Backoff(_)));

    let paused = h.status().await;
    assert_eq!(paused.state, BatchState::Paused);
    assert_eq!(paused.processed, 1);

    // The backoff handler scheduled the resume trigger with the cool-down
    let resume = h
        .scheduler
        .scheduled()
        .into_iter()
        .last()
        .expect("resume trigger");
    assert_eq!(resume.delay, EngineConfig::default().backoff_cooldown);

    // The resume trigger fires: b is retried first and the batch finishes
    assert_eq!(h.drive_to_halt().await, NextAction::Halt);

    let status = h.status().await;
    assert_eq!(status.state, BatchState::Complete);
    assert_eq!(status.processed, 3);
    assert_eq!(status.failed, 0);

    // b was attempted twice but counted once
    assert_eq!(h.processor.processed(), vec!["a", "b", "b", "c"]);
}

#[tokio::test]
async fn test_operator_resume_from_stopped() {
    let processor =
        ScriptedProcessor::new(Arc::new(MemoryStore::new())).stop_after("a");
    let h = harness(processor);

    h.controller
        .start_batch(units(&["a", "b", "c"]))
        .await
        .unwrap();
    h.drive_to_halt().await;
    assert_eq!(h.status().await.state, BatchState::Stopped);

    // Resume picks the remaining queue back up
    h.controller.resume_batch().await.unwrap();
    assert_eq!(h.drive_to_halt().await, NextAction::Halt);

    let status = h.status().await;
    assert_eq!(status.state, BatchState::Complete);
    assert_eq!(status.processed, 3);
}

// ============================================================================
// Cooperative Stop
// ============================================================================

#[tokio::test]
async fn test_stop_mid_batch_preserves_progress() {
    let processor =
        ScriptedProcessor::new(Arc::new(MemoryStore::new())).stop_after("a");
    let h = harness(processor);

    h.controller
        .start_batch(units(&["a", "b", "c"]))
        .await
        .unwrap();
    assert_eq!(h.drive_to_halt().await, NextAction::Halt);

    let status = h.status().await;
    assert_eq!(status.state, BatchState::Stopped);
    assert_eq!(status.processed, 1);
    assert_eq!(h.processor.processed(), vec!["a"]);
}

#[tokio::test]
async fn test_stop_before_any_slice() {
    let h = harness(ScriptedProcessor::new(Arc::new(MemoryStore::new())));

    h.controller.start_batch(units(&["a"])).await.unwrap();
    h.controller.request_stop().await.unwrap();

    assert_eq!(h.drive_to_halt().await, NextAction::Halt);

    let status = h.status().await;
    assert_eq!(status.state, BatchState::Stopped);
    assert_eq!(status.processed, 0);
    assert!(h.processor.processed().is_empty());
}

// ============================================================================
// Permanent Failures
// ============================================================================

#[tokio::test]
async fn test_permanent_failure_is_isolated() {
    let processor = ScriptedProcessor::new(Arc::new(MemoryStore::new())).script(
        "b",
        vec![Outcome::PermanentFailure("image URL returns 404".to_string())],
    );
    let h = harness(processor);

    h.controller
        .start_batch(units(&["a", "b", "c"]))
        .await
        .unwrap();
    assert_eq!(h.drive_to_halt().await, NextAction::Halt);

    let status = h.status().await;
    assert_eq!(status.state, BatchState::Complete);
    assert_eq!(status.processed, 3);
    assert_eq!(status.failed, 1);

    // Only the failed unit carries a terminal marker, and no claims linger
    let keys = BatchKeys::new("batch");
    for unit in ["a", "b", "c"] {
        let scoped = keys.scoped_unit(unit);
        let terminal = h.store.get_marker(&scoped, TERMINAL_MARKER).await.unwrap();
        if unit == "b" {
            let marker = terminal.expect("terminal marker on failed unit");
            assert_eq!(marker.note.as_deref(), Some("image URL returns 404"));
        } else {
            assert!(terminal.is_none());
        }
        assert!(h
            .store
            .get_marker(&scoped, CLAIM_MARKER)
            .await
            .unwrap()
            .is_none());
    }
}

#[tokio::test]
async fn test_terminally_failed_unit_skipped_on_next_batch() {
    let processor = ScriptedProcessor::new(Arc::new(MemoryStore::new()))
        .script("b", vec![Outcome::PermanentFailure("bad item".to_string())]);
    let h = harness(processor);

    h.controller.start_batch(units(&["a", "b"])).await.unwrap();
    h.drive_to_halt().await;

    // A later batch over the same items excludes b
    let restarted = h.controller.start_batch(units(&["a", "b"])).await.unwrap();
    assert_eq!(restarted.total, 1);

    h.drive_to_halt().await;
    assert_eq!(h.processor.processed(), vec!["a", "b", "a"]);
}

#[tokio::test]
async fn test_failure_reason_is_truncated() {
    let mut config = EngineConfig::default();
    config.max_failure_reason_len = 10;

    let processor = ScriptedProcessor::new(Arc::new(MemoryStore::new())).script(
        "a",
        vec![Outcome::PermanentFailure("x".repeat(100))],
    );
    let h = harness_with_config(processor, config);

    h.controller.start_batch(units(&["a"])).await.unwrap();
    h.drive_to_halt().await;

    let marker = h
        .store
        .get_marker(&BatchKeys::new("batch").scoped_unit("a"), TERMINAL_MARKER)
        .await
        .unwrap()
        .expect("terminal marker");
    assert_eq!(marker.note.as_deref(), Some("x".repeat(10).as_str()));
}

// ============================================================================
// Stuck Item Reclamation
// ============================================================================

#[tokio::test]
async fn test_stale_claim_is_reclaimed_and_processed() {
    let h = harness(ScriptedProcessor::new(Arc::new(MemoryStore::new())));
    let keys = BatchKeys::new("batch");

    h.controller.start_batch(units(&["a", "b"])).await.unwrap();

    // Simulate a slice that died after claiming a: the unit left the queue
    // but never reached an outcome
    let queue = QueueManager::new(
        Arc::clone(&h.store) as Arc<dyn StateStore>,
        keys.queue_key(),
    );
    let claimed = queue.pop_front().await.unwrap().unwrap();
    assert_eq!(claimed.as_str(), "a");
    let stale = chrono::Utc::now() - chrono::Duration::minutes(20);
    h.store
        .set_marker(&keys.scoped_unit("a"), CLAIM_MARKER, Marker::at(stale))
        .await
        .unwrap();

    assert_eq!(h.drive_to_halt().await, NextAction::Halt);

    let status = h.status().await;
    assert_eq!(status.state, BatchState::Complete);
    assert_eq!(status.processed, 2);

    // a was reclaimed to the front, so it ran before b
    assert_eq!(h.processor.processed(), vec!["a", "b"]);
    assert!(h
        .store
        .get_marker(&keys.scoped_unit("a"), CLAIM_MARKER)
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn test_stale_claim_with_terminal_marker_not_requeued() {
    let h = harness(ScriptedProcessor::new(Arc::new(MemoryStore::new())));
    let keys = BatchKeys::new("batch");

    h.controller.start_batch(units(&["a"])).await.unwrap();

    // A unit from a previous batch died with a verdict already recorded
    let stale = chrono::Utc::now() - chrono::Duration::minutes(20);
    h.store
        .set_marker(&keys.scoped_unit("old"), CLAIM_MARKER, Marker::at(stale))
        .await
        .unwrap();
    h.store
        .set_marker(
            &keys.scoped_unit("old"),
            TERMINAL_MARKER,
            Marker::with_note("gone"),
        )
        .await
        .unwrap();

    h.drive_to_halt().await;

    // The stale claim was swept but the unit stayed out of the batch
    assert!(h
        .store
        .get_marker(&keys.scoped_unit("old"), CLAIM_MARKER)
        .await
        .unwrap()
        .is_none());
    assert_eq!(h.processor.processed(), vec!["a"]);
    assert_eq!(h.status().await.processed, 1);
}

// ============================================================================
// Idempotence and Invariants
// ============================================================================

#[tokio::test]
async fn test_resume_after_completion_is_idempotent() {
    let h = harness(ScriptedProcessor::new(Arc::new(MemoryStore::new())));

    h.controller.start_batch(units(&["a", "b"])).await.unwrap();
    h.drive_to_halt().await;
    let completed = h.status().await;
    assert_eq!(completed.state, BatchState::Complete);

    h.controller.resume_batch().await.unwrap();
    assert_eq!(h.drive_to_halt().await, NextAction::Halt);

    let after = h.status().await;
    assert_eq!(after.state, BatchState::Complete);
    assert_eq!(after.processed, completed.processed);
    assert_eq!(after.failed, completed.failed);
    assert_eq!(h.processor.processed(), vec!["a", "b"]);
}

#[tokio::test]
async fn test_counters_never_exceed_total() {
    let processor = ScriptedProcessor::new(Arc::new(MemoryStore::new()))
        .script("b", vec![Outcome::PermanentFailure("broken".to_string())])
        .script("c", vec![Outcome::RateLimited, Outcome::Success]);
    let mut config = EngineConfig::default();
    // One unit per slice so every intermediate snapshot is observable
    config.slice_budget = Duration::from_millis(1);
    let h = harness_with_config(processor, config);

    h.controller
        .start_batch(units(&["a", "b", "c", "d"]))
        .await
        .unwrap();

    loop {
        let status = h.status().await;
        assert!(
            status.processed + status.failed <= status.total
                || status.state == BatchState::Complete,
            "counter invariant violated: {:?}",
            status
        );
        if status.state == BatchState::Complete {
            break;
        }
        h.executor.run_slice().await.unwrap();
    }

    let status = h.status().await;
    assert_eq!(status.processed, 4);
    assert_eq!(status.failed, 1);
}

#[tokio::test]
async fn test_new_batch_resets_counters() {
    let h = harness(ScriptedProcessor::new(Arc::new(MemoryStore::new())));

    h.controller.start_batch(units(&["a", "b"])).await.unwrap();
    h.drive_to_halt().await;
    assert_eq!(h.status().await.processed, 2);

    let restarted = h.controller.start_batch(units(&["c"])).await.unwrap();
    assert_eq!(restarted.total, 1);
    assert_eq!(restarted.processed, 0);
    assert_eq!(restarted.failed, 0);
}

// ============================================================================
// End-to-End with Real Triggers
// ============================================================================

#[tokio::test]
async fn test_full_lifecycle_with_tokio_scheduler() {
    let store = Arc::new(MemoryStore::new());
    let scheduler = Arc::new(TokioScheduler::new());
    let mut config = EngineConfig::default();
    config.backoff_cooldown = Duration::from_millis(20);

    let processor = Arc::new(
        ScriptedProcessor::new(Arc::clone(&store))
            .script("b", vec![Outcome::RateLimited, Outcome::Success]),
    );

    let controller = BatchController::new(
        Arc::clone(&store) as Arc<dyn StateStore>,
        Arc::clone(&scheduler) as Arc<dyn TriggerScheduler>,
        &config,
        "batch",
    );
    let executor = SliceExecutor::new(
        Arc::clone(&store) as Arc<dyn StateStore>,
        Arc::clone(&scheduler) as Arc<dyn TriggerScheduler>,
        Arc::clone(&processor) as Arc<dyn ItemProcessor>,
        &config,
    );
    let runtime = Arc::new(BatchRuntime::new(
        executor,
        Arc::clone(&scheduler) as Arc<dyn TriggerScheduler>,
    ));
    runtime.install(scheduler.as_ref());

    controller
        .start_batch(units(&["a", "b", "c"]))
        .await
        .unwrap();

    // Wait out the initial trigger, the backoff, and the resume
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    loop {
        let status = controller.status().await.unwrap();
        if status.state == BatchState::Complete {
            assert_eq!(status.processed, 3);
            break;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "batch did not complete in time: {:?}",
            status
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
