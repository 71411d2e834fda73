//! Trigger wiring and crash isolation.
//!
//! The runtime is the glue between the scheduler and the slice executor:
//! each trigger firing calls [`BatchRuntime::on_trigger`], which runs one
//! slice behind a panic barrier and acts on the returned [`NextAction`].
//!
//! The failure mode this guards against is a batch stuck in `Running`
//! forever: a slice that dies without rescheduling leaves no pending trigger
//! and nothing would ever touch the record again. Any slice fault therefore
//! forces the batch to `Stopped` with a diagnostic message, from which an
//! operator can resume.

use futures::FutureExt;
use metrics::counter;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tracing::error;

use crate::engine::slice::{NextAction, SliceExecutor};
use crate::scheduler::TriggerScheduler;

pub struct BatchRuntime {
    executor: SliceExecutor,
    scheduler: Arc<dyn TriggerScheduler>,
}

impl BatchRuntime {
    pub fn new(executor: SliceExecutor, scheduler: Arc<dyn TriggerScheduler>) -> Self {
        Self {
            executor,
            scheduler,
        }
    }

    /// Register this runtime as the trigger handler for its batch kind.
    pub fn install(self: &Arc<Self>, scheduler: &dyn TriggerScheduler) {
        let runtime = Arc::clone(self);
        scheduler.register(
            self.executor.kind(),
            Arc::new(move || {
                let runtime = Arc::clone(&runtime);
                Box::pin(async move {
                    runtime.on_trigger().await;
                })
            }),
        );
    }

    /// Handle one trigger firing. Never propagates an error; faults are
    /// recorded on the batch record instead.
    pub async fn on_trigger(&self) {
        let outcome = AssertUnwindSafe(self.executor.run_slice()).catch_unwind().await;

        match outcome {
            Ok(Ok(NextAction::Reschedule(delay))) => {
                if let Err(err) = self
                    .scheduler
                    .schedule_once(self.executor.kind(), delay)
                    .await
                {
                    err.log();
                    self.force_stopped(format!("Failed to schedule continuation: {}", err))
                        .await;
                }
            }
            // The backoff handler scheduled the resume before returning
            Ok(Ok(NextAction::Backoff(_))) => {}
            Ok(Ok(NextAction::Halt)) => {}
            Ok(Err(err)) => {
                err.log();
                self.force_stopped(format!("Batch fault: {}", err)).await;
            }
            Err(panic) => {
                let message = panic_message(panic);
                error!(kind = %self.executor.kind(), panic = %message, "Slice panicked");
                self.force_stopped(format!("Batch fault: {}", message)).await;
            }
        }
    }

    /// Direct access to the slice executor, for embedders that drive slices
    /// without a scheduler.
    pub fn executor(&self) -> &SliceExecutor {
        &self.executor
    }

    async fn force_stopped(&self, diagnostic: String) {
        counter!("shopsuite_batch_faults_total", "kind" => self.executor.kind().to_string())
            .increment(1);

        let result = self
            .executor
            .status_cell()
            .update(|status| {
                if !status.state.is_terminal() {
                    status.mark_stopped(diagnostic.clone());
                }
            })
            .await;

        if let Err(err) = result {
            // Nothing left to do; the record itself is unreachable
            err.log();
        }
    }
}

fn panic_message(panic: Box<dyn std::any::Any + Send>) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
