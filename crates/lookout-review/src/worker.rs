//! Bounded background execution of pipeline runs.
//!
//! Webhook handlers reserve a slot in a bounded channel before creating a
//! review, then hand the job over and return. A single dispatcher task
//! drains the channel and spawns at most `max_concurrent_runs` runs at a
//! time. Each run lives in its own task, so a panicking run is contained
//! and its review is marked failed.

use std::sync::Arc;

use lookout_core::{LookoutError, WorkerConfig};
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinHandle;

use crate::pipeline::{failure_summary, ReviewJob, ReviewOrchestrator};
use crate::store::ReviewStore;

/// Summary given to reviews found unfinished at startup.
pub const INTERRUPTED_SUMMARY: &str = "Review failed: interrupted by server restart";

/// Sending side of the review queue.
#[derive(Clone)]
pub struct ReviewQueue {
    tx: mpsc::Sender<ReviewJob>,
}

/// A reserved place in the queue. Dropping it without dispatching frees
/// the slot again.
pub struct QueueSlot {
    permit: mpsc::OwnedPermit<ReviewJob>,
}

impl QueueSlot {
    /// Hand `job` to the dispatcher. Never blocks.
    pub fn dispatch(self, job: ReviewJob) {
        self.permit.send(job);
    }
}

impl ReviewQueue {
    /// Start the dispatcher for `orchestrator` and return the queue handle
    /// plus the dispatcher task. The dispatcher exits once every queue
    /// handle has been dropped.
    pub fn start(
        orchestrator: Arc<ReviewOrchestrator>,
        config: &WorkerConfig,
    ) -> (Self, JoinHandle<()>) {
        let (queue, rx) = Self::channel(config.queue_capacity);
        let slots = Arc::new(Semaphore::new(config.max_concurrent_runs.max(1)));
        tracing::info!(
            queue_capacity = config.queue_capacity,
            max_concurrent_runs = config.max_concurrent_runs,
            "review worker started"
        );
        let handle = tokio::spawn(dispatch(rx, orchestrator, slots));
        (queue, handle)
    }

    /// A queue with no dispatcher attached. Dispatched jobs arrive on the
    /// returned receiver.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<ReviewJob>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }

    /// Reserve room for one job without waiting.
    ///
    /// # Errors
    ///
    /// Returns [`LookoutError::Unavailable`] when the queue is full or the
    /// dispatcher has stopped.
    pub fn try_reserve(&self) -> Result<QueueSlot, LookoutError> {
        match self.tx.clone().try_reserve_owned() {
            Ok(permit) => Ok(QueueSlot { permit }),
            Err(mpsc::error::TrySendError::Full(_)) => {
                Err(LookoutError::Unavailable("review queue is full".into()))
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                Err(LookoutError::Unavailable("review worker has stopped".into()))
            }
        }
    }
}

async fn dispatch(
    mut rx: mpsc::Receiver<ReviewJob>,
    orchestrator: Arc<ReviewOrchestrator>,
    slots: Arc<Semaphore>,
) {
    while let Some(job) = rx.recv().await {
        let Ok(permit) = slots.clone().acquire_owned().await else {
            break;
        };
        let orchestrator = orchestrator.clone();
        tokio::spawn(async move {
            let _permit = permit;
            let store = orchestrator.store().clone();
            let review_id = job.review_id.clone();
            let run = tokio::spawn(async move { orchestrator.run(job).await });
            match run.await {
                Ok(outcome) => tracing::debug!(review_id = %review_id, ?outcome, "run finished"),
                Err(e) if e.is_panic() => {
                    tracing::error!(review_id = %review_id, "pipeline task panicked");
                    let summary = failure_summary(&"pipeline task panicked");
                    if let Err(e) = store
                        .with_session(move |s| s.abandon(&review_id, &summary))
                        .await
                    {
                        tracing::error!(error = %e, "could not record panicked run");
                    }
                }
                Err(e) => tracing::warn!(review_id = %review_id, error = %e, "pipeline task cancelled"),
            }
        });
    }
    tracing::info!("review worker stopped");
}

/// Fail every review left `queued` or `in_progress` by a previous process.
///
/// Runs are not persisted across restarts, so such reviews would otherwise
/// stay unfinished forever.
///
/// # Errors
///
/// Returns [`LookoutError::Database`] on storage failures.
pub async fn reconcile_interrupted(store: &ReviewStore) -> Result<usize, LookoutError> {
    let failed = store
        .with_session(|s| s.reconcile_interrupted(INTERRUPTED_SUMMARY))
        .await?;
    if failed > 0 {
        tracing::warn!(failed, "marked interrupted reviews as failed");
    }
    Ok(failed)
}
