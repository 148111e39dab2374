// Queue consumer: drains the replication queue through the processor for a
// bounded amount of wall time.

use std::time::{Duration, Instant};

use anyhow::Result;
use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use super::processor::{JobOutcome, ReplicationQueueProcessor};
use super::ProcessError;
use crate::queue::{ReplicationQueue, DEFAULT_CLAIM_LEASE};

/// Wall time a single batch may spend before yielding.
pub const DEFAULT_BATCH_BUDGET: Duration = Duration::from_secs(600);

/// What one batch did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchReport {
    pub replicated: usize,
    pub failed: usize,
    pub requeued: usize,
    pub dropped: usize,
    /// The batch stopped early because replication is blocked.
    pub blocked: bool,
}

impl BatchReport {
    pub fn completed(&self) -> usize {
        self.replicated + self.failed
    }

    pub fn is_idle(&self) -> bool {
        self.completed() == 0 && self.requeued == 0 && self.dropped == 0
    }
}

pub struct QueueRunner<'a> {
    queue: &'a ReplicationQueue<'a>,
    processor: &'a ReplicationQueueProcessor<'a>,
    lease: Duration,
    clock: fn() -> DateTime<Utc>,
}

impl<'a> QueueRunner<'a> {
    pub fn new(queue: &'a ReplicationQueue<'a>, processor: &'a ReplicationQueueProcessor<'a>) -> Self {
        Self { queue, processor, lease: DEFAULT_CLAIM_LEASE, clock: Utc::now }
    }

    pub fn with_lease(mut self, lease: Duration) -> Self {
        self.lease = lease;
        self
    }

    pub fn with_clock(mut self, clock: fn() -> DateTime<Utc>) -> Self {
        self.clock = clock;
        self
    }

    /// Process available jobs until the queue runs dry, replication is
    /// blocked, or `budget` has elapsed.
    ///
    /// Storage failures hand the current item back to the queue and abort
    /// the batch with the error.
    pub fn run_batch(&self, budget: Duration) -> Result<BatchReport> {
        let started = Instant::now();
        let mut report = BatchReport::default();

        while started.elapsed() < budget {
            let Some(item) = self.queue.claim_next((self.clock)(), self.lease)? else {
                break;
            };

            let job = match item.decode() {
                Ok(job) => job,
                Err(error) => {
                    warn!(item_id = item.id, error = %format!("{error:#}"), "dropping queue item");
                    self.queue.complete(item.id)?;
                    report.dropped += 1;
                    continue;
                }
            };

            match self.processor.process(&job) {
                Ok(outcome) => {
                    self.queue.complete(item.id)?;
                    match outcome {
                        JobOutcome::Replicated { .. } => report.replicated += 1,
                        JobOutcome::Failed { .. } => report.failed += 1,
                    }
                }
                Err(ProcessError::Blocked) => {
                    self.queue.requeue(item.id, (self.clock)())?;
                    report.requeued += 1;
                    report.blocked = true;
                    debug!(item_id = item.id, "replication blocked, suspending queue");
                    break;
                }
                Err(error @ ProcessError::AlreadyInProgress { .. }) => {
                    self.queue.requeue(item.id, (self.clock)())?;
                    report.requeued += 1;
                    debug!(item_id = item.id, reason = %error, "requeued replication job");
                }
                Err(error) => {
                    if let Err(release_error) = self.queue.requeue(item.id, (self.clock)()) {
                        warn!(
                            item_id = item.id,
                            error = %format!("{release_error:#}"),
                            "failed to release queue item"
                        );
                    }
                    return Err(anyhow::Error::new(error)
                        .context(format!("replication job for record {} failed", job.record.id)));
                }
            }
        }

        if !report.is_idle() {
            info!(
                replicated = report.replicated,
                failed = report.failed,
                requeued = report.requeued,
                dropped = report.dropped,
                blocked = report.blocked,
                "replication batch finished"
            );
        }
        Ok(report)
    }
}
