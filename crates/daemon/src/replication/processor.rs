// Replication queue processor: runs one dequeued job to a terminal status.
//
// Per job:
//   blocked flag set              → Blocked (requeue, record untouched)
//   fresh record not `queued`     → AlreadyInProgress (requeue)
//   claim lost to another worker  → AlreadyInProgress (requeue)
//   replicator ok                 → replicated, `replicated_at` stamped
//   anything else                 → failed, blocked flag raised
//
// Replication runs under the system account; the caller's identity is
// restored on every exit path.

use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};

use chrono::{DateTime, Utc};
use stagehand_common::replication::{ReplicationJob, ReplicationStatus};
use stagehand_common::types::Actor;
use tracing::{debug, error, info, warn};

use super::blocked::BlockedFlag;
use super::identity::{AccountSwitcher, ElevatedSession};
use super::{ProcessError, ReplicationFault, ReplicationResponse, ReplicationStore, Replicator};
use crate::store::state::StateStore;

/// Terminal result of a job that was claimed and run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    Replicated { record_id: i64, replicated_at: DateTime<Utc> },
    Failed { record_id: i64 },
}

pub struct ReplicationQueueProcessor<'a> {
    store: &'a dyn ReplicationStore,
    blocked: BlockedFlag<'a>,
    replicator: &'a dyn Replicator,
    accounts: &'a dyn AccountSwitcher,
    system_actor: Actor,
    clock: fn() -> DateTime<Utc>,
}

impl<'a> ReplicationQueueProcessor<'a> {
    pub fn new(
        store: &'a dyn ReplicationStore,
        state: &'a dyn StateStore,
        replicator: &'a dyn Replicator,
        accounts: &'a dyn AccountSwitcher,
        system_actor: Actor,
    ) -> Self {
        Self {
            store,
            blocked: BlockedFlag::new(state),
            replicator,
            accounts,
            system_actor,
            clock: Utc::now,
        }
    }

    pub fn with_clock(mut self, clock: fn() -> DateTime<Utc>) -> Self {
        self.clock = clock;
        self
    }

    pub fn process(&self, job: &ReplicationJob) -> Result<JobOutcome, ProcessError> {
        let record_id = job.record.id;
        if self.blocked.is_blocked()? {
            debug!(record_id, "replication is blocked, handing job back to the queue");
            return Err(ProcessError::Blocked);
        }

        // The queued copy may be stale; the stored row is authoritative.
        let (mut record, persisted) = match self.store.load(record_id)? {
            Some(fresh) => (fresh, true),
            None => {
                warn!(record_id, "replication record not found in storage, using queued copy");
                (job.record.clone(), false)
            }
        };

        if record.status != ReplicationStatus::Queued {
            info!(
                record_id,
                label = %record.label,
                status = %record.status,
                "replication is already in progress"
            );
            return Err(ProcessError::AlreadyInProgress { record_id });
        }
        if !persisted {
            self.store.save(&record)?;
        }

        let _session = ElevatedSession::enter(self.accounts, self.system_actor.clone());

        record.mark_replicating((self.clock)())?;
        if !self.store.claim(&record)? {
            info!(record_id, label = %record.label, "replication is already in progress");
            return Err(ProcessError::AlreadyInProgress { record_id });
        }
        info!(record_id, label = %record.label, "replication has started");

        let succeeded = match self.invoke(job) {
            Ok(response) => {
                if let ReplicationResponse::Log(log) = &response {
                    if !log.ok {
                        warn!(record_id, errors = ?log.errors, "replication log reported failure");
                    }
                } else {
                    warn!(record_id, response = ?response, "replicator returned no replication log");
                }
                response.is_success()
            }
            Err(fault) => {
                error!(
                    record_id,
                    kind = fault.kind(),
                    origin = fault.origin(),
                    error = %fault,
                    "replication fault"
                );
                false
            }
        };

        let now = (self.clock)();
        if succeeded {
            record.mark_replicated(now)?;
            self.store.save(&record)?;
            info!(record_id, label = %record.label, "replication has finished successfully");
            Ok(JobOutcome::Replicated { record_id, replicated_at: now })
        } else {
            record.mark_failed(now)?;
            self.store.save(&record)?;
            self.blocked.block()?;
            info!(record_id, label = %record.label, "replication has failed");
            Ok(JobOutcome::Failed { record_id })
        }
    }

    fn invoke(&self, job: &ReplicationJob) -> Result<ReplicationResponse, ReplicationFault> {
        let call = AssertUnwindSafe(|| self.replicator.replicate(&job.source, &job.target, &job.task));
        match catch_unwind(call) {
            Ok(result) => result,
            Err(payload) => Err(ReplicationFault::Panicked { message: panic_message(&*payload) }),
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
