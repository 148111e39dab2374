// `stagehand retry`: move a failed replication back to queued and push it
// through the queue again.

use anyhow::{anyhow, Context, Result};
use chrono::Utc;
use clap::Args;
use serde::Serialize;
use stagehand_common::replication::{ReplicationJob, ReplicationStatus};
use stagehand_common::types::Permission;
use stagehand_daemon::queue::ReplicationQueue;
use stagehand_daemon::replication::ReplicationStore;
use stagehand_daemon::store::replications::SqliteReplicationStore;
use tracing::{info, warn};

use super::enqueue::parse_task;
use super::Env;
use crate::output::{self, OutputFormat};

#[derive(Debug, Args)]
pub struct RetryArgs {
    /// Replication record id.
    id: i64,

    /// Replace the stored replication instructions (JSON).
    #[arg(long)]
    task: Option<String>,

    /// Also re-queue a record stuck in `replicating` whose outcome was never
    /// recorded. Only use this once no worker is still running it.
    #[arg(long)]
    force: bool,
}

#[derive(Debug, Serialize)]
pub struct RetryResult {
    pub record_id: i64,
    pub queue_item_id: i64,
    pub status: ReplicationStatus,
    pub forced: bool,
}

pub fn run(args: RetryArgs, env: &Env, format: OutputFormat) -> Result<()> {
    let result = retry(args, env)?;
    output::print_output(format, &result, |r| {
        format!("Replication #{} re-queued (job {}).", r.record_id, r.queue_item_id)
    })?;
    Ok(())
}

fn retry(args: RetryArgs, env: &Env) -> Result<RetryResult> {
    env.require(Permission::AdministerReplication)?;
    let task_override = args.task.as_deref().map(|raw| parse_task(Some(raw))).transpose()?;

    let tx = env
        .db
        .connection()
        .unchecked_transaction()
        .context("failed to start retry transaction")?;
    let store = SqliteReplicationStore::new(&tx);
    let mut record =
        store.load(args.id)?.ok_or_else(|| anyhow!("replication {} not found", args.id))?;
    let previous = record.status;
    let now = Utc::now();
    if args.force {
        record.force_requeue(now)?;
    } else {
        record.mark_queued(now)?;
    }
    if let Some(task) = task_override {
        record.task = task;
    }
    store.save(&record)?;

    let queue = ReplicationQueue::new(&tx);
    let mut dropped = 0;
    for item in queue.pending()?.into_iter().filter(|item| item.record_id == record.id) {
        queue.complete(item.id)?;
        dropped += 1;
    }
    let queue_item_id = queue.enqueue(&ReplicationJob::from_record(record.clone()), now)?;
    tx.commit().context("failed to commit retry transaction")?;

    if previous == ReplicationStatus::Replicating {
        warn!(record_id = record.id, dropped, actor = %env.actor.id, "stuck replication force re-queued");
    }
    info!(record_id = record.id, queue_item_id, actor = %env.actor.id, "failed replication re-queued");

    Ok(RetryResult { record_id: record.id, queue_item_id, status: record.status, forced: args.force })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::test_support::{admin_env, env_with};
    use serde_json::json;
    use stagehand_common::replication::{
        ContextDescriptor, ReplicationRecord, ReplicationTask, TransitionError,
    };
    use std::time::Duration;
    use tempfile::TempDir;

    fn seed_with_task(env: &Env, task: ReplicationTask, fail: bool) -> ReplicationRecord {
        let store = SqliteReplicationStore::new(env.db.connection());
        let mut record = store
            .create(
                "stage to live",
                &ContextDescriptor::local("stage"),
                &ContextDescriptor::local("live"),
                &task,
                Utc::now(),
            )
            .unwrap();
        if fail {
            record.mark_replicating(Utc::now()).unwrap();
            record.mark_failed(Utc::now()).unwrap();
            store.save(&record).unwrap();
        }
        record
    }

    fn seed(env: &Env, fail: bool) -> ReplicationRecord {
        seed_with_task(env, ReplicationTask::default(), fail)
    }

    fn args(id: i64) -> RetryArgs {
        RetryArgs { id, task: None, force: false }
    }

    fn pending_task(env: &Env) -> ReplicationTask {
        let pending = ReplicationQueue::new(env.db.connection()).pending().unwrap();
        assert_eq!(pending.len(), 1);
        pending[0].decode().unwrap().task
    }

    #[test]
    fn failed_record_goes_back_to_queue() {
        let dir = TempDir::new().unwrap();
        let env = admin_env(&dir);
        let record = seed(&env, true);

        let result = retry(args(record.id), &env).unwrap();

        assert_eq!(result.status, ReplicationStatus::Queued);
        let stored = SqliteReplicationStore::new(env.db.connection()).load(record.id).unwrap().unwrap();
        assert_eq!(stored.status, ReplicationStatus::Queued);
        assert_eq!(ReplicationQueue::new(env.db.connection()).len().unwrap(), 1);
    }

    #[test]
    fn failed_record_keeps_its_task_on_retry() {
        let dir = TempDir::new().unwrap();
        let env = admin_env(&dir);
        let task = ReplicationTask(json!({"doc_ids": ["a", "b"]}));
        let mut record = seed_with_task(&env, task.clone(), false);
        let queue = ReplicationQueue::new(env.db.connection());
        queue.enqueue(&ReplicationJob::from_record(record.clone()), Utc::now()).unwrap();

        let item = queue.claim_next(Utc::now(), Duration::from_secs(60)).unwrap().unwrap();
        queue.complete(item.id).unwrap();
        record.mark_replicating(Utc::now()).unwrap();
        record.mark_failed(Utc::now()).unwrap();
        SqliteReplicationStore::new(env.db.connection()).save(&record).unwrap();

        retry(args(record.id), &env).unwrap();

        assert_eq!(pending_task(&env), task);
    }

    #[test]
    fn task_flag_replaces_stored_task() {
        let dir = TempDir::new().unwrap();
        let env = admin_env(&dir);
        let record = seed_with_task(&env, ReplicationTask(json!({"doc_ids": ["a"]})), true);

        let mut retry_args = args(record.id);
        retry_args.task = Some(r#"{"doc_ids":["b"]}"#.into());
        retry(retry_args, &env).unwrap();

        let replaced = ReplicationTask(json!({"doc_ids": ["b"]}));
        assert_eq!(pending_task(&env), replaced);
        let stored = SqliteReplicationStore::new(env.db.connection()).load(record.id).unwrap().unwrap();
        assert_eq!(stored.task, replaced);
    }

    #[test]
    fn failed_enqueue_leaves_record_failed() {
        let dir = TempDir::new().unwrap();
        let env = admin_env(&dir);
        let record = seed(&env, true);
        env.db.connection().execute_batch("DROP TABLE replication_queue").unwrap();

        assert!(retry(args(record.id), &env).is_err());

        let stored = SqliteReplicationStore::new(env.db.connection()).load(record.id).unwrap().unwrap();
        assert_eq!(stored.status, ReplicationStatus::Failed);
    }

    #[test]
    fn stuck_replicating_record_needs_force() {
        let dir = TempDir::new().unwrap();
        let env = admin_env(&dir);
        let mut record = seed(&env, false);
        record.mark_replicating(Utc::now()).unwrap();
        SqliteReplicationStore::new(env.db.connection()).save(&record).unwrap();

        let err = retry(args(record.id), &env).unwrap_err();
        assert!(err.downcast_ref::<TransitionError>().is_some());

        let mut forced = args(record.id);
        forced.force = true;
        let result = retry(forced, &env).unwrap();

        assert!(result.forced);
        assert_eq!(result.status, ReplicationStatus::Queued);
        let stored = SqliteReplicationStore::new(env.db.connection()).load(record.id).unwrap().unwrap();
        assert_eq!(stored.status, ReplicationStatus::Queued);
    }

    #[test]
    fn force_retry_replaces_leftover_queue_item() {
        let dir = TempDir::new().unwrap();
        let env = admin_env(&dir);
        let mut record = seed(&env, false);
        let queue = ReplicationQueue::new(env.db.connection());
        queue.enqueue(&ReplicationJob::from_record(record.clone()), Utc::now()).unwrap();
        queue.claim_next(Utc::now(), Duration::from_secs(60)).unwrap().unwrap();
        record.mark_replicating(Utc::now()).unwrap();
        SqliteReplicationStore::new(env.db.connection()).save(&record).unwrap();

        let mut forced = args(record.id);
        forced.force = true;
        let result = retry(forced, &env).unwrap();

        let pending = queue.pending().unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, result.queue_item_id);
    }

    #[test]
    fn only_failed_records_can_be_retried() {
        let dir = TempDir::new().unwrap();
        let env = admin_env(&dir);
        let record = seed(&env, false);

        let err = retry(args(record.id), &env).unwrap_err();

        assert!(err.downcast_ref::<TransitionError>().is_some());
        assert_eq!(ReplicationQueue::new(env.db.connection()).len().unwrap(), 0);
    }

    #[test]
    fn unknown_record_is_not_found() {
        let dir = TempDir::new().unwrap();
        let env = admin_env(&dir);

        let err = retry(args(99), &env).unwrap_err();

        assert!(err.to_string().contains("replication 99 not found"));
    }

    #[test]
    fn retry_requires_replication_admin() {
        let dir = TempDir::new().unwrap();
        let env = env_with(&dir, "7", &[]);
        let record = seed(&env, true);

        assert!(retry(args(record.id), &env).is_err());
        let stored = SqliteReplicationStore::new(env.db.connection()).load(record.id).unwrap().unwrap();
        assert_eq!(stored.status, ReplicationStatus::Failed);
    }
}
