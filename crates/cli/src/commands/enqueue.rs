// `stagehand enqueue`: create a replication record and push its job.

use anyhow::{Context, Result};
use chrono::Utc;
use clap::Args;
use serde::Serialize;
use stagehand_common::replication::{ContextDescriptor, ReplicationJob, ReplicationTask};
use stagehand_daemon::queue::ReplicationQueue;
use stagehand_daemon::store::replications::SqliteReplicationStore;
use tracing::info;

use super::Env;
use crate::output::{self, OutputFormat};

#[derive(Debug, Args)]
pub struct EnqueueArgs {
    /// Human-readable label for the replication.
    #[arg(long)]
    label: String,

    /// Source workspace id.
    #[arg(long)]
    source: String,

    /// Target workspace id.
    #[arg(long)]
    target: String,

    /// Remote endpoint of the target, when it lives elsewhere.
    #[arg(long)]
    target_endpoint: Option<String>,

    /// Replication instructions passed through to the replicator (JSON).
    #[arg(long)]
    task: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct EnqueueResult {
    pub record_id: i64,
    pub queue_item_id: i64,
    pub label: String,
    pub source: String,
    pub target: String,
}

pub fn run(args: EnqueueArgs, env: &Env, format: OutputFormat) -> Result<()> {
    let result = enqueue(args, env)?;
    output::print_output(format, &result, format_human)?;
    Ok(())
}

fn enqueue(args: EnqueueArgs, env: &Env) -> Result<EnqueueResult> {
    let task = parse_task(args.task.as_deref())?;
    let source = ContextDescriptor::local(args.source);
    let mut target = ContextDescriptor::local(args.target);
    target.endpoint = args.target_endpoint;

    let now = Utc::now();
    let tx = env
        .db
        .connection()
        .unchecked_transaction()
        .context("failed to start enqueue transaction")?;
    let record = SqliteReplicationStore::new(&tx).create(&args.label, &source, &target, &task, now)?;
    let queue_item_id = ReplicationQueue::new(&tx).enqueue(&ReplicationJob::from_record(record.clone()), now)?;
    tx.commit().context("failed to commit enqueue transaction")?;
    info!(record_id = record.id, queue_item_id, "replication enqueued");

    Ok(EnqueueResult {
        record_id: record.id,
        queue_item_id,
        label: record.label,
        source: source.to_string(),
        target: target.to_string(),
    })
}

pub(crate) fn parse_task(raw: Option<&str>) -> Result<ReplicationTask> {
    match raw {
        None => Ok(ReplicationTask::default()),
        Some(raw) => serde_json::from_str(raw)
            .map(ReplicationTask)
            .context("--task must be valid JSON"),
    }
}

fn format_human(result: &EnqueueResult) -> String {
    format!(
        "Queued replication #{} \"{}\" ({} -> {})",
        result.record_id, result.label, result.source, result.target
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::test_support::admin_env;
    use serde_json::json;
    use stagehand_common::replication::ReplicationStatus;
    use stagehand_daemon::replication::ReplicationStore;
    use tempfile::TempDir;

    fn args(task: Option<&str>) -> EnqueueArgs {
        EnqueueArgs {
            label: "stage to live".into(),
            source: "stage".into(),
            target: "live".into(),
            target_endpoint: None,
            task: task.map(str::to_string),
        }
    }

    #[test]
    fn enqueue_creates_queued_record_and_job() {
        let dir = TempDir::new().unwrap();
        let env = admin_env(&dir);

        let result = enqueue(args(Some(r#"{"doc_ids":[1,2]}"#)), &env).unwrap();

        let record =
            SqliteReplicationStore::new(env.db.connection()).load(result.record_id).unwrap().unwrap();
        assert_eq!(record.status, ReplicationStatus::Queued);
        let queue = ReplicationQueue::new(env.db.connection());
        assert_eq!(queue.len().unwrap(), 1);
        let item = queue.claim_next(Utc::now(), std::time::Duration::from_secs(60)).unwrap().unwrap();
        let job = item.decode().unwrap();
        assert_eq!(job.record.id, result.record_id);
        assert_eq!(job.task, ReplicationTask(json!({"doc_ids": [1, 2]})));
    }

    #[test]
    fn target_endpoint_is_kept_on_the_record() {
        let dir = TempDir::new().unwrap();
        let env = admin_env(&dir);
        let mut remote = args(None);
        remote.target_endpoint = Some("https://prod.example.com".into());

        let result = enqueue(remote, &env).unwrap();

        assert_eq!(result.target, "live@https://prod.example.com");
    }

    #[test]
    fn malformed_task_is_rejected_before_anything_is_written() {
        let dir = TempDir::new().unwrap();
        let env = admin_env(&dir);

        let err = enqueue(args(Some("{not json")), &env).unwrap_err();

        assert!(err.to_string().contains("--task"));
        assert_eq!(ReplicationQueue::new(env.db.connection()).len().unwrap(), 0);
    }

    #[test]
    fn failed_queue_insert_leaves_no_orphan_record() {
        let dir = TempDir::new().unwrap();
        let env = admin_env(&dir);
        env.db.connection().execute_batch("DROP TABLE replication_queue").unwrap();

        assert!(enqueue(args(None), &env).is_err());

        let store = SqliteReplicationStore::new(env.db.connection());
        assert_eq!(store.count_by_status(ReplicationStatus::Queued).unwrap(), 0);
        assert!(store.list(10).unwrap().is_empty());
    }

    #[test]
    fn task_is_stored_on_the_record() {
        let dir = TempDir::new().unwrap();
        let env = admin_env(&dir);

        let result = enqueue(args(Some(r#"{"doc_ids":["a"]}"#)), &env).unwrap();

        let record =
            SqliteReplicationStore::new(env.db.connection()).load(result.record_id).unwrap().unwrap();
        assert_eq!(record.task, ReplicationTask(json!({"doc_ids": ["a"]})));
    }

    #[test]
    fn missing_task_defaults_to_null() {
        assert_eq!(parse_task(None).unwrap(), ReplicationTask::default());
    }
}
