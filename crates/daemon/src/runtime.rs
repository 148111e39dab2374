use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use chrono::Utc;
use stagehand_common::types::{Actor, WorkspaceId};
use tokio::runtime::Handle;
use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::config::StagehandConfig;
use crate::queue::ReplicationQueue;
use crate::replication::http::HttpReplicator;
use crate::replication::identity::AccountStack;
use crate::replication::processor::ReplicationQueueProcessor;
use crate::replication::runner::QueueRunner;
use crate::replication::Replicator;
use crate::store::meta_db::MetaDb;
use crate::store::replications::SqliteReplicationStore;
use crate::store::state::SqliteStateStore;
use crate::store::workspaces::SqliteWorkspaceRepository;

/// Identity the worker thread holds outside of replication.
const DAEMON_ACTOR_ID: &str = "daemon";

pub async fn run_standalone(config: StagehandConfig) -> Result<()> {
    let endpoint = config
        .replication
        .endpoint_url()?
        .ok_or_else(|| anyhow!("replication.endpoint is not configured; refusing to process the queue"))?;
    let replicator = HttpReplicator::new(
        endpoint,
        config.replication.request_timeout(),
        Handle::current(),
    )?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        info!("shutdown requested");
        let _ = shutdown_tx.send(true);
    });

    info!(endpoint = %replicator.endpoint(), "standalone daemon started");
    run_until_shutdown(config, Arc::new(replicator), shutdown_rx).await
}

/// Drive the replication queue on a blocking worker until `shutdown`
/// flips to `true` or its sender is dropped.
pub async fn run_until_shutdown(
    config: StagehandConfig,
    replicator: Arc<dyn Replicator>,
    shutdown: watch::Receiver<bool>,
) -> Result<()> {
    let handle = Handle::current();
    tokio::task::spawn_blocking(move || consume(&config, replicator.as_ref(), shutdown, &handle))
        .await
        .context("replication worker panicked")?
}

fn consume(
    config: &StagehandConfig,
    replicator: &dyn Replicator,
    mut shutdown: watch::Receiver<bool>,
    handle: &Handle,
) -> Result<()> {
    let db_path = config.db_path()?;
    let db = MetaDb::open(&db_path)?;
    let conn = db.connection();

    let workspaces = SqliteWorkspaceRepository::new(conn);
    let system_actor = config.replication.system_actor();
    workspaces.ensure_default(
        &WorkspaceId::new(config.workspaces.default_workspace.clone()),
        &config.workspaces.default_label,
        &system_actor.id,
        Utc::now(),
    )?;

    let store = SqliteReplicationStore::new(conn);
    let state = SqliteStateStore::new(conn);
    let accounts = AccountStack::new(Actor::new(DAEMON_ACTOR_ID));
    let processor = ReplicationQueueProcessor::new(&store, &state, replicator, &accounts, system_actor);
    let queue = ReplicationQueue::new(conn).with_retry_policy(config.queue.retry_policy());
    let runner = QueueRunner::new(&queue, &processor).with_lease(config.queue.claim_lease());

    info!(db_path = %db_path.display(), "replication worker running");
    loop {
        if *shutdown.borrow() {
            break;
        }

        match runner.run_batch(config.queue.batch_budget()) {
            // A full batch may have left more work; go straight back.
            Ok(report) if !report.blocked && !report.is_idle() => continue,
            Ok(_) => {}
            Err(error) => error!(error = %format!("{error:#}"), "replication batch aborted"),
        }

        let interval = config.queue.poll_interval();
        let stop = handle.block_on(async {
            match tokio::time::timeout(interval, shutdown.changed()).await {
                Ok(Ok(())) => *shutdown.borrow(),
                // Sender gone: nobody can ask us to stop any more.
                Ok(Err(_)) => true,
                Err(_) => false,
            }
        });
        if stop {
            break;
        }
    }

    if accounts.depth() != 1 {
        warn!(depth = accounts.depth(), "account stack not unwound at shutdown");
    }
    info!("replication worker stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::replication::{ReplicationFault, ReplicationResponse, ReplicationStore};
    use crate::workspace::WorkspaceRepository;
    use stagehand_common::replication::{
        ContextDescriptor, ReplicationJob, ReplicationLog, ReplicationStatus, ReplicationTask,
    };
    use std::time::Duration;
    use tempfile::TempDir;

    struct AlwaysOk;

    impl Replicator for AlwaysOk {
        fn replicate(
            &self,
            _source: &ContextDescriptor,
            _target: &ContextDescriptor,
            _task: &ReplicationTask,
        ) -> Result<ReplicationResponse, ReplicationFault> {
            Ok(ReplicationResponse::Log(ReplicationLog::succeeded()))
        }
    }

    fn config(dir: &TempDir) -> StagehandConfig {
        let mut config = StagehandConfig::default();
        config.db_path = Some(dir.path().join("meta.db"));
        config.queue.poll_interval_ms = 20;
        config
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn worker_drains_queue_and_stops_on_shutdown() {
        let dir = TempDir::new().expect("tempdir");
        let config = config(&dir);
        let record_id = {
            let db = MetaDb::open(config.db_path().unwrap()).unwrap();
            let store = SqliteReplicationStore::new(db.connection());
            let record = store
                .create(
                    "stage to live",
                    &ContextDescriptor::local("stage"),
                    &ContextDescriptor::local("live"),
                    &ReplicationTask::default(),
                    Utc::now(),
                )
                .unwrap();
            let job = ReplicationJob::from_record(record.clone());
            ReplicationQueue::new(db.connection()).enqueue(&job, Utc::now()).unwrap();
            record.id
        };

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let worker = tokio::spawn(run_until_shutdown(config.clone(), Arc::new(AlwaysOk), shutdown_rx));

        let db = MetaDb::open(config.db_path().unwrap()).unwrap();
        let mut replicated = false;
        for _ in 0..200 {
            let status = SqliteReplicationStore::new(db.connection())
                .load(record_id)
                .unwrap()
                .map(|r| r.status);
            if status == Some(ReplicationStatus::Replicated) {
                replicated = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(replicated, "worker should replicate the queued record");

        shutdown_tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(5), worker)
            .await
            .expect("worker should stop promptly")
            .expect("worker task should join")
            .expect("worker should exit cleanly");

        let workspaces = SqliteWorkspaceRepository::new(db.connection());
        assert_eq!(workspaces.load_default().unwrap().id.as_str(), "live");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn dropped_sender_stops_worker() {
        let dir = TempDir::new().expect("tempdir");
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let worker = tokio::spawn(run_until_shutdown(config(&dir), Arc::new(AlwaysOk), shutdown_rx));
        drop(shutdown_tx);

        tokio::time::timeout(Duration::from_secs(5), worker)
            .await
            .expect("worker should stop")
            .expect("join")
            .expect("clean exit");
    }

    #[tokio::test]
    async fn standalone_refuses_to_start_without_endpoint() {
        let dir = TempDir::new().expect("tempdir");
        let error = run_standalone(config(&dir)).await.expect_err("no endpoint configured");
        assert!(error.to_string().contains("replication.endpoint"));
    }
}
