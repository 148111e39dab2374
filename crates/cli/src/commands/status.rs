// `stagehand status`: blocked flag, queue depth and recent replications.

use anyhow::Result;
use clap::Args;
use serde::Serialize;
use stagehand_common::replication::{ReplicationRecord, ReplicationStatus};
use stagehand_daemon::queue::ReplicationQueue;
use stagehand_daemon::replication::blocked::BlockedFlag;
use stagehand_daemon::store::replications::SqliteReplicationStore;
use stagehand_daemon::store::state::SqliteStateStore;

use super::Env;
use crate::output::{self, OutputFormat};

#[derive(Debug, Args)]
pub struct StatusArgs {
    /// How many recent replications to show.
    #[arg(long, default_value_t = 10)]
    limit: usize,
}

#[derive(Debug, Serialize)]
pub struct StatusResult {
    pub blocked: bool,
    pub queue_depth: i64,
    pub counts: StatusCounts,
    pub recent: Vec<ReplicationRecord>,
}

#[derive(Debug, Default, Serialize)]
pub struct StatusCounts {
    pub queued: i64,
    pub replicating: i64,
    pub replicated: i64,
    pub failed: i64,
}

pub fn run(args: StatusArgs, env: &Env, format: OutputFormat) -> Result<()> {
    let result = status(&args, env)?;
    if result.blocked {
        output::print_warning(
            format,
            "QUEUE_BLOCKED",
            "replication is blocked after a failure. Run: stagehand unblock",
        );
    }
    output::print_output(format, &result, format_human)?;
    Ok(())
}

fn status(args: &StatusArgs, env: &Env) -> Result<StatusResult> {
    let conn = env.db.connection();
    let store = SqliteReplicationStore::new(conn);
    let state = SqliteStateStore::new(conn);

    Ok(StatusResult {
        blocked: BlockedFlag::new(&state).is_blocked()?,
        queue_depth: ReplicationQueue::new(conn).len()?,
        counts: StatusCounts {
            queued: store.count_by_status(ReplicationStatus::Queued)?,
            replicating: store.count_by_status(ReplicationStatus::Replicating)?,
            replicated: store.count_by_status(ReplicationStatus::Replicated)?,
            failed: store.count_by_status(ReplicationStatus::Failed)?,
        },
        recent: store.list(args.limit)?,
    })
}

fn format_human(result: &StatusResult) -> String {
    let mut lines = Vec::new();
    lines.push(format!(
        "Queue: {} pending{}",
        result.queue_depth,
        if result.blocked { " (BLOCKED)" } else { "" }
    ));
    lines.push(format!(
        "  queued {}  replicating {}  replicated {}  failed {}",
        result.counts.queued,
        result.counts.replicating,
        result.counts.replicated,
        result.counts.failed
    ));

    if result.recent.is_empty() {
        lines.push("  No replications yet.".into());
    } else {
        lines.push(String::new());
        for record in &result.recent {
            lines.push(format!(
                "  #{:<5} {:<12} {} -> {}  {}",
                record.id, record.status.as_str(), record.source, record.target, record.label
            ));
        }
    }

    lines.join("\n")
}
