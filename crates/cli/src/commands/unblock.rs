// `stagehand unblock`: operator clears the replication blocked flag.

use anyhow::Result;
use clap::Args;
use serde::Serialize;
use stagehand_common::types::Permission;
use stagehand_daemon::replication::blocked::BlockedFlag;
use stagehand_daemon::store::state::SqliteStateStore;
use tracing::info;

use super::Env;
use crate::output::{self, OutputFormat};

#[derive(Debug, Args)]
pub struct UnblockArgs {}

#[derive(Debug, Serialize)]
pub struct UnblockResult {
    pub was_blocked: bool,
    pub blocked: bool,
}

pub fn run(_args: UnblockArgs, env: &Env, format: OutputFormat) -> Result<()> {
    let result = unblock(env)?;
    output::print_output(format, &result, |r| {
        if r.was_blocked {
            "Replication unblocked.".to_string()
        } else {
            "Replication was not blocked.".to_string()
        }
    })?;
    Ok(())
}

fn unblock(env: &Env) -> Result<UnblockResult> {
    env.require(Permission::AdministerReplication)?;
    let state = SqliteStateStore::new(env.db.connection());
    let flag = BlockedFlag::new(&state);
    let was_blocked = flag.is_blocked()?;
    if was_blocked {
        flag.clear()?;
        info!(actor = %env.actor.id, "replication blocked flag cleared");
    }
    Ok(UnblockResult { was_blocked, blocked: flag.is_blocked()? })
}
