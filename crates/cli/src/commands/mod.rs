// CLI subcommand dispatch.

use std::path::Path;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::Subcommand;
use stagehand_common::types::{Actor, Permission, WorkspaceId};
use stagehand_daemon::config::StagehandConfig;
use stagehand_daemon::store::meta_db::MetaDb;
use stagehand_daemon::store::workspaces::SqliteWorkspaceRepository;

use crate::exit_code::MissingPermission;
use crate::output::OutputFormat;

pub mod enqueue;
pub mod retry;
pub mod status;
pub mod unblock;
pub mod workspace;

#[derive(Subcommand)]
pub enum Command {
    /// Create a replication record and queue it
    Enqueue(enqueue::EnqueueArgs),
    /// Show the blocked flag, queue depth and recent replications
    Status(status::StatusArgs),
    /// Clear the replication blocked flag
    Unblock(unblock::UnblockArgs),
    /// Put a failed replication back in the queue
    Retry(retry::RetryArgs),
    /// List, inspect and switch workspaces
    #[command(subcommand)]
    Workspace(workspace::WorkspaceCommand),
}

pub fn run(cmd: Command, config_path: Option<&Path>, format: OutputFormat) -> Result<()> {
    let config = StagehandConfig::load(config_path).context("failed to load config")?;
    let env = Env::open(config)?;
    match cmd {
        Command::Enqueue(args) => enqueue::run(args, &env, format),
        Command::Status(args) => status::run(args, &env, format),
        Command::Unblock(args) => unblock::run(args, &env, format),
        Command::Retry(args) => retry::run(args, &env, format),
        Command::Workspace(cmd) => workspace::run(cmd, &env, format),
    }
}

/// Everything a command needs: config, the metadata database and the
/// account the CLI acts as.
pub struct Env {
    pub config: StagehandConfig,
    pub db: MetaDb,
    pub actor: Actor,
}

impl Env {
    /// Open the database named by `config` and make sure the default
    /// workspace exists.
    pub fn open(config: StagehandConfig) -> Result<Self> {
        let db_path = config.db_path()?;
        let db = MetaDb::open(&db_path)
            .with_context(|| format!("failed to open {}", db_path.display()))?;
        SqliteWorkspaceRepository::new(db.connection()).ensure_default(
            &WorkspaceId::new(config.workspaces.default_workspace.clone()),
            &config.workspaces.default_label,
            &config.replication.system_actor().id,
            Utc::now(),
        )?;
        let actor = config.actor.to_actor();
        Ok(Self { config, db, actor })
    }

    pub fn require(&self, permission: Permission) -> Result<()> {
        if self.actor.has_permission(permission) {
            Ok(())
        } else {
            Err(MissingPermission { actor: self.actor.id.clone(), permission }.into())
        }
    }
}
