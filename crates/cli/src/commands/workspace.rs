// `stagehand workspace`: list, inspect, switch and create workspaces, and
// report which entity types are workspace-aware.
//
// The CLI negotiates like any other request: an explicit `--workspace`
// wins, then the persisted CLI session, then the default workspace.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use chrono::Utc;
use clap::{Args, Subcommand};
use serde::Serialize;
use stagehand_common::types::{ActorId, Permission, Workspace, WorkspaceId};
use stagehand_daemon::entity::ConfiguredEntityTypes;
use stagehand_daemon::store::sessions::SqliteSessionStore;
use stagehand_daemon::store::workspaces::SqliteWorkspaceRepository;
use stagehand_daemon::workspace::{
    DefaultNegotiator, EntityTypeFilter, NegotiatorChain, QueryParameterNegotiator,
    RequestContext, SessionNegotiator, WorkspaceManager, WorkspaceRepository,
};
use tracing::{debug, info};
use uuid::Uuid;

use super::Env;
use crate::output::{self, OutputFormat};

const QUERY_PRIORITY: i32 = 200;
const SESSION_PRIORITY: i32 = 100;
const SESSION_FILE: &str = "session";

#[derive(Debug, Subcommand)]
pub enum WorkspaceCommand {
    /// List workspaces you can view
    List(ListArgs),
    /// Show the workspace active for this CLI session
    Active(ActiveArgs),
    /// Switch this CLI session to another workspace
    Activate(ActivateArgs),
    /// Create a new workspace owned by you
    Create(CreateArgs),
    /// Show which entity types can carry workspace revisions
    EntityTypes(EntityTypesArgs),
}

#[derive(Debug, Args)]
pub struct ListArgs {}

#[derive(Debug, Args)]
pub struct ActiveArgs {
    /// Resolve as if this workspace had been requested explicitly.
    #[arg(long)]
    workspace: Option<String>,
}

#[derive(Debug, Args)]
pub struct ActivateArgs {
    /// Workspace id.
    id: String,
}

#[derive(Debug, Args)]
pub struct CreateArgs {
    /// Workspace id.
    id: String,

    /// Display label (defaults to the id).
    #[arg(long)]
    label: Option<String>,

    /// Grant view access to another actor (repeatable).
    #[arg(long = "viewer")]
    viewers: Vec<String>,
}

#[derive(Debug, Args)]
pub struct EntityTypesArgs {}

#[derive(Debug, Serialize)]
pub struct EntityTypesResult {
    pub supported: Vec<String>,
    pub excluded: Vec<String>,
}

#[derive(Debug, Serialize, PartialEq, Eq)]
pub struct WorkspaceRow {
    pub id: String,
    pub label: String,
    pub owner: String,
    pub is_default: bool,
    pub status: &'static str,
}

#[derive(Debug, Serialize)]
pub struct ActiveResult {
    pub workspace: Workspace,
    pub session_id: Uuid,
}

pub fn run(cmd: WorkspaceCommand, env: &Env, format: OutputFormat) -> Result<()> {
    let session_id = load_or_create_session(&session_path(env)?)?;
    match cmd {
        WorkspaceCommand::List(_) => {
            let rows = list(env, session_id)?;
            output::print_output(format, &rows, format_rows)?;
        }
        WorkspaceCommand::Active(args) => {
            let workspace = active(env, session_id, args.workspace.as_deref())?;
            let result = ActiveResult { workspace, session_id };
            output::print_output(format, &result, |r| {
                format!("{} ({})", r.workspace.label, r.workspace.id)
            })?;
        }
        WorkspaceCommand::Activate(args) => {
            let workspace = activate(env, session_id, &WorkspaceId::new(args.id))?;
            let result = ActiveResult { workspace, session_id };
            output::print_output(format, &result, |r| {
                format!("Switched to {} ({}).", r.workspace.label, r.workspace.id)
            })?;
        }
        WorkspaceCommand::Create(args) => {
            let workspace = create(env, args)?;
            output::print_output(format, &workspace, |w| {
                format!("Created workspace {} ({}).", w.label, w.id)
            })?;
        }
        WorkspaceCommand::EntityTypes(_) => {
            let result = entity_types(env)?;
            output::print_output(format, &result, |r| {
                format!("Supported: {}\nExcluded:  {}", r.supported.join(", "), r.excluded.join(", "))
            })?;
        }
    }
    Ok(())
}

// ── Negotiation ────────────────────────────────────────────────────

fn with_manager<R>(
    env: &Env,
    body: impl FnOnce(&WorkspaceManager<'_>, &SqliteWorkspaceRepository<'_>) -> Result<R>,
) -> Result<R> {
    with_filtered_manager(env, &EntityTypeFilter::new(), body)
}

fn with_filtered_manager<R>(
    env: &Env,
    filter: &EntityTypeFilter,
    body: impl FnOnce(&WorkspaceManager<'_>, &SqliteWorkspaceRepository<'_>) -> Result<R>,
) -> Result<R> {
    let conn = env.db.connection();
    let repo = SqliteWorkspaceRepository::new(conn);
    let sessions = SqliteSessionStore::new(conn);
    let entity_types = ConfiguredEntityTypes::new(env.config.entity_types.clone());
    let chain = NegotiatorChain::builder(DefaultNegotiator::new(&repo))
        .with(
            QUERY_PRIORITY,
            QueryParameterNegotiator::new(env.config.workspaces.query_parameter.clone(), &repo),
        )
        .with(SESSION_PRIORITY, SessionNegotiator::new(&sessions, &repo))
        .build();
    debug!(negotiators = ?chain.names(), "workspace negotiation chain");
    let manager = WorkspaceManager::new(chain, &repo, &entity_types, filter);
    body(&manager, &repo)
}

fn context(env: &Env, session_id: Uuid) -> RequestContext {
    RequestContext::new(env.actor.clone()).with_session(session_id)
}

fn list(env: &Env, session_id: Uuid) -> Result<Vec<WorkspaceRow>> {
    let ctx = context(env, session_id);
    with_manager(env, |manager, repo| {
        let active = manager.get_active_workspace(&ctx)?;
        Ok(repo
            .list()?
            .into_iter()
            .filter(|workspace| workspace.can_view(&ctx.actor))
            .map(|workspace| WorkspaceRow {
                status: if workspace.id == active.id { "Active" } else { "Inactive" },
                id: workspace.id.0,
                label: workspace.label,
                owner: workspace.owner.0,
                is_default: workspace.is_default,
            })
            .collect())
    })
}

fn active(env: &Env, session_id: Uuid, requested: Option<&str>) -> Result<Workspace> {
    let mut ctx = context(env, session_id);
    if let Some(id) = requested {
        ctx = ctx.with_query(env.config.workspaces.query_parameter.clone(), id);
    }
    with_manager(env, |manager, _| Ok(manager.get_active_workspace(&ctx)?))
}

fn activate(env: &Env, session_id: Uuid, id: &WorkspaceId) -> Result<Workspace> {
    let ctx = context(env, session_id);
    with_manager(env, |manager, _| Ok(manager.activate(&ctx, id)?))
}

/// Configured entity types split into workspace-aware ones and the
/// denylist they were checked against.
fn entity_types(env: &Env) -> Result<EntityTypesResult> {
    let filter = EntityTypeFilter::new();
    let supported = with_filtered_manager(env, &filter, |manager, _| {
        Ok(manager.supported_entity_types().into_iter().map(|d| d.id).collect())
    })?;
    Ok(EntityTypesResult { supported, excluded: filter.denylist() })
}

fn create(env: &Env, args: CreateArgs) -> Result<Workspace> {
    env.require(Permission::AdministerWorkspaces)?;
    let id = WorkspaceId::new(args.id.trim());
    if id.as_str().is_empty() {
        bail!("workspace id must not be empty");
    }
    let repo = SqliteWorkspaceRepository::new(env.db.connection());
    if repo.load(&id)?.is_some() {
        bail!("workspace `{id}` already exists");
    }

    let workspace = Workspace {
        label: args.label.unwrap_or_else(|| id.to_string()),
        id,
        workspace_type: "basic".into(),
        owner: env.actor.id.clone(),
        is_default: false,
        viewers: args.viewers.into_iter().map(ActorId::new).collect::<BTreeSet<_>>(),
        created_at: Utc::now(),
    };
    repo.save(&workspace)?;
    info!(workspace_id = %workspace.id, owner = %workspace.owner, "workspace created");
    Ok(workspace)
}

// ── CLI session ────────────────────────────────────────────────────

/// `~/.stagehand/session`, or next to a relocated database.
fn session_path(env: &Env) -> Result<PathBuf> {
    let db_path = env.config.db_path()?;
    Ok(db_path.parent().map(|dir| dir.join(SESSION_FILE)).unwrap_or_else(|| PathBuf::from(SESSION_FILE)))
}

/// Read the persisted CLI session id, minting a new one when the file is
/// missing or unreadable.
fn load_or_create_session(path: &Path) -> Result<Uuid> {
    if let Ok(contents) = std::fs::read_to_string(path) {
        if let Ok(id) = Uuid::parse_str(contents.trim()) {
            return Ok(id);
        }
    }
    let id = Uuid::new_v4();
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    std::fs::write(path, format!("{id}\n"))
        .with_context(|| format!("failed to write session file {}", path.display()))?;
    debug!(session_id = %id, "new CLI session");
    Ok(id)
}

fn format_rows(rows: &Vec<WorkspaceRow>) -> String {
    if rows.is_empty() {
        return "No workspaces.".into();
    }
    rows.iter()
        .map(|row| {
            format!(
                "{:<9} {:<16} {}{}",
                row.status,
                row.id,
                row.label,
                if row.is_default { " (default)" } else { "" }
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}
