// SQLite workspace repository.

use std::collections::{BTreeSet, HashMap};

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use stagehand_common::types::{ActorId, Workspace, WorkspaceId};
use tracing::info;

use super::{format_timestamp, parse_timestamp};
use crate::workspace::WorkspaceRepository;

const SELECT_WORKSPACE: &str =
    "SELECT id, workspace_type, label, owner_id, is_default, created_at FROM workspaces";

pub struct SqliteWorkspaceRepository<'a> {
    conn: &'a Connection,
}

impl<'a> SqliteWorkspaceRepository<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    /// Seed the default workspace if none exists yet, returning whichever
    /// default is stored afterwards.
    pub fn ensure_default(
        &self,
        id: &WorkspaceId,
        label: &str,
        owner: &ActorId,
        now: DateTime<Utc>,
    ) -> Result<Workspace> {
        if let Some(existing) = self.find_default()? {
            return Ok(existing);
        }
        let workspace = Workspace {
            id: id.clone(),
            workspace_type: "basic".to_string(),
            label: label.to_string(),
            owner: owner.clone(),
            is_default: true,
            viewers: BTreeSet::new(),
            created_at: now,
        };
        self.save(&workspace)?;
        info!(workspace_id = %workspace.id, "seeded default workspace");
        Ok(workspace)
    }

    fn find_default(&self) -> Result<Option<Workspace>> {
        let row = self
            .conn
            .query_row(&format!("{SELECT_WORKSPACE} WHERE is_default = 1"), [], row_to_workspace)
            .optional()
            .context("failed to query default workspace")?;
        row.map(|workspace| self.with_viewers(workspace)).transpose()
    }

    fn with_viewers(&self, mut workspace: Workspace) -> Result<Workspace> {
        let mut stmt = self
            .conn
            .prepare("SELECT actor_id FROM workspace_viewers WHERE workspace_id = ?1")
            .context("failed to prepare viewer query")?;
        let rows = stmt
            .query_map(params![workspace.id.as_str()], |row| row.get::<_, String>(0))
            .context("failed to query workspace viewers")?;
        for actor in rows {
            workspace.viewers.insert(ActorId(actor.context("failed to read viewer row")?));
        }
        Ok(workspace)
    }

    fn all_viewers(&self) -> Result<HashMap<String, BTreeSet<ActorId>>> {
        let mut stmt = self
            .conn
            .prepare("SELECT workspace_id, actor_id FROM workspace_viewers")
            .context("failed to prepare viewer listing")?;
        let rows = stmt
            .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))
            .context("failed to list workspace viewers")?;
        let mut viewers: HashMap<String, BTreeSet<ActorId>> = HashMap::new();
        for row in rows {
            let (workspace_id, actor_id) = row.context("failed to read viewer row")?;
            viewers.entry(workspace_id).or_default().insert(ActorId(actor_id));
        }
        Ok(viewers)
    }
}

impl WorkspaceRepository for SqliteWorkspaceRepository<'_> {
    fn load(&self, id: &WorkspaceId) -> Result<Option<Workspace>> {
        let row = self
            .conn
            .query_row(
                &format!("{SELECT_WORKSPACE} WHERE id = ?1"),
                params![id.as_str()],
                row_to_workspace,
            )
            .optional()
            .with_context(|| format!("failed to load workspace `{id}`"))?;
        row.map(|workspace| self.with_viewers(workspace)).transpose()
    }

    fn load_default(&self) -> Result<Workspace> {
        self.find_default()?.ok_or_else(|| anyhow!("no default workspace has been seeded"))
    }

    fn list(&self) -> Result<Vec<Workspace>> {
        let mut viewers = self.all_viewers()?;
        let mut stmt = self
            .conn
            .prepare(&format!("{SELECT_WORKSPACE} ORDER BY is_default DESC, id ASC"))
            .context("failed to prepare workspace listing")?;
        let rows = stmt.query_map([], row_to_workspace).context("failed to list workspaces")?;

        let mut workspaces = Vec::new();
        for row in rows {
            let mut workspace = row.context("failed to read workspace row")?;
            workspace.viewers = viewers.remove(workspace.id.as_str()).unwrap_or_default();
            workspaces.push(workspace);
        }
        Ok(workspaces)
    }

    fn save(&self, workspace: &Workspace) -> Result<()> {
        let tx = self.conn.unchecked_transaction().context("failed to begin workspace save")?;
        tx.execute(
            "INSERT INTO workspaces (id, workspace_type, label, owner_id, is_default, created_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6) \
             ON CONFLICT (id) DO UPDATE SET workspace_type = excluded.workspace_type, \
             label = excluded.label, owner_id = excluded.owner_id, is_default = excluded.is_default",
            params![
                workspace.id.as_str(),
                workspace.workspace_type,
                workspace.label,
                workspace.owner.as_str(),
                workspace.is_default,
                format_timestamp(workspace.created_at),
            ],
        )
        .with_context(|| format!("failed to save workspace `{}`", workspace.id))?;
        tx.execute(
            "DELETE FROM workspace_viewers WHERE workspace_id = ?1",
            params![workspace.id.as_str()],
        )
        .context("failed to reset workspace viewers")?;
        for viewer in &workspace.viewers {
            tx.execute(
                "INSERT INTO workspace_viewers (workspace_id, actor_id) VALUES (?1, ?2)",
                params![workspace.id.as_str(), viewer.as_str()],
            )
            .context("failed to insert workspace viewer")?;
        }
        tx.commit().context("failed to commit workspace save")
    }

    fn grant_view(&self, id: &WorkspaceId, actor: &ActorId) -> Result<()> {
        if self.load(id)?.is_none() {
            return Err(anyhow!("workspace `{id}` does not exist"));
        }
        self.conn
            .execute(
                "INSERT OR IGNORE INTO workspace_viewers (workspace_id, actor_id) VALUES (?1, ?2)",
                params![id.as_str(), actor.as_str()],
            )
            .with_context(|| format!("failed to grant `{actor}` access to workspace `{id}`"))?;
        Ok(())
    }
}

fn row_to_workspace(row: &rusqlite::Row<'_>) -> rusqlite::Result<Workspace> {
    let created_at: String = row.get(5)?;
    Ok(Workspace {
        id: WorkspaceId(row.get(0)?),
        workspace_type: row.get(1)?,
        label: row.get(2)?,
        owner: ActorId(row.get(3)?),
        is_default: row.get(4)?,
        viewers: BTreeSet::new(),
        created_at: parse_timestamp(5, &created_at)?,
    })
}
