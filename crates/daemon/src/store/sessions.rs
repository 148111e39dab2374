// Per-session active workspace, backing the session negotiator.

use anyhow::{Context, Result};
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use stagehand_common::types::WorkspaceId;
use uuid::Uuid;

use super::format_timestamp;

pub trait SessionStore {
    fn workspace_for(&self, session_id: Uuid) -> Result<Option<WorkspaceId>>;

    fn set_workspace(&self, session_id: Uuid, workspace_id: &WorkspaceId) -> Result<()>;
}

pub struct SqliteSessionStore<'a> {
    conn: &'a Connection,
}

impl<'a> SqliteSessionStore<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }
}

impl SessionStore for SqliteSessionStore<'_> {
    fn workspace_for(&self, session_id: Uuid) -> Result<Option<WorkspaceId>> {
        self.conn
            .query_row(
                "SELECT workspace_id FROM workspace_sessions WHERE session_id = ?1",
                params![session_id.to_string()],
                |row| row.get::<_, String>(0),
            )
            .optional()
            .with_context(|| format!("failed to read workspace for session {session_id}"))
            .map(|id| id.map(WorkspaceId))
    }

    fn set_workspace(&self, session_id: Uuid, workspace_id: &WorkspaceId) -> Result<()> {
        self.conn
            .execute(
                "INSERT INTO workspace_sessions (session_id, workspace_id, updated_at) \
                 VALUES (?1, ?2, ?3) \
                 ON CONFLICT (session_id) DO UPDATE SET workspace_id = excluded.workspace_id, \
                 updated_at = excluded.updated_at",
                params![session_id.to_string(), workspace_id.as_str(), format_timestamp(Utc::now())],
            )
            .with_context(|| format!("failed to store workspace for session {session_id}"))?;
        Ok(())
    }
}
