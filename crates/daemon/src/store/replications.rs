// Replication records backed by the `replications` table.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use stagehand_common::replication::{
    ContextDescriptor, ReplicationRecord, ReplicationStatus, ReplicationTask,
};
use stagehand_common::types::WorkspaceId;

use super::{format_timestamp, parse_timestamp};
use crate::replication::ReplicationStore;

const SELECT_COLUMNS: &str = "id, label, status, source_workspace, source_endpoint, \
     target_workspace, target_endpoint, replicated_at, created_at, updated_at, task";

pub struct SqliteReplicationStore<'a> {
    conn: &'a Connection,
}

impl<'a> SqliteReplicationStore<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    /// Insert a new record in `queued` state and return it.
    pub fn create(
        &self,
        label: &str,
        source: &ContextDescriptor,
        target: &ContextDescriptor,
        task: &ReplicationTask,
        now: DateTime<Utc>,
    ) -> Result<ReplicationRecord> {
        let stamp = format_timestamp(now);
        let task_json = encode_task(task)?;
        self.conn
            .execute(
                "INSERT INTO replications \
                 (label, status, source_workspace, source_endpoint, target_workspace, \
                  target_endpoint, replicated_at, created_at, updated_at, task) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, NULL, ?7, ?7, ?8)",
                params![
                    label,
                    ReplicationStatus::Queued.as_str(),
                    source.workspace_id.as_str(),
                    source.endpoint,
                    target.workspace_id.as_str(),
                    target.endpoint,
                    stamp,
                    task_json,
                ],
            )
            .context("failed to insert replication record")?;

        Ok(ReplicationRecord {
            id: self.conn.last_insert_rowid(),
            label: label.to_string(),
            status: ReplicationStatus::Queued,
            source: source.clone(),
            target: target.clone(),
            task: task.clone(),
            replicated_at: None,
            created_at: now,
            updated_at: now,
        })
    }

    /// Most recently created records first.
    pub fn list(&self, limit: usize) -> Result<Vec<ReplicationRecord>> {
        let mut stmt = self
            .conn
            .prepare(&format!(
                "SELECT {SELECT_COLUMNS} FROM replications ORDER BY id DESC LIMIT ?1"
            ))
            .context("failed to prepare replication listing")?;
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows = stmt
            .query_map(params![limit], row_to_record)
            .context("failed to query replication records")?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .context("failed to collect replication records")
    }

    pub fn count_by_status(&self, status: ReplicationStatus) -> Result<i64> {
        self.conn
            .query_row(
                "SELECT COUNT(*) FROM replications WHERE status = ?1",
                params![status.as_str()],
                |row| row.get(0),
            )
            .context("failed to count replication records")
    }
}

impl ReplicationStore for SqliteReplicationStore<'_> {
    fn load(&self, id: i64) -> Result<Option<ReplicationRecord>> {
        self.conn
            .query_row(
                &format!("SELECT {SELECT_COLUMNS} FROM replications WHERE id = ?1"),
                params![id],
                row_to_record,
            )
            .optional()
            .with_context(|| format!("failed to load replication {id}"))
    }

    fn save(&self, record: &ReplicationRecord) -> Result<()> {
        let task_json = encode_task(&record.task)?;
        self.conn
            .execute(
                "INSERT INTO replications \
                 (id, label, status, source_workspace, source_endpoint, target_workspace, \
                  target_endpoint, replicated_at, created_at, updated_at, task) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11) \
                 ON CONFLICT (id) DO UPDATE SET \
                    label = excluded.label, \
                    status = excluded.status, \
                    source_workspace = excluded.source_workspace, \
                    source_endpoint = excluded.source_endpoint, \
                    target_workspace = excluded.target_workspace, \
                    target_endpoint = excluded.target_endpoint, \
                    replicated_at = excluded.replicated_at, \
                    updated_at = excluded.updated_at, \
                    task = excluded.task",
                params![
                    record.id,
                    record.label,
                    record.status.as_str(),
                    record.source.workspace_id.as_str(),
                    record.source.endpoint,
                    record.target.workspace_id.as_str(),
                    record.target.endpoint,
                    record.replicated_at.map(format_timestamp),
                    format_timestamp(record.created_at),
                    format_timestamp(record.updated_at),
                    task_json,
                ],
            )
            .with_context(|| format!("failed to save replication {}", record.id))?;
        Ok(())
    }

    fn claim(&self, record: &ReplicationRecord) -> Result<bool> {
        let rows = self
            .conn
            .execute(
                "UPDATE replications SET status = ?1, updated_at = ?2 \
                 WHERE id = ?3 AND status = ?4",
                params![
                    record.status.as_str(),
                    format_timestamp(record.updated_at),
                    record.id,
                    ReplicationStatus::Queued.as_str(),
                ],
            )
            .with_context(|| format!("failed to claim replication {}", record.id))?;
        Ok(rows > 0)
    }
}

fn encode_task(task: &ReplicationTask) -> Result<String> {
    serde_json::to_string(task).context("failed to encode replication task")
}

fn row_to_record(row: &rusqlite::Row<'_>) -> rusqlite::Result<ReplicationRecord> {
    let status_str: String = row.get(2)?;
    let status = ReplicationStatus::parse(&status_str).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            2,
            rusqlite::types::Type::Text,
            Box::new(std::io::Error::other(format!("unknown replication status `{status_str}`"))),
        )
    })?;
    let replicated_at: Option<String> = row.get(7)?;
    let created_at: String = row.get(8)?;
    let updated_at: String = row.get(9)?;
    let task_json: String = row.get(10)?;
    let task: ReplicationTask = serde_json::from_str(&task_json).map_err(|error| {
        rusqlite::Error::FromSqlConversionFailure(10, rusqlite::types::Type::Text, Box::new(error))
    })?;

    Ok(ReplicationRecord {
        id: row.get(0)?,
        label: row.get(1)?,
        status,
        source: ContextDescriptor {
            workspace_id: WorkspaceId::new(row.get::<_, String>(3)?),
            endpoint: row.get(4)?,
        },
        target: ContextDescriptor {
            workspace_id: WorkspaceId::new(row.get::<_, String>(5)?),
            endpoint: row.get(6)?,
        },
        task,
        replicated_at: replicated_at.as_deref().map(|s| parse_timestamp(7, s)).transpose()?,
        created_at: parse_timestamp(8, &created_at)?,
        updated_at: parse_timestamp(9, &updated_at)?,
    })
}
