use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use rusqlite::{params, Connection};

const MIGRATION_V1_SQL: &str = r#"
CREATE TABLE replications (
    id                  INTEGER PRIMARY KEY AUTOINCREMENT,
    label               TEXT NOT NULL,
    status              TEXT NOT NULL CHECK (status IN ('ready', 'queued', 'replicating', 'replicated', 'failed')),
    source_workspace    TEXT NOT NULL,
    source_endpoint     TEXT NULL,
    target_workspace    TEXT NOT NULL,
    target_endpoint     TEXT NULL,
    replicated_at       TEXT NULL,
    created_at          TEXT NOT NULL,
    updated_at          TEXT NOT NULL
);

CREATE TABLE replication_queue (
    id                  INTEGER PRIMARY KEY AUTOINCREMENT,
    record_id           INTEGER NOT NULL,
    payload             TEXT NOT NULL,
    attempt_count       INTEGER NOT NULL DEFAULT 0,
    available_at        TEXT NOT NULL,
    claimed_until       TEXT NULL,
    created_at          TEXT NOT NULL
);

CREATE INDEX replication_queue_available_idx
    ON replication_queue (available_at, id);

CREATE TABLE state (
    key                 TEXT PRIMARY KEY,
    value               TEXT NOT NULL,
    updated_at          TEXT NOT NULL
);
"#;

const MIGRATION_V2_SQL: &str = r#"
CREATE TABLE workspaces (
    id                  TEXT PRIMARY KEY,
    workspace_type      TEXT NOT NULL,
    label               TEXT NOT NULL,
    owner_id            TEXT NOT NULL,
    is_default          INTEGER NOT NULL DEFAULT 0,
    created_at          TEXT NOT NULL
);

CREATE UNIQUE INDEX workspaces_single_default_idx
    ON workspaces (is_default) WHERE is_default = 1;

CREATE TABLE workspace_viewers (
    workspace_id        TEXT NOT NULL REFERENCES workspaces (id) ON DELETE CASCADE,
    actor_id            TEXT NOT NULL,
    PRIMARY KEY (workspace_id, actor_id)
);

CREATE TABLE workspace_sessions (
    session_id          TEXT PRIMARY KEY,
    workspace_id        TEXT NOT NULL,
    updated_at          TEXT NOT NULL
);
"#;

const MIGRATION_V3_SQL: &str = r#"
ALTER TABLE replications ADD COLUMN task TEXT NOT NULL DEFAULT 'null';
"#;

const MIGRATIONS: &[(i64, &str)] =
    &[(1, MIGRATION_V1_SQL), (2, MIGRATION_V2_SQL), (3, MIGRATION_V3_SQL)];

#[derive(Debug)]
pub struct MetaDb {
    conn: Connection,
}

impl MetaDb {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("failed to create meta.db parent directory `{}`", parent.display())
            })?;
        }

        let mut conn = Connection::open(path)
            .with_context(|| format!("failed to open meta.db at `{}`", path.display()))?;

        conn.execute_batch(
            "
            PRAGMA foreign_keys = ON;
            PRAGMA journal_mode = WAL;
            PRAGMA busy_timeout = 5000;
            ",
        )
        .context("failed to configure sqlite pragmas for meta.db")?;

        ensure_migration_table(&conn)?;
        apply_pending_migrations(&mut conn)?;

        Ok(Self { conn })
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    pub fn schema_version(&self) -> Result<i64> {
        current_schema_version(&self.conn)
    }
}

fn ensure_migration_table(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS schema_migrations (
            version     INTEGER PRIMARY KEY,
            applied_at  TEXT NOT NULL
        );
        ",
    )
    .context("failed to ensure schema_migrations table exists")
}

fn current_schema_version(conn: &Connection) -> Result<i64> {
    conn.query_row("SELECT COALESCE(MAX(version), 0) FROM schema_migrations", [], |row| row.get(0))
        .context("failed to read current schema version")
}

fn apply_pending_migrations(conn: &mut Connection) -> Result<()> {
    let mut current_version = current_schema_version(conn)?;

    for (version, sql) in MIGRATIONS {
        if *version <= current_version {
            continue;
        }

        let tx = conn.transaction().context("failed to start migration transaction")?;
        tx.execute_batch(sql)
            .with_context(|| format!("failed to apply meta.db migration v{version}"))?;
        tx.execute(
            "INSERT INTO schema_migrations (version, applied_at) VALUES (?1, datetime('now'))",
            params![version],
        )
        .with_context(|| format!("failed to record migration v{version}"))?;
        tx.commit().with_context(|| format!("failed to commit migration v{version}"))?;
        current_version = *version;
    }

    Ok(())
}
