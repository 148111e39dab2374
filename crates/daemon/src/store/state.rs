// Process-wide key/value state backed by the `state` table.

use anyhow::{Context, Result};
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::Value;

use super::format_timestamp;

/// Small persisted key/value store for flags that outlive a process.
pub trait StateStore {
    fn get(&self, key: &str) -> Result<Option<Value>>;

    fn set(&self, key: &str, value: Value) -> Result<()>;

    fn get_or(&self, key: &str, default: Value) -> Result<Value> {
        Ok(self.get(key)?.unwrap_or(default))
    }
}

pub struct SqliteStateStore<'a> {
    conn: &'a Connection,
}

impl<'a> SqliteStateStore<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }
}

impl StateStore for SqliteStateStore<'_> {
    fn get(&self, key: &str) -> Result<Option<Value>> {
        let raw: Option<String> = self
            .conn
            .query_row("SELECT value FROM state WHERE key = ?1", params![key], |row| row.get(0))
            .optional()
            .with_context(|| format!("failed to read state `{key}`"))?;

        raw.map(|text| {
            serde_json::from_str(&text).with_context(|| format!("state `{key}` is not valid JSON"))
        })
        .transpose()
    }

    fn set(&self, key: &str, value: Value) -> Result<()> {
        let encoded = serde_json::to_string(&value).context("failed to encode state value")?;
        self.conn
            .execute(
                "INSERT INTO state (key, value, updated_at) VALUES (?1, ?2, ?3) \
                 ON CONFLICT (key) DO UPDATE SET value = excluded.value, \
                 updated_at = excluded.updated_at",
                params![key, encoded, format_timestamp(Utc::now())],
            )
            .with_context(|| format!("failed to write state `{key}`"))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::meta_db::MetaDb;
    use serde_json::json;
    use tempfile::TempDir;

    #[test]
    fn missing_key_falls_back_to_default() {
        let dir = TempDir::new().expect("tempdir");
        let db = MetaDb::open(dir.path().join("meta.db")).expect("meta db");
        let state = SqliteStateStore::new(db.connection());

        assert_eq!(state.get("nope").expect("get"), None);
        assert_eq!(state.get_or("nope", json!(false)).expect("get_or"), json!(false));
    }

    #[test]
    fn set_overwrites_previous_value() {
        let dir = TempDir::new().expect("tempdir");
        let db = MetaDb::open(dir.path().join("meta.db")).expect("meta db");
        let state = SqliteStateStore::new(db.connection());

        state.set("flag", json!(true)).expect("first set");
        state.set("flag", json!({"nested": [1, 2]})).expect("second set");
        assert_eq!(state.get("flag").expect("get"), Some(json!({"nested": [1, 2]})));
    }

    #[test]
    fn values_survive_reopen() {
        let dir = TempDir::new().expect("tempdir");
        let path = dir.path().join("meta.db");
        {
            let db = MetaDb::open(&path).expect("meta db");
            SqliteStateStore::new(db.connection()).set("flag", json!(true)).expect("set");
        }
        let db = MetaDb::open(&path).expect("reopen");
        assert_eq!(SqliteStateStore::new(db.connection()).get("flag").expect("get"), Some(json!(true)));
    }
}
