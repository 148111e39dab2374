// Replication queue: durable job hand-off with visibility leases and backoff.
//
// Items flow through:
//   available → claimed → deleted               (job completed or failed)
//   available → claimed → available (later)     (requeue, with backoff)
//   claimed, lease expired → available          (worker crashed mid-job)
//
// A requeued item becomes available only after `backoff_delay(attempt)`, so
// it lands behind everything that is already waiting.

use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use stagehand_common::replication::ReplicationJob;

use crate::store::{format_timestamp, parse_timestamp};

// ── Constants ───────────────────────────────────────────────────────

pub const DEFAULT_BASE_DELAY: Duration = Duration::from_millis(250);
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_millis(30_000);
pub const DEFAULT_CLAIM_LEASE: Duration = Duration::from_secs(900);

// ── Types ───────────────────────────────────────────────────────────

/// A claimed queue item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueItem {
    pub id: i64,
    pub record_id: i64,
    pub payload: String,
    pub attempt_count: u32,
    pub available_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl QueueItem {
    pub fn decode(&self) -> Result<ReplicationJob> {
        serde_json::from_str(&self.payload)
            .with_context(|| format!("queue item {} holds an undecodable job", self.id))
    }
}

/// Retry pacing for requeued items.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { base_delay: DEFAULT_BASE_DELAY, max_delay: DEFAULT_MAX_DELAY }
    }
}

// ── Backoff ─────────────────────────────────────────────────────────

/// Compute exponential backoff delay for a given attempt number (0-based).
pub fn backoff_delay(attempt: u32, policy: RetryPolicy) -> Duration {
    let exp = attempt.min(7); // cap exponent to avoid overflow
    let base_ms = u64::try_from(policy.base_delay.as_millis()).unwrap_or(u64::MAX);
    let max_ms = u64::try_from(policy.max_delay.as_millis()).unwrap_or(u64::MAX);
    Duration::from_millis(base_ms.saturating_mul(1u64 << exp).min(max_ms))
}

fn chrono_delay(delay: Duration) -> chrono::Duration {
    chrono::Duration::from_std(delay).unwrap_or(chrono::Duration::MAX)
}

// ── Queue operations ────────────────────────────────────────────────

/// Replication queue backed by the `replication_queue` SQLite table.
pub struct ReplicationQueue<'a> {
    conn: &'a Connection,
    retry: RetryPolicy,
}

impl<'a> ReplicationQueue<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn, retry: RetryPolicy::default() }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Enqueue a job. Returns the queue item id.
    pub fn enqueue(&self, job: &ReplicationJob, now: DateTime<Utc>) -> Result<i64> {
        let payload = serde_json::to_string(job).context("failed to encode replication job")?;
        let stamp = format_timestamp(now);
        self.conn
            .execute(
                "INSERT INTO replication_queue \
                 (record_id, payload, attempt_count, available_at, claimed_until, created_at) \
                 VALUES (?1, ?2, 0, ?3, NULL, ?3)",
                params![job.record.id, payload, stamp],
            )
            .context("failed to insert replication queue item")?;
        Ok(self.conn.last_insert_rowid())
    }

    /// Claim the oldest available item for `lease`.
    ///
    /// Items whose previous lease has expired are available again. The claim
    /// is conditional on the lease observed at read time, so two workers
    /// never hold the same item.
    pub fn claim_next(&self, now: DateTime<Utc>, lease: Duration) -> Result<Option<QueueItem>> {
        let now_str = format_timestamp(now);
        loop {
            let candidate = self
                .conn
                .query_row(
                    "SELECT id, record_id, payload, attempt_count, available_at, created_at, \
                     claimed_until \
                     FROM replication_queue \
                     WHERE available_at <= ?1 AND (claimed_until IS NULL OR claimed_until <= ?1) \
                     ORDER BY available_at ASC, id ASC LIMIT 1",
                    params![now_str],
                    |row| Ok((row_to_item(row)?, row.get::<_, Option<String>>(6)?)),
                )
                .optional()
                .context("failed to query next replication queue item")?;

            let Some((item, previous_lease)) = candidate else {
                return Ok(None);
            };

            let claimed_until = format_timestamp(now + chrono_delay(lease));
            let rows = self
                .conn
                .execute(
                    "UPDATE replication_queue SET claimed_until = ?1 \
                     WHERE id = ?2 AND claimed_until IS ?3",
                    params![claimed_until, item.id, previous_lease],
                )
                .context("failed to claim replication queue item")?;
            if rows > 0 {
                return Ok(Some(item));
            }
        }
    }

    /// Remove a finished item.
    pub fn complete(&self, id: i64) -> Result<bool> {
        let rows = self
            .conn
            .execute("DELETE FROM replication_queue WHERE id = ?1", params![id])
            .context("failed to delete replication queue item")?;
        Ok(rows > 0)
    }

    /// Hand an item back for a later attempt. Returns when it becomes
    /// available again, or `None` if the item no longer exists.
    pub fn requeue(&self, id: i64, now: DateTime<Utc>) -> Result<Option<DateTime<Utc>>> {
        let attempts: Option<u32> = self
            .conn
            .query_row(
                "SELECT attempt_count FROM replication_queue WHERE id = ?1",
                params![id],
                |row| row.get(0),
            )
            .optional()
            .context("failed to read replication queue item for requeue")?;
        let Some(attempts) = attempts else {
            return Ok(None);
        };

        let available_at = now + chrono_delay(backoff_delay(attempts, self.retry));
        self.conn
            .execute(
                "UPDATE replication_queue SET attempt_count = ?1, available_at = ?2, \
                 claimed_until = NULL WHERE id = ?3",
                params![attempts.saturating_add(1), format_timestamp(available_at), id],
            )
            .context("failed to requeue replication queue item")?;
        Ok(Some(available_at))
    }

    /// Every queued item in processing order, claimed or not.
    pub fn pending(&self) -> Result<Vec<QueueItem>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT id, record_id, payload, attempt_count, available_at, created_at \
                 FROM replication_queue ORDER BY available_at ASC, id ASC",
            )
            .context("failed to prepare replication queue listing")?;
        let rows = stmt.query_map([], row_to_item).context("failed to list replication queue")?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .context("failed to collect replication queue items")
    }

    pub fn len(&self) -> Result<i64> {
        self.conn
            .query_row("SELECT COUNT(*) FROM replication_queue", [], |row| row.get(0))
            .context("failed to count replication queue items")
    }
}

fn row_to_item(row: &rusqlite::Row<'_>) -> rusqlite::Result<QueueItem> {
    let available_at: String = row.get(4)?;
    let created_at: String = row.get(5)?;
    Ok(QueueItem {
        id: row.get(0)?,
        record_id: row.get(1)?,
        payload: row.get(2)?,
        attempt_count: row.get(3)?,
        available_at: parse_timestamp(4, &available_at)?,
        created_at: parse_timestamp(5, &created_at)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::meta_db::MetaDb;
    use proptest::prelude::*;
    use stagehand_common::replication::{
        ContextDescriptor, ReplicationRecord, ReplicationStatus, ReplicationTask,
    };
    use tempfile::TempDir;

    fn setup() -> (MetaDb, TempDir) {
        let dir = TempDir::new().expect("tempdir");
        let db = MetaDb::open(dir.path().join("meta.db")).expect("meta db should open");
        (db, dir)
    }

    fn job(record_id: i64) -> ReplicationJob {
        let now = Utc::now();
        ReplicationJob::for_record(
            ReplicationRecord {
                id: record_id,
                label: format!("job {record_id}"),
                status: ReplicationStatus::Queued,
                source: ContextDescriptor::local("stage"),
                target: ContextDescriptor::local("live"),
                task: ReplicationTask::default(),
                replicated_at: None,
                created_at: now,
                updated_at: now,
            },
            ReplicationTask::default(),
        )
    }

    const LEASE: Duration = Duration::from_secs(60);

    // ── Backoff ─────────────────────────────────────────────────────

    #[test]
    fn backoff_starts_at_250ms() {
        assert_eq!(backoff_delay(0, RetryPolicy::default()), Duration::from_millis(250));
    }

    #[test]
    fn backoff_doubles_each_attempt() {
        let policy = RetryPolicy::default();
        assert_eq!(backoff_delay(1, policy), Duration::from_millis(500));
        assert_eq!(backoff_delay(2, policy), Duration::from_millis(1000));
        assert_eq!(backoff_delay(3, policy), Duration::from_millis(2000));
    }

    #[test]
    fn backoff_caps_at_max_delay() {
        let policy = RetryPolicy::default();
        assert_eq!(backoff_delay(7, policy), Duration::from_millis(30_000));
        assert_eq!(backoff_delay(100, policy), Duration::from_millis(30_000));
    }

    proptest! {
        #[test]
        fn backoff_is_monotone_and_bounded(attempt in 0u32..64, base_ms in 1u64..5_000, max_ms in 1u64..600_000) {
            let policy = RetryPolicy {
                base_delay: Duration::from_millis(base_ms),
                max_delay: Duration::from_millis(max_ms),
            };
            let here = backoff_delay(attempt, policy);
            let next = backoff_delay(attempt + 1, policy);
            prop_assert!(here <= next);
            prop_assert!(next <= policy.max_delay);
        }
    }

    // ── Enqueue + claim ─────────────────────────────────────────────

    #[test]
    fn enqueue_and_claim_round_trip() {
        let (db, _dir) = setup();
        let q = ReplicationQueue::new(db.connection());
        let now = Utc::now();

        let id = q.enqueue(&job(7), now).expect("enqueue");
        let item = q.claim_next(now, LEASE).expect("claim").expect("item should be available");

        assert_eq!(item.id, id);
        assert_eq!(item.record_id, 7);
        assert_eq!(item.attempt_count, 0);
        assert_eq!(item.decode().expect("decode").record.id, 7);
    }

    #[test]
    fn claimed_item_is_invisible_until_lease_expires() {
        let (db, _dir) = setup();
        let q = ReplicationQueue::new(db.connection());
        let now = Utc::now();

        q.enqueue(&job(1), now).expect("enqueue");
        q.claim_next(now, LEASE).expect("claim").expect("first claim");
        assert!(q.claim_next(now, LEASE).expect("claim").is_none());

        let after_lease = now + chrono::Duration::seconds(61);
        assert!(q.claim_next(after_lease, LEASE).expect("claim").is_some());
    }

    #[test]
    fn claims_follow_enqueue_order() {
        let (db, _dir) = setup();
        let q = ReplicationQueue::new(db.connection());
        let now = Utc::now();

        let first = q.enqueue(&job(1), now).expect("enqueue 1");
        let second = q.enqueue(&job(2), now).expect("enqueue 2");

        assert_eq!(q.claim_next(now, LEASE).unwrap().unwrap().id, first);
        assert_eq!(q.claim_next(now, LEASE).unwrap().unwrap().id, second);
        assert!(q.claim_next(now, LEASE).unwrap().is_none());
    }

    #[test]
    fn complete_removes_item() {
        let (db, _dir) = setup();
        let q = ReplicationQueue::new(db.connection());
        let now = Utc::now();

        let id = q.enqueue(&job(1), now).expect("enqueue");
        assert!(q.complete(id).expect("complete"));
        assert!(!q.complete(id).expect("second complete"));
        assert_eq!(q.len().expect("len"), 0);
    }

    // ── Requeue ─────────────────────────────────────────────────────

    #[test]
    fn requeue_applies_backoff_and_counts_attempts() {
        let (db, _dir) = setup();
        let q = ReplicationQueue::new(db.connection());
        let now = Utc::now();

        let id = q.enqueue(&job(1), now).expect("enqueue");
        q.claim_next(now, LEASE).expect("claim");
        let available_at = q.requeue(id, now).expect("requeue").expect("item exists");
        assert_eq!(available_at, now + chrono::Duration::milliseconds(250));

        assert!(q.claim_next(now, LEASE).expect("claim").is_none());
        let later = now + chrono::Duration::milliseconds(300);
        let item = q.claim_next(later, LEASE).expect("claim").expect("requeued item");
        assert_eq!(item.attempt_count, 1);
    }

    #[test]
    fn requeued_item_moves_behind_waiting_items() {
        let (db, _dir) = setup();
        let q = ReplicationQueue::new(db.connection());
        let now = Utc::now();

        let first = q.enqueue(&job(1), now).expect("enqueue 1");
        let second = q.enqueue(&job(2), now).expect("enqueue 2");
        q.claim_next(now, LEASE).expect("claim first");
        q.requeue(first, now).expect("requeue first");

        let later = now + chrono::Duration::seconds(5);
        assert_eq!(q.claim_next(later, LEASE).unwrap().unwrap().id, second);
        assert_eq!(q.claim_next(later, LEASE).unwrap().unwrap().id, first);
    }

    #[test]
    fn requeue_of_missing_item_is_none() {
        let (db, _dir) = setup();
        let q = ReplicationQueue::new(db.connection());
        assert!(q.requeue(99, Utc::now()).expect("requeue").is_none());
    }

    #[test]
    fn custom_retry_policy_is_used() {
        let (db, _dir) = setup();
        let policy = RetryPolicy {
            base_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(10),
        };
        let q = ReplicationQueue::new(db.connection()).with_retry_policy(policy);
        let now = Utc::now();

        let id = q.enqueue(&job(1), now).expect("enqueue");
        let available_at = q.requeue(id, now).expect("requeue").expect("item");
        assert_eq!(available_at, now + chrono::Duration::seconds(2));
    }

    #[test]
    fn pending_lists_all_items_in_processing_order() {
        let (db, _dir) = setup();
        let q = ReplicationQueue::new(db.connection());
        let now = Utc::now();

        let first = q.enqueue(&job(1), now).expect("enqueue 1");
        let second = q.enqueue(&job(2), now).expect("enqueue 2");
        q.requeue(first, now).expect("requeue");

        let ids: Vec<i64> = q.pending().expect("pending").into_iter().map(|i| i.id).collect();
        assert_eq!(ids, vec![second, first]);
        assert_eq!(q.len().expect("len"), 2);
    }

    #[test]
    fn undecodable_payload_reports_error() {
        let (db, _dir) = setup();
        let now = Utc::now();
        db.connection()
            .execute(
                "INSERT INTO replication_queue (record_id, payload, available_at, created_at) \
                 VALUES (1, 'not json', ?1, ?1)",
                params![format_timestamp(now)],
            )
            .expect("raw insert");

        let q = ReplicationQueue::new(db.connection());
        let item = q.claim_next(now, LEASE).expect("claim").expect("item");
        assert!(item.decode().is_err());
    }
}
