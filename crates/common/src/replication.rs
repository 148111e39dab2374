// Replication records, their status machine, and queued job payloads.
//
// A record moves through a strictly sequential lifecycle per execution:
//   ready → queued → replicating → replicated   (happy path)
//   ready → queued → replicating → failed       (terminal until an operator retries)
//   failed → queued                              (operator retry only)

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::types::WorkspaceId;

/// Replication lifecycle state.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ReplicationStatus {
    Ready,
    Queued,
    Replicating,
    Replicated,
    Failed,
}

impl ReplicationStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ready => "ready",
            Self::Queued => "queued",
            Self::Replicating => "replicating",
            Self::Replicated => "replicated",
            Self::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "ready" => Some(Self::Ready),
            "queued" => Some(Self::Queued),
            "replicating" => Some(Self::Replicating),
            "replicated" => Some(Self::Replicated),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Replicated | Self::Failed)
    }

    fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Ready, Self::Queued)
                | (Self::Queued, Self::Replicating)
                | (Self::Replicating, Self::Replicated)
                | (Self::Replicating, Self::Failed)
                | (Self::Failed, Self::Queued)
        )
    }
}

impl fmt::Display for ReplicationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("replication {record_id} cannot move from {from} to {to}")]
pub struct TransitionError {
    pub record_id: i64,
    pub from: ReplicationStatus,
    pub to: ReplicationStatus,
}

/// Where content is replicated from or to.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ContextDescriptor {
    pub workspace_id: WorkspaceId,
    /// Remote environment URL, when the context lives outside this system.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
}

impl ContextDescriptor {
    pub fn local(workspace_id: impl Into<String>) -> Self {
        Self { workspace_id: WorkspaceId::new(workspace_id), endpoint: None }
    }
}

impl fmt::Display for ContextDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.endpoint {
            Some(endpoint) => write!(f, "{}@{}", self.workspace_id, endpoint),
            None => write!(f, "{}", self.workspace_id),
        }
    }
}

/// Opaque replication instructions, passed through untouched to the replicator.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(transparent)]
pub struct ReplicationTask(pub Value);

/// One replication job and its lifecycle.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReplicationRecord {
    pub id: i64,
    pub label: String,
    pub status: ReplicationStatus,
    pub source: ContextDescriptor,
    pub target: ContextDescriptor,
    /// Instructions for the replicator, kept so a retry replays them.
    #[serde(default)]
    pub task: ReplicationTask,
    pub replicated_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ReplicationRecord {
    fn transition(&mut self, next: ReplicationStatus) -> Result<(), TransitionError> {
        if !self.status.can_transition_to(next) {
            return Err(TransitionError { record_id: self.id, from: self.status, to: next });
        }
        self.status = next;
        Ok(())
    }

    pub fn mark_queued(&mut self, now: DateTime<Utc>) -> Result<(), TransitionError> {
        self.transition(ReplicationStatus::Queued)?;
        self.replicated_at = None;
        self.updated_at = now;
        Ok(())
    }

    /// Operator recovery for a record left in `replicating` by an attempt
    /// whose outcome was never written. Also accepts `failed`.
    pub fn force_requeue(&mut self, now: DateTime<Utc>) -> Result<(), TransitionError> {
        match self.status {
            ReplicationStatus::Failed | ReplicationStatus::Replicating => {
                self.status = ReplicationStatus::Queued;
                self.replicated_at = None;
                self.updated_at = now;
                Ok(())
            }
            from => Err(TransitionError { record_id: self.id, from, to: ReplicationStatus::Queued }),
        }
    }

    pub fn mark_replicating(&mut self, now: DateTime<Utc>) -> Result<(), TransitionError> {
        self.transition(ReplicationStatus::Replicating)?;
        self.updated_at = now;
        Ok(())
    }

    /// Terminal success; stamps `replicated_at`.
    pub fn mark_replicated(&mut self, now: DateTime<Utc>) -> Result<(), TransitionError> {
        self.transition(ReplicationStatus::Replicated)?;
        self.replicated_at = Some(now);
        self.updated_at = now;
        Ok(())
    }

    pub fn mark_failed(&mut self, now: DateTime<Utc>) -> Result<(), TransitionError> {
        self.transition(ReplicationStatus::Failed)?;
        self.updated_at = now;
        Ok(())
    }
}

/// Payload carried by the replication queue.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReplicationJob {
    /// Snapshot of the record at enqueue time. May be stale by the time the
    /// job is processed.
    pub record: ReplicationRecord,
    pub source: ContextDescriptor,
    pub target: ContextDescriptor,
    #[serde(default)]
    pub task: ReplicationTask,
}

impl ReplicationJob {
    pub fn for_record(record: ReplicationRecord, task: ReplicationTask) -> Self {
        Self { source: record.source.clone(), target: record.target.clone(), record, task }
    }

    /// A job carrying the record's own stored task.
    pub fn from_record(record: ReplicationRecord) -> Self {
        let task = record.task.clone();
        Self::for_record(record, task)
    }
}

/// Result document produced by a replication run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReplicationLog {
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(default)]
    pub docs_read: u64,
    #[serde(default)]
    pub docs_written: u64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<String>,
}

impl ReplicationLog {
    pub fn succeeded() -> Self {
        Self { ok: true, session_id: None, docs_read: 0, docs_written: 0, errors: Vec::new() }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            ok: false,
            session_id: None,
            docs_read: 0,
            docs_written: 0,
            errors: vec![error.into()],
        }
    }
}
