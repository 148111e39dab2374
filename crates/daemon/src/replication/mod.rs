// Replication orchestration: collaborator contracts, the queue processor,
// and the consumer loop around it.
//
// The data transfer itself is owned by an external service reached through
// the `Replicator` trait; everything here is queueing, locking and the
// record status machine.

pub mod blocked;
pub mod error;
pub mod http;
pub mod identity;
pub mod processor;
pub mod runner;

use anyhow::Result;
use serde_json::Value;
use stagehand_common::replication::{
    ContextDescriptor, ReplicationLog, ReplicationRecord, ReplicationTask,
};

pub use error::{ProcessError, ReplicationFault};

/// Authoritative storage for replication records.
pub trait ReplicationStore {
    fn load(&self, id: i64) -> Result<Option<ReplicationRecord>>;

    /// Insert or overwrite the record under its id.
    fn save(&self, record: &ReplicationRecord) -> Result<()>;

    /// Conditionally persist `record` (already moved to `replicating` in
    /// memory) only if the stored row is still `queued`.
    ///
    /// Returns `false` when another worker claimed the record first.
    fn claim(&self, record: &ReplicationRecord) -> Result<bool>;
}

/// What the replication capability handed back.
#[derive(Debug, Clone, PartialEq)]
pub enum ReplicationResponse {
    /// A replication log document.
    Log(ReplicationLog),
    /// A response that is not shaped like a replication log.
    Unrecognized(Value),
    /// No response body at all.
    Empty,
}

impl ReplicationResponse {
    /// Interpret a raw JSON document the way the processor judges success.
    pub fn from_value(value: Value) -> Self {
        if value.is_null() {
            return Self::Empty;
        }
        let has_ok_flag = value.get("ok").is_some_and(Value::is_boolean);
        if !has_ok_flag {
            return Self::Unrecognized(value);
        }
        match serde_json::from_value::<ReplicationLog>(value.clone()) {
            Ok(log) => Self::Log(log),
            Err(_) => Self::Unrecognized(value),
        }
    }

    /// Success iff the response is a replication log whose `ok` flag is set.
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Log(log) if log.ok)
    }
}

/// The external capability that moves content between two contexts.
pub trait Replicator: Send + Sync {
    fn replicate(
        &self,
        source: &ContextDescriptor,
        target: &ContextDescriptor,
        task: &ReplicationTask,
    ) -> Result<ReplicationResponse, ReplicationFault>;
}
