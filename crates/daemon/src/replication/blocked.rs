// Global replication latch.
//
// Once any replication fails the flag is raised and no further replication
// starts until an operator clears it. The processor only ever raises it.

use anyhow::Result;
use serde_json::Value;

use crate::store::state::StateStore;

pub const LAST_REPLICATION_FAILED_KEY: &str = "workspace.last_replication_failed";

pub struct BlockedFlag<'s> {
    state: &'s dyn StateStore,
}

impl<'s> BlockedFlag<'s> {
    pub fn new(state: &'s dyn StateStore) -> Self {
        Self { state }
    }

    pub fn is_blocked(&self) -> Result<bool> {
        let value = self.state.get_or(LAST_REPLICATION_FAILED_KEY, Value::Bool(false))?;
        Ok(value.as_bool().unwrap_or(false))
    }

    pub fn block(&self) -> Result<()> {
        self.state.set(LAST_REPLICATION_FAILED_KEY, Value::Bool(true))
    }

    /// Operator action: resume replication after diagnosing a failure.
    pub fn clear(&self) -> Result<()> {
        self.state.set(LAST_REPLICATION_FAILED_KEY, Value::Bool(false))
    }
}
