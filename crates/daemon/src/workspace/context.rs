use std::collections::BTreeMap;

use stagehand_common::types::Actor;
use uuid::Uuid;

/// The execution context a workspace is negotiated for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestContext {
    pub actor: Actor,
    pub session_id: Option<Uuid>,
    pub query: BTreeMap<String, String>,
}

impl RequestContext {
    pub fn new(actor: Actor) -> Self {
        Self { actor, session_id: None, query: BTreeMap::new() }
    }

    pub fn with_session(mut self, session_id: Uuid) -> Self {
        self.session_id = Some(session_id);
        self
    }

    pub fn with_query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.insert(key.into(), value.into());
        self
    }

    pub fn query_param(&self, key: &str) -> Option<&str> {
        self.query.get(key).map(String::as_str)
    }
}
