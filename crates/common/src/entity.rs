// Entity type descriptors as reported by the entity-type registry.

use serde::{Deserialize, Serialize};

/// Capabilities of one entity type that decide workspace eligibility.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EntityTypeDefinition {
    pub id: String,
    #[serde(default)]
    pub publishable: bool,
    #[serde(default)]
    pub revisionable: bool,
}

impl EntityTypeDefinition {
    pub fn new(id: impl Into<String>, publishable: bool, revisionable: bool) -> Self {
        Self { id: id.into(), publishable, revisionable }
    }
}
