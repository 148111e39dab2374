// Which entity types can belong to a workspace.
//
// Eligible iff not denylisted and both publishable and revisionable. A type
// found ineligible is appended to the denylist for the life of the filter;
// the list only ever grows.

use std::collections::BTreeSet;
use std::sync::{Mutex, MutexGuard, PoisonError};

use stagehand_common::entity::EntityTypeDefinition;

use crate::entity::EntityTypeRegistry;

pub const DENYLIST_SEED: [&str; 3] = ["workspace_association", "replication_log", "workspace"];

#[derive(Debug)]
pub struct EntityTypeFilter {
    denylist: Mutex<BTreeSet<String>>,
}

impl Default for EntityTypeFilter {
    fn default() -> Self {
        Self::new()
    }
}

impl EntityTypeFilter {
    pub fn new() -> Self {
        Self { denylist: Mutex::new(DENYLIST_SEED.iter().map(|id| id.to_string()).collect()) }
    }

    pub fn entity_type_can_belong_to_workspace(&self, entity_type: &EntityTypeDefinition) -> bool {
        let mut denylist = self.lock();
        if !denylist.contains(&entity_type.id) && entity_type.publishable && entity_type.revisionable
        {
            return true;
        }
        denylist.insert(entity_type.id.clone());
        false
    }

    pub fn supported_entity_types(
        &self,
        registry: &dyn EntityTypeRegistry,
    ) -> Vec<EntityTypeDefinition> {
        registry
            .definitions()
            .into_iter()
            .filter(|entity_type| self.entity_type_can_belong_to_workspace(entity_type))
            .collect()
    }

    pub fn denylist(&self) -> Vec<String> {
        self.lock().iter().cloned().collect()
    }

    fn lock(&self) -> MutexGuard<'_, BTreeSet<String>> {
        self.denylist.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
