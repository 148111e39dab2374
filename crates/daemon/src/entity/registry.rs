use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use serde_json::Value;
use stagehand_common::entity::EntityTypeDefinition;
use tracing::debug;

use super::EntityTypeRegistry;

type EntityCache = HashMap<String, HashMap<String, Value>>;

/// Registry built from configured entity types, each with an in-memory
/// entity cache keyed by entity id.
#[derive(Debug)]
pub struct ConfiguredEntityTypes {
    definitions: Vec<EntityTypeDefinition>,
    caches: Mutex<EntityCache>,
}

impl ConfiguredEntityTypes {
    pub fn new(definitions: Vec<EntityTypeDefinition>) -> Self {
        Self { definitions, caches: Mutex::new(HashMap::new()) }
    }

    pub fn cache_put(&self, entity_type_id: &str, entity_id: &str, entity: Value) {
        self.lock()
            .entry(entity_type_id.to_string())
            .or_default()
            .insert(entity_id.to_string(), entity);
    }

    pub fn cached_count(&self, entity_type_id: &str) -> usize {
        self.lock().get(entity_type_id).map_or(0, HashMap::len)
    }

    fn lock(&self) -> MutexGuard<'_, EntityCache> {
        self.caches.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl EntityTypeRegistry for ConfiguredEntityTypes {
    fn definitions(&self) -> Vec<EntityTypeDefinition> {
        self.definitions.clone()
    }

    fn reset_cache(&self, entity_type_id: &str) {
        if let Some(cache) = self.lock().get_mut(entity_type_id) {
            debug!(entity_type = entity_type_id, entries = cache.len(), "resetting entity cache");
            cache.clear();
        }
    }
}
