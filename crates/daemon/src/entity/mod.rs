// Entity-type registry: which kinds of content exist and their caches.

pub mod registry;

use stagehand_common::entity::EntityTypeDefinition;

pub use registry::ConfiguredEntityTypes;

pub trait EntityTypeRegistry {
    fn definitions(&self) -> Vec<EntityTypeDefinition>;

    /// Drop every cached entity of the given type.
    fn reset_cache(&self, entity_type_id: &str);
}
