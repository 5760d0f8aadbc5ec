//! Domain model: entity types, attributes and their definitions

mod attribute;
mod definition;
pub mod registry;

use std::collections::HashMap;
use std::sync::Arc;

pub use attribute::{
    Attribute, AttributeDefinition, AttributeKind, DerivedFn, EntityType, SourceValues,
};
pub use definition::{EntityDefinition, EntityDefinitionBuilder, KeyGenerator};

use crate::entity::Entity;
use crate::error::{Error, Result};

/// A named set of entity definitions, loaded once at process start.
///
/// Definitions are added with [`Domain::define`]; the finished domain is
/// published process-wide with [`registry::register`].
#[derive(Debug)]
pub struct Domain {
    name: String,
    definitions: HashMap<EntityType, Arc<EntityDefinition>>,
    order: Vec<EntityType>,
}

impl Domain {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            definitions: HashMap::new(),
            order: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// An entity type belonging to this domain
    pub fn entity_type(&self, name: impl Into<String>) -> EntityType {
        EntityType::new(self.name.clone(), name)
    }

    /// Start declaring the definition of `entity_type`
    pub fn define(&mut self, entity_type: &EntityType) -> EntityDefinitionBuilder<'_> {
        EntityDefinitionBuilder::new(self, entity_type)
    }

    pub fn contains(&self, entity_type: &EntityType) -> bool {
        self.definitions.contains_key(entity_type)
    }

    /// Definition of `entity_type`, including types of other registered domains
    pub fn definition(&self, entity_type: &EntityType) -> Result<Arc<EntityDefinition>> {
        self.definition_local(entity_type)
            .or_else(|| registry::definition(entity_type))
            .ok_or_else(|| {
                Error::Configuration(format!("undefined entity type {}", entity_type))
            })
    }

    /// Definitions in the order they were defined
    pub fn definitions(&self) -> impl Iterator<Item = &Arc<EntityDefinition>> {
        self.order.iter().filter_map(|t| self.definitions.get(t))
    }

    /// A new empty entity of the given type
    pub fn entity(&self, entity_type: &EntityType) -> Result<Entity> {
        Ok(Entity::new(self.definition(entity_type)?))
    }

    pub(crate) fn definition_local(&self, entity_type: &EntityType) -> Option<Arc<EntityDefinition>> {
        self.definitions.get(entity_type).cloned()
    }

    pub(crate) fn insert(&mut self, definition: Arc<EntityDefinition>) {
        let entity_type = definition.entity_type().clone();
        self.order.push(entity_type.clone());
        self.definitions.insert(entity_type, definition);
    }
}
