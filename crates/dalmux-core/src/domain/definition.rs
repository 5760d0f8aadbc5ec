//! Entity definitions and the builder that freezes them

use std::collections::HashSet;
use std::sync::Arc;

use tracing::debug;

use super::attribute::{Attribute, AttributeDefinition, AttributeKind};
use super::{registry, Domain, EntityType};
use crate::condition::OrderBy;
use crate::entity::Entity;
use crate::error::{Error, Result, ValidationError, ValidationKind};
use crate::value::{Value, ValueType};

/// How primary key values are produced on insert.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum KeyGenerator {
    /// Key values are supplied by the caller
    #[default]
    Manual,
    /// The database assigns the key (auto-increment / identity column)
    Identity,
    /// The key is fetched from a named database sequence before insert
    Sequence(String),
    /// The key is fetched with a query before insert
    Queried(String),
}

impl KeyGenerator {
    /// Whether the key is produced by the database rather than the caller
    pub fn is_generated(&self) -> bool {
        !matches!(self, KeyGenerator::Manual)
    }

    /// Whether the key value is known before the insert statement runs
    pub fn is_fetched_before_insert(&self) -> bool {
        matches!(self, KeyGenerator::Sequence(_) | KeyGenerator::Queried(_))
    }
}

/// Immutable metadata describing one entity type.
#[derive(Debug)]
pub struct EntityDefinition {
    entity_type: EntityType,
    table_name: String,
    caption: Option<String>,
    attributes: Vec<AttributeDefinition>,
    primary_key: Vec<usize>,
    key_generator: KeyGenerator,
    order_by: Vec<OrderBy>,
    read_only: bool,
    small_dataset: bool,
}

impl EntityDefinition {
    pub fn entity_type(&self) -> &EntityType {
        &self.entity_type
    }

    pub fn table_name(&self) -> &str {
        &self.table_name
    }

    pub fn caption(&self) -> &str {
        self.caption
            .as_deref()
            .unwrap_or_else(|| self.entity_type.name())
    }

    pub fn key_generator(&self) -> &KeyGenerator {
        &self.key_generator
    }

    /// Default ordering applied when a select does not specify one
    pub fn order_by(&self) -> &[OrderBy] {
        &self.order_by
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    /// Hint for caching collaborators that the whole table can be held in memory
    pub fn is_small_dataset(&self) -> bool {
        self.small_dataset
    }

    /// All attribute definitions in declaration order
    pub fn attributes(&self) -> &[AttributeDefinition] {
        &self.attributes
    }

    pub fn attribute_definition(&self, name: &str) -> Option<&AttributeDefinition> {
        self.attributes.iter().find(|a| a.name() == name)
    }

    /// Look up the attribute with the given name
    pub fn attribute(&self, name: &str) -> Option<&Attribute> {
        self.attribute_definition(name).map(|a| a.attribute())
    }

    /// The definition of `attribute`, failing if it does not belong to this entity type
    pub fn definition_of(
        &self,
        attribute: &Attribute,
    ) -> std::result::Result<&AttributeDefinition, ValidationError> {
        self.attribute_definition(attribute.name())
            .filter(|d| {
                attribute.entity_type() == &self.entity_type
                    && d.value_type() == attribute.value_type()
            })
            .ok_or_else(|| {
                ValidationError::new(
                    ValidationKind::UnknownAttribute,
                    attribute,
                    Value::Null,
                    format!("not an attribute of {}", self.entity_type),
                )
            })
    }

    pub fn columns(&self) -> impl Iterator<Item = &AttributeDefinition> {
        self.attributes.iter().filter(|a| a.is_column())
    }

    pub fn foreign_keys(&self) -> impl Iterator<Item = &AttributeDefinition> {
        self.attributes.iter().filter(|a| a.is_foreign_key())
    }

    pub fn derived_attributes(&self) -> impl Iterator<Item = &AttributeDefinition> {
        self.attributes.iter().filter(|a| a.is_derived())
    }

    /// Primary key columns ordered by their key index
    pub fn primary_key(&self) -> impl Iterator<Item = &AttributeDefinition> {
        self.primary_key.iter().map(|i| &self.attributes[*i])
    }

    pub fn has_primary_key(&self) -> bool {
        !self.primary_key.is_empty()
    }

    /// Foreign keys that use the named column as one of their reference columns
    pub fn foreign_keys_using(&self, column: &str) -> impl Iterator<Item = &AttributeDefinition> {
        let column = column.to_string();
        self.foreign_keys().filter(move |fk| match fk.kind() {
            AttributeKind::ForeignKey { references, .. } => {
                references.iter().any(|(local, _)| *local == column)
            }
            _ => false,
        })
    }

    /// A new, empty entity of this type with default values applied
    pub fn entity(self: &Arc<Self>) -> Entity {
        Entity::new(Arc::clone(self))
    }
}

/// Collects attribute declarations for one entity type.
///
/// Obtained from [`Domain::define`]; [`EntityDefinitionBuilder::build`]
/// validates the declarations and adds the frozen definition to the domain.
pub struct EntityDefinitionBuilder<'a> {
    domain: &'a mut Domain,
    entity_type: EntityType,
    table_name: Option<String>,
    caption: Option<String>,
    attributes: Vec<AttributeDefinition>,
    key_generator: KeyGenerator,
    order_by: Vec<OrderBy>,
    read_only: bool,
    small_dataset: bool,
}

impl<'a> EntityDefinitionBuilder<'a> {
    pub(crate) fn new(domain: &'a mut Domain, entity_type: &EntityType) -> Self {
        Self {
            domain,
            entity_type: entity_type.clone(),
            table_name: None,
            caption: None,
            attributes: Vec::new(),
            key_generator: KeyGenerator::default(),
            order_by: Vec::new(),
            read_only: false,
            small_dataset: false,
        }
    }

    /// Table name, defaults to the entity type name
    pub fn table(mut self, table_name: impl Into<String>) -> Self {
        self.table_name = Some(table_name.into());
        self
    }

    pub fn caption(mut self, caption: impl Into<String>) -> Self {
        self.caption = Some(caption.into());
        self
    }

    pub fn attribute(mut self, definition: AttributeDefinition) -> Self {
        self.attributes.push(definition);
        self
    }

    pub fn key_generator(mut self, key_generator: KeyGenerator) -> Self {
        self.key_generator = key_generator;
        self
    }

    pub fn order_by(mut self, order_by: OrderBy) -> Self {
        self.order_by.push(order_by);
        self
    }

    pub fn read_only(mut self, read_only: bool) -> Self {
        self.read_only = read_only;
        self
    }

    pub fn small_dataset(mut self, small_dataset: bool) -> Self {
        self.small_dataset = small_dataset;
        self
    }

    /// Validate and freeze the definition, registering it with the domain.
    pub fn build(self) -> Result<Arc<EntityDefinition>> {
        let entity_type = self.entity_type;

        if entity_type.domain() != self.domain.name() {
            return Err(Error::Configuration(format!(
                "entity type {} does not belong to domain {}",
                entity_type,
                self.domain.name()
            )));
        }
        if self.domain.contains(&entity_type) {
            return Err(Error::Configuration(format!(
                "entity type {} is already defined",
                entity_type
            )));
        }

        let mut names = HashSet::new();
        for definition in &self.attributes {
            if definition.attribute().entity_type() != &entity_type {
                return Err(Error::Configuration(format!(
                    "attribute {} does not belong to {}",
                    definition.attribute(),
                    entity_type
                )));
            }
            if !names.insert(definition.name().to_string()) {
                return Err(Error::Configuration(format!(
                    "attribute {} is defined twice",
                    definition.attribute()
                )));
            }
        }

        for definition in &self.attributes {
            match definition.kind() {
                AttributeKind::ForeignKey {
                    referenced_type,
                    references,
                    ..
                } => validate_foreign_key(
                    self.domain,
                    &entity_type,
                    &self.attributes,
                    definition,
                    referenced_type,
                    references,
                )?,
                AttributeKind::Derived { sources, .. } => {
                    for source in sources {
                        let valid = self
                            .attributes
                            .iter()
                            .any(|a| a.name() == source && !a.is_derived());
                        if !valid {
                            return Err(Error::Configuration(format!(
                                "derived attribute {} has unknown source '{}'",
                                definition.attribute(),
                                source
                            )));
                        }
                    }
                }
                AttributeKind::Column { .. } => {
                    if definition.value_type() == ValueType::Entity {
                        return Err(Error::Configuration(format!(
                            "column {} can not hold entity values",
                            definition.attribute()
                        )));
                    }
                }
            }
        }

        let mut primary_key: Vec<(usize, usize)> = self
            .attributes
            .iter()
            .enumerate()
            .filter_map(|(position, a)| match a.kind() {
                AttributeKind::Column {
                    primary_key_index: Some(index),
                    ..
                } => Some((*index, position)),
                _ => None,
            })
            .collect();
        primary_key.sort();
        let primary_key: Vec<usize> = primary_key.into_iter().map(|(_, p)| p).collect();

        if self.key_generator.is_generated() && primary_key.len() != 1 {
            return Err(Error::Configuration(format!(
                "key generator {:?} on {} requires exactly one primary key column",
                self.key_generator, entity_type
            )));
        }

        let definition = Arc::new(EntityDefinition {
            table_name: self
                .table_name
                .unwrap_or_else(|| entity_type.name().to_string()),
            caption: self.caption,
            attributes: self.attributes,
            primary_key,
            key_generator: self.key_generator,
            order_by: self.order_by,
            read_only: self.read_only,
            small_dataset: self.small_dataset,
            entity_type,
        });

        debug!(
            "[Domain] Defined {} ({} attributes)",
            definition.entity_type(),
            definition.attributes().len()
        );
        self.domain.insert(Arc::clone(&definition));

        Ok(definition)
    }
}

fn validate_foreign_key(
    domain: &Domain,
    entity_type: &EntityType,
    attributes: &[AttributeDefinition],
    definition: &AttributeDefinition,
    referenced_type: &EntityType,
    references: &[(String, String)],
) -> Result<()> {
    if definition.value_type() != ValueType::Entity {
        return Err(Error::Configuration(format!(
            "foreign key {} must be of type entity",
            definition.attribute()
        )));
    }
    if references.is_empty() {
        return Err(Error::Configuration(format!(
            "foreign key {} has no reference columns",
            definition.attribute()
        )));
    }

    // Self references resolve against the attributes being declared
    let referenced: Option<Arc<EntityDefinition>> = if referenced_type == entity_type {
        None
    } else {
        let found = domain
            .definition_local(referenced_type)
            .or_else(|| registry::definition(referenced_type));
        match found {
            Some(d) => Some(d),
            None => {
                return Err(Error::Configuration(format!(
                    "foreign key {} references undefined entity type {}",
                    definition.attribute(),
                    referenced_type
                )))
            }
        }
    };

    for (local, target) in references {
        let local_type = attributes
            .iter()
            .find(|a| a.name() == local && a.is_column())
            .map(|a| a.value_type());
        let target_type = match &referenced {
            Some(d) => d
                .attribute_definition(target)
                .filter(|a| a.is_column())
                .map(|a| a.value_type()),
            None => attributes
                .iter()
                .find(|a| a.name() == target && a.is_column())
                .map(|a| a.value_type()),
        };
        match (local_type, target_type) {
            (Some(l), Some(t)) if l == t => {}
            _ => {
                return Err(Error::Configuration(format!(
                    "foreign key {} has an invalid reference {} -> {}",
                    definition.attribute(),
                    local,
                    target
                )))
            }
        }
    }

    Ok(())
}
