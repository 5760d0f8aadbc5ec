//! Entity types, attributes and their definitions

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::value::{Value, ValueType};

/// Identifies a logical table within a domain.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityType {
    domain: String,
    name: String,
}

impl EntityType {
    pub fn new(domain: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            domain: domain.into(),
            name: name.into(),
        }
    }

    pub fn domain(&self) -> &str {
        &self.domain
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Declare a typed attribute belonging to this entity type
    pub fn attribute(&self, name: impl Into<String>, value_type: ValueType) -> Attribute {
        Attribute::new(self, name, value_type)
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.domain, self.name)
    }
}

/// A typed attribute of an entity type.
///
/// Attributes are plain values; their constraints live in the
/// [`AttributeDefinition`] registered with the owning entity definition.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Attribute {
    entity_type: EntityType,
    name: String,
    value_type: ValueType,
}

impl Attribute {
    pub fn new(entity_type: &EntityType, name: impl Into<String>, value_type: ValueType) -> Self {
        Self {
            entity_type: entity_type.clone(),
            name: name.into(),
            value_type,
        }
    }

    pub fn entity_type(&self) -> &EntityType {
        &self.entity_type
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn value_type(&self) -> ValueType {
        self.value_type
    }
}

impl fmt::Display for Attribute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.entity_type.name, self.name)
    }
}

/// Read-only view of the source values handed to a derived attribute.
pub struct SourceValues<'a> {
    values: Vec<(&'a str, &'a Value)>,
}

impl<'a> SourceValues<'a> {
    pub(crate) fn new(values: Vec<(&'a str, &'a Value)>) -> Self {
        Self { values }
    }

    /// Value of the named source attribute, null if it was not declared as a source
    pub fn get(&self, name: &str) -> &Value {
        self.values
            .iter()
            .find(|(n, _)| *n == name)
            .map(|(_, v)| *v)
            .unwrap_or(&Value::Null)
    }
}

/// Computes a derived attribute value from its declared sources.
pub type DerivedFn = Arc<dyn Fn(&SourceValues<'_>) -> Value + Send + Sync>;

/// How an attribute is backed.
#[derive(Clone)]
pub enum AttributeKind {
    /// A stored column
    Column {
        column_name: String,
        primary_key_index: Option<usize>,
        insertable: bool,
        updatable: bool,
    },
    /// A reference to another entity type through one or more local columns.
    ForeignKey {
        referenced_type: EntityType,
        /// (local column attribute, referenced attribute) pairs
        references: Vec<(String, String)>,
        fetch_depth: usize,
    },
    /// Computed from other attributes in the same row, never stored.
    Derived {
        sources: Vec<String>,
        compute: DerivedFn,
    },
}

impl fmt::Debug for AttributeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttributeKind::Column {
                column_name,
                primary_key_index,
                insertable,
                updatable,
            } => f
                .debug_struct("Column")
                .field("column_name", column_name)
                .field("primary_key_index", primary_key_index)
                .field("insertable", insertable)
                .field("updatable", updatable)
                .finish(),
            AttributeKind::ForeignKey {
                referenced_type,
                references,
                fetch_depth,
            } => f
                .debug_struct("ForeignKey")
                .field("referenced_type", referenced_type)
                .field("references", references)
                .field("fetch_depth", fetch_depth)
                .finish(),
            AttributeKind::Derived { sources, .. } => f
                .debug_struct("Derived")
                .field("sources", sources)
                .finish_non_exhaustive(),
        }
    }
}

/// An attribute together with its constraints.
#[derive(Debug, Clone)]
pub struct AttributeDefinition {
    attribute: Attribute,
    kind: AttributeKind,
    caption: Option<String>,
    nullable: bool,
    max_length: Option<usize>,
    minimum: Option<f64>,
    maximum: Option<f64>,
    default_value: Option<Value>,
    searchable: bool,
}

impl AttributeDefinition {
    fn with_kind(attribute: Attribute, kind: AttributeKind) -> Self {
        Self {
            attribute,
            kind,
            caption: None,
            nullable: true,
            max_length: None,
            minimum: None,
            maximum: None,
            default_value: None,
            searchable: false,
        }
    }

    /// A column named after the attribute
    pub fn column(attribute: Attribute) -> Self {
        let column_name = attribute.name().to_string();
        Self::with_kind(
            attribute,
            AttributeKind::Column {
                column_name,
                primary_key_index: None,
                insertable: true,
                updatable: true,
            },
        )
    }

    /// A single-column primary key; primary keys are never nullable
    pub fn primary_key(attribute: Attribute) -> Self {
        Self::column(attribute).primary_key_index(0)
    }

    /// A foreign key to `referenced_type`, add column pairs with [`Self::reference`]
    pub fn foreign_key(attribute: Attribute, referenced_type: &EntityType) -> Self {
        Self::with_kind(
            attribute,
            AttributeKind::ForeignKey {
                referenced_type: referenced_type.clone(),
                references: Vec::new(),
                fetch_depth: 1,
            },
        )
    }

    /// A derived attribute computed from `sources`
    pub fn derived<F>(attribute: Attribute, sources: &[&Attribute], compute: F) -> Self
    where
        F: Fn(&SourceValues<'_>) -> Value + Send + Sync + 'static,
    {
        Self::with_kind(
            attribute,
            AttributeKind::Derived {
                sources: sources.iter().map(|a| a.name().to_string()).collect(),
                compute: Arc::new(compute),
            },
        )
    }

    pub fn column_name(mut self, name: impl Into<String>) -> Self {
        if let AttributeKind::Column { column_name, .. } = &mut self.kind {
            *column_name = name.into();
        }
        self
    }

    /// Position of this column within a composite primary key
    pub fn primary_key_index(mut self, index: usize) -> Self {
        if let AttributeKind::Column {
            primary_key_index, ..
        } = &mut self.kind
        {
            *primary_key_index = Some(index);
            self.nullable = false;
        }
        self
    }

    pub fn updatable(mut self, value: bool) -> Self {
        if let AttributeKind::Column { updatable, .. } = &mut self.kind {
            *updatable = value;
        }
        self
    }

    pub fn insertable(mut self, value: bool) -> Self {
        if let AttributeKind::Column { insertable, .. } = &mut self.kind {
            *insertable = value;
        }
        self
    }

    /// Map a local column attribute onto an attribute of the referenced type
    pub fn reference(mut self, local: &Attribute, referenced: &Attribute) -> Self {
        if let AttributeKind::ForeignKey { references, .. } = &mut self.kind {
            references.push((local.name().to_string(), referenced.name().to_string()));
        }
        self
    }

    /// How many levels of referenced entities are materialized on select
    pub fn fetch_depth(mut self, depth: usize) -> Self {
        if let AttributeKind::ForeignKey { fetch_depth, .. } = &mut self.kind {
            *fetch_depth = depth;
        }
        self
    }

    pub fn caption(mut self, caption: impl Into<String>) -> Self {
        self.caption = Some(caption.into());
        self
    }

    pub fn nullable(mut self, nullable: bool) -> Self {
        self.nullable = nullable;
        self
    }

    pub fn max_length(mut self, max_length: usize) -> Self {
        self.max_length = Some(max_length);
        self
    }

    pub fn range(mut self, minimum: f64, maximum: f64) -> Self {
        self.minimum = Some(minimum);
        self.maximum = Some(maximum);
        self
    }

    pub fn minimum(mut self, minimum: f64) -> Self {
        self.minimum = Some(minimum);
        self
    }

    pub fn maximum(mut self, maximum: f64) -> Self {
        self.maximum = Some(maximum);
        self
    }

    pub fn default_value(mut self, value: impl Into<Value>) -> Self {
        self.default_value = Some(value.into());
        self
    }

    pub fn searchable(mut self, searchable: bool) -> Self {
        self.searchable = searchable;
        self
    }

    pub fn attribute(&self) -> &Attribute {
        &self.attribute
    }

    pub fn name(&self) -> &str {
        self.attribute.name()
    }

    pub fn value_type(&self) -> ValueType {
        self.attribute.value_type()
    }

    pub fn kind(&self) -> &AttributeKind {
        &self.kind
    }

    /// Caption for display, falls back to the attribute name
    pub fn caption_text(&self) -> &str {
        self.caption.as_deref().unwrap_or_else(|| self.attribute.name())
    }

    pub fn is_nullable(&self) -> bool {
        self.nullable
    }

    pub fn max_length_value(&self) -> Option<usize> {
        self.max_length
    }

    pub fn minimum_value(&self) -> Option<f64> {
        self.minimum
    }

    pub fn maximum_value(&self) -> Option<f64> {
        self.maximum
    }

    pub fn default(&self) -> Option<&Value> {
        self.default_value.as_ref()
    }

    pub fn is_searchable(&self) -> bool {
        self.searchable
    }

    pub fn is_column(&self) -> bool {
        matches!(self.kind, AttributeKind::Column { .. })
    }

    pub fn is_foreign_key(&self) -> bool {
        matches!(self.kind, AttributeKind::ForeignKey { .. })
    }

    pub fn is_derived(&self) -> bool {
        matches!(self.kind, AttributeKind::Derived { .. })
    }

    pub fn is_primary_key(&self) -> bool {
        matches!(
            self.kind,
            AttributeKind::Column {
                primary_key_index: Some(_),
                ..
            }
        )
    }

    /// Column name for stored columns
    pub fn column_name_value(&self) -> Option<&str> {
        match &self.kind {
            AttributeKind::Column { column_name, .. } => Some(column_name),
            _ => None,
        }
    }

    pub fn is_updatable(&self) -> bool {
        matches!(self.kind, AttributeKind::Column { updatable: true, .. })
    }

    pub fn is_insertable(&self) -> bool {
        matches!(
            self.kind,
            AttributeKind::Column {
                insertable: true,
                ..
            }
        )
    }
}
