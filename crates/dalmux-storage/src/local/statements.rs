//! Synchronous statement execution on one physical connection
//!
//! [`Executor`] borrows everything one operation needs. It never opens or
//! closes transactions; the owning connection decides that.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use dalmux_core::domain::AttributeKind;
use dalmux_core::{
    Attribute, AttributeDefinition, Condition, Domain, Entity, EntityDefinition, Error, Key,
    KeyGenerator, Operator, Result, Select, Value,
};
use rusqlite::{params_from_iter, Connection};
use tracing::debug;

use crate::database::sql_error;
use crate::dialect::Dialect;
use crate::operations::DatabaseOperations;
use crate::sql::{self, SqlFragment};
use crate::types::{read_any, read_value, sql_params};

type Row = BTreeMap<String, Value>;

pub(crate) struct Executor<'a> {
    pub connection: &'a Connection,
    pub dialect: &'a dyn Dialect,
    pub domain: &'a Domain,
    pub operations: &'a DatabaseOperations,
    pub optimistic_locking: bool,
}

impl Executor<'_> {
    fn execute(&self, fragment: &SqlFragment) -> Result<usize> {
        debug!(
            "[Local] {} ({} parameters)",
            fragment.sql,
            fragment.params.len()
        );
        let mut statement = self.connection.prepare_cached(&fragment.sql).map_err(sql_error)?;
        statement
            .execute(params_from_iter(sql_params(&fragment.params)))
            .map_err(sql_error)
    }

    /// First column of the first row of an ad hoc query
    fn query_single(&self, sql: &str) -> Result<Value> {
        debug!("[Local] {}", sql);
        self.connection
            .query_row(sql, [], |row| read_any(row, 0))
            .map_err(sql_error)
    }

    fn query_rows(&self, columns: &[&AttributeDefinition], fragment: &SqlFragment) -> Result<Vec<Row>> {
        debug!(
            "[Local] {} ({} parameters)",
            fragment.sql,
            fragment.params.len()
        );
        let mut statement = self.connection.prepare_cached(&fragment.sql).map_err(sql_error)?;
        let rows = statement
            .query_map(params_from_iter(sql_params(&fragment.params)), |row| {
                let mut values = Row::new();
                for (index, column) in columns.iter().enumerate() {
                    values.insert(
                        column.name().to_string(),
                        read_value(row, index, column.value_type())?,
                    );
                }
                Ok(values)
            })
            .map_err(sql_error)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(sql_error)
    }

    fn writable(&self, definition: &EntityDefinition) -> Result<()> {
        if definition.is_read_only() {
            return Err(Error::Unsupported(format!(
                "{} is read only",
                definition.entity_type()
            )));
        }
        Ok(())
    }

    pub fn select(&self, select: &Select) -> Result<Vec<Entity>> {
        let definition = self.domain.definition(select.entity_type())?;
        let columns = sql::selected_columns(&definition, select)?;
        let fragment = sql::select_statement(&definition, &columns, select, self.dialect)?;

        let mut rows = self.query_rows(&columns, &fragment)?;
        self.fetch_references(&definition, &mut rows, select.fetch_depth_value())?;

        Ok(rows
            .into_iter()
            .map(|values| Entity::loaded(Arc::clone(&definition), values))
            .collect())
    }

    /// Materialize the entities referenced by each row's foreign keys.
    ///
    /// `depth` overrides the fetch depth of every foreign key; referenced
    /// entities are themselves fetched one level shallower.
    fn fetch_references(
        &self,
        definition: &EntityDefinition,
        rows: &mut [Row],
        depth: Option<usize>,
    ) -> Result<()> {
        for foreign_key in definition.foreign_keys() {
            let AttributeKind::ForeignKey {
                referenced_type,
                references,
                fetch_depth,
            } = foreign_key.kind()
            else {
                continue;
            };
            let depth = depth.unwrap_or(*fetch_depth);
            if depth == 0 {
                continue;
            }

            let referenced = self.domain.definition(referenced_type)?;
            let mut fetched: HashMap<Vec<Value>, Option<Entity>> = HashMap::new();

            for row in rows.iter_mut() {
                let values: Option<Vec<Value>> = references
                    .iter()
                    .map(|(local, _)| row.get(local).filter(|v| !v.is_null()).cloned())
                    .collect();
                let Some(values) = values else {
                    continue;
                };

                let entity = match fetched.get(&values).cloned() {
                    Some(entity) => entity,
                    None => {
                        let entity = self.select_referenced(&referenced, references, &values, depth - 1)?;
                        fetched.insert(values, entity.clone());
                        entity
                    }
                };
                if let Some(entity) = entity {
                    row.insert(foreign_key.name().to_string(), Value::Entity(Box::new(entity)));
                }
            }
        }
        Ok(())
    }

    fn select_referenced(
        &self,
        referenced: &EntityDefinition,
        references: &[(String, String)],
        values: &[Value],
        depth: usize,
    ) -> Result<Option<Entity>> {
        let conditions = references
            .iter()
            .zip(values)
            .map(|((_, target), value)| -> Result<Condition> {
                let attribute = referenced.attribute(target).ok_or_else(|| {
                    Error::Configuration(format!(
                        "{} has no attribute '{}'",
                        referenced.entity_type(),
                        target
                    ))
                })?;
                Ok(Condition::new(attribute, Operator::Equal, vec![value.clone()], true)?)
            })
            .collect::<Result<Vec<_>>>()?;

        let select = Select::new(Condition::and_all(conditions)?).fetch_depth(depth);
        Ok(self.select(&select)?.into_iter().next())
    }

    pub fn count(&self, condition: &Condition) -> Result<u64> {
        let definition = self.domain.definition(condition.entity_type())?;
        let fragment = sql::count_statement(&definition, condition)?;
        debug!("[Local] {} ({} parameters)", fragment.sql, fragment.params.len());
        let count: i64 = self
            .connection
            .query_row(
                &fragment.sql,
                params_from_iter(sql_params(&fragment.params)),
                |row| row.get(0),
            )
            .map_err(sql_error)?;
        Ok(count.max(0) as u64)
    }

    pub fn select_values(&self, attribute: &Attribute, condition: &Condition) -> Result<Vec<Value>> {
        let definition = self.domain.definition(attribute.entity_type())?;
        let fragment = sql::select_values_statement(&definition, attribute, condition)?;
        debug!("[Local] {} ({} parameters)", fragment.sql, fragment.params.len());

        let mut statement = self.connection.prepare_cached(&fragment.sql).map_err(sql_error)?;
        let values = statement
            .query_map(params_from_iter(sql_params(&fragment.params)), |row| {
                read_value(row, 0, attribute.value_type())
            })
            .map_err(sql_error)?;
        values.collect::<rusqlite::Result<Vec<_>>>().map_err(sql_error)
    }

    pub fn insert(&self, entity: &Entity) -> Result<Key> {
        let definition = Arc::clone(entity.definition());
        self.writable(&definition)?;
        entity.validate()?;

        let mut entity = entity.clone();
        let key_column = definition.primary_key().next().map(|c| c.attribute().clone());

        match (definition.key_generator(), &key_column) {
            (KeyGenerator::Sequence(sequence), Some(column)) => {
                let value = self.query_single(&self.dialect.sequence_query(sequence)?)?;
                entity.put(column, value)?;
            }
            (KeyGenerator::Queried(query), Some(column)) => {
                let value = self.query_single(query)?;
                entity.put(column, value)?;
            }
            _ => {}
        }

        let values: Vec<(&AttributeDefinition, Value)> = definition
            .columns()
            .filter(|c| c.is_insertable() && entity.contains(c.attribute()))
            .map(|c| (c, entity.get(c.attribute())))
            .filter(|(c, v)| !(c.is_primary_key() && v.is_null()))
            .collect();
        self.execute(&sql::insert_statement(&definition, &values))?;

        if let (KeyGenerator::Identity, Some(column)) = (definition.key_generator(), &key_column) {
            if entity.get(column).is_null() {
                let column_name = sql::column_name(&definition, column)?;
                let query = self
                    .dialect
                    .auto_increment_query(definition.table_name(), column_name)?;
                let value = self.query_single(&query)?;
                entity.put(column, value)?;
            }
        }

        entity.key()
    }

    pub fn update(&self, entity: &Entity) -> Result<Entity> {
        let definition = Arc::clone(entity.definition());
        self.writable(&definition)?;
        entity.validate_modified()?;

        let mut columns = Vec::new();
        for attribute in entity.modified_attributes() {
            let attribute_definition = definition.definition_of(attribute)?;
            if !attribute_definition.is_column() {
                continue;
            }
            if !attribute_definition.is_updatable() {
                return Err(Error::Unsupported(format!(
                    "{} can not be updated",
                    attribute
                )));
            }
            columns.push(attribute_definition);
        }

        let original_key = entity.original_key()?;
        if columns.is_empty() {
            return Err(Error::NothingToUpdate(original_key.to_string()));
        }

        if self.optimistic_locking {
            self.check_unmodified(entity, &original_key)?;
        }

        let values: Vec<(&AttributeDefinition, Value)> = columns
            .into_iter()
            .map(|c| (c, entity.get(c.attribute())))
            .collect();
        let affected = self.execute(&sql::update_statement(&definition, &values, &original_key)?)?;
        if affected != 1 {
            return Err(Error::RowCountMismatch {
                expected: 1,
                actual: affected as u64,
            });
        }

        self.select(&Select::new(Condition::key(&entity.key()?)?))?
            .into_iter()
            .next()
            .ok_or(Error::NotFound)
    }

    /// Re-read the stored row, locking it where the dialect can, and compare
    /// it with the originals the entity was loaded with
    fn check_unmodified(&self, entity: &Entity, original_key: &Key) -> Result<()> {
        let select = Select::new(Condition::key(original_key)?)
            .for_update()
            .fetch_depth(0);
        let current = self.select(&select)?.into_iter().next();

        let Some(current) = current else {
            debug!("[Local] {} was deleted by another user", original_key);
            return Err(Error::RowModified {
                entity: Box::new(entity.clone()),
                current: None,
            });
        };

        let modified = entity
            .definition()
            .columns()
            .map(|c| c.attribute())
            .filter(|a| entity.contains(a))
            .find(|a| entity.original(a) != current.get(a));

        if let Some(attribute) = modified {
            debug!(
                "[Local] {} was modified by another user ({} differs)",
                original_key, attribute
            );
            return Err(Error::RowModified {
                entity: Box::new(entity.clone()),
                current: Some(Box::new(current)),
            });
        }
        Ok(())
    }

    pub fn delete(&self, keys: &[Key]) -> Result<()> {
        let mut by_type: Vec<(&dalmux_core::EntityType, Vec<Key>)> = Vec::new();
        for key in keys {
            match by_type.iter_mut().find(|(t, _)| *t == key.entity_type()) {
                Some((_, group)) => group.push(key.clone()),
                None => by_type.push((key.entity_type(), vec![key.clone()])),
            }
        }

        let mut deleted = 0u64;
        for (entity_type, group) in by_type {
            let definition = self.domain.definition(entity_type)?;
            self.writable(&definition)?;
            let fragment = sql::delete_statement(&definition, &Condition::keys(&group)?)?;
            deleted += self.execute(&fragment)? as u64;
        }

        if deleted != keys.len() as u64 {
            return Err(Error::RowCountMismatch {
                expected: keys.len() as u64,
                actual: deleted,
            });
        }
        Ok(())
    }

    pub fn delete_where(&self, condition: &Condition) -> Result<u64> {
        let definition = self.domain.definition(condition.entity_type())?;
        self.writable(&definition)?;
        let affected = self.execute(&sql::delete_statement(&definition, condition)?)?;
        Ok(affected as u64)
    }

    pub fn execute_function(&self, function_id: &str, arguments: &[Value]) -> Result<Value> {
        debug!("[Local] Executing function {}", function_id);
        self.operations
            .function(function_id)?
            .execute(self.connection, arguments)
    }

    pub fn execute_procedure(&self, procedure_id: &str, arguments: &[Value]) -> Result<()> {
        debug!("[Local] Executing procedure {}", procedure_id);
        self.operations
            .procedure(procedure_id)?
            .execute(self.connection, arguments)
    }

    pub fn fill_report(&self, report_id: &str, parameters: &[Value]) -> Result<Value> {
        debug!("[Local] Filling report {}", report_id);
        self.operations
            .report(report_id)?
            .fill(self.connection, parameters)
    }
}
