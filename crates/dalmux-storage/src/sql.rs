//! Translation of conditions and entity operations into parameterised SQL
//!
//! Every builder returns a [`SqlFragment`]: the statement text with `?`
//! placeholders and the positional parameters in the same order. Values never
//! end up in the statement text.

use dalmux_core::condition::{AttributeCondition, Combination};
use dalmux_core::domain::AttributeKind;
use dalmux_core::{
    Attribute, AttributeDefinition, Condition, Conjunction, Direction, EntityDefinition, Error,
    Key, Operator, OrderBy, Result, Select, Value,
};

use crate::dialect::Dialect;

/// Statement text plus positional parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct SqlFragment {
    pub sql: String,
    pub params: Vec<Value>,
}

impl SqlFragment {
    fn new(sql: impl Into<String>, params: Vec<Value>) -> Self {
        Self {
            sql: sql.into(),
            params,
        }
    }
}

/// Column name of a stored attribute of `definition`
pub fn column_name<'a>(definition: &'a EntityDefinition, attribute: &Attribute) -> Result<&'a str> {
    definition
        .definition_of(attribute)?
        .column_name_value()
        .ok_or_else(|| {
            Error::Unsupported(format!(
                "{} is not a stored column and can not be used in SQL",
                attribute
            ))
        })
}

/// WHERE clause body for `condition`, `None` when it matches every row
pub fn where_clause(definition: &EntityDefinition, condition: &Condition) -> Result<Option<SqlFragment>> {
    if let Condition::All(_) = condition {
        return Ok(None);
    }
    let mut params = Vec::new();
    let sql = condition_sql(definition, condition, &mut params)?;
    Ok(Some(SqlFragment::new(sql, params)))
}

fn condition_sql(
    definition: &EntityDefinition,
    condition: &Condition,
    params: &mut Vec<Value>,
) -> Result<String> {
    if condition.entity_type() != definition.entity_type() {
        return Err(Error::Configuration(format!(
            "condition on {} used with {}",
            condition.entity_type(),
            definition.entity_type()
        )));
    }

    match condition {
        Condition::All(_) => Ok("1 = 1".to_string()),
        Condition::Attribute(condition) => attribute_sql(definition, condition, params),
        Condition::Combination(combination) => combination_sql(definition, combination, params),
    }
}

fn combination_sql(
    definition: &EntityDefinition,
    combination: &Combination,
    params: &mut Vec<Value>,
) -> Result<String> {
    let separator = match combination.conjunction() {
        Conjunction::And => " AND ",
        Conjunction::Or => " OR ",
    };
    let parts = combination
        .conditions()
        .iter()
        .map(|c| condition_sql(definition, c, params))
        .collect::<Result<Vec<_>>>()?;
    Ok(format!("({})", parts.join(separator)))
}

fn attribute_sql(
    definition: &EntityDefinition,
    condition: &AttributeCondition,
    params: &mut Vec<Value>,
) -> Result<String> {
    let column = column_name(definition, condition.attribute())?;
    let values = condition.values();

    if condition.is_null_check() {
        return Ok(match condition.operator() {
            Operator::NotEqual => format!("{} IS NOT NULL", column),
            _ => format!("{} IS NULL", column),
        });
    }

    let upper = !condition.is_case_sensitive()
        && values.iter().all(|v| matches!(v, Value::Text(_)));
    let identifier = if upper {
        format!("UPPER({})", column)
    } else {
        column.to_string()
    };
    let placeholder = if upper { "UPPER(?)" } else { "?" };
    let placeholders = |count: usize| vec![placeholder; count].join(", ");

    params.extend(values.iter().cloned());

    let sql = match condition.operator() {
        Operator::Equal if values.len() == 1 => format!("{} = {}", identifier, placeholder),
        Operator::Equal => format!("{} IN ({})", identifier, placeholders(values.len())),
        Operator::NotEqual if values.len() == 1 => format!("{} <> {}", identifier, placeholder),
        Operator::NotEqual => format!("{} NOT IN ({})", identifier, placeholders(values.len())),
        Operator::LessThan => format!("{} < {}", identifier, placeholder),
        Operator::LessThanOrEqual => format!("{} <= {}", identifier, placeholder),
        Operator::GreaterThan => format!("{} > {}", identifier, placeholder),
        Operator::GreaterThanOrEqual => format!("{} >= {}", identifier, placeholder),
        Operator::Between => format!(
            "({0} >= {1} AND {0} <= {1})",
            identifier, placeholder
        ),
        Operator::BetweenExclusive => format!(
            "({0} > {1} AND {0} < {1})",
            identifier, placeholder
        ),
        Operator::NotBetween => format!(
            "({0} < {1} OR {0} > {1})",
            identifier, placeholder
        ),
        Operator::NotBetweenExclusive => format!(
            "({0} <= {1} OR {0} >= {1})",
            identifier, placeholder
        ),
        Operator::Like => format!("{} LIKE {}", identifier, placeholder),
        Operator::NotLike => format!("{} NOT LIKE {}", identifier, placeholder),
    };
    Ok(sql)
}

fn append_where(sql: &mut String, params: &mut Vec<Value>, clause: Option<SqlFragment>) {
    if let Some(clause) = clause {
        sql.push_str(" WHERE ");
        sql.push_str(&clause.sql);
        params.extend(clause.params);
    }
}

/// Columns read by `select`: every column, or the primary key plus the
/// requested attributes (a foreign key requests its reference columns).
pub fn selected_columns<'a>(
    definition: &'a EntityDefinition,
    select: &Select,
) -> Result<Vec<&'a AttributeDefinition>> {
    let requested = select.selected_attributes();
    if requested.is_empty() {
        return Ok(definition.columns().collect());
    }

    let mut names: Vec<String> = Vec::new();
    for attribute in requested {
        let attribute_definition = definition.definition_of(attribute)?;
        match attribute_definition.kind() {
            AttributeKind::ForeignKey { references, .. } => {
                names.extend(references.iter().map(|(local, _)| local.clone()));
            }
            AttributeKind::Derived { sources, .. } => {
                names.extend(sources.iter().cloned());
            }
            AttributeKind::Column { .. } => {
                names.push(attribute.name().to_string());
            }
        }
    }

    Ok(definition
        .columns()
        .filter(|c| c.is_primary_key() || names.iter().any(|n| n == c.name()))
        .collect())
}

fn order_by_clause(definition: &EntityDefinition, order_by: &[OrderBy]) -> Result<String> {
    let parts = order_by
        .iter()
        .map(|o| -> Result<String> {
            let column = column_name(definition, &o.attribute)?;
            Ok(match o.direction {
                Direction::Ascending => column.to_string(),
                Direction::Descending => format!("{} DESC", column),
            })
        })
        .collect::<Result<Vec<_>>>()?;
    Ok(parts.join(", "))
}

/// SELECT for `select`, reading `columns` in order
pub fn select_statement(
    definition: &EntityDefinition,
    columns: &[&AttributeDefinition],
    select: &Select,
    dialect: &dyn Dialect,
) -> Result<SqlFragment> {
    let column_list = columns
        .iter()
        .filter_map(|c| c.column_name_value())
        .collect::<Vec<_>>()
        .join(", ");

    let mut sql = format!("SELECT {} FROM {}", column_list, definition.table_name());
    let mut params = Vec::new();
    append_where(&mut sql, &mut params, where_clause(definition, select.condition())?);

    let order_by = if select.order_by_list().is_empty() {
        definition.order_by()
    } else {
        select.order_by_list()
    };
    if !order_by.is_empty() {
        sql.push_str(" ORDER BY ");
        sql.push_str(&order_by_clause(definition, order_by)?);
    }

    let paging = dialect.limit_offset_clause(select.limit_value(), select.offset_value());
    if !paging.is_empty() {
        sql.push(' ');
        sql.push_str(&paging);
    }

    if select.is_for_update() {
        if let Some(lock) = dialect.lock_clause() {
            sql.push(' ');
            sql.push_str(lock);
        }
    }

    Ok(SqlFragment::new(sql, params))
}

/// INSERT of the given column values
pub fn insert_statement(
    definition: &EntityDefinition,
    values: &[(&AttributeDefinition, Value)],
) -> SqlFragment {
    if values.is_empty() {
        return SqlFragment::new(
            format!("INSERT INTO {} DEFAULT VALUES", definition.table_name()),
            Vec::new(),
        );
    }

    let columns = values
        .iter()
        .filter_map(|(c, _)| c.column_name_value())
        .collect::<Vec<_>>();
    SqlFragment::new(
        format!(
            "INSERT INTO {} ({}) VALUES ({})",
            definition.table_name(),
            columns.join(", "),
            vec!["?"; columns.len()].join(", ")
        ),
        values.iter().map(|(_, v)| v.clone()).collect(),
    )
}

/// UPDATE of the given column values on the row identified by `key`
pub fn update_statement(
    definition: &EntityDefinition,
    values: &[(&AttributeDefinition, Value)],
    key: &Key,
) -> Result<SqlFragment> {
    let assignments = values
        .iter()
        .filter_map(|(c, _)| c.column_name_value())
        .map(|c| format!("{} = ?", c))
        .collect::<Vec<_>>();

    let mut sql = format!(
        "UPDATE {} SET {}",
        definition.table_name(),
        assignments.join(", ")
    );
    let mut params: Vec<Value> = values.iter().map(|(_, v)| v.clone()).collect();
    append_where(
        &mut sql,
        &mut params,
        where_clause(definition, &Condition::key(key)?)?,
    );
    Ok(SqlFragment::new(sql, params))
}

pub fn delete_statement(definition: &EntityDefinition, condition: &Condition) -> Result<SqlFragment> {
    let mut sql = format!("DELETE FROM {}", definition.table_name());
    let mut params = Vec::new();
    append_where(&mut sql, &mut params, where_clause(definition, condition)?);
    Ok(SqlFragment::new(sql, params))
}

pub fn count_statement(definition: &EntityDefinition, condition: &Condition) -> Result<SqlFragment> {
    let mut sql = format!("SELECT COUNT(*) FROM {}", definition.table_name());
    let mut params = Vec::new();
    append_where(&mut sql, &mut params, where_clause(definition, condition)?);
    Ok(SqlFragment::new(sql, params))
}

/// Distinct non-null values of one column, ordered
pub fn select_values_statement(
    definition: &EntityDefinition,
    attribute: &Attribute,
    condition: &Condition,
) -> Result<SqlFragment> {
    let column = column_name(definition, attribute)?;
    let mut sql = format!("SELECT DISTINCT {0} FROM {1} WHERE {0} IS NOT NULL", column, definition.table_name());
    let mut params = Vec::new();
    if let Some(clause) = where_clause(definition, condition)? {
        sql.push_str(" AND ");
        sql.push_str(&clause.sql);
        params = clause.params;
    }
    sql.push_str(&format!(" ORDER BY {}", column));
    Ok(SqlFragment::new(sql, params))
}
