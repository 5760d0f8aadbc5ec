//! Conversions between dalmux values and SQLite values

use chrono::{NaiveDate, NaiveDateTime};
use dalmux_core::{Value, ValueType};
use rusqlite::types::{ToSqlOutput, ValueRef};
use rusqlite::{Row, ToSql};

const DATE_FORMAT: &str = "%Y-%m-%d";
const TIMESTAMP_FORMATS: &[&str] = &["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"];

/// A borrowed value bound as a statement parameter.
pub struct SqlValue<'a>(pub &'a Value);

impl ToSql for SqlValue<'_> {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self.0 {
            Value::Null => ToSqlOutput::Borrowed(ValueRef::Null),
            Value::Boolean(b) => ToSqlOutput::from(i64::from(*b)),
            Value::Integer(i) => ToSqlOutput::from(*i),
            Value::Real(r) => ToSqlOutput::from(*r),
            Value::Text(s) => ToSqlOutput::Borrowed(ValueRef::Text(s.as_bytes())),
            Value::Date(d) => ToSqlOutput::from(d.format(DATE_FORMAT).to_string()),
            Value::Timestamp(t) => ToSqlOutput::from(t.format(TIMESTAMP_FORMATS[0]).to_string()),
            Value::Bytes(b) => ToSqlOutput::Borrowed(ValueRef::Blob(b)),
            Value::Entity(_) => {
                return Err(rusqlite::Error::ToSqlConversionFailure(
                    "entity values can not be bound as parameters".into(),
                ))
            }
        })
    }
}

/// Wrap parameters for `rusqlite::params_from_iter`
pub fn sql_params(values: &[Value]) -> impl Iterator<Item = SqlValue<'_>> {
    values.iter().map(SqlValue)
}

/// Read column `index` of `row` as a value of `value_type`
pub fn read_value(row: &Row<'_>, index: usize, value_type: ValueType) -> rusqlite::Result<Value> {
    let raw = row.get_ref(index)?;
    if let ValueRef::Null = raw {
        return Ok(Value::Null);
    }

    let mismatch = || {
        rusqlite::Error::InvalidColumnType(index, format!("{}", value_type), raw.data_type())
    };

    Ok(match value_type {
        ValueType::Boolean => match raw {
            ValueRef::Integer(i) => Value::Boolean(i != 0),
            _ => return Err(mismatch()),
        },
        ValueType::Integer => match raw {
            ValueRef::Integer(i) => Value::Integer(i),
            _ => return Err(mismatch()),
        },
        ValueType::Real => match raw {
            ValueRef::Real(r) => Value::Real(r),
            ValueRef::Integer(i) => Value::Real(i as f64),
            _ => return Err(mismatch()),
        },
        ValueType::Text => match raw {
            ValueRef::Text(t) => Value::Text(String::from_utf8_lossy(t).into_owned()),
            _ => return Err(mismatch()),
        },
        ValueType::Date => {
            let text = raw.as_str().map_err(|_| mismatch())?;
            let date = NaiveDate::parse_from_str(text, DATE_FORMAT).map_err(|_| mismatch())?;
            Value::Date(date)
        }
        ValueType::Timestamp => {
            let text = raw.as_str().map_err(|_| mismatch())?;
            let timestamp = TIMESTAMP_FORMATS
                .iter()
                .find_map(|format| NaiveDateTime::parse_from_str(text, format).ok())
                .ok_or_else(mismatch)?;
            Value::Timestamp(timestamp)
        }
        ValueType::Bytes => match raw {
            ValueRef::Blob(b) => Value::Bytes(b.to_vec()),
            _ => return Err(mismatch()),
        },
        ValueType::Entity => return Err(mismatch()),
    })
}

/// Read a single value of unknown type, used for function results and generated keys
pub fn read_any(row: &Row<'_>, index: usize) -> rusqlite::Result<Value> {
    Ok(match row.get_ref(index)? {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::Integer(i),
        ValueRef::Real(r) => Value::Real(r),
        ValueRef::Text(t) => Value::Text(String::from_utf8_lossy(t).into_owned()),
        ValueRef::Blob(b) => Value::Bytes(b.to_vec()),
    })
}
