//! Native rows read through rusqlite.

use compact_str::CompactString;
use graft_core::error::{GraftError, Result};
use graft_core::provider::{NativeRow, ReaderMethod};
use graft_core::value::Value;
use rusqlite::types::Value as SqlValue;
use std::sync::Arc;

/// Storage class names, as SQLite's `typeof()` reports them.
pub(crate) fn storage_class(value: &SqlValue) -> &'static str {
    match value {
        SqlValue::Null => "null",
        SqlValue::Integer(_) => "integer",
        SqlValue::Real(_) => "real",
        SqlValue::Text(_) => "text",
        SqlValue::Blob(_) => "blob",
    }
}

/// One row of a result set, with the statement's column metadata.
#[derive(Debug, Clone)]
pub struct SqliteRow {
    pub(crate) columns: Arc<[(CompactString, CompactString)]>,
    pub(crate) values: Vec<SqlValue>,
}

impl SqliteRow {
    fn value(&self, index: usize) -> Result<&SqlValue> {
        self.values
            .get(index)
            .ok_or_else(|| GraftError::ExecutionError(format!("column index {index} out of range")))
    }

    fn mismatch(&self, index: usize, value: &SqlValue, expected: &str) -> GraftError {
        GraftError::Conversion(format!(
            "column `{}` holds {}, not {expected}",
            self.column_name(index),
            storage_class(value)
        ))
    }

    fn get_i64(&self, index: usize) -> Result<Value> {
        match self.value(index)? {
            SqlValue::Integer(n) => Ok(Value::Int(*n)),
            SqlValue::Null => Ok(Value::Null),
            other => Err(self.mismatch(index, other, "integer")),
        }
    }

    fn get_bool(&self, index: usize) -> Result<Value> {
        match self.value(index)? {
            SqlValue::Integer(n) => Ok(Value::Bool(*n != 0)),
            SqlValue::Null => Ok(Value::Null),
            other => Err(self.mismatch(index, other, "integer")),
        }
    }

    fn get_f64(&self, index: usize) -> Result<Value> {
        match self.value(index)? {
            SqlValue::Real(f) => Ok(Value::Float(*f)),
            SqlValue::Null => Ok(Value::Null),
            other => Err(self.mismatch(index, other, "real")),
        }
    }

    fn get_string(&self, index: usize) -> Result<Value> {
        match self.value(index)? {
            SqlValue::Text(text) => Ok(Value::from(text.as_str())),
            SqlValue::Null => Ok(Value::Null),
            other => Err(self.mismatch(index, other, "text")),
        }
    }

    fn get_bytes(&self, index: usize) -> Result<Value> {
        match self.value(index)? {
            SqlValue::Blob(bytes) => Ok(Value::Bytes(bytes.as_slice().into())),
            SqlValue::Null => Ok(Value::Null),
            other => Err(self.mismatch(index, other, "blob")),
        }
    }

    fn get_value(&self, index: usize) -> Result<Value> {
        Ok(match self.value(index)? {
            SqlValue::Null => Value::Null,
            SqlValue::Integer(n) => Value::Int(*n),
            SqlValue::Real(f) => Value::Float(*f),
            SqlValue::Text(text) => Value::from(text.as_str()),
            SqlValue::Blob(bytes) => Value::Bytes(bytes.as_slice().into()),
        })
    }

    pub(crate) fn reader_methods() -> Vec<ReaderMethod<SqliteRow>> {
        vec![
            ReaderMethod::new("get_i64", SqliteRow::get_i64),
            ReaderMethod::new("get_bool", SqliteRow::get_bool),
            ReaderMethod::new("get_f64", SqliteRow::get_f64),
            ReaderMethod::new("get_string", SqliteRow::get_string),
            ReaderMethod::new("get_bytes", SqliteRow::get_bytes),
            ReaderMethod::new("get_value", SqliteRow::get_value),
        ]
    }
}

impl NativeRow for SqliteRow {
    fn column_count(&self) -> usize {
        self.columns.len()
    }

    fn column_name(&self, index: usize) -> &str {
        self.columns.get(index).map_or("", |(name, _)| name.as_str())
    }

    fn data_type_name(&self, index: usize) -> &str {
        self.columns.get(index).map_or("", |(_, decl)| decl.as_str())
    }

    fn provider_field_type(&self, index: usize) -> Option<&str> {
        self.values.get(index).map(storage_class)
    }
}
