//! In-memory provider.
//!
//! Tables live in a shared [`MemoryDatabase`]; every scan is counted so
//! callers can check how many statements a query issued.

use compact_str::CompactString;
use futures_util::future::BoxFuture;
use hashbrown::HashMap;
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;

use super::{FieldReaders, NativeRow, ProviderAdapter, ReaderBinder, ReaderMethod};
use crate::error::{GraftError, Result};
use crate::exec::{AsyncConnection, Connection};
use crate::value::{Value, ValueKind};

pub const PROVIDER_NAME: &str = "memory";

#[derive(Debug, Clone)]
struct MemoryTable {
    columns: Arc<[(CompactString, CompactString)]>,
    rows: Vec<Arc<[Value]>>,
}

/// Named tables of rows, shared between connections.
#[derive(Debug, Default)]
pub struct MemoryDatabase {
    tables: RwLock<HashMap<CompactString, MemoryTable>>,
    fetches: Mutex<HashMap<CompactString, usize>>,
}

impl MemoryDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create (or replace) `name` with `(column, declared type)` columns.
    pub fn create_table(&self, name: &str, columns: &[(&str, &str)]) {
        let columns = columns
            .iter()
            .map(|(column, ty)| (CompactString::from(*column), CompactString::from(*ty)))
            .collect();
        self.tables.write().insert(
            name.into(),
            MemoryTable {
                columns,
                rows: Vec::new(),
            },
        );
    }

    pub fn insert(&self, table: &str, row: Vec<Value>) -> Result<()> {
        let mut tables = self.tables.write();
        let target = tables
            .get_mut(table)
            .ok_or_else(|| GraftError::ExecutionError(format!("no such table: {table}")))?;
        if row.len() != target.columns.len() {
            return Err(GraftError::Argument(format!(
                "table `{table}` has {} columns, row has {}",
                target.columns.len(),
                row.len()
            )));
        }
        target.rows.push(row.into());
        Ok(())
    }

    /// Scans of `table` since creation or the last [`reset_stats`](Self::reset_stats).
    pub fn fetch_count(&self, table: &str) -> usize {
        self.fetches.lock().get(table).copied().unwrap_or(0)
    }

    pub fn total_fetches(&self) -> usize {
        self.fetches.lock().values().sum()
    }

    pub fn reset_stats(&self) {
        self.fetches.lock().clear();
    }

    fn scan(&self, table: &str) -> Result<MemoryTable> {
        let snapshot = self
            .tables
            .read()
            .get(table)
            .cloned()
            .ok_or_else(|| GraftError::ExecutionError(format!("no such table: {table}")))?;
        *self.fetches.lock().entry(table.into()).or_insert(0) += 1;
        Ok(snapshot)
    }

    fn read(&self, table: &str, readers: &FieldReaders<MemoryRow>) -> Result<Vec<Value>> {
        let snapshot = self.scan(table)?;
        snapshot
            .rows
            .iter()
            .map(|values| {
                let row = MemoryRow {
                    columns: snapshot.columns.clone(),
                    values: values.clone(),
                };
                readers.read_record(table, &row)
            })
            .collect()
    }
}

/// A row of a [`MemoryDatabase`] table.
#[derive(Debug, Clone)]
pub struct MemoryRow {
    columns: Arc<[(CompactString, CompactString)]>,
    values: Arc<[Value]>,
}

impl MemoryRow {
    fn value(&self, index: usize) -> Result<&Value> {
        self.values
            .get(index)
            .ok_or_else(|| GraftError::ExecutionError(format!("column index {index} out of range")))
    }

    fn typed(&self, index: usize, kind: ValueKind) -> Result<Value> {
        let value = self.value(index)?;
        if value.is_null() || value.kind() == kind {
            Ok(value.clone())
        } else {
            Err(GraftError::Conversion(format!(
                "column `{}` holds {}, not {kind}",
                self.column_name(index),
                value.kind()
            )))
        }
    }

    fn get_i64(&self, index: usize) -> Result<Value> {
        self.typed(index, ValueKind::Int)
    }

    fn get_f64(&self, index: usize) -> Result<Value> {
        self.typed(index, ValueKind::Float)
    }

    fn get_bool(&self, index: usize) -> Result<Value> {
        self.typed(index, ValueKind::Bool)
    }

    fn get_string(&self, index: usize) -> Result<Value> {
        self.typed(index, ValueKind::Text)
    }

    fn get_bytes(&self, index: usize) -> Result<Value> {
        self.typed(index, ValueKind::Bytes)
    }

    fn get_value(&self, index: usize) -> Result<Value> {
        self.value(index).cloned()
    }
}

impl NativeRow for MemoryRow {
    fn column_count(&self) -> usize {
        self.columns.len()
    }

    fn column_name(&self, index: usize) -> &str {
        self.columns.get(index).map_or("", |(name, _)| name.as_str())
    }

    fn data_type_name(&self, index: usize) -> &str {
        self.columns.get(index).map_or("", |(_, ty)| ty.as_str())
    }

    fn provider_field_type(&self, index: usize) -> Option<&str> {
        self.values.get(index).map(|value| value.kind().as_str())
    }
}

/// Databases by name; the connection string selects one.
#[derive(Debug, Default)]
pub struct MemoryAdapter {
    databases: RwLock<HashMap<CompactString, Arc<MemoryDatabase>>>,
}

impl MemoryAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_database(self, name: &str, database: Arc<MemoryDatabase>) -> Self {
        self.add_database(name, database);
        self
    }

    pub fn add_database(&self, name: &str, database: Arc<MemoryDatabase>) {
        self.databases.write().insert(name.into(), database);
    }

    fn database(&self, name: &str) -> Result<Arc<MemoryDatabase>> {
        self.databases
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| GraftError::ExecutionError(format!("no in-memory database named `{name}`")))
    }
}

impl ProviderAdapter for MemoryAdapter {
    type Row = MemoryRow;

    fn name(&self) -> &str {
        PROVIDER_NAME
    }

    fn connection_type_name(&self) -> &str {
        "MemoryConnection"
    }

    fn reader_type_name(&self) -> &str {
        "MemoryRow"
    }

    fn reader_methods(&self) -> Vec<ReaderMethod<MemoryRow>> {
        vec![
            ReaderMethod::new("get_i64", MemoryRow::get_i64),
            ReaderMethod::new("get_f64", MemoryRow::get_f64),
            ReaderMethod::new("get_bool", MemoryRow::get_bool),
            ReaderMethod::new("get_string", MemoryRow::get_string),
            ReaderMethod::new("get_bytes", MemoryRow::get_bytes),
            ReaderMethod::new("get_value", MemoryRow::get_value),
        ]
    }

    fn on_connection_type_created(&self, binder: &mut ReaderBinder<'_, MemoryRow>) -> Result<()> {
        binder.set_provider_field("int", "get_i64", true)?;
        binder.set_provider_field("float", "get_f64", true)?;
        binder.set_provider_field("bool", "get_bool", true)?;
        binder.set_provider_field("text", "get_string", true)?;
        binder.set_provider_field("bytes", "get_bytes", true)?;
        binder.set_field(ValueKind::Float, Some("decimal"), "get_decimal", false)?;
        binder.set_generic("get_value", true)?;
        Ok(())
    }

    fn open(
        &self,
        connection_string: &str,
        readers: Arc<FieldReaders<MemoryRow>>,
    ) -> Result<Box<dyn Connection>> {
        Ok(Box::new(MemoryConnection {
            database: self.database(connection_string)?,
            readers,
        }))
    }

    fn open_async(
        &self,
        connection_string: &str,
        readers: Arc<FieldReaders<MemoryRow>>,
    ) -> Result<Box<dyn AsyncConnection>> {
        Ok(Box::new(MemoryConnection {
            database: self.database(connection_string)?,
            readers,
        }))
    }
}

/// A connection to a [`MemoryDatabase`], usable blocking or async.
#[derive(Debug, Clone)]
pub struct MemoryConnection {
    database: Arc<MemoryDatabase>,
    readers: Arc<FieldReaders<MemoryRow>>,
}

impl MemoryConnection {
    /// A connection with default readers, bypassing provider negotiation.
    pub fn open(database: Arc<MemoryDatabase>) -> Result<Self> {
        let adapter = MemoryAdapter::new();
        let methods = adapter.reader_methods();
        let mut readers = FieldReaders::new(adapter.reader_type_name());
        adapter.on_connection_type_created(&mut ReaderBinder::new(
            adapter.reader_type_name(),
            &methods,
            &mut readers,
        ))?;
        Ok(Self {
            database,
            readers: Arc::new(readers),
        })
    }

    pub fn database(&self) -> &Arc<MemoryDatabase> {
        &self.database
    }
}

impl Connection for MemoryConnection {
    fn provider_name(&self) -> &str {
        PROVIDER_NAME
    }

    fn fetch_table(&mut self, table: &str) -> Result<Vec<Value>> {
        self.database.read(table, &self.readers)
    }
}

impl AsyncConnection for MemoryConnection {
    fn provider_name(&self) -> &str {
        PROVIDER_NAME
    }

    fn fetch_table<'a>(&'a self, table: &'a str) -> BoxFuture<'a, Result<Vec<Value>>> {
        Box::pin(async move { self.database.read(table, &self.readers) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn database() -> Arc<MemoryDatabase> {
        let db = Arc::new(MemoryDatabase::new());
        db.create_table("people", &[("id", "INTEGER"), ("name", "TEXT"), ("score", "REAL")]);
        db.insert("people", vec![Value::Int(1), Value::from("ada"), Value::Int(9)])
            .unwrap();
        db.insert("people", vec![Value::Int(2), Value::Null, Value::Float(7.5)])
            .unwrap();
        db
    }

    #[test]
    fn rows_are_read_as_typed_records() {
        let db = database();
        let mut conn = MemoryConnection::open(db.clone()).unwrap();
        let rows = Connection::fetch_table(&mut conn, "people").unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].field("score"), Some(&Value::Float(9.0)));
        assert_eq!(rows[1].field("name"), Some(&Value::Null));
        assert_eq!(db.fetch_count("people"), 1);
    }

    #[test]
    fn scans_are_counted_per_table() {
        let db = database();
        let mut conn = MemoryConnection::open(db.clone()).unwrap();
        Connection::fetch_table(&mut conn, "people").unwrap();
        Connection::fetch_table(&mut conn, "people").unwrap();
        assert!(Connection::fetch_table(&mut conn, "missing").is_err());
        assert_eq!(db.fetch_count("people"), 2);
        assert_eq!(db.total_fetches(), 2);
        db.reset_stats();
        assert_eq!(db.total_fetches(), 0);
    }

    #[test]
    fn row_width_is_checked() {
        let db = database();
        let err = db.insert("people", vec![Value::Int(3)]).unwrap_err();
        assert!(matches!(err, GraftError::Argument(_)));
    }
}
