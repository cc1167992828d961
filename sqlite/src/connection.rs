//! Provider adapter and connections for rusqlite.

use compact_str::CompactString;
use futures_util::future::BoxFuture;
use graft_core::error::Result;
use graft_core::exec::{AsyncConnection, Connection};
use graft_core::provider::{FieldReaders, ProviderAdapter, ReaderBinder, ReaderMethod};
use graft_core::value::{Value, ValueKind};
use graft_core::{graft_profile_scope, graft_trace_fetch};
use parking_lot::Mutex;
use std::sync::Arc;

use crate::PROVIDER_NAME;
use crate::row::SqliteRow;

/// Binds rusqlite rows to graft's field readers.
#[derive(Debug, Default, Clone, Copy)]
pub struct SqliteAdapter;

impl ProviderAdapter for SqliteAdapter {
    type Row = SqliteRow;

    fn name(&self) -> &str {
        PROVIDER_NAME
    }

    fn connection_type_name(&self) -> &str {
        "rusqlite::Connection"
    }

    fn reader_type_name(&self) -> &str {
        "SqliteRow"
    }

    fn reader_methods(&self) -> Vec<ReaderMethod<SqliteRow>> {
        SqliteRow::reader_methods()
    }

    fn on_connection_type_created(&self, binder: &mut ReaderBinder<'_, SqliteRow>) -> Result<()> {
        binder.set_provider_field("integer", "get_i64", true)?;
        binder.set_provider_field("real", "get_f64", true)?;
        binder.set_provider_field("text", "get_string", true)?;
        binder.set_provider_field("blob", "get_bytes", true)?;
        binder.set_provider_to_type_field("integer", ValueKind::Bool, "get_bool", true)?;
        binder.set_field(ValueKind::Float, Some("numeric"), "get_numeric", false)?;
        binder.set_generic("get_value", true)?;
        Ok(())
    }

    fn open(
        &self,
        connection_string: &str,
        readers: Arc<FieldReaders<SqliteRow>>,
    ) -> Result<Box<dyn Connection>> {
        Ok(Box::new(SqliteConnection::new(
            rusqlite::Connection::open(connection_string)?,
            readers,
        )))
    }

    fn open_async(
        &self,
        connection_string: &str,
        readers: Arc<FieldReaders<SqliteRow>>,
    ) -> Result<Box<dyn AsyncConnection>> {
        Ok(Box::new(SqliteAsyncConnection::new(
            rusqlite::Connection::open(connection_string)?,
            readers,
        )))
    }
}

/// Read every row of `table` as records.
fn fetch(conn: &rusqlite::Connection, table: &str, readers: &FieldReaders<SqliteRow>) -> Result<Vec<Value>> {
    graft_profile_scope!("sqlite", "fetch_table");
    let sql = format!("SELECT * FROM \"{}\"", table.replace('"', "\"\""));
    let mut stmt = conn.prepare(&sql)?;
    let columns: Arc<[(CompactString, CompactString)]> = stmt
        .columns()
        .iter()
        .map(|column| {
            (
                CompactString::from(column.name()),
                CompactString::from(column.decl_type().unwrap_or_default()),
            )
        })
        .collect();

    let mut rows = stmt.query([])?;
    let mut out = Vec::new();
    while let Some(row) = rows.next()? {
        let values = (0..columns.len())
            .map(|index| row.get::<_, rusqlite::types::Value>(index))
            .collect::<rusqlite::Result<Vec<_>>>()?;
        let native = SqliteRow {
            columns: columns.clone(),
            values,
        };
        out.push(readers.read_record(table, &native)?);
    }
    graft_trace_fetch!(PROVIDER_NAME, table, out.len());
    Ok(out)
}

/// A blocking rusqlite connection.
pub struct SqliteConnection {
    conn: rusqlite::Connection,
    readers: Arc<FieldReaders<SqliteRow>>,
}

impl core::fmt::Debug for SqliteConnection {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("SqliteConnection")
            .field("path", &self.conn.path())
            .finish_non_exhaustive()
    }
}

impl SqliteConnection {
    pub fn new(conn: rusqlite::Connection, readers: Arc<FieldReaders<SqliteRow>>) -> Self {
        Self { conn, readers }
    }

    pub fn inner(&self) -> &rusqlite::Connection {
        &self.conn
    }
}

impl Connection for SqliteConnection {
    fn provider_name(&self) -> &str {
        PROVIDER_NAME
    }

    fn fetch_table(&mut self, table: &str) -> Result<Vec<Value>> {
        fetch(&self.conn, table, &self.readers)
    }
}

/// A rusqlite connection shared behind a lock; reads complete on the
/// polling thread.
pub struct SqliteAsyncConnection {
    conn: Mutex<rusqlite::Connection>,
    readers: Arc<FieldReaders<SqliteRow>>,
}

impl core::fmt::Debug for SqliteAsyncConnection {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("SqliteAsyncConnection").finish_non_exhaustive()
    }
}

impl SqliteAsyncConnection {
    pub fn new(conn: rusqlite::Connection, readers: Arc<FieldReaders<SqliteRow>>) -> Self {
        Self {
            conn: Mutex::new(conn),
            readers,
        }
    }

    fn fetch_locked(&self, table: &str) -> Result<Vec<Value>> {
        let conn = self.conn.lock();
        fetch(&conn, table, &self.readers)
    }
}

impl AsyncConnection for SqliteAsyncConnection {
    fn provider_name(&self) -> &str {
        PROVIDER_NAME
    }

    fn fetch_table<'a>(&'a self, table: &'a str) -> BoxFuture<'a, Result<Vec<Value>>> {
        Box::pin(async move { self.fetch_locked(table) })
    }
}
