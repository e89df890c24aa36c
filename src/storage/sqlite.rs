use std::future::Future;
use std::path::Path;
use std::pin::Pin;
use std::sync::{Arc, Mutex};

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use rusqlite::types::{Value as SqlValue, ValueRef};
use rusqlite::{Connection, params, params_from_iter};
use serde_json::{Number, Value};

use crate::config::DbConfig;

use super::{Row, Storage, StorageError};

/// [`Storage`] over a single SQLite connection.
///
/// Calls run on tokio's blocking pool; the connection is shared behind a
/// mutex so clones of this handle serialize on it.
#[derive(Clone)]
pub struct SqliteStorage {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStorage {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let conn = Connection::open(path)?;
        Self::from_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self, StorageError> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    /// Opens the database named by a complete `db` configuration group.
    /// The database name is the SQLite file path.
    pub fn connect(config: &DbConfig) -> Result<Self, StorageError> {
        tracing::info!(
            host = %config.host,
            user = %config.user,
            database = %config.name,
            "opening SQLite storage"
        );
        Self::open(&config.name)
    }

    pub fn from_connection(conn: Connection) -> Result<Self, StorageError> {
        conn.pragma_update(None, "encoding", "UTF-8")?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Runs raw SQL, typically schema setup.
    pub fn execute_batch(&self, sql: &str) -> Result<(), StorageError> {
        let conn = self.lock()?;
        conn.execute_batch(sql)?;
        Ok(())
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>, StorageError> {
        self.conn
            .lock()
            .map_err(|_| StorageError::Unavailable("connection lock poisoned".into()))
    }

    async fn with_conn<T, F>(&self, op: F) -> Result<T, StorageError>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T, StorageError> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let guard = conn
                .lock()
                .map_err(|_| StorageError::Unavailable("connection lock poisoned".into()))?;
            op(&guard)
        })
        .await
        .map_err(|err| StorageError::Unavailable(format!("blocking task failed: {err}")))?
    }
}

impl Storage for SqliteStorage {
    fn insert(
        &self,
        table: &str,
        row: Row,
    ) -> Pin<Box<dyn Future<Output = Result<Row, StorageError>> + Send + '_>> {
        let table = table.to_string();
        Box::pin(self.with_conn(move |conn| insert_row(conn, &table, &row)))
    }

    fn fetch_all(
        &self,
        table: &str,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<Row>, StorageError>> + Send + '_>> {
        let table = table.to_string();
        Box::pin(self.with_conn(move |conn| {
            let sql = format!("SELECT * FROM {}", quote_ident(&table)?);
            select_rows(conn, &sql, [])
        }))
    }

    fn reset(&self, table: &str) -> Pin<Box<dyn Future<Output = Result<(), StorageError>> + Send + '_>> {
        let table = table.to_string();
        Box::pin(self.with_conn(move |conn| reset_table(conn, &table)))
    }
}

fn insert_row(conn: &Connection, table: &str, row: &Row) -> Result<Row, StorageError> {
    let quoted = quote_ident(table)?;
    if row.is_empty() {
        conn.execute(&format!("INSERT INTO {quoted} DEFAULT VALUES"), [])?;
    } else {
        let columns = row
            .keys()
            .map(|column| quote_ident(column))
            .collect::<Result<Vec<_>, _>>()?;
        let placeholders = (1..=row.len()).map(|i| format!("?{i}")).collect::<Vec<_>>();
        let sql = format!(
            "INSERT INTO {quoted} ({}) VALUES ({})",
            columns.join(", "),
            placeholders.join(", ")
        );
        conn.execute(&sql, params_from_iter(row.values().map(to_sql_value)))?;
    }

    let rowid = conn.last_insert_rowid();
    let mut stored = select_rows(
        conn,
        &format!("SELECT * FROM {quoted} WHERE rowid = ?1"),
        params![rowid],
    )?;
    Ok(stored.pop().unwrap_or_else(|| row.clone()))
}

fn reset_table(conn: &Connection, table: &str) -> Result<(), StorageError> {
    let quoted = quote_ident(table)?;
    conn.execute(&format!("DELETE FROM {quoted}"), [])?;

    let has_sequence: bool = conn.query_row(
        "SELECT EXISTS (SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = 'sqlite_sequence')",
        [],
        |row| row.get(0),
    )?;
    if has_sequence {
        conn.execute("DELETE FROM sqlite_sequence WHERE name = ?1", params![table])?;
    }
    Ok(())
}

fn select_rows<P: rusqlite::Params>(conn: &Connection, sql: &str, params: P) -> Result<Vec<Row>, StorageError> {
    let mut stmt = conn.prepare(sql)?;
    let columns: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();
    let rows = stmt.query_map(params, |row| {
        let mut record = Row::new();
        for (index, column) in columns.iter().enumerate() {
            record.insert(column.clone(), from_sql_value(row.get_ref(index)?));
        }
        Ok(record)
    })?;
    let rows = rows.collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

fn quote_ident(name: &str) -> Result<String, StorageError> {
    if name.trim().is_empty() || name.contains('\0') {
        return Err(StorageError::InvalidTableName(name.to_string()));
    }
    Ok(format!("\"{}\"", name.replace('"', "\"\"")))
}

fn to_sql_value(value: &Value) -> SqlValue {
    match value {
        Value::Null => SqlValue::Null,
        Value::Bool(b) => SqlValue::Integer(i64::from(*b)),
        Value::Number(n) => match n.as_i64() {
            Some(i) => SqlValue::Integer(i),
            None => SqlValue::Real(n.as_f64().unwrap_or(f64::NAN)),
        },
        Value::String(s) => SqlValue::Text(s.clone()),
        other => SqlValue::Text(other.to_string()),
    }
}

fn from_sql_value(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::from(i),
        ValueRef::Real(f) => Number::from_f64(f).map(Value::Number).unwrap_or(Value::Null),
        ValueRef::Text(bytes) => Value::String(String::from_utf8_lossy(bytes).into_owned()),
        ValueRef::Blob(bytes) => Value::String(BASE64.encode(bytes)),
    }
}
