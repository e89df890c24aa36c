//! Relational storage used for fixtures and persisted-state assertions.
//!
//! The runner only needs three things from a table: insert a row, fetch every
//! row, and wipe the table back to its initial state (rows and identity
//! counter). Backends implement [`Storage`]; [`Table`] binds a table name to
//! a backend for the duration of one test case.

pub mod sqlite;

use std::future::Future;
use std::pin::Pin;

use serde_json::{Map, Value};
use thiserror::Error;

pub use sqlite::SqliteStorage;

/// One row as a plain column-to-value map.
pub type Row = Map<String, Value>;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("invalid table name `{0}`")]
    InvalidTableName(String),

    #[error("storage connection unavailable: {0}")]
    Unavailable(String),
}

/// Pluggable storage backend.
pub trait Storage: Send + Sync {
    /// Insert a fresh record and return it as stored, including its
    /// generated identifier.
    fn insert(
        &self,
        table: &str,
        row: Row,
    ) -> Pin<Box<dyn Future<Output = Result<Row, StorageError>> + Send + '_>>;

    /// Fetch every row of a table, in no particular order.
    fn fetch_all(
        &self,
        table: &str,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<Row>, StorageError>> + Send + '_>>;

    /// Delete every row and reset the identity counter.
    fn reset(&self, table: &str) -> Pin<Box<dyn Future<Output = Result<(), StorageError>> + Send + '_>>;
}

/// A table name bound to a storage backend.
#[derive(Clone, Copy)]
pub struct Table<'a> {
    storage: &'a dyn Storage,
    name: &'a str,
}

impl<'a> Table<'a> {
    pub fn bind(storage: &'a dyn Storage, name: &'a str) -> Self {
        Self { storage, name }
    }

    pub fn name(&self) -> &'a str {
        self.name
    }

    pub async fn insert(&self, row: Row) -> Result<Row, StorageError> {
        self.storage.insert(self.name, row).await
    }

    pub async fn fetch_all(&self) -> Result<Vec<Row>, StorageError> {
        self.storage.fetch_all(self.name).await
    }

    pub async fn reset(&self) -> Result<(), StorageError> {
        self.storage.reset(self.name).await
    }
}

/// Numeric `id` of a row, used to order fetched rows. Rows without a numeric
/// id sort last.
pub fn row_id(row: &Row) -> Option<f64> {
    match row.get("id")? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

/// Sorts rows ascending by numeric `id`.
pub fn sort_by_id(rows: &mut [Row]) {
    rows.sort_by(|a, b| match (row_id(a), row_id(b)) {
        (Some(x), Some(y)) => x.total_cmp(&y),
        (Some(_), None) => std::cmp::Ordering::Less,
        (None, Some(_)) => std::cmp::Ordering::Greater,
        (None, None) => std::cmp::Ordering::Equal,
    });
}
