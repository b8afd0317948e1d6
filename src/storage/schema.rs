//! Store definitions, SQLite pragmas and table layout.
//!
//! Every store shares two tables:
//! - `records`: one row per (store, key) holding the JSON value
//! - `index_entries`: one row per (store, index, index key, primary key)
//!
//! Keys are stored in their order-preserving encoding (see [`crate::key`]).

use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::Path;
use std::time::Duration;

use super::StorageError;
use crate::key::Key;

/// A secondary index over one field of a store's values.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexSchema {
    pub name: String,
    /// Dotted path of the indexed field, e.g. `"favorite"` or `"meta.pid"`.
    pub key_path: String,
}

/// A named collection of records.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreSchema {
    pub name: String,
    /// Path of the in-line primary key. `None` means keys are supplied
    /// with each put.
    #[serde(default)]
    pub key_path: Option<String>,
    #[serde(default)]
    pub indexes: Vec<IndexSchema>,
}

impl StoreSchema {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            key_path: None,
            indexes: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_key_path(mut self, key_path: impl Into<String>) -> Self {
        self.key_path = Some(key_path.into());
        self
    }

    #[must_use]
    pub fn with_index(mut self, name: impl Into<String>, key_path: impl Into<String>) -> Self {
        self.indexes.push(IndexSchema {
            name: name.into(),
            key_path: key_path.into(),
        });
        self
    }

    pub fn index(&self, name: &str) -> Option<&IndexSchema> {
        self.indexes.iter().find(|index| index.name == name)
    }

    /// Extract the in-line primary key of `value`, if the store has one.
    pub fn extract_key(&self, value: &Value) -> Option<Key> {
        let path = self.key_path.as_deref()?;
        value_at_path(value, path).and_then(Key::from_json)
    }
}

/// The full set of stores a database is opened with.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schema {
    pub stores: Vec<StoreSchema>,
}

impl Schema {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_store(mut self, store: StoreSchema) -> Self {
        self.stores.push(store);
        self
    }

    pub fn store(&self, name: &str) -> Option<&StoreSchema> {
        self.stores.iter().find(|store| store.name == name)
    }

    /// Load a schema from a JSON file.
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self, StorageError> {
        let raw = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }
}

/// Resolve a dotted key path inside a JSON value.
pub fn value_at_path<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.')
        .try_fold(value, |current, segment| current.as_object()?.get(segment))
}

/// Apply pragmas for the writer connection.
///
/// `synchronous=FULL` makes a returned `COMMIT` the durability signal.
pub fn apply_pragmas(conn: &Connection, busy_timeout: Duration) -> Result<(), rusqlite::Error> {
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.pragma_update(None, "synchronous", "FULL")?;
    conn.busy_timeout(busy_timeout)?;
    Ok(())
}

/// Apply pragmas for read-only connections.
pub fn apply_reader_pragmas(
    conn: &Connection,
    busy_timeout: Duration,
) -> Result<(), rusqlite::Error> {
    conn.busy_timeout(busy_timeout)?;
    Ok(())
}

/// Create tables if they do not exist yet.
pub fn initialize_schema(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS stores (
            name       TEXT PRIMARY KEY,
            key_path   TEXT,
            created_at INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS records (
            store TEXT NOT NULL,
            key   BLOB NOT NULL,
            value TEXT NOT NULL,
            PRIMARY KEY (store, key)
        ) WITHOUT ROWID;

        CREATE TABLE IF NOT EXISTS index_entries (
            store TEXT NOT NULL,
            idx   TEXT NOT NULL,
            ikey  BLOB NOT NULL,
            pkey  BLOB NOT NULL,
            PRIMARY KEY (store, idx, ikey, pkey)
        ) WITHOUT ROWID;

        CREATE INDEX IF NOT EXISTS index_entries_by_pkey
            ON index_entries (store, pkey);
        "#,
    )
}

/// Register a store, returning its creation timestamp.
///
/// Registering an existing store keeps the original timestamp.
pub fn register_store(
    conn: &Connection,
    store: &StoreSchema,
    created_at: i64,
) -> Result<i64, rusqlite::Error> {
    conn.execute(
        "INSERT OR IGNORE INTO stores (name, key_path, created_at) VALUES (?1, ?2, ?3)",
        params![store.name, store.key_path, created_at],
    )?;
    conn.query_row(
        "SELECT created_at FROM stores WHERE name = ?1",
        params![store.name],
        |row| row.get(0),
    )
}
