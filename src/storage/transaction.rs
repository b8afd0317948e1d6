//! Transaction handles handed to transactors.
//!
//! A [`Transaction`] is bound to the stores declared when the operation
//! was built; asking for any other store fails with
//! [`Error::StoreNotInScope`]. Store and index handles borrow the
//! transaction, so they cannot outlive it.

use rusqlite::types::Value as SqlValue;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::marker::PhantomData;
use std::ops::Bound;

use super::schema::{value_at_path, IndexSchema, Schema, StoreSchema};
use crate::error::Error;
use crate::key::{Key, KeyRange};

/// Transaction mode, enforced by the storage engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TxMode {
    ReadOnly,
    ReadWrite,
}

impl TxMode {
    pub fn as_str(self) -> &'static str {
        match self {
            TxMode::ReadOnly => "readonly",
            TxMode::ReadWrite => "readwrite",
        }
    }
}

/// Iteration order of a cursor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Direction {
    #[default]
    Next,
    Prev,
}

/// An open transaction scoped to a fixed set of stores.
pub struct Transaction<'a> {
    conn: &'a Connection,
    mode: TxMode,
    scope: &'a [String],
    schema: &'a Schema,
}

impl<'a> Transaction<'a> {
    pub(crate) fn new(
        conn: &'a Connection,
        mode: TxMode,
        scope: &'a [String],
        schema: &'a Schema,
    ) -> Self {
        Self {
            conn,
            mode,
            scope,
            schema,
        }
    }

    pub fn mode(&self) -> TxMode {
        self.mode
    }

    /// Stores this transaction may touch.
    pub fn stores(&self) -> &[String] {
        self.scope
    }

    /// Open one of the transaction's stores.
    pub fn store(&self, name: &str) -> Result<StoreHandle<'_>, Error> {
        if !self.scope.iter().any(|store| store == name) {
            return Err(Error::StoreNotInScope(name.to_string()));
        }
        let schema = self
            .schema
            .store(name)
            .ok_or_else(|| Error::UnknownStore(name.to_string()))?;
        Ok(StoreHandle {
            conn: self.conn,
            schema,
        })
    }
}

/// Access to one store inside a transaction.
pub struct StoreHandle<'t> {
    conn: &'t Connection,
    schema: &'t StoreSchema,
}

impl<'t> StoreHandle<'t> {
    pub fn name(&self) -> &str {
        &self.schema.name
    }

    /// Fetch the record stored under `key`.
    pub fn get<T: DeserializeOwned>(&self, key: impl Into<Key>) -> Result<Option<T>, Error> {
        let raw: Option<String> = self
            .conn
            .prepare_cached("SELECT value FROM records WHERE store = ?1 AND key = ?2")?
            .query_row(params![self.schema.name, key.into().encode()], |row| {
                row.get(0)
            })
            .optional()?;
        raw.map(|raw| serde_json::from_str(&raw).map_err(Error::from))
            .transpose()
    }

    /// All records with keys in `range`, in key order.
    pub fn get_all<T: DeserializeOwned>(&self, range: &KeyRange) -> Result<Vec<T>, Error> {
        let mut args = vec![SqlValue::Text(self.schema.name.clone())];
        let sql = format!(
            "SELECT value FROM records WHERE store = ?{} ORDER BY key ASC",
            range_clause("key", range, &mut args)
        );
        let mut stmt = self.conn.prepare_cached(&sql)?;
        let rows = stmt
            .query_map(params_from_iter(args), |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        rows.iter()
            .map(|raw| serde_json::from_str(raw).map_err(Error::from))
            .collect()
    }

    /// All keys in `range`, in key order.
    pub fn get_all_keys(&self, range: &KeyRange) -> Result<Vec<Key>, Error> {
        let mut args = vec![SqlValue::Text(self.schema.name.clone())];
        let sql = format!(
            "SELECT key FROM records WHERE store = ?{} ORDER BY key ASC",
            range_clause("key", range, &mut args)
        );
        query_keys(self.conn, &sql, args)
    }

    /// Number of records with keys in `range`.
    pub fn count(&self, range: &KeyRange) -> Result<u64, Error> {
        let mut args = vec![SqlValue::Text(self.schema.name.clone())];
        let sql = format!(
            "SELECT COUNT(*) FROM records WHERE store = ?{}",
            range_clause("key", range, &mut args)
        );
        query_count(self.conn, &sql, args)
    }

    /// Insert or replace a record whose key lives inside the value.
    ///
    /// Returns the key the record was stored under.
    pub fn put<T: Serialize>(&self, value: &T) -> Result<Key, Error> {
        let value = serde_json::to_value(value)?;
        let Some(path) = self.schema.key_path.as_deref() else {
            return Err(Error::InvalidKey(format!(
                "store '{}' has no key path; use put_with_key",
                self.schema.name
            )));
        };
        let key = self.schema.extract_key(&value).ok_or_else(|| {
            Error::InvalidKey(format!("value has no valid key at '{path}'"))
        })?;
        self.write(&key, &value)?;
        Ok(key)
    }

    /// Insert or replace a record under an explicit key.
    pub fn put_with_key<T: Serialize>(&self, key: impl Into<Key>, value: &T) -> Result<Key, Error> {
        if self.schema.key_path.is_some() {
            return Err(Error::InvalidKey(format!(
                "store '{}' uses in-line keys; use put",
                self.schema.name
            )));
        }
        let key = key.into();
        self.write(&key, &serde_json::to_value(value)?)?;
        Ok(key)
    }

    fn write(&self, key: &Key, value: &Value) -> Result<(), Error> {
        let pkey = key.encode();
        self.conn
            .prepare_cached(
                "INSERT INTO records (store, key, value) VALUES (?1, ?2, ?3)
                 ON CONFLICT (store, key) DO UPDATE SET value = excluded.value",
            )?
            .execute(params![self.schema.name, pkey, value.to_string()])?;

        self.conn
            .prepare_cached("DELETE FROM index_entries WHERE store = ?1 AND pkey = ?2")?
            .execute(params![self.schema.name, pkey])?;

        let mut insert = self.conn.prepare_cached(
            "INSERT OR IGNORE INTO index_entries (store, idx, ikey, pkey) VALUES (?1, ?2, ?3, ?4)",
        )?;
        for index in &self.schema.indexes {
            // Values without a valid key at the index path stay unindexed.
            if let Some(ikey) = value_at_path(value, &index.key_path).and_then(Key::from_json) {
                insert.execute(params![self.schema.name, index.name, ikey.encode(), pkey])?;
            }
        }
        Ok(())
    }

    /// Delete the record under `key`. Deleting a missing key is a no-op.
    pub fn delete(&self, key: impl Into<Key>) -> Result<(), Error> {
        let pkey = key.into().encode();
        self.conn
            .prepare_cached("DELETE FROM records WHERE store = ?1 AND key = ?2")?
            .execute(params![self.schema.name, pkey])?;
        self.conn
            .prepare_cached("DELETE FROM index_entries WHERE store = ?1 AND pkey = ?2")?
            .execute(params![self.schema.name, pkey])?;
        Ok(())
    }

    /// Delete every record in the store.
    pub fn clear(&self) -> Result<(), Error> {
        self.conn
            .execute("DELETE FROM records WHERE store = ?1", params![self.schema.name])?;
        self.conn.execute(
            "DELETE FROM index_entries WHERE store = ?1",
            params![self.schema.name],
        )?;
        Ok(())
    }

    /// Open one of the store's secondary indexes.
    pub fn index(&self, name: &str) -> Result<IndexHandle<'t>, Error> {
        let index = self.schema.index(name).ok_or_else(|| Error::UnknownIndex {
            store: self.schema.name.clone(),
            index: name.to_string(),
        })?;
        Ok(IndexHandle {
            conn: self.conn,
            store: &self.schema.name,
            index,
        })
    }

    /// Walk the records in `range` one at a time.
    pub fn open_cursor<T: DeserializeOwned>(
        &self,
        range: KeyRange,
        direction: Direction,
    ) -> Cursor<'t, T> {
        Cursor::new(self.conn, &self.schema.name, None, range, direction)
    }
}

/// Access to a secondary index inside a transaction.
pub struct IndexHandle<'t> {
    conn: &'t Connection,
    store: &'t str,
    index: &'t IndexSchema,
}

const INDEX_JOIN: &str = "FROM index_entries i
     JOIN records r ON r.store = i.store AND r.key = i.pkey
     WHERE i.store = ? AND i.idx = ?";

impl<'t> IndexHandle<'t> {
    pub fn name(&self) -> &str {
        &self.index.name
    }

    fn base_args(&self) -> Vec<SqlValue> {
        vec![
            SqlValue::Text(self.store.to_string()),
            SqlValue::Text(self.index.name.clone()),
        ]
    }

    /// The first record (by primary key) whose index key equals `key`.
    pub fn get<T: DeserializeOwned>(&self, key: impl Into<Key>) -> Result<Option<T>, Error> {
        let mut args = self.base_args();
        let range = KeyRange::only(key);
        let sql = format!(
            "SELECT r.value {INDEX_JOIN}{} ORDER BY i.pkey ASC LIMIT 1",
            range_clause("i.ikey", &range, &mut args)
        );
        let raw: Option<String> = self
            .conn
            .prepare_cached(&sql)?
            .query_row(params_from_iter(args), |row| row.get(0))
            .optional()?;
        raw.map(|raw| serde_json::from_str(&raw).map_err(Error::from))
            .transpose()
    }

    /// All records whose index key is in `range`, in index order.
    pub fn get_all<T: DeserializeOwned>(&self, range: &KeyRange) -> Result<Vec<T>, Error> {
        let mut args = self.base_args();
        let sql = format!(
            "SELECT r.value {INDEX_JOIN}{} ORDER BY i.ikey ASC, i.pkey ASC",
            range_clause("i.ikey", range, &mut args)
        );
        let mut stmt = self.conn.prepare_cached(&sql)?;
        let rows = stmt
            .query_map(params_from_iter(args), |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        rows.iter()
            .map(|raw| serde_json::from_str(raw).map_err(Error::from))
            .collect()
    }

    /// Primary keys of the records whose index key is in `range`.
    pub fn get_all_keys(&self, range: &KeyRange) -> Result<Vec<Key>, Error> {
        let mut args = self.base_args();
        let sql = format!(
            "SELECT i.pkey {INDEX_JOIN}{} ORDER BY i.ikey ASC, i.pkey ASC",
            range_clause("i.ikey", range, &mut args)
        );
        query_keys(self.conn, &sql, args)
    }

    pub fn count(&self, range: &KeyRange) -> Result<u64, Error> {
        let mut args = self.base_args();
        let sql = format!(
            "SELECT COUNT(*) {INDEX_JOIN}{}",
            range_clause("i.ikey", range, &mut args)
        );
        query_count(self.conn, &sql, args)
    }

    /// Walk the index entries in `range` one at a time.
    pub fn open_cursor<T: DeserializeOwned>(
        &self,
        range: KeyRange,
        direction: Direction,
    ) -> Cursor<'t, T> {
        Cursor::new(
            self.conn,
            self.store,
            Some(&self.index.name),
            range,
            direction,
        )
    }
}

/// One step of a cursor.
#[derive(Debug, Clone, PartialEq)]
pub struct CursorEntry<T> {
    /// Index key for index cursors, primary key otherwise.
    pub key: Key,
    pub primary_key: Key,
    pub value: T,
}

/// Lazily walks a store or index, fetching one row per step.
///
/// Each step resumes strictly after the previous position, so writes
/// made through the same transaction between steps are observed.
pub struct Cursor<'t, T> {
    conn: &'t Connection,
    store: &'t str,
    index: Option<&'t str>,
    range: KeyRange,
    direction: Direction,
    position: Option<(Vec<u8>, Vec<u8>)>,
    done: bool,
    _marker: PhantomData<fn() -> T>,
}

impl<'t, T: DeserializeOwned> Cursor<'t, T> {
    fn new(
        conn: &'t Connection,
        store: &'t str,
        index: Option<&'t str>,
        range: KeyRange,
        direction: Direction,
    ) -> Self {
        Self {
            conn,
            store,
            index,
            range,
            direction,
            position: None,
            done: false,
            _marker: PhantomData,
        }
    }

    fn fetch(&mut self) -> Result<Option<CursorEntry<T>>, Error> {
        let (cmp, order) = match self.direction {
            Direction::Next => (">", "ASC"),
            Direction::Prev => ("<", "DESC"),
        };
        let mut args = vec![SqlValue::Text(self.store.to_string())];

        let sql = match self.index {
            None => {
                let mut sql = format!(
                    "SELECT key, key, value FROM records WHERE store = ?{}",
                    range_clause("key", &self.range, &mut args)
                );
                if let Some((key, _)) = &self.position {
                    sql.push_str(&format!(" AND key {cmp} ?"));
                    args.push(SqlValue::Blob(key.clone()));
                }
                sql.push_str(&format!(" ORDER BY key {order} LIMIT 1"));
                sql
            }
            Some(index) => {
                args.push(SqlValue::Text(index.to_string()));
                let mut sql = format!(
                    "SELECT i.ikey, i.pkey, r.value {INDEX_JOIN}{}",
                    range_clause("i.ikey", &self.range, &mut args)
                );
                if let Some((ikey, pkey)) = &self.position {
                    sql.push_str(&format!(" AND (i.ikey, i.pkey) {cmp} (?, ?)"));
                    args.push(SqlValue::Blob(ikey.clone()));
                    args.push(SqlValue::Blob(pkey.clone()));
                }
                sql.push_str(&format!(" ORDER BY i.ikey {order}, i.pkey {order} LIMIT 1"));
                sql
            }
        };

        let row = self
            .conn
            .prepare_cached(&sql)?
            .query_row(params_from_iter(args), |row| {
                Ok((
                    row.get::<_, Vec<u8>>(0)?,
                    row.get::<_, Vec<u8>>(1)?,
                    row.get::<_, String>(2)?,
                ))
            })
            .optional()?;

        let Some((key, pkey, raw)) = row else {
            return Ok(None);
        };
        let entry = CursorEntry {
            key: Key::decode(&key)?,
            primary_key: Key::decode(&pkey)?,
            value: serde_json::from_str(&raw)?,
        };
        self.position = Some((key, pkey));
        Ok(Some(entry))
    }
}

impl<T: DeserializeOwned> Iterator for Cursor<'_, T> {
    type Item = Result<CursorEntry<T>, Error>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.fetch() {
            Ok(Some(entry)) => Some(Ok(entry)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}

/// Render `range` as SQL conditions on `column`, pushing bound values.
fn range_clause(column: &str, range: &KeyRange, args: &mut Vec<SqlValue>) -> String {
    let mut clause = String::new();
    let mut bound = |op: &str, key: &Key| {
        clause.push_str(&format!(" AND {column} {op} ?"));
        args.push(SqlValue::Blob(key.encode()));
    };
    match range.lower() {
        Bound::Included(key) => bound(">=", key),
        Bound::Excluded(key) => bound(">", key),
        Bound::Unbounded => {}
    }
    match range.upper() {
        Bound::Included(key) => bound("<=", key),
        Bound::Excluded(key) => bound("<", key),
        Bound::Unbounded => {}
    }
    clause
}

fn query_keys(conn: &Connection, sql: &str, args: Vec<SqlValue>) -> Result<Vec<Key>, Error> {
    let mut stmt = conn.prepare_cached(sql)?;
    let raw = stmt
        .query_map(params_from_iter(args), |row| row.get::<_, Vec<u8>>(0))?
        .collect::<Result<Vec<_>, _>>()?;
    raw.iter()
        .map(|bytes| Key::decode(bytes).map_err(Error::from))
        .collect()
}

fn query_count(conn: &Connection, sql: &str, args: Vec<SqlValue>) -> Result<u64, Error> {
    let count: i64 = conn
        .prepare_cached(sql)?
        .query_row(params_from_iter(args), |row| row.get(0))?;
    Ok(u64::try_from(count).unwrap_or_default())
}
