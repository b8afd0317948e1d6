//! Record commands: get, put, delete and scan.

use anyhow::{anyhow, Context, Result};
use serde::Serialize;
use serde_json::Value;
use tarn::{Database, Direction, Error, Key, KeyRange, TransactorResult};

use super::Record;
use crate::OutputFormat;

pub async fn get(db: &Database, store: &str, key: Key, format: OutputFormat) -> Result<()> {
    let name = store.to_string();
    let lookup = key.clone();
    let value = db
        .query([store])
        .handled_by(move |tx| tx.store(&name)?.get::<Value>(lookup.clone()))
        .execute()
        .await
        .with_context(|| format!("failed to read '{}'", store))?
        .ok_or_else(|| anyhow!("no record with key {} in store '{}'", key, store))?;

    let record = Record { key, value };
    match format {
        OutputFormat::Text => println!("{} => {}", record.key, record.value),
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&record)?),
    }
    Ok(())
}

/// Write `value`, returning the key it was stored under.
pub async fn write(db: &Database, store: &str, value: Value, key: Option<Key>) -> Result<Key, Error> {
    let name = store.to_string();
    db.mutate([store])
        .handled_by(move |tx| {
            let handle = tx.store(&name)?;
            let key = match &key {
                Some(key) => handle.put_with_key(key.clone(), &value)?,
                None => handle.put(&value)?,
            };
            Ok(TransactorResult::new(key.clone()).with_changes(&name, key))
        })
        .execute()
        .await
}

/// Delete an existing record; a missing record is an error.
pub async fn remove(db: &Database, store: &str, key: Key) -> Result<(), Error> {
    let name = store.to_string();
    db.mutate([store])
        .handled_by(move |tx| {
            let handle = tx.store(&name)?;
            if handle.get::<Value>(key.clone())?.is_none() {
                return Err(Error::not_found(&name, key.clone()));
            }
            handle.delete(key.clone())?;
            Ok(TransactorResult::changes_only().with_changes(&name, key.clone()))
        })
        .execute()
        .await
}

#[derive(Serialize)]
struct WriteOutput<'a> {
    store: &'a str,
    key: &'a Key,
    action: &'static str,
}

pub async fn put(
    db: &Database,
    store: &str,
    raw: &str,
    key: Option<Key>,
    format: OutputFormat,
) -> Result<()> {
    let value: Value = serde_json::from_str(raw).context("record must be valid JSON")?;
    let key = write(db, store, value, key)
        .await
        .with_context(|| format!("failed to write to '{}'", store))?;

    print_write(store, &key, "put", format)
}

pub async fn delete(db: &Database, store: &str, key: Key, format: OutputFormat) -> Result<()> {
    remove(db, store, key.clone())
        .await
        .with_context(|| format!("failed to delete from '{}'", store))?;

    print_write(store, &key, "delete", format)
}

fn print_write(store: &str, key: &Key, action: &'static str, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Text => println!("{} {} in '{}'", action, key, store),
        OutputFormat::Json => {
            let output = WriteOutput { store, key, action };
            println!("{}", serde_json::to_string(&output)?);
        }
    }
    Ok(())
}

/// Options of the scan command.
#[derive(Debug, Clone)]
pub struct Scan {
    pub index: Option<String>,
    pub from: Option<Key>,
    pub to: Option<Key>,
    pub reverse: bool,
    pub limit: usize,
}

impl Scan {
    fn range(&self) -> KeyRange {
        match (self.from.clone(), self.to.clone()) {
            (Some(from), Some(to)) => KeyRange::bound(from, to, false, false),
            (Some(from), None) => KeyRange::lower_bound(from, false),
            (None, Some(to)) => KeyRange::upper_bound(to, false),
            (None, None) => KeyRange::all(),
        }
    }

    fn direction(&self) -> Direction {
        if self.reverse {
            Direction::Prev
        } else {
            Direction::Next
        }
    }
}

#[derive(Serialize)]
struct ScanEntry {
    key: Key,
    primary_key: Key,
    value: Value,
}

pub async fn scan(db: &Database, store: &str, scan: Scan, format: OutputFormat) -> Result<()> {
    let name = store.to_string();
    let limit = if scan.limit == 0 { usize::MAX } else { scan.limit };
    let entries = db
        .query([store])
        .handled_by(move |tx| {
            let handle = tx.store(&name)?;
            let cursor = match &scan.index {
                Some(index) => handle
                    .index(index)?
                    .open_cursor::<Value>(scan.range(), scan.direction()),
                None => handle.open_cursor::<Value>(scan.range(), scan.direction()),
            };
            cursor
                .take(limit)
                .map(|entry| {
                    entry.map(|e| ScanEntry {
                        key: e.key,
                        primary_key: e.primary_key,
                        value: e.value,
                    })
                })
                .collect::<Result<Vec<_>, Error>>()
        })
        .execute()
        .await
        .with_context(|| format!("failed to scan '{}'", store))?;

    match format {
        OutputFormat::Text => {
            if entries.is_empty() {
                println!("No records found.");
            }
            for entry in &entries {
                if entry.key == entry.primary_key {
                    println!("{} => {}", entry.key, entry.value);
                } else {
                    println!("{} ({}) => {}", entry.key, entry.primary_key, entry.value);
                }
            }
        }
        OutputFormat::Json => {
            for entry in &entries {
                println!("{}", serde_json::to_string(entry)?);
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scan(from: Option<i64>, to: Option<i64>) -> Scan {
        Scan {
            index: None,
            from: from.map(Key::Int),
            to: to.map(Key::Int),
            reverse: false,
            limit: 0,
        }
    }

    #[test]
    fn test_scan_range_bounds_are_inclusive() {
        let range = scan(Some(2), Some(4)).range();
        assert!(range.contains(&Key::Int(2)));
        assert!(range.contains(&Key::Int(4)));
        assert!(!range.contains(&Key::Int(5)));

        assert!(scan(None, None).range().contains(&Key::Text("x".into())));
        assert!(!scan(Some(3), None).range().contains(&Key::Int(2)));
        assert!(!scan(None, Some(3)).range().contains(&Key::Int(4)));
    }
}
