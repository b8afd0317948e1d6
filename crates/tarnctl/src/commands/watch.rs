//! Watch command implementation.
//!
//! Runs a live query over one store (or one key) and prints a snapshot
//! whenever it re-runs. Mutations read from stdin as JSON lines are
//! applied through the same database, so their changes wake the query:
//!
//! ```text
//! {"op": "put", "store": "projects", "value": {"id": 42, "favorite": 1}}
//! {"op": "put", "store": "notes", "key": "n1", "value": "hello"}
//! {"op": "delete", "store": "projects", "key": 42}
//! ```

use anyhow::{Context, Result};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tarn::{Database, Direction, Key, KeyRange};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::signal;

use super::{records, Record};
use crate::OutputFormat;

#[derive(Debug, Deserialize)]
#[serde(tag = "op", rename_all = "lowercase")]
enum Mutation {
    Put {
        store: String,
        value: Value,
        #[serde(default)]
        key: Option<Key>,
    },
    Delete {
        store: String,
        key: Key,
    },
}

#[derive(Serialize)]
struct SnapshotOutput<'a> {
    store: &'a str,
    revision: u64,
    records: &'a [Record],
}

pub async fn run(db: &Database, store: &str, key: Option<Key>, format: OutputFormat) -> Result<()> {
    let name = store.to_string();
    let builder = db.query([store]);
    let builder = match &key {
        Some(key) => builder.observe_key(store, key.clone()),
        None => builder.observe_on(store),
    };
    let operation = builder.handled_by(move |tx| {
        let handle = tx.store(&name)?;
        match &key {
            Some(key) => Ok(handle
                .get::<Value>(key.clone())?
                .map(|value| Record {
                    key: key.clone(),
                    value,
                })
                .into_iter()
                .collect()),
            None => handle
                .open_cursor::<Value>(KeyRange::all(), Direction::Next)
                .map(|entry| {
                    entry.map(|e| Record {
                        key: e.primary_key,
                        value: e.value,
                    })
                })
                .collect::<Result<Vec<_>, _>>(),
        }
    });

    let mut live = operation.subscribe();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;
    let mut revision: u64 = 0;

    if format == OutputFormat::Text {
        eprintln!("Watching '{}'. Mutations are read from stdin as JSON lines.", store);
        eprintln!("Press Ctrl+C to stop...\n");
    }

    loop {
        tokio::select! {
            _ = signal::ctrl_c() => break,
            update = live.next() => {
                match update {
                    Some(Ok(snapshot)) => {
                        revision += 1;
                        print_snapshot(store, revision, &snapshot, format)?;
                    }
                    Some(Err(e)) => return Err(e).context("live query failed"),
                    None => break,
                }
            }
            line = lines.next_line(), if stdin_open => {
                match line.context("failed to read stdin")? {
                    Some(line) if line.trim().is_empty() => {}
                    Some(line) => {
                        if let Err(e) = apply(db, &line).await {
                            eprintln!("Mutation failed: {:#}", e);
                        }
                    }
                    None => stdin_open = false,
                }
            }
        }
    }

    if format == OutputFormat::Text {
        eprintln!("\nSaw {} revision(s)", revision);
    }
    Ok(())
}

async fn apply(db: &Database, line: &str) -> Result<()> {
    let mutation: Mutation = serde_json::from_str(line).context("invalid mutation")?;
    match mutation {
        Mutation::Put { store, value, key } => {
            let key = records::write(db, &store, value, key).await?;
            tracing::debug!(store = %store, key = %key, "Applied put");
        }
        Mutation::Delete { store, key } => {
            records::remove(db, &store, key.clone()).await?;
            tracing::debug!(store = %store, key = %key, "Applied delete");
        }
    }
    Ok(())
}

fn print_snapshot(store: &str, revision: u64, records: &[Record], format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Text => {
            println!("[{}] rev={} {} record(s)", store, revision, records.len());
            for record in records {
                println!("  {} => {}", record.key, record.value);
            }
        }
        OutputFormat::Json => {
            let output = SnapshotOutput {
                store,
                revision,
                records,
            };
            println!("{}", serde_json::to_string(&output)?);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_mutations() {
        let put: Mutation =
            serde_json::from_str(r#"{"op":"put","store":"projects","value":{"id":42}}"#).unwrap();
        assert!(matches!(put, Mutation::Put { key: None, .. }));

        let put: Mutation =
            serde_json::from_str(r#"{"op":"put","store":"notes","key":"n1","value":"hi"}"#)
                .unwrap();
        assert!(matches!(put, Mutation::Put { key: Some(Key::Text(_)), .. }));

        let delete: Mutation =
            serde_json::from_str(r#"{"op":"delete","store":"projects","key":42}"#).unwrap();
        assert!(matches!(delete, Mutation::Delete { key: Key::Int(42), .. }));

        assert!(serde_json::from_str::<Mutation>(r#"{"op":"drop","store":"x"}"#).is_err());
    }
}
