//! Stores command implementation.

use anyhow::{Context, Result};
use serde::Serialize;
use tarn::Database;

use crate::OutputFormat;

#[derive(Serialize)]
struct StoreInfo {
    name: String,
    key_path: Option<String>,
    indexes: Vec<String>,
    records: i64,
    created_at: i64,
}

#[derive(Serialize)]
struct StoresOutput {
    stores: Vec<StoreInfo>,
    total: usize,
}

pub async fn list(db: &Database, format: OutputFormat) -> Result<()> {
    let stores = db.list_stores().await.context("failed to list stores")?;

    let output = StoresOutput {
        total: stores.len(),
        stores: stores
            .into_iter()
            .map(|info| {
                let schema = db.schema().store(&info.name);
                StoreInfo {
                    key_path: schema.and_then(|s| s.key_path.clone()),
                    indexes: schema
                        .map(|s| s.indexes.iter().map(|i| i.name.clone()).collect())
                        .unwrap_or_default(),
                    name: info.name,
                    records: info.records,
                    created_at: info.created_at,
                }
            })
            .collect(),
    };

    match format {
        OutputFormat::Text => {
            if output.stores.is_empty() {
                println!("No stores found.");
            } else {
                println!(
                    "{:<24} {:<16} {:>10}  {:<24} {}",
                    "STORE", "KEY PATH", "RECORDS", "CREATED", "INDEXES"
                );
                println!("{}", "-".repeat(96));
                for store in &output.stores {
                    println!(
                        "{:<24} {:<16} {:>10}  {:<24} {}",
                        store.name,
                        store.key_path.as_deref().unwrap_or("-"),
                        store.records,
                        format_timestamp(store.created_at),
                        store.indexes.join(",")
                    );
                }
                println!();
                println!("Total: {} store(s)", output.total);
            }
        }
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
    }

    Ok(())
}

/// Render milliseconds since the epoch as seconds with a fraction.
fn format_timestamp(millis: i64) -> String {
    format!("{}.{:03}", millis.div_euclid(1000), millis.rem_euclid(1000))
}
