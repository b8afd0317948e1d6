//! tarnctl: Command-line interface for tarn databases.
//!
//! Provides commands for inspecting stores, reading and writing records,
//! and watching a store through a live query from the terminal.

mod commands;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tarn::observability::metrics::init_metrics_with_endpoint;
use tarn::observability::tracing::init_tracing;
use tarn::{Config, Database, Key, NoopTransport, Schema};

/// Command-line interface for tarn databases.
#[derive(Parser)]
#[command(name = "tarnctl")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// JSON file describing the database's stores and indexes
    #[arg(short, long, env = "TARN_SCHEMA")]
    schema: PathBuf,

    #[command(flatten)]
    config: Config,

    /// Output format (text, json)
    #[arg(short, long, default_value = "text")]
    output: OutputFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OutputFormat {
    Text,
    Json,
}

impl std::str::FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "text" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            _ => Err(format!("unknown output format: {}", s)),
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// List stores with their record counts
    Stores,
    /// Print one record
    Get {
        /// Store name
        store: String,
        /// Primary key (JSON integer, string or array; bare words are strings)
        #[arg(value_parser = commands::parse_key)]
        key: Key,
    },
    /// Insert or replace a record
    Put {
        /// Store name
        store: String,
        /// Record as JSON
        value: String,
        /// Explicit key, for stores without an in-line key path
        #[arg(short, long, value_parser = commands::parse_key)]
        key: Option<Key>,
    },
    /// Delete a record
    Delete {
        /// Store name
        store: String,
        /// Primary key
        #[arg(value_parser = commands::parse_key)]
        key: Key,
    },
    /// List records in key order
    Scan {
        /// Store name
        store: String,
        /// Walk a secondary index instead of the primary key
        #[arg(short, long)]
        index: Option<String>,
        /// Inclusive lower bound
        #[arg(long, value_parser = commands::parse_key)]
        from: Option<Key>,
        /// Inclusive upper bound
        #[arg(long, value_parser = commands::parse_key)]
        to: Option<Key>,
        /// Walk from the highest key down
        #[arg(short, long)]
        reverse: bool,
        /// Maximum number of records (0 = unlimited)
        #[arg(short = 'n', long, default_value = "100")]
        limit: usize,
    },
    /// Print a store (or one key) on every change, applying
    /// JSON-line mutations read from stdin
    Watch {
        /// Store name
        store: String,
        /// Watch a single key instead of the whole store
        #[arg(short, long, value_parser = commands::parse_key)]
        key: Option<Key>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_tracing("tarnctl", Some(&cli.config.log_level), cli.config.log_json);
    init_metrics_with_endpoint(cli.config.otel_endpoint.as_deref());

    let schema = Schema::from_json_file(&cli.schema)
        .with_context(|| format!("failed to load schema from {}", cli.schema.display()))?;
    let db = Database::open(&cli.config, schema, Arc::new(NoopTransport))
        .await
        .context("failed to open database")?;

    match cli.command {
        Commands::Stores => commands::stores::list(&db, cli.output).await?,
        Commands::Get { store, key } => commands::records::get(&db, &store, key, cli.output).await?,
        Commands::Put { store, value, key } => {
            commands::records::put(&db, &store, &value, key, cli.output).await?;
        }
        Commands::Delete { store, key } => {
            commands::records::delete(&db, &store, key, cli.output).await?;
        }
        Commands::Scan {
            store,
            index,
            from,
            to,
            reverse,
            limit,
        } => {
            let scan = commands::records::Scan {
                index,
                from,
                to,
                reverse,
                limit,
            };
            commands::records::scan(&db, &store, scan, cli.output).await?;
        }
        Commands::Watch { store, key } => commands::watch::run(&db, &store, key, cli.output).await?,
    }

    Ok(())
}
