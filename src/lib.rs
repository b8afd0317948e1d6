//! Tarn: a reactive, multi-store transactional key-value layer.
//!
//! Callers run read-only or read-write transactions over named stores.
//! A read-write transaction reports which keys it touched; once it
//! commits, those [`Changes`] are pushed to every live query in this
//! process and broadcast to other contexts sharing the database file.
//!
//! # Architecture
//!
//! - **Durable**: SQLite WAL with `synchronous=FULL`, one writer, pooled readers
//! - **Commit-then-notify**: changes are published only after commit, in commit order
//! - **Live queries**: re-run on relevant changes, latest result wins
//! - **Observable**: tracing spans and OpenTelemetry metrics
//!
//! # Modules
//!
//! - [`config`]: CLI and environment configuration
//! - [`database`]: transaction execution and change publication
//! - [`flow`]: local change feed and cross-context broadcast transports
//! - [`key`]: ordered keys and key ranges
//! - [`observability`]: metrics and tracing setup
//! - [`query`]: operation builder, prepared operations, live subscriptions
//! - [`storage`]: SQLite persistence layer and transaction handles
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use futures::StreamExt;
//! use tarn::{Config, Database, NoopTransport, Schema, StoreSchema, TransactorResult};
//!
//! # async fn demo() -> Result<(), tarn::Error> {
//! let schema = Schema::new().with_store(StoreSchema::new("projects").with_key_path("id"));
//! let db = Database::open(&Config::default(), schema, Arc::new(NoopTransport)).await?;
//!
//! let count = db
//!     .query(["projects"])
//!     .observe_on("projects")
//!     .handled_by(|tx| tx.store("projects")?.count(&tarn::KeyRange::all()));
//! let mut live = count.subscribe();
//!
//! db.mutate(["projects"])
//!     .handled_by(|tx| {
//!         let key = tx.store("projects")?.put(&serde_json::json!({"id": 1}))?;
//!         Ok(TransactorResult::changes_only().with_changes("projects", key))
//!     })
//!     .execute()
//!     .await?;
//!
//! while let Some(n) = live.next().await {
//!     println!("projects: {}", n?);
//! }
//! # Ok(())
//! # }
//! ```

// Lint configuration
#![warn(clippy::all)]
#![allow(
    clippy::module_name_repetitions,    // storage::StorageError is fine
    clippy::must_use_candidate,         // Not all functions need #[must_use]
    clippy::missing_errors_doc,         // Error docs can be verbose
    clippy::missing_panics_doc,         // Panic docs can be verbose
    clippy::needless_raw_string_hashes, // r#""# is fine for SQL
    clippy::too_many_lines              // Some functions are inherently long
)]

pub mod changes;
pub mod config;
pub mod database;
pub mod error;
pub mod flow;
pub mod key;
pub mod observability;
pub mod query;
pub mod storage;

pub use changes::{Changes, ChangesBuilder, IntoKeys};
pub use config::Config;
pub use database::Database;
pub use error::Error;
pub use flow::{BroadcastTransport, ChangeEvent, ChannelEndpoint, ChannelHub, NoopTransport};
pub use key::{Key, KeyRange};
pub use query::{
    ObservingTarget, OperationBuilder, PreparedOperation, Query, Subscription, TransactorResult,
};
pub use storage::{
    Direction, IndexSchema, Schema, StoreInfo, StoreSchema, Transaction, TxMode,
};

/// Get the current Unix timestamp in milliseconds.
///
/// Clocks set before the epoch read as 0.
#[must_use]
pub fn now_millis() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_millis() as i64)
}
