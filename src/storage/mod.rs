//! SQLite storage engine.
//!
//! Provides:
//! - Table layout, pragmas and store registration
//! - Read-only connection pool and single-connection writer pool
//! - Store-scoped transaction handles with indexes and cursors

pub mod pool;
pub mod schema;
pub mod transaction;

pub use pool::{ConnectionPools, StorageError, StoreInfo};
pub use schema::{IndexSchema, Schema, StoreSchema};
pub use transaction::{
    Cursor, CursorEntry, Direction, IndexHandle, StoreHandle, Transaction, TxMode,
};
