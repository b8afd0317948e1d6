//! Connection pools for read-only and read-write transactions.
//!
//! Uses r2d2 with r2d2_sqlite. SQLite WAL mode lets readers run next to
//! the single writer. Read connections are opened with
//! `SQLITE_OPEN_READ_ONLY`, so a write attempted in a read-only
//! transaction is refused by SQLite itself.

use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::OpenFlags;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

use super::schema::{apply_pragmas, apply_reader_pragmas, initialize_schema, register_store, Schema};
use crate::key::KeyDecodeError;

/// Error type for storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Failed to create connection pool: {0}")]
    PoolCreation(#[from] r2d2::Error),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Value serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Corrupt stored key: {0}")]
    CorruptKey(#[from] KeyDecodeError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Connection = PooledConnection<SqliteConnectionManager>;

/// Reader and writer pools over one database file.
#[derive(Clone)]
pub struct ConnectionPools {
    readers: Pool<SqliteConnectionManager>,
    writer: Pool<SqliteConnectionManager>,
}

impl ConnectionPools {
    /// Open (creating if needed) the database at `db_path`.
    ///
    /// Tables are created and every store in `schema` is registered
    /// before the reader pool is built, since read-only connections
    /// cannot create the file.
    ///
    /// # Arguments
    ///
    /// * `db_path` - Path to the SQLite database file
    /// * `schema` - Stores to register
    /// * `reader_pool_size` - Maximum number of read connections
    /// * `busy_timeout` - How long a connection waits on a locked database
    pub fn open<P: AsRef<Path>>(
        db_path: P,
        schema: &Schema,
        reader_pool_size: u32,
        busy_timeout: Duration,
    ) -> Result<Self, StorageError> {
        let db_path = db_path.as_ref();

        let writer = Pool::builder()
            .max_size(1)
            .connection_customizer(Box::new(WriterConnectionCustomizer { busy_timeout }))
            .build(SqliteConnectionManager::file(db_path))?;

        {
            let conn = writer.get()?;
            initialize_schema(&conn)?;
            let now = crate::now_millis();
            for store in &schema.stores {
                register_store(&conn, store, now)?;
            }
        }

        let manager = SqliteConnectionManager::file(db_path)
            .with_flags(OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX);

        let readers = Pool::builder()
            .max_size(reader_pool_size)
            .connection_customizer(Box::new(ReaderConnectionCustomizer { busy_timeout }))
            .build(manager)?;

        Ok(Self { readers, writer })
    }

    /// Get a read-only connection.
    pub fn reader(&self) -> Result<Connection, StorageError> {
        Ok(self.readers.get()?)
    }

    /// Get the writer connection, waiting for any other writer to finish.
    pub fn writer(&self) -> Result<Connection, StorageError> {
        Ok(self.writer.get()?)
    }

    /// List registered stores with their record counts.
    ///
    /// Returns stores in lexicographic order by name.
    pub fn list_stores(&self) -> Result<Vec<StoreInfo>, StorageError> {
        let conn = self.reader()?;
        let mut stmt = conn.prepare(
            "SELECT s.name, s.created_at, (SELECT COUNT(*) FROM records r WHERE r.store = s.name)
             FROM stores s ORDER BY s.name ASC",
        )?;
        let rows = stmt
            .query_map([], |row| {
                Ok(StoreInfo {
                    name: row.get(0)?,
                    created_at: row.get(1)?,
                    records: row.get(2)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }
}

/// A registered store as reported by [`ConnectionPools::list_stores`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreInfo {
    pub name: String,
    /// Registration time in milliseconds since the Unix epoch.
    pub created_at: i64,
    pub records: i64,
}

/// Connection customizer that applies writer pragmas.
#[derive(Debug)]
struct WriterConnectionCustomizer {
    busy_timeout: Duration,
}

impl r2d2::CustomizeConnection<rusqlite::Connection, rusqlite::Error>
    for WriterConnectionCustomizer
{
    fn on_acquire(&self, conn: &mut rusqlite::Connection) -> Result<(), rusqlite::Error> {
        apply_pragmas(conn, self.busy_timeout)
    }
}

/// Connection customizer that applies reader pragmas.
#[derive(Debug)]
struct ReaderConnectionCustomizer {
    busy_timeout: Duration,
}

impl r2d2::CustomizeConnection<rusqlite::Connection, rusqlite::Error>
    for ReaderConnectionCustomizer
{
    fn on_acquire(&self, conn: &mut rusqlite::Connection) -> Result<(), rusqlite::Error> {
        apply_reader_pragmas(conn, self.busy_timeout)
    }
}
