//! Error type for database operations.

use thiserror::Error;

use crate::key::{Key, KeyDecodeError};
use crate::storage::StorageError;

/// Error returned by transactions, prepared operations and live queries.
///
/// Every variant raised while a transaction is open aborts it: the
/// storage engine rolls back and no [`Changes`](crate::Changes) are
/// published.
#[derive(Debug, Error)]
pub enum Error {
    /// The storage engine failed or could not commit.
    #[error("transaction aborted: {0}")]
    TransactionAborted(#[from] StorageError),

    /// A transactor expected an existing record that is missing.
    #[error("no record with key {key} in store '{store}'")]
    NotFound { store: String, key: Key },

    /// A transactor gave up for a reason of its own.
    #[error("transaction aborted by transactor: {0}")]
    Aborted(String),

    #[error("store '{0}' is not part of this transaction")]
    StoreNotInScope(String),

    #[error("unknown store '{0}'")]
    UnknownStore(String),

    #[error("unknown index '{index}' on store '{store}'")]
    UnknownIndex { store: String, index: String },

    #[error("invalid key: {0}")]
    InvalidKey(String),

    /// An inbound broadcast message could not be decoded.
    #[error("malformed broadcast message: {0}")]
    MalformedMessage(#[source] serde_json::Error),

    /// A [`Config`](crate::Config) value cannot be used to open a database.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// The blocking task running the transaction panicked or was cancelled.
    #[error("transaction task failed: {0}")]
    Runtime(#[from] tokio::task::JoinError),
}

impl Error {
    /// Abort the surrounding transaction with a message.
    pub fn aborted(message: impl Into<String>) -> Self {
        Self::Aborted(message.into())
    }

    /// Report a missing record.
    pub fn not_found(store: impl Into<String>, key: impl Into<Key>) -> Self {
        Self::NotFound {
            store: store.into(),
            key: key.into(),
        }
    }

    /// Whether this error came from the storage engine refusing a write
    /// in a read-only transaction.
    pub fn is_read_only_violation(&self) -> bool {
        matches!(
            self,
            Self::TransactionAborted(StorageError::Database(rusqlite::Error::SqliteFailure(e, _)))
                if e.code == rusqlite::ErrorCode::ReadOnly
        )
    }
}

impl From<rusqlite::Error> for Error {
    fn from(e: rusqlite::Error) -> Self {
        Self::TransactionAborted(StorageError::Database(e))
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Self::TransactionAborted(StorageError::Serialization(e))
    }
}

impl From<KeyDecodeError> for Error {
    fn from(e: KeyDecodeError) -> Self {
        Self::TransactionAborted(StorageError::CorruptKey(e))
    }
}
