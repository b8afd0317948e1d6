//! The transactor contract: business logic run inside one transaction.

use std::fmt;
use std::sync::Arc;

use crate::changes::{Changes, IntoKeys};
use crate::error::Error;
use crate::storage::{Transaction, TxMode};

/// Value produced by a read-write transactor, with the keys it touched.
#[derive(Debug, Clone, PartialEq)]
pub struct TransactorResult<V> {
    pub value: V,
    pub changes: Changes,
}

impl<V> TransactorResult<V> {
    /// A result that affected nothing yet; add keys with
    /// [`with_changes`](Self::with_changes).
    pub fn new(value: V) -> Self {
        Self {
            value,
            changes: Changes::new(),
        }
    }

    /// A result whose writes should not wake any live query.
    pub fn unchanged(value: V) -> Self {
        Self::new(value)
    }

    pub fn from_parts(value: V, changes: Changes) -> Self {
        Self { value, changes }
    }

    /// Record one key or a batch of keys as affected in `store`.
    #[must_use]
    pub fn with_changes(mut self, store: &str, keys: impl IntoKeys) -> Self {
        self.changes.push(store, keys.into_keys());
        self
    }

    pub fn into_parts(self) -> (V, Changes) {
        (self.value, self.changes)
    }
}

impl TransactorResult<()> {
    /// Start a result for a transactor that only reports changes.
    pub fn changes_only() -> Self {
        Self::new(())
    }
}

/// Type-erased transactor as stored in a [`Query`].
pub type Transactor<V> =
    Arc<dyn Fn(&Transaction<'_>) -> Result<TransactorResult<V>, Error> + Send + Sync>;

/// Everything needed to run one transaction: mode, stores and logic.
pub struct Query<V> {
    mode: TxMode,
    stores: Arc<[String]>,
    transactor: Transactor<V>,
}

impl<V: 'static> Query<V> {
    /// A read-only query. Read-only transactors cannot report changes.
    pub fn read_only<F>(stores: Vec<String>, transactor: F) -> Self
    where
        F: Fn(&Transaction<'_>) -> Result<V, Error> + Send + Sync + 'static,
    {
        Self {
            mode: TxMode::ReadOnly,
            stores: stores.into(),
            transactor: Arc::new(move |tx: &Transaction<'_>| {
                transactor(tx).map(TransactorResult::new)
            }),
        }
    }

    /// A read-write query.
    pub fn read_write<F>(stores: Vec<String>, transactor: F) -> Self
    where
        F: Fn(&Transaction<'_>) -> Result<TransactorResult<V>, Error> + Send + Sync + 'static,
    {
        Self {
            mode: TxMode::ReadWrite,
            stores: stores.into(),
            transactor: Arc::new(transactor),
        }
    }
}

impl<V> Query<V> {
    pub fn mode(&self) -> TxMode {
        self.mode
    }

    pub fn stores(&self) -> &[String] {
        &self.stores
    }

    pub(crate) fn run(&self, tx: &Transaction<'_>) -> Result<TransactorResult<V>, Error> {
        (self.transactor)(tx)
    }
}

impl<V> Clone for Query<V> {
    fn clone(&self) -> Self {
        Self {
            mode: self.mode,
            stores: Arc::clone(&self.stores),
            transactor: Arc::clone(&self.transactor),
        }
    }
}

impl<V> fmt::Debug for Query<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Query")
            .field("mode", &self.mode)
            .field("stores", &self.stores)
            .finish_non_exhaustive()
    }
}

mod sealed {
    pub trait Sealed {}
    impl Sealed for super::ReadOnly {}
    impl Sealed for super::ReadWrite {}
}

/// Compile-time transaction mode of an operation builder.
pub trait Mode: sealed::Sealed + Send + Sync + 'static {
    const KIND: TxMode;
}

/// Marker for operations built with `Database::query`.
#[derive(Debug, Clone, Copy)]
pub struct ReadOnly;

/// Marker for operations built with `Database::mutate`.
#[derive(Debug, Clone, Copy)]
pub struct ReadWrite;

impl Mode for ReadOnly {
    const KIND: TxMode = TxMode::ReadOnly;
}

impl Mode for ReadWrite {
    const KIND: TxMode = TxMode::ReadWrite;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::Key;

    #[test]
    fn test_result_accumulates_changes() {
        let result = TransactorResult::new("done")
            .with_changes("projects", 42)
            .with_changes("chapters", vec![1, 2])
            .with_changes("projects", 43);

        let (value, changes) = result.into_parts();
        assert_eq!(value, "done");
        assert_eq!(
            changes.keys("projects"),
            Some(&[Key::Int(42), Key::Int(43)][..])
        );
        assert_eq!(changes.keys("chapters").map(<[Key]>::len), Some(2));
    }

    #[test]
    fn test_from_parts_keeps_changes() {
        let mut builder = Changes::builder();
        builder.add("chapters", "c-1");
        let result = TransactorResult::from_parts(7, builder.build()).with_changes("chapters", "c-2");

        assert_eq!(result.value, 7);
        assert_eq!(
            result.changes.keys("chapters"),
            Some(&[Key::from("c-1"), Key::from("c-2")][..])
        );
    }

    #[test]
    fn test_unchanged_result_is_invalid() {
        let result = TransactorResult::unchanged(vec![1, 2, 3]);
        assert!(!result.changes.is_valid());
    }

    #[test]
    fn test_empty_batch_keeps_result_unchanged() {
        let result = TransactorResult::changes_only().with_changes("chapters", Vec::<i64>::new());
        assert!(!result.changes.is_valid());
    }

    #[test]
    fn test_query_reports_mode_and_stores() {
        let query = Query::read_only(vec!["projects".to_string()], |_tx| Ok(1));
        assert_eq!(query.mode(), TxMode::ReadOnly);
        assert_eq!(query.stores(), ["projects".to_string()]);

        let query = Query::read_write(vec!["a".into(), "b".into()], |_tx| {
            Ok(TransactorResult::changes_only())
        });
        assert_eq!(query.mode(), TxMode::ReadWrite);
        assert_eq!(query.clone().stores().len(), 2);
    }
}
