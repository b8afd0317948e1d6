//! Fluent construction of prepared operations.

use std::marker::PhantomData;

use crate::changes::Changes;
use crate::database::Database;
use crate::error::Error;
use crate::key::{Key, KeyRange};
use crate::query::prepared::PreparedOperation;
use crate::query::transactor::{Mode, Query, ReadOnly, ReadWrite, TransactorResult};
use crate::storage::{Transaction, TxMode};

/// A (store, key range) pair a live query reacts to.
///
/// `range: None` matches any change to the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObservingTarget {
    pub store: String,
    pub range: Option<KeyRange>,
}

impl ObservingTarget {
    pub fn any_key(store: impl Into<String>) -> Self {
        Self {
            store: store.into(),
            range: None,
        }
    }

    pub fn key(store: impl Into<String>, key: impl Into<Key>) -> Self {
        Self::range(store, KeyRange::only(key.into()))
    }

    pub fn range(store: impl Into<String>, range: KeyRange) -> Self {
        Self {
            store: store.into(),
            range: Some(range),
        }
    }

    /// Whether `changes` touches this target.
    pub fn matches(&self, changes: &Changes) -> bool {
        changes.affects(&self.store, self.range.as_ref())
    }
}

/// Builds a [`PreparedOperation`] for a fixed set of stores.
///
/// Obtained from [`Database::query`] or [`Database::mutate`]; the marker
/// type `M` decides which transactor shape `handled_by` accepts.
#[must_use = "an operation builder does nothing until handled_by is called"]
pub struct OperationBuilder<M: Mode> {
    db: Database,
    stores: Vec<String>,
    observing: Vec<ObservingTarget>,
    _mode: PhantomData<M>,
}

impl<M: Mode> OperationBuilder<M> {
    pub(crate) fn new(db: Database, stores: Vec<String>) -> Self {
        Self {
            db,
            stores,
            observing: Vec::new(),
            _mode: PhantomData,
        }
    }

    /// React to any change in `store`.
    pub fn observe_on(mut self, store: impl Into<String>) -> Self {
        self.observing.push(ObservingTarget::any_key(store));
        self
    }

    /// React to changes of a single key in `store`.
    pub fn observe_key(mut self, store: impl Into<String>, key: impl Into<Key>) -> Self {
        self.observing.push(ObservingTarget::key(store, key));
        self
    }

    /// React to changes of keys inside `range` in `store`.
    pub fn observe_range(mut self, store: impl Into<String>, range: KeyRange) -> Self {
        self.observing.push(ObservingTarget::range(store, range));
        self
    }

    pub fn mode(&self) -> TxMode {
        M::KIND
    }

    fn prepare<V>(self, query: Query<V>) -> PreparedOperation<V> {
        PreparedOperation::new(self.db, query, self.observing)
    }
}

impl OperationBuilder<ReadOnly> {
    /// Finish with a read-only transactor.
    pub fn handled_by<V, F>(self, transactor: F) -> PreparedOperation<V>
    where
        V: Send + 'static,
        F: Fn(&Transaction<'_>) -> Result<V, Error> + Send + Sync + 'static,
    {
        let query = Query::read_only(self.stores.clone(), transactor);
        self.prepare(query)
    }
}

impl OperationBuilder<ReadWrite> {
    /// Finish with a read-write transactor that reports its changes.
    pub fn handled_by<V, F>(self, transactor: F) -> PreparedOperation<V>
    where
        V: Send + 'static,
        F: Fn(&Transaction<'_>) -> Result<TransactorResult<V>, Error> + Send + Sync + 'static,
    {
        let query = Query::read_write(self.stores.clone(), transactor);
        self.prepare(query)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn changes(store: &str, keys: Vec<i64>) -> Changes {
        let mut builder = Changes::builder();
        builder.add(store, keys);
        builder.build()
    }

    #[test]
    fn test_any_key_target_matches_every_key_of_its_store() {
        let target = ObservingTarget::any_key("projects");
        assert!(target.matches(&changes("projects", vec![1])));
        assert!(target.matches(&changes("projects", vec![99, 100])));
        assert!(!target.matches(&changes("chapters", vec![1])));
    }

    #[test]
    fn test_key_target_matches_only_its_key() {
        let target = ObservingTarget::key("projects", 42);
        assert!(target.matches(&changes("projects", vec![7, 42])));
        assert!(!target.matches(&changes("projects", vec![41, 43])));
    }

    #[test]
    fn test_range_target_respects_bounds() {
        let target = ObservingTarget::range("chapters", KeyRange::bound(10, 20, false, true));
        assert!(target.matches(&changes("chapters", vec![10])));
        assert!(target.matches(&changes("chapters", vec![19])));
        assert!(!target.matches(&changes("chapters", vec![20])));
        assert!(!target.matches(&changes("chapters", vec![9])));
    }
}
