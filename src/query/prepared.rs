//! A built operation, ready for one-shot or live execution.

use std::sync::Arc;

use crate::changes::Changes;
use crate::database::Database;
use crate::error::Error;
use crate::query::builder::ObservingTarget;
use crate::query::subscription::Subscription;
use crate::query::transactor::Query;

/// A query bound to a database plus the targets that invalidate it.
///
/// Holds no storage resources between runs; every [`execute`](Self::execute)
/// opens a fresh transaction.
pub struct PreparedOperation<V> {
    db: Database,
    query: Query<V>,
    observing: Arc<[ObservingTarget]>,
}

impl<V> PreparedOperation<V> {
    pub(crate) fn new(db: Database, query: Query<V>, observing: Vec<ObservingTarget>) -> Self {
        Self {
            db,
            query,
            observing: observing.into(),
        }
    }

    pub fn query(&self) -> &Query<V> {
        &self.query
    }

    pub fn observing(&self) -> &[ObservingTarget] {
        &self.observing
    }

    pub(crate) fn database(&self) -> &Database {
        &self.db
    }

    /// Whether a change event should trigger a re-run of this operation.
    pub fn is_relevant(&self, changes: &Changes) -> bool {
        is_relevant(&self.observing, changes)
    }
}

impl<V: Send + 'static> PreparedOperation<V> {
    /// Run once in a new transaction.
    pub async fn execute(&self) -> Result<V, Error> {
        self.db.exec_query(&self.query).await
    }

    /// Run now and again after every relevant change, latest result wins.
    ///
    /// Must be called from within a tokio runtime.
    pub fn subscribe(&self) -> Subscription<V> {
        Subscription::start(self.clone())
    }
}

impl<V> Clone for PreparedOperation<V> {
    fn clone(&self) -> Self {
        Self {
            db: self.db.clone(),
            query: self.query.clone(),
            observing: Arc::clone(&self.observing),
        }
    }
}

/// Relevance rule for live queries.
///
/// Invalid (empty) changes are never relevant. With no targets every
/// valid event is relevant; otherwise at least one target must match.
pub fn is_relevant(targets: &[ObservingTarget], changes: &Changes) -> bool {
    if !changes.is_valid() {
        return false;
    }
    targets.is_empty() || targets.iter().any(|target| target.matches(changes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::KeyRange;

    fn changes(store: &str, keys: Vec<i64>) -> Changes {
        let mut builder = Changes::builder();
        builder.add(store, keys);
        builder.build()
    }

    #[test]
    fn test_overlap_matching() {
        let targets = [ObservingTarget::range("A", KeyRange::bound(5, 10, false, false))];

        assert!(is_relevant(&targets, &changes("A", vec![7])));
        assert!(!is_relevant(&targets, &changes("A", vec![20])));
        assert!(!is_relevant(&targets, &changes("B", vec![7])));
    }

    #[test]
    fn test_no_targets_matches_any_valid_changes() {
        assert!(is_relevant(&[], &changes("anything", vec![1])));
        assert!(!is_relevant(&[], &Changes::new()));
    }

    #[test]
    fn test_any_of_several_targets_is_enough() {
        let targets = [
            ObservingTarget::key("projects", 1),
            ObservingTarget::any_key("chapters"),
        ];
        assert!(is_relevant(&targets, &changes("chapters", vec![500])));
        assert!(is_relevant(&targets, &changes("projects", vec![1])));
        assert!(!is_relevant(&targets, &changes("projects", vec![2])));
    }
}
