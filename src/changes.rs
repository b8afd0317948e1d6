//! Change sets: which keys a committed transaction touched, per store.
//!
//! Wire format (shared with other contexts over the broadcast transport):
//! a JSON object whose property names are JSON-encoded store names and
//! whose values are arrays of keys, e.g. `{"\"projects\"":[42,43]}`.

use serde_json::{Map, Value};
use std::collections::BTreeMap;

use crate::error::Error;
use crate::key::{Key, KeyRange};

/// Keys affected by one transaction, grouped by store.
///
/// A store with no affected keys is absent; every present entry holds at
/// least one key. Duplicate keys are kept as they were added.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Changes {
    entries: BTreeMap<String, Vec<Key>>,
}

impl Changes {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn builder() -> ChangesBuilder {
        ChangesBuilder::new()
    }

    /// Whether these changes touch anything and should be published.
    pub fn is_valid(&self) -> bool {
        !self.entries.is_empty()
    }

    /// Number of stores affected.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Affected keys of `store`, in the order they were added.
    pub fn keys(&self, store: &str) -> Option<&[Key]> {
        self.entries.get(store).map(Vec::as_slice)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[Key])> {
        self.entries
            .iter()
            .map(|(store, keys)| (store.as_str(), keys.as_slice()))
    }

    /// Whether any key of `store` falls in `range` (`None` matches any key).
    pub fn affects(&self, store: &str, range: Option<&KeyRange>) -> bool {
        match (self.entries.get(store), range) {
            (None, _) => false,
            (Some(_), None) => true,
            (Some(keys), Some(range)) => keys.iter().any(|key| range.contains(key)),
        }
    }

    pub(crate) fn push(&mut self, store: &str, keys: Vec<Key>) {
        if keys.is_empty() {
            return;
        }
        self.entries.entry(store.to_string()).or_default().extend(keys);
    }

    /// Encode for the broadcast transport.
    pub fn serialize(&self) -> String {
        let map: Map<String, Value> = self
            .entries
            .iter()
            .map(|(store, keys)| {
                (
                    Value::String(store.clone()).to_string(),
                    Value::Array(keys.iter().map(Key::to_json).collect()),
                )
            })
            .collect();
        Value::Object(map).to_string()
    }

    /// Decode a message produced by [`Changes::serialize`].
    ///
    /// Entries with an empty key list are skipped.
    pub fn deserialize(message: &str) -> Result<Self, Error> {
        let parsed: Map<String, Value> =
            serde_json::from_str(message).map_err(Error::MalformedMessage)?;

        let mut changes = Self::new();
        for (raw_store, keys) in parsed {
            let store: String =
                serde_json::from_str(&raw_store).map_err(Error::MalformedMessage)?;
            let keys: Vec<Key> = serde_json::from_value(keys).map_err(Error::MalformedMessage)?;
            changes.push(&store, keys);
        }
        Ok(changes)
    }
}

/// One key or a batch of keys.
pub trait IntoKeys {
    fn into_keys(self) -> Vec<Key>;
}

impl IntoKeys for Key {
    fn into_keys(self) -> Vec<Key> {
        vec![self]
    }
}

impl IntoKeys for i64 {
    fn into_keys(self) -> Vec<Key> {
        vec![Key::Int(self)]
    }
}

impl IntoKeys for i32 {
    fn into_keys(self) -> Vec<Key> {
        vec![Key::from(self)]
    }
}

impl IntoKeys for &str {
    fn into_keys(self) -> Vec<Key> {
        vec![Key::from(self)]
    }
}

impl IntoKeys for String {
    fn into_keys(self) -> Vec<Key> {
        vec![Key::Text(self)]
    }
}

impl<T: Into<Key>> IntoKeys for Vec<T> {
    fn into_keys(self) -> Vec<Key> {
        self.into_iter().map(Into::into).collect()
    }
}

impl<T: Into<Key> + Clone> IntoKeys for &[T] {
    fn into_keys(self) -> Vec<Key> {
        self.iter().cloned().map(Into::into).collect()
    }
}

/// Accumulates [`Changes`] while a transaction runs.
#[derive(Debug, Default)]
pub struct ChangesBuilder {
    changes: Changes,
}

impl ChangesBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one key or a batch of keys against `store`.
    ///
    /// An empty batch leaves the builder untouched.
    pub fn add(&mut self, store: &str, keys: impl IntoKeys) -> &mut Self {
        self.changes.push(store, keys.into_keys());
        self
    }

    pub fn build(self) -> Changes {
        self.changes
    }
}
