use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// One unit of simulation state: string keys mapped to integer values.
///
/// Keys are kept sorted so the encoded JSON is deterministic.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Snapshot(BTreeMap<String, i64>);

impl Snapshot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, value: i64) -> Option<i64> {
        self.0.insert(key.into(), value)
    }

    pub fn get(&self, key: &str) -> Option<i64> {
        self.0.get(key).copied()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, i64)> {
        self.0.iter().map(|(k, v)| (k.as_str(), *v))
    }
}

impl From<BTreeMap<String, i64>> for Snapshot {
    fn from(map: BTreeMap<String, i64>) -> Self {
        Self(map)
    }
}

impl<K: Into<String>> FromIterator<(K, i64)> for Snapshot {
    fn from_iter<I: IntoIterator<Item = (K, i64)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }
}
