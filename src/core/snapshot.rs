use crate::core::key::QueryKey;

/// Values of the affected keys captured right before an optimistic write.
///
/// A snapshot has no mutating API: once taken, rollback writes back exactly
/// what was captured.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot<V> {
    entries: Vec<(QueryKey, Option<V>)>,
}

impl<V> Snapshot<V> {
    pub(crate) fn new(entries: Vec<(QueryKey, Option<V>)>) -> Self {
        Self { entries }
    }

    /// Captured value for `key`, `None` if the key was absent or not captured
    pub fn get(&self, key: &QueryKey) -> Option<&V> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .and_then(|(_, v)| v.as_ref())
    }

    pub fn contains_key(&self, key: &QueryKey) -> bool {
        self.entries.iter().any(|(k, _)| k == key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &QueryKey> {
        self.entries.iter().map(|(k, _)| k)
    }

    /// Keys that held a value when the snapshot was taken
    pub fn captured(&self) -> impl Iterator<Item = (&QueryKey, &V)> {
        self.entries
            .iter()
            .filter_map(|(k, v)| v.as_ref().map(|v| (k, v)))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<V> Default for Snapshot<V> {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
        }
    }
}
