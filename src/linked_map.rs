use indexmap::IndexMap;

/// A map that remembers insertion order.
///
/// Setting an existing key replaces its value in place; the entry keeps its original
/// position.
pub struct LinkedMap<V>(IndexMap<String, V>);

impl<V> LinkedMap<V> {
    pub fn new() -> Self {
        Self(IndexMap::new())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
    pub fn get(&self, key: &str) -> Option<&V> {
        self.0.get(key)
    }

    pub fn set(&mut self, key: impl Into<String>, value: V) {
        self.0.insert(key.into(), value);
    }

    pub fn delete(&mut self, key: &str) -> Option<V> {
        self.0.shift_remove(key)
    }

    /// Removes and returns the oldest entry.
    pub fn shift(&mut self) -> Option<(String, V)> {
        self.0.shift_remove_index(0)
    }
}

impl<V> Default for LinkedMap<V> {
    fn default() -> Self {
        Self::new()
    }
}
