use fxhash::FxBuildHasher;
use std::collections::HashMap;
use std::hash::Hash;

/// A string/small-key hash map using `fxhash` over the default SipHash —
/// these keys are never attacker-controlled input, so the faster
/// non-cryptographic hash is the right tradeoff. Used by the server
/// registry (keyed by instance name) and the port-config registry
/// (keyed by port name).
pub struct Map<K, V> {
    inner: HashMap<K, V, FxBuildHasher>,
}

impl<K: Eq + Hash, V> Map<K, V> {
    pub fn new() -> Map<K, V> {
        Map { inner: HashMap::with_hasher(FxBuildHasher::default()) }
    }

    #[inline]
    pub fn insert(&mut self, key: K, value: V) -> Option<V> {
        self.inner.insert(key, value)
    }

    #[inline]
    pub fn get(&self, key: &K) -> Option<&V> {
        self.inner.get(key)
    }

    #[inline]
    pub fn get_mut(&mut self, key: &K) -> Option<&mut V> {
        self.inner.get_mut(key)
    }

    #[inline]
    pub fn remove(&mut self, key: &K) -> Option<V> {
        self.inner.remove(key)
    }

    #[inline]
    pub fn contains_key(&self, key: &K) -> bool {
        self.inner.contains_key(key)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    pub fn keys(&self) -> Vec<&K> {
        self.inner.keys().collect()
    }

    pub fn values(&self) -> Vec<&V> {
        self.inner.values().collect()
    }

    /// Visits every entry, allowing the closure to mutate values in place.
    pub fn foreach<F: FnMut(&K, &mut V)>(&mut self, mut f: F) {
        for (k, v) in self.inner.iter_mut() {
            f(k, v);
        }
    }

    pub fn iter(&self) -> std::collections::hash_map::Iter<'_, K, V> {
        self.inner.iter()
    }
}

impl<K: Eq + Hash, V> Default for Map<K, V> {
    fn default() -> Self {
        Map::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_lookup_remove() {
        let mut m: Map<String, u32> = Map::new();
        m.insert("a".to_string(), 1);
        m.insert("b".to_string(), 2);
        assert_eq!(m.get(&"a".to_string()), Some(&1));
        assert_eq!(m.len(), 2);
        assert_eq!(m.remove(&"a".to_string()), Some(1));
        assert!(!m.contains_key(&"a".to_string()));
    }

    #[test]
    fn foreach_mutates_in_place() {
        let mut m: Map<&str, u32> = Map::new();
        m.insert("a", 1);
        m.insert("b", 2);
        m.foreach(|_, v| *v *= 10);
        assert_eq!(m.get(&"a"), Some(&10));
        assert_eq!(m.get(&"b"), Some(&20));
    }
}
