use fxhash::FxBuildHasher;
use std::collections::HashMap;

/// A map external to the socket object used to attach extra per-socket
/// state without bloating every `Socket`. Keyed by the socket's unique id
/// rather than by pointer identity, which
/// is what lets [`SideTable::remove`] be called from a pre-free hook
/// during teardown without the socket object itself needing a back
/// reference.
pub struct SideTable<V> {
    inner: HashMap<u64, V, FxBuildHasher>,
}

impl<V> SideTable<V> {
    pub fn new() -> SideTable<V> {
        SideTable { inner: HashMap::with_hasher(FxBuildHasher::default()) }
    }

    #[inline]
    pub fn set(&mut self, id: u64, value: V) {
        self.inner.insert(id, value);
    }

    #[inline]
    pub fn get(&self, id: u64) -> Option<&V> {
        self.inner.get(&id)
    }

    #[inline]
    pub fn get_mut(&mut self, id: u64) -> Option<&mut V> {
        self.inner.get_mut(&id)
    }

    /// Removes any side-table entry for `id`. Called from the reactor's
    /// pre-free hook so an id becoming recyclable never drags stale
    /// binding data along with it.
    #[inline]
    pub fn remove(&mut self, id: u64) -> Option<V> {
        self.inner.remove(&id)
    }

    #[inline]
    pub fn contains(&self, id: u64) -> bool {
        self.inner.contains_key(&id)
    }
}

impl<V> Default for SideTable<V> {
    fn default() -> Self {
        SideTable::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_get_remove() {
        let mut t: SideTable<Vec<u32>> = SideTable::new();
        t.set(1, vec![1, 2, 3]);
        assert_eq!(t.get(1), Some(&vec![1, 2, 3]));
        assert_eq!(t.remove(1), Some(vec![1, 2, 3]));
        assert!(!t.contains(1));
    }
}
