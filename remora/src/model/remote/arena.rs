use slab::Slab;

/// Handle to a cached node of a [`RemoteCollection`](super::RemoteCollection).
///
/// Keys carry the generation of the node they were issued for. Once the node
/// is evicted (removed rows, layout change, reset) the key stops resolving,
/// even if its slot is reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeKey {
    index: usize,
    generation: u64,
}

pub(crate) struct Arena<T> {
    slots: Slab<(u64, T)>,
    generation: u64,
}

impl<T> Arena<T> {
    pub fn new() -> Self {
        Self {
            slots: Slab::new(),
            generation: 0,
        }
    }

    pub fn insert(&mut self, value: T) -> NodeKey {
        self.generation += 1;
        let index = self.slots.insert((self.generation, value));
        NodeKey {
            index,
            generation: self.generation,
        }
    }

    pub fn get(&self, key: NodeKey) -> Option<&T> {
        match self.slots.get(key.index) {
            Some((generation, value)) if *generation == key.generation => Some(value),
            _ => None,
        }
    }

    pub fn get_mut(&mut self, key: NodeKey) -> Option<&mut T> {
        match self.slots.get_mut(key.index) {
            Some((generation, value)) if *generation == key.generation => Some(value),
            _ => None,
        }
    }

    pub fn remove(&mut self, key: NodeKey) -> Option<T> {
        self.get(key)?;
        Some(self.slots.remove(key.index).1)
    }

    /// Drop everything. Generations keep counting, so old keys stay dead.
    pub fn clear(&mut self) {
        self.slots.clear();
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.slots.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reused_slot_rejects_stale_key() {
        let mut arena = Arena::new();
        let old = arena.insert("old");
        assert_eq!(arena.remove(old), Some("old"));

        let new = arena.insert("new");
        assert_eq!(old.index, new.index);
        assert_eq!(arena.get(old), None);
        assert_eq!(arena.get(new), Some(&"new"));
        assert_eq!(arena.remove(old), None);
        assert_eq!(arena.len(), 1);
    }

    #[test]
    fn test_clear_invalidates_keys() {
        let mut arena = Arena::new();
        let key = arena.insert(1);
        arena.clear();
        let fresh = arena.insert(2);
        assert_eq!(arena.get(key), None);
        assert_eq!(arena.get(fresh), Some(&2));
    }
}
