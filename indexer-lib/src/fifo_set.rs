use ringmap::set::RingSet;
use std::hash::Hash;

/// Bounded set of recently seen keys. Once full, the oldest key is evicted to make room.
pub struct FifoSet<K> {
    set: RingSet<K>,
    limit: usize,
}

impl<K: Hash + Eq> FifoSet<K> {
    pub fn new(limit: usize) -> Self {
        Self {
            set: RingSet::with_capacity(limit),
            limit: limit.max(1),
        }
    }

    /// Returns `false` when the key was already present.
    pub fn insert(&mut self, key: K) -> bool {
        if self.set.contains(&key) {
            return false;
        }
        while self.set.len() >= self.limit {
            self.set.pop_front();
        }
        self.set.insert(key);
        true
    }

    pub fn contains(&self, key: &K) -> bool {
        self.set.contains(key)
    }
}
