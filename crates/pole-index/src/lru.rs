//! Small `Vec`-backed LRU map using atomic generation counters, so `get`
//! can bump recency through a shared reference (behind an `RwLock` read
//! guard).

use std::sync::atomic::{AtomicU64, Ordering};

pub struct LruMap<K, V> {
    entries: Vec<(AtomicU64, K, V)>,
    generation: AtomicU64,
    cap: usize,
}

/// The result of an insertion in the LRU map.
pub enum InsertionOutcome<K, V> {
    /// The key was not in the cache, the key-value pair has been inserted.
    InsertedNew,
    /// The key was not in the cache and an old key-value pair was evicted
    /// to make room.
    Evicted(K, V),
    /// The key was already in the cache, its value has been replaced.
    Replaced(V),
}

impl<K: Eq, V> LruMap<K, V> {
    /// # Panics
    ///
    /// If the capacity is 0.
    pub fn new(cap: usize) -> Self {
        assert_ne!(cap, 0, "the capacity of a cache cannot be 0");
        Self { entries: Vec::with_capacity(cap), generation: AtomicU64::new(0), cap }
    }

    fn next_generation(&self) -> u64 {
        self.generation.fetch_add(1, Ordering::AcqRel) + 1
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn get(&self, key: &K) -> Option<&V> {
        for (generation, candidate, value) in self.entries.iter() {
            if candidate == key {
                generation.store(self.next_generation(), Ordering::Release);
                return Some(value);
            }
        }
        None
    }

    pub fn insert(&mut self, key: K, value: V) -> InsertionOutcome<K, V> {
        let next = {
            let generation = self.generation.get_mut();
            *generation += 1;
            *generation
        };
        for (generation, candidate, existing) in self.entries.iter_mut() {
            if *candidate == key {
                *generation.get_mut() = next;
                let previous = std::mem::replace(existing, value);
                return InsertionOutcome::Replaced(previous);
            }
        }

        let evicted = if self.entries.len() == self.cap { self.pop_oldest() } else { None };
        self.entries.push((AtomicU64::new(next), key, value));
        match evicted {
            Some((key, value)) => InsertionOutcome::Evicted(key, value),
            None => InsertionOutcome::InsertedNew,
        }
    }

    pub fn remove(&mut self, key: &K) -> Option<V> {
        let index = self.entries.iter().position(|(_, candidate, _)| candidate == key)?;
        let (_, _, value) = self.entries.swap_remove(index);
        Some(value)
    }

    fn pop_oldest(&mut self) -> Option<(K, V)> {
        let mut oldest: Option<(usize, u64)> = None;
        for (index, (generation, _, _)) in self.entries.iter_mut().enumerate() {
            let generation = *generation.get_mut();
            match oldest {
                Some((_, min)) if min <= generation => {}
                _ => oldest = Some((index, generation)),
            }
        }
        oldest.map(|(index, _)| {
            let (_, key, value) = self.entries.swap_remove(index);
            (key, value)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn eviction_removes_the_least_recently_used() {
        let mut lru: LruMap<&str, u32> = LruMap::new(2);
        assert!(matches!(lru.insert("a", 1), InsertionOutcome::InsertedNew));
        assert!(matches!(lru.insert("b", 2), InsertionOutcome::InsertedNew));

        // touch "a" so "b" becomes the eviction candidate
        assert_eq!(lru.get(&"a"), Some(&1));

        match lru.insert("c", 3) {
            InsertionOutcome::Evicted(key, value) => {
                assert_eq!(key, "b");
                assert_eq!(value, 2);
            }
            _ => panic!("expected an eviction"),
        }
        assert!(lru.get(&"b").is_none());
        assert_eq!(lru.get(&"a"), Some(&1));
        assert_eq!(lru.get(&"c"), Some(&3));
    }

    #[test]
    fn replacing_returns_the_previous_value() {
        let mut lru: LruMap<&str, u32> = LruMap::new(2);
        lru.insert("a", 1);
        match lru.insert("a", 9) {
            InsertionOutcome::Replaced(previous) => assert_eq!(previous, 1),
            _ => panic!("expected a replacement"),
        }
        assert_eq!(lru.len(), 1);
    }

    #[test]
    fn remove_returns_the_value() {
        let mut lru: LruMap<&str, u32> = LruMap::new(2);
        lru.insert("a", 1);
        assert_eq!(lru.remove(&"a"), Some(1));
        assert_eq!(lru.remove(&"a"), None);
    }
}
