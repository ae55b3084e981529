//! Fixed-capacity cuckoo hash table mapping flow keys to slot indices.
//!
//! Layout: a power-of-two array of 4-way buckets. Every entry stores a 32-bit
//! signature of its key and the index of the key in a separate key store.
//! A key may live in its primary bucket or in the alternative bucket
//! `primary ^ spread(sig)`; since the alternative is derived from the bucket
//! and the signature alone, entries can be displaced without rehashing keys.
//!
//! The key store has exactly `capacity` slots and its indices are the values
//! handed out by [`FlowHashTable::insert`]; callers use them directly as flow
//! control block indices.
//!
//! ## Concurrency
//!
//! The table is a plain single-owner structure: `lookup` takes `&self` and
//! `insert`/`remove` take `&mut self`. Sharing it between workers requires an
//! external reader/writer lock whose release/acquire ordering publishes a
//! completed insert or remove (including any displacements it performed) as
//! a whole. The flow table manager wraps it in a `parking_lot::RwLock`.

use std::collections::hash_map::RandomState;
use std::hash::{BuildHasher, Hash};

use crate::error::{Error, Result};

/// Entries per bucket.
const BUCKET_ENTRIES: usize = 4;

/// Maximum number of displacements a single insert may perform.
const MAX_PATH_DEPTH: usize = 4;

/// Upper bound on nodes explored by the displacement search.
const MAX_SEARCH_NODES: usize = 512;

#[derive(Debug, Clone, Copy)]
struct Entry {
    sig: u32,
    index: u32,
}

type Bucket = [Option<Entry>; BUCKET_ENTRIES];

/// Node of the breadth-first displacement search.
///
/// `bucket` is reached by moving the entry at `from_slot` of the parent's
/// bucket into it.
struct PathNode {
    bucket: usize,
    parent: Option<usize>,
    from_slot: usize,
    depth: usize,
}

/// Cuckoo hash table with a fixed number of key slots.
pub struct FlowHashTable<K> {
    buckets: Vec<Bucket>,
    keys: Vec<Option<K>>,
    free: Vec<u32>,
    mask: usize,
    hasher: RandomState,
}

impl<K: Hash + Eq> FlowHashTable<K> {
    /// Create a table able to hold `capacity` keys.
    ///
    /// The bucket array is sized for a load factor of at most one half.
    pub fn new(capacity: usize) -> Self {
        let bucket_count = (capacity.div_ceil(BUCKET_ENTRIES) * 2).max(1).next_power_of_two();

        Self {
            buckets: vec![[None; BUCKET_ENTRIES]; bucket_count],
            keys: (0..capacity).map(|_| None).collect(),
            // Popped from the back, so index 0 is handed out first
            free: (0..capacity as u32).rev().collect(),
            mask: bucket_count - 1,
            hasher: RandomState::new(),
        }
    }

    /// Number of key slots.
    pub fn capacity(&self) -> usize {
        self.keys.len()
    }

    /// Number of live keys.
    pub fn len(&self) -> usize {
        self.keys.len() - self.free.len()
    }

    /// Check if the table holds no keys.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Check if every key slot is taken.
    pub fn is_full(&self) -> bool {
        self.free.is_empty()
    }

    /// Key stored at `index`, if that slot is live.
    pub fn key_at(&self, index: usize) -> Option<&K> {
        self.keys.get(index).and_then(|k| k.as_ref())
    }

    /// Find the index of `key`.
    pub fn lookup(&self, key: &K) -> Option<usize> {
        let (primary, sig) = self.hash(key);
        self.find(key, primary, sig).map(|(_, _, index)| index)
    }

    /// Insert `key` and return its index.
    ///
    /// Inserting a key that is already present returns its existing index.
    /// Fails with [`Error::TableFull`] when no key slot is free or no
    /// displacement path exists; in both cases the table is left untouched.
    pub fn insert(&mut self, key: K) -> Result<usize> {
        let (primary, sig) = self.hash(&key);
        if let Some((_, _, index)) = self.find(&key, primary, sig) {
            return Ok(index);
        }

        let Some(&index) = self.free.last() else {
            return Err(self.full());
        };

        let alternative = self.alt_bucket(primary, sig);
        let (bucket, slot) = if let Some(slot) = self.empty_slot(primary) {
            (primary, slot)
        } else if let Some(slot) = self.empty_slot(alternative) {
            (alternative, slot)
        } else if let Some(target) = self.make_room(primary, alternative) {
            target
        } else {
            return Err(self.full());
        };

        self.free.pop();
        self.buckets[bucket][slot] = Some(Entry { sig, index });
        self.keys[index as usize] = Some(key);

        Ok(index as usize)
    }

    /// Remove `key`, returning the index it occupied.
    pub fn remove(&mut self, key: &K) -> Option<usize> {
        let (primary, sig) = self.hash(key);
        let (bucket, slot, index) = self.find(key, primary, sig)?;

        self.buckets[bucket][slot] = None;
        self.keys[index] = None;
        self.free.push(index as u32);

        Some(index)
    }

    /// Iterate over live `(index, key)` pairs.
    pub fn iter(&self) -> impl Iterator<Item = (usize, &K)> {
        self.keys
            .iter()
            .enumerate()
            .filter_map(|(i, k)| k.as_ref().map(|k| (i, k)))
    }

    fn full(&self) -> Error {
        Error::TableFull {
            capacity: self.capacity(),
        }
    }

    fn hash(&self, key: &K) -> (usize, u32) {
        let h = self.hasher.hash_one(key);
        ((h as usize) & self.mask, (h >> 32) as u32)
    }

    fn alt_bucket(&self, bucket: usize, sig: u32) -> usize {
        let spread = ((sig | 1) as usize).wrapping_mul(0x5bd1_e995);
        (bucket ^ spread) & self.mask
    }

    fn empty_slot(&self, bucket: usize) -> Option<usize> {
        self.buckets[bucket].iter().position(|e| e.is_none())
    }

    fn find(&self, key: &K, primary: usize, sig: u32) -> Option<(usize, usize, usize)> {
        let alternative = self.alt_bucket(primary, sig);

        for bucket in [primary, alternative] {
            for (slot, entry) in self.buckets[bucket].iter().enumerate() {
                if let Some(entry) = entry {
                    let index = entry.index as usize;
                    if entry.sig == sig && self.keys[index].as_ref() == Some(key) {
                        return Some((bucket, slot, index));
                    }
                }
            }
        }

        None
    }

    /// Free a slot in `primary` or `alternative` by shifting entries along a
    /// displacement path.
    ///
    /// The path is searched breadth-first without touching the table; moves
    /// are applied only once a complete path ending in an empty slot is
    /// known, so no live entry is ever evicted.
    fn make_room(&mut self, primary: usize, alternative: usize) -> Option<(usize, usize)> {
        let mut nodes = vec![PathNode {
            bucket: primary,
            parent: None,
            from_slot: 0,
            depth: 0,
        }];
        if alternative != primary {
            nodes.push(PathNode {
                bucket: alternative,
                parent: None,
                from_slot: 0,
                depth: 0,
            });
        }

        let mut head = 0;
        while head < nodes.len() {
            let current = head;
            head += 1;

            let bucket = nodes[current].bucket;
            for slot in 0..BUCKET_ENTRIES {
                let Some(entry) = self.buckets[bucket][slot] else {
                    continue;
                };
                let target = self.alt_bucket(bucket, entry.sig);
                if target == bucket || self.on_path(&nodes, current, target) {
                    continue;
                }

                if let Some(free_slot) = self.empty_slot(target) {
                    self.buckets[target][free_slot] = self.buckets[bucket][slot].take();
                    return Some(self.shift_path(&nodes, current, slot));
                }

                if nodes[current].depth + 1 < MAX_PATH_DEPTH && nodes.len() < MAX_SEARCH_NODES {
                    nodes.push(PathNode {
                        bucket: target,
                        parent: Some(current),
                        from_slot: slot,
                        depth: nodes[current].depth + 1,
                    });
                }
            }
        }

        None
    }

    /// Walk from `node` back to its root, moving each parent's entry into the
    /// slot vacated below it. Returns the slot freed in the root bucket.
    fn shift_path(&mut self, nodes: &[PathNode], mut node: usize, mut vacated: usize) -> (usize, usize) {
        while let Some(parent) = nodes[node].parent {
            let from = nodes[node].from_slot;
            let moved = self.buckets[nodes[parent].bucket][from].take();
            self.buckets[nodes[node].bucket][vacated] = moved;
            vacated = from;
            node = parent;
        }

        (nodes[node].bucket, vacated)
    }

    fn on_path(&self, nodes: &[PathNode], mut node: usize, bucket: usize) -> bool {
        loop {
            if nodes[node].bucket == bucket {
                return true;
            }
            match nodes[node].parent {
                Some(parent) => node = parent,
                None => return false,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_lookup() {
        let mut table = FlowHashTable::new(16);

        let a = table.insert("a").unwrap();
        let b = table.insert("b").unwrap();

        assert_ne!(a, b);
        assert_eq!(table.lookup(&"a"), Some(a));
        assert_eq!(table.lookup(&"b"), Some(b));
        assert_eq!(table.lookup(&"c"), None);
        assert_eq!(table.len(), 2);
        assert_eq!(table.key_at(a), Some(&"a"));
    }

    #[test]
    fn test_insert_existing_returns_same_index() {
        let mut table = FlowHashTable::new(4);

        let first = table.insert(7u32).unwrap();
        let again = table.insert(7u32).unwrap();

        assert_eq!(first, again);
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_fill_to_capacity() {
        let capacity = 1000;
        let mut table = FlowHashTable::new(capacity);

        let mut indices = Vec::new();
        for key in 0..capacity as u64 {
            indices.push(table.insert(key).unwrap());
        }

        assert!(table.is_full());
        for (key, &index) in indices.iter().enumerate() {
            assert_eq!(table.lookup(&(key as u64)), Some(index));
            assert!(index < capacity);
        }
    }

    #[test]
    fn test_full_table_rejects_without_corruption() {
        let mut table = FlowHashTable::new(8);
        for key in 0..8u32 {
            table.insert(key).unwrap();
        }

        for _ in 0..3 {
            let err = table.insert(100u32).unwrap_err();
            assert_eq!(err, Error::TableFull { capacity: 8 });
        }

        assert_eq!(table.len(), 8);
        for key in 0..8u32 {
            assert!(table.lookup(&key).is_some());
        }
        assert_eq!(table.lookup(&100u32), None);
    }

    #[test]
    fn test_remove_frees_index_for_reuse() {
        let mut table = FlowHashTable::new(2);

        let a = table.insert("a").unwrap();
        table.insert("b").unwrap();
        assert!(table.insert("c").is_err());

        assert_eq!(table.remove(&"a"), Some(a));
        assert_eq!(table.remove(&"a"), None);
        assert_eq!(table.lookup(&"a"), None);

        let c = table.insert("c").unwrap();
        assert_eq!(c, a);
        assert!(table.lookup(&"b").is_some());
    }

    #[test]
    fn test_churn_keeps_lookups_consistent() {
        let capacity = 256;
        let mut table = FlowHashTable::new(capacity);
        let mut live = std::collections::HashMap::new();

        // Deterministic pseudo-random insert/remove mix
        let mut x: u64 = 0x2545_f491_4f6c_dd1d;
        for _ in 0..20_000 {
            x ^= x << 13;
            x ^= x >> 7;
            x ^= x << 17;
            let key = x % 600;

            if x & 1 == 0 {
                match table.insert(key) {
                    Ok(index) => {
                        let previous = live.insert(key, index);
                        assert!(previous.is_none() || previous == Some(index));
                    }
                    Err(_) => assert!(!live.contains_key(&key)),
                }
            } else {
                assert_eq!(table.remove(&key), live.remove(&key));
            }

            assert!(table.len() <= capacity);
            assert_eq!(table.len(), live.len());
        }

        for (key, index) in &live {
            assert_eq!(table.lookup(key), Some(*index));
        }
    }
}
