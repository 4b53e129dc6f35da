//! String-keyed associative container used throughout the toolchain.
//!
//! A deliberately small chained hash table: owned `String` keys, opaque
//! values, djb2 hashing. Every registry in the pipeline (user types,
//! function tables, assembler labels, the VM's internal types and native
//! callbacks) is one of these, so its behavior is pinned down here rather
//! than delegated to the standard library map.
//!
//! The table never rehashes; bucket chains simply grow. Registries in this
//! toolchain hold tens of entries, and a fixed bucket count keeps iteration
//! order stable for a given insertion sequence, which the assembly emitter
//! relies on for deterministic output.

/// Initial (and only) bucket count.
const INITIAL_CAPACITY: usize = 16;

/// djb2 string hash: `h = h * 33 ^ c`, seeded with 5381.
fn djb2(key: &str) -> u64 {
    let mut h: u64 = 5381;
    for c in key.bytes() {
        h = (h.wrapping_shl(5).wrapping_add(h)) ^ u64::from(c);
    }
    h
}

struct Entry<V> {
    key: String,
    value: V,
}

/// Chained hash map with `String` keys.
///
/// Duplicate keys are not rejected on insert; callers enforce uniqueness
/// (the parser and assembler check for redeclaration before inserting).
/// A duplicate insert shadows the earlier entry for `get`.
pub struct SpyreMap<V> {
    buckets: Vec<Vec<Entry<V>>>,
    len: usize,
}

impl<V> SpyreMap<V> {
    pub fn new() -> Self {
        let mut buckets = Vec::with_capacity(INITIAL_CAPACITY);
        for _ in 0..INITIAL_CAPACITY {
            buckets.push(Vec::new());
        }
        SpyreMap { buckets, len: 0 }
    }

    fn bucket_of(&self, key: &str) -> usize {
        (djb2(key) % self.buckets.len() as u64) as usize
    }

    /// Insert a key/value pair. Existing entries with the same key are
    /// shadowed, not replaced.
    pub fn insert(&mut self, key: &str, value: V) {
        let index = self.bucket_of(key);
        self.buckets[index].insert(
            0,
            Entry {
                key: key.to_string(),
                value,
            },
        );
        self.len += 1;
    }

    pub fn get(&self, key: &str) -> Option<&V> {
        let index = self.bucket_of(key);
        self.buckets[index]
            .iter()
            .find(|e| e.key == key)
            .map(|e| &e.value)
    }

    pub fn get_mut(&mut self, key: &str) -> Option<&mut V> {
        let index = self.bucket_of(key);
        self.buckets[index]
            .iter_mut()
            .find(|e| e.key == key)
            .map(|e| &mut e.value)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// Remove the most recently inserted entry for `key`, returning its
    /// value.
    pub fn remove(&mut self, key: &str) -> Option<V> {
        let index = self.bucket_of(key);
        let pos = self.buckets[index].iter().position(|e| e.key == key)?;
        let entry = self.buckets[index].remove(pos);
        self.len -= 1;
        Some(entry.value)
    }

    /// Visit every entry. Iteration order is unspecified but stable for a
    /// given insertion sequence.
    pub fn foreach<F: FnMut(&str, &V)>(&self, mut visit: F) {
        for bucket in &self.buckets {
            for entry in bucket {
                visit(&entry.key, &entry.value);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl<V> Default for SpyreMap<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V: Clone> Clone for SpyreMap<V> {
    fn clone(&self) -> Self {
        let mut map = SpyreMap::new();
        // Re-inserting in visit order preserves per-bucket ordering.
        self.foreach(|k, v| map.insert(k, v.clone()));
        map
    }
}

impl<V: std::fmt::Debug> std::fmt::Debug for SpyreMap<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut m = f.debug_map();
        self.foreach(|k, v| {
            m.entry(&k, v);
        });
        m.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_and_get() {
        let mut map = SpyreMap::new();
        map.insert("alpha", 1);
        map.insert("beta", 2);

        assert_eq!(map.get("alpha"), Some(&1));
        assert_eq!(map.get("beta"), Some(&2));
        assert_eq!(map.get("gamma"), None);
        assert_eq!(map.len(), 2);
    }

    #[test]
    fn test_duplicate_insert_shadows() {
        let mut map = SpyreMap::new();
        map.insert("key", "old");
        map.insert("key", "new");

        // Most recent insert wins for lookup.
        assert_eq!(map.get("key"), Some(&"new"));

        // Removing peels back to the shadowed entry.
        assert_eq!(map.remove("key"), Some("new"));
        assert_eq!(map.get("key"), Some(&"old"));
    }

    #[test]
    fn test_remove() {
        let mut map = SpyreMap::new();
        map.insert("x", 10);
        assert_eq!(map.remove("x"), Some(10));
        assert_eq!(map.remove("x"), None);
        assert!(map.is_empty());
    }

    #[test]
    fn test_foreach_visits_all() {
        let mut map = SpyreMap::new();
        for i in 0..40 {
            map.insert(&format!("key{}", i), i);
        }

        let mut sum = 0;
        let mut count = 0;
        map.foreach(|_, v| {
            sum += v;
            count += 1;
        });
        assert_eq!(count, 40);
        assert_eq!(sum, (0..40).sum::<i32>());
    }

    #[test]
    fn test_get_mut() {
        let mut map = SpyreMap::new();
        map.insert("counter", 0);
        *map.get_mut("counter").unwrap() += 5;
        assert_eq!(map.get("counter"), Some(&5));
    }

    #[test]
    fn test_colliding_keys_chain() {
        // With 16 buckets, 64 keys guarantee chains; all must stay reachable.
        let mut map = SpyreMap::new();
        for i in 0..64 {
            map.insert(&format!("entry-{}", i), i);
        }
        for i in 0..64 {
            assert_eq!(map.get(&format!("entry-{}", i)), Some(&i));
        }
    }
}
