//! Shared key-value state: trust levels and module-sync markers.
//!
//! Services receive these maps as `Arc<dyn KeyValueCache<V>>`, so a
//! distributed map can stand in for the bundled in-process one.

use std::collections::BTreeMap;
use std::fmt;

use hashbrown::HashMap;
use parking_lot::RwLock;

/// A concurrent string-keyed map.
pub trait KeyValueCache<V>: Send + Sync {
    /// Value stored under `key`.
    fn get(&self, key: &str) -> Option<V>;

    /// Stores `value` under `key`, returning the previous value.
    fn put(&self, key: String, value: V) -> Option<V>;

    /// Stores every entry.
    fn put_all(&self, entries: Vec<(String, V)>);

    /// Removes `key`, returning its value.
    fn remove(&self, key: &str) -> Option<V>;

    /// Values of the given keys that are present.
    fn get_all(&self, keys: &[String]) -> BTreeMap<String, V>;

    /// Snapshot of every entry.
    fn entries(&self) -> BTreeMap<String, V>;

    /// Returns true if `key` is present.
    fn contains_key(&self, key: &str) -> bool {
        self.get(key).is_some()
    }
}

/// In-process [`KeyValueCache`] over a read-write locked hash map.
pub struct ConcurrentKeyValueCache<V> {
    entries: RwLock<HashMap<String, V>>,
}

impl<V> Default for ConcurrentKeyValueCache<V> {
    fn default() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }
}

impl<V> ConcurrentKeyValueCache<V> {
    /// Creates an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Returns true if the cache holds nothing.
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

impl<V> fmt::Debug for ConcurrentKeyValueCache<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConcurrentKeyValueCache")
            .field("len", &self.len())
            .finish()
    }
}

impl<V: Clone + Send + Sync> KeyValueCache<V> for ConcurrentKeyValueCache<V> {
    fn get(&self, key: &str) -> Option<V> {
        self.entries.read().get(key).cloned()
    }

    fn put(&self, key: String, value: V) -> Option<V> {
        self.entries.write().insert(key, value)
    }

    fn put_all(&self, entries: Vec<(String, V)>) {
        self.entries.write().extend(entries);
    }

    fn remove(&self, key: &str) -> Option<V> {
        self.entries.write().remove(key)
    }

    fn get_all(&self, keys: &[String]) -> BTreeMap<String, V> {
        let entries = self.entries.read();
        keys.iter()
            .filter_map(|key| entries.get(key).map(|value| (key.clone(), value.clone())))
            .collect()
    }

    fn entries(&self) -> BTreeMap<String, V> {
        self.entries
            .read()
            .iter()
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_put_get_remove() {
        let cache = ConcurrentKeyValueCache::new();
        assert!(cache.put("ch-1".to_string(), 1).is_none());
        assert_eq!(cache.put("ch-1".to_string(), 2), Some(1));
        assert_eq!(cache.get("ch-1"), Some(2));
        assert!(cache.contains_key("ch-1"));
        assert_eq!(cache.remove("ch-1"), Some(2));
        assert!(cache.is_empty());
    }

    #[test]
    fn test_get_all_skips_missing_keys() {
        let cache = ConcurrentKeyValueCache::new();
        cache.put_all(vec![("a".to_string(), 1), ("b".to_string(), 2)]);
        let found = cache.get_all(&["b".to_string(), "z".to_string()]);
        assert_eq!(found, BTreeMap::from([("b".to_string(), 2)]));
        assert_eq!(cache.entries().len(), 2);
    }

    #[test]
    fn test_concurrent_writers() {
        let cache: Arc<dyn KeyValueCache<usize>> = Arc::new(ConcurrentKeyValueCache::new());
        let handles: Vec<_> = (0..4)
            .map(|t| {
                let cache = Arc::clone(&cache);
                thread::spawn(move || {
                    for i in 0..50 {
                        cache.put(format!("{t}-{i}"), i);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(cache.entries().len(), 200);
    }
}
