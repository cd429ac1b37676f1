use log::debug;
use lru::LruCache;
use std::sync::{Arc, Mutex};

/// Bounded LRU map from formula keys to built evaluators.
///
/// When an insert finds the cache full, the `reduction_size` least recently used entries are
/// evicted in one batch. Lookups, LRU reordering, eviction and inserts all happen under one lock.
pub struct FormulaCache<V> {
    inner: Mutex<LruCache<Arc<str>, V>>,
    maximum_size: usize,
    reduction_size: usize,
}

impl<V: Clone> FormulaCache<V> {
    pub fn new(maximum_size: usize, reduction_size: usize) -> Self {
        Self {
            // Capacity is enforced by `evict_locked`, not by `LruCache` itself.
            inner: Mutex::new(LruCache::unbounded()),
            maximum_size: maximum_size.max(1),
            reduction_size: reduction_size.max(1),
        }
    }

    pub fn maximum_size(&self) -> usize {
        self.maximum_size
    }

    pub fn reduction_size(&self) -> usize {
        self.reduction_size
    }

    /// Look up `key`, marking it most recently used.
    pub fn get(&self, key: &str) -> Option<V> {
        let mut inner = self.inner.lock().expect("formula cache mutex poisoned");
        inner.get(key).cloned()
    }

    /// Whether `key` is cached. Does not touch the LRU order.
    pub fn contains(&self, key: &str) -> bool {
        let inner = self.inner.lock().expect("formula cache mutex poisoned");
        inner.contains(key)
    }

    pub fn insert(&self, key: &str, value: V) {
        let mut inner = self.inner.lock().expect("formula cache mutex poisoned");
        self.insert_locked(&mut inner, key, value);
    }

    /// Return the cached value for `key`, building and inserting it with `create` on a miss.
    ///
    /// `create` runs while the cache lock is held, so concurrent callers asking for the same
    /// key build it once. It must not call back into this cache.
    pub fn get_or_create<E>(
        &self,
        key: &str,
        create: impl FnOnce() -> Result<V, E>,
    ) -> Result<V, E> {
        let mut inner = self.inner.lock().expect("formula cache mutex poisoned");
        if let Some(value) = inner.get(key) {
            return Ok(value.clone());
        }

        debug!("formula cache miss for `{key}`");
        let value = create()?;
        self.insert_locked(&mut inner, key, value.clone());
        Ok(value)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().expect("formula cache mutex poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        let mut inner = self.inner.lock().expect("formula cache mutex poisoned");
        if !inner.is_empty() {
            debug!("clearing {} cached formulas", inner.len());
            inner.clear();
        }
    }

    fn insert_locked(&self, inner: &mut LruCache<Arc<str>, V>, key: &str, value: V) {
        if !inner.contains(key) {
            self.evict_locked(inner);
        }
        inner.put(Arc::from(key), value);
    }

    fn evict_locked(&self, inner: &mut LruCache<Arc<str>, V>) {
        if inner.len() < self.maximum_size {
            return;
        }
        let mut evicted = 0;
        while evicted < self.reduction_size {
            if inner.pop_lru().is_none() {
                break;
            }
            evicted += 1;
        }
        debug!("formula cache full, evicted {evicted} entries");
    }
}

impl<V> std::fmt::Debug for FormulaCache<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FormulaCache")
            .field("maximum_size", &self.maximum_size)
            .field("reduction_size", &self.reduction_size)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::convert::Infallible;

    #[test]
    fn evicts_least_recently_used_batch() {
        let cache = FormulaCache::new(3, 2);
        cache.insert("a", 1);
        cache.insert("b", 2);
        cache.insert("c", 3);
        // Touch "a" so "b" and "c" are the oldest.
        assert_eq!(cache.get("a"), Some(1));

        cache.insert("d", 4);
        assert_eq!(cache.len(), 2);
        assert!(cache.contains("a"));
        assert!(cache.contains("d"));
        assert!(!cache.contains("b"));
        assert!(!cache.contains("c"));
    }

    #[test]
    fn rebuilds_evicted_entries() {
        let cache = FormulaCache::new(1, 1);
        let mut builds = 0;
        let mut build = |key: &str, value: i32| {
            cache
                .get_or_create(key, || {
                    builds += 1;
                    Ok::<_, Infallible>(value)
                })
                .unwrap()
        };
        assert_eq!(build("x", 1), 1);
        assert_eq!(build("x", 99), 1);
        assert_eq!(build("y", 2), 2);
        assert_eq!(build("x", 3), 3);
        assert_eq!(builds, 3);
    }

    #[test]
    fn failed_builds_are_not_cached() {
        let cache: FormulaCache<i32> = FormulaCache::new(4, 1);
        let err = cache.get_or_create("bad", || Err("nope")).unwrap_err();
        assert_eq!(err, "nope");
        assert!(cache.is_empty());
    }

    #[test]
    fn replacing_a_key_does_not_evict() {
        let cache = FormulaCache::new(2, 2);
        cache.insert("a", 1);
        cache.insert("b", 2);
        cache.insert("b", 3);
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get("b"), Some(3));

        cache.clear();
        assert!(cache.is_empty());
    }
}
