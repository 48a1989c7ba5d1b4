// Session-scoped model cache.
//
// Holds loaded models keyed by model id so switching back and forth between
// models does not reload them. A cache is created by the session that uses it
// and dropped with it; entries leave only through `take`, `evict`, `clear`,
// or least-recently-used eviction when capacity is exceeded.

use std::num::NonZeroUsize;

use lru::LruCache;
use tracing::{debug, info};

use crate::error::VizError;

/// Capacity-bounded LRU cache of loaded models.
pub struct ModelCache<M> {
    entries: LruCache<String, M>,
}

impl<M> ModelCache<M> {
    /// Create an empty cache. A capacity of 0 is raised to 1.
    pub fn new(capacity: usize) -> Self {
        let cap = NonZeroUsize::new(capacity.max(1)).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: LruCache::new(cap),
        }
    }

    pub fn capacity(&self) -> usize {
        self.entries.cap().get()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.entries.contains(id)
    }

    /// Model ids from least to most recently used.
    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().rev().map(|(id, _)| id.as_str())
    }

    /// Borrow a cached model, marking it most recently used.
    pub fn get(&mut self, id: &str) -> Option<&mut M> {
        self.entries.get_mut(id)
    }

    /// Insert or replace a model.
    ///
    /// Returns the entry evicted to make room, if any. Replacing an existing
    /// id never evicts another entry.
    pub fn insert(&mut self, id: impl Into<String>, model: M) -> Option<(String, M)> {
        let id = id.into();
        if self.entries.contains(&id) {
            debug!(model_id = %id, "Replacing cached model");
            self.entries.put(id, model);
            return None;
        }

        debug!(model_id = %id, "Caching model");
        let evicted = self.entries.push(id, model);
        if let Some((old_id, _)) = &evicted {
            info!(model_id = %old_id, "Evicting least recently used model");
        }
        evicted
    }

    /// Return the cached model, loading and caching it on a miss.
    pub fn get_or_load(
        &mut self,
        id: &str,
        load: impl FnOnce(&str) -> Result<M, VizError>,
    ) -> Result<&mut M, VizError> {
        if self.entries.contains(id) {
            debug!(model_id = %id, "Model cache hit");
        } else {
            info!(model_id = %id, "Loading model");
            let model = load(id)?;
            self.insert(id, model);
        }
        self.entries
            .get_mut(id)
            .ok_or_else(|| VizError::Model(format!("model '{}' missing from cache", id)))
    }

    /// Id of the model that the next insert would evict.
    pub fn least_recent(&self) -> Option<&str> {
        self.entries.peek_lru().map(|(id, _)| id.as_str())
    }

    /// Remove a model from the cache and hand ownership to the caller.
    pub fn take(&mut self, id: &str) -> Option<M> {
        self.entries.pop(id)
    }

    /// Drop a cached model. Returns whether it was present.
    pub fn evict(&mut self, id: &str) -> bool {
        let evicted = self.entries.pop(id).is_some();
        if evicted {
            info!(model_id = %id, "Evicted model");
        }
        evicted
    }

    /// Drop every cached model.
    pub fn clear(&mut self) {
        if !self.entries.is_empty() {
            info!(count = self.entries.len(), "Clearing model cache");
        }
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_or_load_loads_once() {
        let mut cache: ModelCache<u32> = ModelCache::new(2);
        let mut loads = 0;
        for _ in 0..3 {
            let v = cache
                .get_or_load("gpt2", |_| {
                    loads += 1;
                    Ok(7)
                })
                .unwrap();
            assert_eq!(*v, 7);
        }
        assert_eq!(loads, 1, "Second and third lookups should hit the cache");
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_load_error_is_not_cached() {
        let mut cache: ModelCache<u32> = ModelCache::new(2);
        let result = cache.get_or_load("broken", |id| {
            Err(VizError::Model(format!("cannot load {}", id)))
        });
        assert!(result.is_err());
        assert!(!cache.contains("broken"));
    }

    #[test]
    fn test_lru_eviction_order() {
        let mut cache = ModelCache::new(2);
        assert!(cache.insert("a", 1).is_none());
        assert!(cache.insert("b", 2).is_none());
        // Touch "a" so "b" becomes least recently used.
        assert_eq!(cache.get("a"), Some(&mut 1));
        let evicted = cache.insert("c", 3);
        assert_eq!(evicted, Some(("b".to_string(), 2)));
        assert_eq!(cache.ids().collect::<Vec<_>>(), vec!["a", "c"]);
        assert_eq!(cache.least_recent(), Some("a"));
    }

    #[test]
    fn test_get_or_load_hit_refreshes_recency() {
        let mut cache = ModelCache::new(2);
        cache.insert("a", 1);
        cache.insert("b", 2);
        assert_eq!(cache.least_recent(), Some("a"));
        let v = cache.get_or_load("a", |_| Ok(99)).unwrap();
        assert_eq!(*v, 1, "Hit must not call the loader");
        assert_eq!(cache.least_recent(), Some("b"));
        let evicted = cache.insert("c", 3);
        assert_eq!(evicted.map(|(id, _)| id), Some("b".to_string()));
    }

    #[test]
    fn test_replace_does_not_evict() {
        let mut cache = ModelCache::new(2);
        cache.insert("a", 1);
        cache.insert("b", 2);
        assert!(cache.insert("a", 10).is_none());
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.take("a"), Some(10));
    }

    #[test]
    fn test_take_and_evict() {
        let mut cache = ModelCache::new(3);
        cache.insert("a", 1);
        cache.insert("b", 2);
        assert_eq!(cache.take("a"), Some(1));
        assert!(!cache.contains("a"));
        assert!(cache.evict("b"));
        assert!(!cache.evict("b"));
        assert!(cache.is_empty());
    }

    #[test]
    fn test_clear() {
        let mut cache = ModelCache::new(3);
        cache.insert("a", 1);
        cache.insert("b", 2);
        cache.clear();
        assert!(cache.is_empty());
    }

    #[test]
    fn test_zero_capacity_raised_to_one() {
        let mut cache = ModelCache::new(0);
        assert_eq!(cache.capacity(), 1);
        cache.insert("a", 1);
        let evicted = cache.insert("b", 2);
        assert_eq!(evicted.map(|(id, _)| id), Some("a".to_string()));
    }
}
