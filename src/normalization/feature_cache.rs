// src/normalization/feature_cache.rs
use log::info;
use lru::LruCache;
use sha2::{Digest, Sha256};
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::models::NormalizedFeatures;

const DEFAULT_FEATURE_CACHE_SIZE: usize = 50_000;

/// Content hash of the inputs that determine a record's features.
pub fn content_key(description: &str, local_unit: Option<&str>) -> String {
    let mut hasher = Sha256::new();
    hasher.update(description.as_bytes());
    hasher.update([0x1f]);
    hasher.update(local_unit.unwrap_or("").as_bytes());
    hex::encode(hasher.finalize())
}

/// LRU cache of normalized features keyed by content hash, so repeated
/// descriptions are normalized once.
pub struct FeatureCache {
    cache: LruCache<String, NormalizedFeatures>,
    pub hits: usize,
    pub misses: usize,
}

impl FeatureCache {
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity)
            .or_else(|| NonZeroUsize::new(DEFAULT_FEATURE_CACHE_SIZE))
            .unwrap_or(NonZeroUsize::MIN);
        info!("Initializing FeatureCache with capacity: {}", capacity);
        Self {
            cache: LruCache::new(capacity),
            hits: 0,
            misses: 0,
        }
    }

    pub fn get(&mut self, key: &str) -> Option<NormalizedFeatures> {
        match self.cache.get(key) {
            Some(features) => {
                self.hits += 1;
                Some(features.clone())
            }
            None => {
                self.misses += 1;
                None
            }
        }
    }

    pub fn put(&mut self, key: String, features: NormalizedFeatures) {
        self.cache.put(key, features);
    }

    /// (hits, misses)
    pub fn get_stats(&self) -> (usize, usize) {
        (self.hits, self.misses)
    }

    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }

    /// (entries, capacity)
    pub fn get_cache_info(&self) -> (usize, usize) {
        (self.cache.len(), self.cache.cap().get())
    }
}

pub type SharedFeatureCache = Arc<Mutex<FeatureCache>>;

pub fn create_shared_feature_cache(capacity: usize) -> SharedFeatureCache {
    Arc::new(Mutex::new(FeatureCache::new(capacity)))
}

/// Locks the cache. A poisoned lock still holds a consistent LRU, so it is reused.
pub fn lock_cache(cache: &SharedFeatureCache) -> MutexGuard<'_, FeatureCache> {
    cache.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
