//! In-process embedding cache.
//!
//! Clustering re-embeds candidate incident summaries on every report; this
//! LRU keeps the vectors for unchanged summaries. Keyed by text hash,
//! guarded by its own mutex, fixed entry budget.

use std::collections::hash_map::DefaultHasher;
use std::collections::{HashMap, VecDeque};
use std::hash::{Hash, Hasher};
use std::sync::{Mutex, PoisonError};

/// Default entry budget.
pub const DEFAULT_CAPACITY: usize = 1024;

#[derive(Debug, Default)]
struct CacheInner {
    map: HashMap<u64, Vec<f32>>,
    /// Recency order, least-recent first.
    order: VecDeque<u64>,
}

/// Fixed-budget LRU of text-hash → embedding.
#[derive(Debug)]
pub struct EmbeddingCache {
    inner: Mutex<CacheInner>,
    capacity: usize,
}

impl Default for EmbeddingCache {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl EmbeddingCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(CacheInner::default()),
            capacity: capacity.max(1),
        }
    }

    fn key(text: &str) -> u64 {
        let mut hasher = DefaultHasher::new();
        text.hash(&mut hasher);
        hasher.finish()
    }

    /// Look up an embedding, refreshing its recency.
    pub fn get(&self, text: &str) -> Option<Vec<f32>> {
        let key = Self::key(text);
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        let hit = inner.map.get(&key).cloned();
        if hit.is_some() {
            inner.order.retain(|k| *k != key);
            inner.order.push_back(key);
        }
        hit
    }

    /// Insert an embedding, evicting the least-recently-used entries past
    /// the budget.
    pub fn put(&self, text: &str, embedding: Vec<f32>) {
        let key = Self::key(text);
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        if inner.map.insert(key, embedding).is_none() {
            inner.order.push_back(key);
        } else {
            inner.order.retain(|k| *k != key);
            inner.order.push_back(key);
        }
        while inner.map.len() > self.capacity {
            match inner.order.pop_front() {
                Some(oldest) => {
                    inner.map.remove(&oldest);
                }
                None => break,
            }
        }
    }

    pub fn len(&self) -> usize {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .map
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
