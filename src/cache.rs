//! Caching layer for frequently read ledger data
//!
//! Recently read or appended blocks are kept in an LRU keyed by block id.
//! Blocks are immutable once stored, so the only invalidation is the pop
//! path of a fork switch.
use crate::blockchain::{Block, BlockId};
use lru::LruCache;
use parking_lot::RwLock;
use std::hash::Hash;
use std::num::NonZeroUsize;
use std::sync::Arc;

/// Generic, thread-safe LRU wrapper.
pub struct ThreadSafeCache<K, V> {
    cache: Arc<RwLock<LruCache<K, V>>>,
}

impl<K, V> ThreadSafeCache<K, V>
where
    K: Hash + Eq + Clone,
    V: Clone,
{
    /// Create a new LRU cache with specified capacity; zero is treated as one.
    pub fn new_lru(capacity: usize) -> Self {
        let capacity_nz = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            cache: Arc::new(RwLock::new(LruCache::new(capacity_nz))),
        }
    }

    pub fn capacity(&self) -> usize {
        self.cache.read().cap().get()
    }

    /// Get a value without promoting it; uses the read lock.
    pub fn get(&self, key: &K) -> Option<V> {
        self.cache.read().peek(key).cloned()
    }

    pub fn put(&self, key: K, value: V) {
        self.cache.write().put(key, value);
    }

    pub fn remove(&self, key: &K) -> Option<V> {
        self.cache.write().pop(key)
    }

    pub fn clear(&self) {
        self.cache.write().clear();
    }

    pub fn len(&self) -> usize {
        self.cache.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<K, V> Clone for ThreadSafeCache<K, V> {
    fn clone(&self) -> Self {
        Self {
            cache: Arc::clone(&self.cache),
        }
    }
}

/// Cache for recent blocks
pub type BlockCache = ThreadSafeCache<BlockId, Arc<Block>>;

impl BlockCache {
    pub const DEFAULT_CAPACITY: usize = 100;

    pub fn new(capacity: usize) -> Self {
        Self::new_lru(capacity)
    }

    pub fn insert_block(&self, block: Arc<Block>) {
        self.put(block.id, block);
    }

    pub fn stats(&self) -> (usize, usize) {
        (self.len(), self.capacity())
    }
}
