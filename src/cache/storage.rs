//! Partition storage with generation tracking.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use super::traits::CacheKey;

struct Inner<K, V> {
  partitions: HashMap<K, Arc<V>>,
  /// Bumped by every clear; writes tagged with an older value are dropped
  generation: u64,
}

/// In-memory storage for cache partitions.
///
/// Values are held behind `Arc` so readers can keep a partition alive after
/// releasing the lock.
pub struct MemoryStorage<K, V> {
  inner: Mutex<Inner<K, V>>,
}

impl<K: CacheKey, V> MemoryStorage<K, V> {
  pub fn new() -> Self {
    Self {
      inner: Mutex::new(Inner {
        partitions: HashMap::new(),
        generation: 0,
      }),
    }
  }

  // Every write below leaves the map consistent, so a poisoned lock still
  // guards valid data.
  fn lock(&self) -> MutexGuard<'_, Inner<K, V>> {
    self.inner.lock().unwrap_or_else(|e| e.into_inner())
  }

  /// Get a partition by key.
  pub fn get(&self, key: &K) -> Option<Arc<V>> {
    self.lock().partitions.get(key).cloned()
  }

  /// Current generation, to be captured before a fetch begins.
  pub fn generation(&self) -> u64 {
    self.lock().generation
  }

  /// Store a partition if no clear happened since `generation` was read.
  ///
  /// Returns `false` when the write was discarded.
  pub fn store_if_current(&self, key: K, value: Arc<V>, generation: u64) -> bool {
    let mut inner = self.lock();
    if inner.generation != generation {
      return false;
    }
    inner.partitions.insert(key, value);
    true
  }

  /// Drop every partition and invalidate in-flight writes.
  ///
  /// Returns the number of partitions removed.
  pub fn clear(&self) -> usize {
    let mut inner = self.lock();
    inner.generation += 1;
    let removed = inner.partitions.len();
    inner.partitions.clear();
    removed
  }

  pub fn len(&self) -> usize {
    self.lock().partitions.len()
  }
}
