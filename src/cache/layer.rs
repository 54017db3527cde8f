//! Cache layer that orchestrates caching logic with gateway fetching.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};
use tracing::debug;

use super::storage::MemoryStorage;
use super::traits::{CacheKey, CacheResult};

/// Cache layer that manages partition population and invalidation.
///
/// This layer sits between the resolver and the gateway. Each partition is
/// fetched as a whole and replaced as a whole, so a failed fetch never leaves
/// a partial entry behind.
pub struct CacheLayer<K: CacheKey, V> {
  storage: Arc<MemoryStorage<K, V>>,
  /// One async lock per partition; holders are the only ones allowed to fetch
  inflight: Arc<Mutex<HashMap<K, Arc<tokio::sync::Mutex<()>>>>>,
}

impl<K: CacheKey, V: Send + Sync> CacheLayer<K, V> {
  pub fn new() -> Self {
    Self {
      storage: Arc::new(MemoryStorage::new()),
      inflight: Arc::new(Mutex::new(HashMap::new())),
    }
  }

  fn partition_lock(&self, key: &K) -> Arc<tokio::sync::Mutex<()>> {
    let mut locks = self.inflight.lock().unwrap_or_else(|e| e.into_inner());
    Arc::clone(locks.entry(key.clone()).or_default())
  }

  /// Fetch a partition with a cache-first strategy.
  ///
  /// 1. If the partition is cached and `accept` approves it, return it
  /// 2. Otherwise take the partition's single-flight lock and check again,
  ///    since another caller may have populated it while we waited
  /// 3. Fetch from the gateway and store the result, unless the cache was
  ///    cleared while the fetch was running
  ///
  /// `accept` lets callers treat a cached partition as a miss (e.g., a name
  /// that was created after the partition was fetched).
  pub async fn fetch_partition<E, A, F, Fut>(
    &self,
    key: &K,
    accept: A,
    fetcher: F,
  ) -> Result<CacheResult<Arc<V>>, E>
  where
    A: Fn(&V) -> bool,
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<V, E>>,
  {
    if let Some(cached) = self.storage.get(key).filter(|v| accept(v.as_ref())) {
      debug!("cache hit: {}", key.description());
      return Ok(CacheResult::from_cache(cached));
    }

    let lock = self.partition_lock(key);
    let _guard = lock.lock().await;

    if let Some(cached) = self.storage.get(key).filter(|v| accept(v.as_ref())) {
      debug!("cache hit after wait: {}", key.description());
      return Ok(CacheResult::from_cache(cached));
    }

    let generation = self.storage.generation();
    debug!("cache miss, fetching {}", key.description());
    let data = Arc::new(fetcher().await?);

    if !self
      .storage
      .store_if_current(key.clone(), Arc::clone(&data), generation)
    {
      debug!(
        "cache cleared during fetch, discarding {}",
        key.description()
      );
    }

    Ok(CacheResult::from_network(data))
  }

  /// Remove every partition. Safe to call on an empty cache.
  pub fn clear(&self) -> usize {
    self.storage.clear()
  }

  /// Number of populated partitions.
  pub fn partition_count(&self) -> usize {
    self.storage.len()
  }
}

impl<K: CacheKey, V> Clone for CacheLayer<K, V> {
  fn clone(&self) -> Self {
    Self {
      storage: Arc::clone(&self.storage),
      inflight: Arc::clone(&self.inflight),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::CacheSource;
  use std::sync::atomic::{AtomicUsize, Ordering};
  use std::time::Duration;

  #[derive(Debug, Clone, PartialEq, Eq, Hash)]
  struct Key(&'static str);

  impl CacheKey for Key {
    fn description(&self) -> String {
      format!("test partition {}", self.0)
    }
  }

  #[tokio::test]
  async fn test_second_fetch_is_cache_hit() {
    let layer: CacheLayer<Key, Vec<u32>> = CacheLayer::new();
    let calls = &AtomicUsize::new(0);

    for _ in 0..2 {
      layer
        .fetch_partition(
          &Key("a"),
          |_| true,
          || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok::<_, String>(vec![1, 2])
          },
        )
        .await
        .unwrap();
    }

    assert_eq!(calls.load(Ordering::SeqCst), 1);
  }

  #[tokio::test]
  async fn test_rejected_partition_is_refetched() {
    let layer: CacheLayer<Key, Vec<u32>> = CacheLayer::new();

    layer
      .fetch_partition(&Key("a"), |_| true, || async { Ok::<_, String>(vec![1]) })
      .await
      .unwrap();

    let result = layer
      .fetch_partition(
        &Key("a"),
        |v| v.contains(&2),
        || async { Ok::<_, String>(vec![1, 2]) },
      )
      .await
      .unwrap();

    assert_eq!(result.source, CacheSource::Network);
    assert_eq!(*result.data, vec![1, 2]);
  }

  #[tokio::test]
  async fn test_failed_fetch_stores_nothing() {
    let layer: CacheLayer<Key, Vec<u32>> = CacheLayer::new();

    let result = layer
      .fetch_partition(&Key("a"), |_| true, || async {
        Err::<Vec<u32>, _>("boom".to_string())
      })
      .await;

    assert!(result.is_err());
    assert_eq!(layer.partition_count(), 0);
  }

  #[tokio::test]
  async fn test_concurrent_misses_share_one_fetch() {
    let layer: CacheLayer<Key, Vec<u32>> = CacheLayer::new();
    let calls = &AtomicUsize::new(0);

    let fetch = || async move {
      calls.fetch_add(1, Ordering::SeqCst);
      tokio::time::sleep(Duration::from_millis(20)).await;
      Ok::<_, String>(vec![7])
    };

    let (a, b) = tokio::join!(
      layer.fetch_partition(&Key("a"), |_| true, fetch),
      layer.fetch_partition(&Key("a"), |_| true, fetch),
    );

    assert_eq!(*a.unwrap().data, vec![7]);
    assert_eq!(*b.unwrap().data, vec![7]);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
  }
}
