//! Core traits and types for the caching system.

use std::fmt::Debug;
use std::hash::Hash;

/// Trait for keys that address a cache partition.
///
/// Implementors must be cheap to clone and provide a human-readable
/// description used in log lines.
pub trait CacheKey: Clone + Debug + Eq + Hash + Send + Sync {
  /// Human-readable description (e.g., "sprints in WEBAPP")
  fn description(&self) -> String;
}

/// Result from a cache operation, including data and metadata about the source.
#[derive(Debug, Clone)]
pub struct CacheResult<T> {
  /// The actual data
  pub data: T,
  /// Where the data came from
  pub source: CacheSource,
}

impl<T> CacheResult<T> {
  /// Create a new cache result from fresh network data.
  pub fn from_network(data: T) -> Self {
    Self {
      data,
      source: CacheSource::Network,
    }
  }

  /// Create a new cache result from cached data.
  pub fn from_cache(data: T) -> Self {
    Self {
      data,
      source: CacheSource::Cache,
    }
  }
}

/// Indicates where cached data came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheSource {
  /// Fresh data from the gateway
  Network,
  /// Data from an already populated partition
  Cache,
}
