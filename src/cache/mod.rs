//! In-process caching of partitioned lookup data.
//!
//! This module is Freshrelease-agnostic. It provides:
//! - Partitions keyed by an arbitrary [`CacheKey`], each holding one shared value
//! - Single-flight population: concurrent misses on one partition await one fetch
//! - Generation counting, so a clear that races with a fetch is never undone
//!
//! Entries never expire; only [`CacheLayer::clear`] removes them.

mod layer;
mod storage;
mod traits;

pub use layer::CacheLayer;
pub use traits::{CacheKey, CacheResult, CacheSource};
