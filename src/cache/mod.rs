//! Bounded response/value cache.
//!
//! Entries expire by TTL and are evicted least-recently-accessed first when
//! the size or entry bound would be exceeded.

mod item;
mod stats;
mod store;

pub use item::{estimate_size, CacheItemInfo, SetOptions, FALLBACK_ITEM_SIZE};
pub use stats::CacheStats;
pub use store::{CacheConfig, CacheStore, CleanupReport};
