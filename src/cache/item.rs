//! Cache entries and their size estimate.

use serde::Serialize;
use tokio::time::Instant;

/// Size assumed for values that fail to serialize.
pub const FALLBACK_ITEM_SIZE: usize = 1024;

/// Approximate in-memory footprint: serialized JSON length at two bytes
/// per character.
pub fn estimate_size<V: Serialize + ?Sized>(value: &V) -> usize {
    match serde_json::to_string(value) {
        Ok(json) => json.chars().count() * 2,
        Err(e) => {
            tracing::debug!(error = %e, "cache value not serializable, assuming fixed size");
            FALLBACK_ITEM_SIZE
        }
    }
}

/// A stored value with its bookkeeping.
#[derive(Debug, Clone)]
pub(crate) struct CacheItem<V> {
    pub value: V,
    pub created_at: Instant,
    pub expires_at: Option<Instant>,
    pub hits: u64,
    pub last_accessed: Instant,
    /// Monotonic access order; breaks ties between equal timestamps.
    pub access_seq: u64,
    pub size: usize,
    pub metadata: Option<serde_json::Value>,
}

impl<V> CacheItem<V> {
    pub fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|expiry| now > expiry)
    }

    pub fn info(&self, key: &str) -> CacheItemInfo {
        CacheItemInfo {
            key: key.to_string(),
            created_at: self.created_at,
            expires_at: self.expires_at,
            hits: self.hits,
            last_accessed: self.last_accessed,
            size: self.size,
            metadata: self.metadata.clone(),
        }
    }
}

/// Read-only view of an entry's bookkeeping.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheItemInfo {
    pub key: String,
    pub created_at: Instant,
    pub expires_at: Option<Instant>,
    pub hits: u64,
    pub last_accessed: Instant,
    pub size: usize,
    pub metadata: Option<serde_json::Value>,
}

/// Per-insert options.
#[derive(Debug, Clone, Default)]
pub struct SetOptions {
    pub ttl: Option<std::time::Duration>,
    pub metadata: Option<serde_json::Value>,
}

impl SetOptions {
    pub fn ttl(ttl: std::time::Duration) -> Self {
        Self {
            ttl: Some(ttl),
            metadata: None,
        }
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = Some(metadata);
        self
    }
}
