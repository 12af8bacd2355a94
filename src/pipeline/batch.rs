//! Deferred batching of requests that share a key.
//!
//! The first request for a key opens a bucket and arms a timer; every
//! request joining before the timer fires is released together. Members
//! still run independently afterwards. Nothing is merged.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::error::RequestError;

struct Bucket {
    generation: u64,
    members: usize,
    release: watch::Sender<bool>,
}

#[derive(Default)]
struct Buckets {
    open: HashMap<String, Bucket>,
    next_generation: u64,
}

#[derive(Clone, Default)]
pub(crate) struct Batcher {
    buckets: Arc<Mutex<Buckets>>,
}

impl Batcher {
    /// Wait until the bucket for `key` is released.
    ///
    /// Fails with `Cancelled` when the bucket is dropped by
    /// [`cancel_all`](Self::cancel_all) or when `cancel` fires first; in the
    /// latter case the member leaves its bucket.
    pub(crate) async fn join(
        &self,
        key: &str,
        delay: Duration,
        cancel: &CancellationToken,
    ) -> Result<(), RequestError> {
        let (generation, mut released) = {
            let mut buckets = self.buckets.lock();
            if let Some(bucket) = buckets.open.get_mut(key) {
                bucket.members += 1;
                (bucket.generation, bucket.release.subscribe())
            } else {
                let generation = buckets.next_generation;
                buckets.next_generation += 1;
                let (release, rx) = watch::channel(false);
                buckets.open.insert(
                    key.to_string(),
                    Bucket {
                        generation,
                        members: 1,
                        release,
                    },
                );
                self.arm(key.to_string(), generation, delay);
                (generation, rx)
            }
        };

        tokio::select! {
            biased;
            () = cancel.cancelled() => {
                self.leave(key, generation);
                Err(RequestError::Cancelled)
            }
            released = released.wait_for(|released| *released) => {
                released.map(|_| ()).map_err(|_| RequestError::Cancelled)
            }
        }
    }

    fn leave(&self, key: &str, generation: u64) {
        let mut buckets = self.buckets.lock();
        if let Some(bucket) = buckets.open.get_mut(key) {
            if bucket.generation == generation {
                bucket.members = bucket.members.saturating_sub(1);
            }
        }
    }

    fn arm(&self, key: String, generation: u64, delay: Duration) {
        let buckets = Arc::clone(&self.buckets);
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let bucket = {
                let mut buckets = buckets.lock();
                match buckets.open.get(&key) {
                    Some(b) if b.generation == generation => buckets.open.remove(&key),
                    _ => None,
                }
            };
            if let Some(bucket) = bucket {
                debug!(batch_key = %key, members = bucket.members, "batch released");
                let _ = bucket.release.send(true);
            }
        });
    }

    /// Drop every open bucket; waiting members fail with `Cancelled`.
    pub(crate) fn cancel_all(&self) -> usize {
        let dropped: Vec<Bucket> = self.buckets.lock().open.drain().map(|(_, b)| b).collect();
        dropped.iter().map(|b| b.members).sum()
    }

    pub(crate) fn pending(&self) -> usize {
        self.buckets.lock().open.values().map(|b| b.members).sum()
    }
}
