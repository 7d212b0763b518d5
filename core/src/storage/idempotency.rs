//! Idempotency tracking for consumed events.

use std::sync::Arc;
use std::time::Duration;

use super::keys::KeySpace;
use super::kv::KvStore;
use crate::error::Result;

/// Dedup window; duplicates older than this are reprocessed.
const TTL: Duration = Duration::from_secs(3600);

#[derive(Clone)]
pub struct IdempotencyStore {
    kv: Arc<dyn KvStore>,
    keys: KeySpace,
}

impl IdempotencyStore {
    pub fn new(kv: Arc<dyn KvStore>, keys: KeySpace) -> Self {
        Self { kv, keys }
    }

    /// Mark an event as processed. Returns true only for the first caller;
    /// the handler proceeds only on true.
    pub async fn mark_processed(&self, event_id: &str) -> Result<bool> {
        let key = self.keys.processed(event_id);
        let created = self.kv.set_nx(&key, "1").await?;
        if created {
            self.kv.expire(&key, TTL).await?;
        }
        Ok(created)
    }

    pub async fn is_processed(&self, event_id: &str) -> Result<bool> {
        self.kv.exists(&self.keys.processed(event_id)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::memory::MemoryStore;

    #[tokio::test]
    async fn first_mark_wins() {
        let store = IdempotencyStore::new(Arc::new(MemoryStore::new()), KeySpace::new("t:"));
        assert!(store.mark_processed("e1").await.unwrap());
        assert!(!store.mark_processed("e1").await.unwrap());
        assert!(store.is_processed("e1").await.unwrap());
        assert!(!store.is_processed("e2").await.unwrap());
    }
}
