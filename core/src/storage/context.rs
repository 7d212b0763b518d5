//! Rolling context window storage.
//!
//! One sorted set per context key, scored by timestamp-ms. Membership is
//! bounded by count (trimmed on write) and by age (key TTL plus a filter on
//! read); entries are opaque JSON blobs.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::debug;

use super::keys::KeySpace;
use super::kv::KvStore;
use crate::error::Result;
use crate::models::{ContextEntry, Event};

#[derive(Clone)]
pub struct ContextStore {
    kv: Arc<dyn KvStore>,
    keys: KeySpace,
    window: Duration,
    max_events: usize,
}

impl ContextStore {
    pub fn new(kv: Arc<dyn KvStore>, keys: KeySpace, window: Duration, max_events: usize) -> Self {
        Self {
            kv,
            keys,
            window,
            max_events,
        }
    }

    /// Append an event to its window and refresh the window TTL.
    pub async fn add(&self, event: &Event) -> Result<()> {
        let key = self.keys.context(&event.context_key);
        let entry = serde_json::to_string(&event.to_context_entry())?;
        let score = event.timestamp.timestamp_millis() as f64;

        self.kv.zadd(&key, &entry, score).await?;
        // Trim by count, then by age; the key TTL alone never expires old
        // members while the window stays busy.
        self.kv
            .zremrangebyrank(&key, 0, -(self.max_events as i64 + 1))
            .await?;
        let cutoff = (Utc::now() - chrono::Duration::seconds(self.window.as_secs() as i64))
            .timestamp_millis() as f64;
        self.kv.zremrangebyscore_below(&key, cutoff).await?;
        self.kv
            .expire(&key, self.window + Duration::from_secs(60))
            .await?;
        Ok(())
    }

    /// Events in chronological order, newest-limited to `limit` when given.
    ///
    /// Entries older than the window are filtered out here; the key TTL only
    /// expires a window wholesale once it goes quiet.
    pub async fn get(&self, context_key: &str, limit: Option<usize>) -> Result<Vec<Event>> {
        let key = self.keys.context(context_key);
        let raw = self.kv.zrange_all(&key).await?;
        let cutoff = Utc::now() - chrono::Duration::seconds(self.window.as_secs() as i64);

        let mut events = Vec::with_capacity(raw.len());
        for blob in raw {
            let entry: ContextEntry = match serde_json::from_str(&blob) {
                Ok(entry) => entry,
                Err(error) => {
                    debug!(%error, context_key, "skipping malformed context entry");
                    continue;
                }
            };
            if entry.timestamp < cutoff {
                continue;
            }
            events.push(Event::from_context_entry(entry, context_key));
        }

        if let Some(limit) = limit {
            if events.len() > limit {
                events.drain(..events.len() - limit);
            }
        }
        Ok(events)
    }

    pub async fn count(&self, context_key: &str) -> Result<u64> {
        self.kv.zcard(&self.keys.context(context_key)).await
    }

    pub async fn clear(&self, context_key: &str) -> Result<()> {
        self.kv.del(&self.keys.context(context_key)).await
    }
}
