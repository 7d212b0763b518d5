//! Cooldown and per-minute quota primitives for notification limiting.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;

use super::keys::KeySpace;
use super::kv::KvStore;
use crate::error::Result;

/// Per-(rule, context key) cooldown flag.
#[derive(Clone)]
pub struct DedupStore {
    kv: Arc<dyn KvStore>,
    keys: KeySpace,
}

impl DedupStore {
    pub fn new(kv: Arc<dyn KvStore>, keys: KeySpace) -> Self {
        Self { kv, keys }
    }

    /// Try to claim the cooldown slot. Returns true when no cooldown was
    /// active; the claim expires after `cooldown`.
    pub async fn acquire(&self, rule_id: &str, context_key: &str, cooldown: Duration) -> Result<bool> {
        if cooldown.is_zero() {
            return Ok(true);
        }
        let key = self.keys.notify_dedup(rule_id, context_key);
        let created = self.kv.set_nx(&key, "1").await?;
        if created {
            self.kv.expire(&key, cooldown).await?;
        }
        Ok(created)
    }
}

/// Per-rule per-minute notification counter.
#[derive(Clone)]
pub struct RateStore {
    kv: Arc<dyn KvStore>,
    keys: KeySpace,
}

impl RateStore {
    pub fn new(kv: Arc<dyn KvStore>, keys: KeySpace) -> Self {
        Self { kv, keys }
    }

    /// Count this notification against the current minute bucket; true while
    /// the bucket stays within `max_per_minute`.
    pub async fn check(&self, rule_id: &str, max_per_minute: u32) -> Result<bool> {
        let minute = Utc::now().format("%Y%m%d%H%M").to_string();
        let key = self.keys.notify_rate(rule_id, &minute);
        let count = self.kv.incr(&key).await?;
        if count == 1 {
            // bucket lives past its minute so late increments still count
            self.kv.expire(&key, Duration::from_secs(120)).await?;
        }
        Ok(count <= max_per_minute as i64)
    }
}
