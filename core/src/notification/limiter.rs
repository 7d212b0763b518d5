//! Notification rate limiting: cooldown plus per-minute quota.

use std::time::Duration;

use crate::error::Result;
use crate::models::RateLimit;
use crate::storage::{DedupStore, RateStore};

/// Verdict of the limiter; a rejection carries its reason.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Allowed,
    Rejected(String),
}

impl Verdict {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Verdict::Allowed)
    }
}

#[derive(Clone)]
pub struct NotificationLimiter {
    dedup: DedupStore,
    rate: RateStore,
}

impl NotificationLimiter {
    pub fn new(dedup: DedupStore, rate: RateStore) -> Self {
        Self { dedup, rate }
    }

    /// Both checks must pass: the (rule, context key) cooldown slot and the
    /// per-rule minute quota.
    pub async fn check(
        &self,
        rule_id: &str,
        context_key: &str,
        limit: &RateLimit,
    ) -> Result<Verdict> {
        let cooldown = Duration::from_secs(limit.cooldown_seconds);
        if !self.dedup.acquire(rule_id, context_key, cooldown).await? {
            return Ok(Verdict::Rejected(format!(
                "In cooldown period ({}s)",
                limit.cooldown_seconds
            )));
        }

        if !self.rate.check(rule_id, limit.max_per_minute).await? {
            return Ok(Verdict::Rejected(format!(
                "Rate limit exceeded ({}/min)",
                limit.max_per_minute
            )));
        }

        Ok(Verdict::Allowed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{KeySpace, KvStore, MemoryStore};
    use std::sync::Arc;

    fn limiter() -> NotificationLimiter {
        let kv: Arc<dyn KvStore> = Arc::new(MemoryStore::new());
        let keys = KeySpace::new("t:");
        NotificationLimiter::new(
            DedupStore::new(kv.clone(), keys.clone()),
            RateStore::new(kv, keys),
        )
    }

    #[tokio::test]
    async fn cooldown_rejects_second_attempt() {
        let limiter = limiter();
        let limit = RateLimit {
            max_per_minute: 10,
            cooldown_seconds: 60,
        };
        assert!(limiter.check("r1", "k", &limit).await.unwrap().is_allowed());
        let verdict = limiter.check("r1", "k", &limit).await.unwrap();
        assert_eq!(verdict, Verdict::Rejected("In cooldown period (60s)".to_string()));
    }

    #[tokio::test]
    async fn quota_rejects_after_limit() {
        let limiter = limiter();
        let limit = RateLimit {
            max_per_minute: 2,
            cooldown_seconds: 0,
        };
        assert!(limiter.check("r1", "k", &limit).await.unwrap().is_allowed());
        assert!(limiter.check("r1", "k", &limit).await.unwrap().is_allowed());
        let verdict = limiter.check("r1", "k", &limit).await.unwrap();
        assert_eq!(
            verdict,
            Verdict::Rejected("Rate limit exceeded (2/min)".to_string())
        );
    }
}
