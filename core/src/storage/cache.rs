//! LLM decision cache.
//!
//! Short-lived: a hit only means the model already judged an identical
//! (rule, context, event) combination moments ago, typically because several
//! workers raced on the same context key.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::keys::KeySpace;
use super::kv::KvStore;
use crate::error::Result;

const DEFAULT_TTL: Duration = Duration::from_secs(60);

/// The decision shape persisted in the cache.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CachedDecision {
    pub should_trigger: bool,
    pub confidence: f64,
    pub reason: String,
}

#[derive(Clone)]
pub struct LlmCacheStore {
    kv: Arc<dyn KvStore>,
    keys: KeySpace,
    ttl: Duration,
}

impl LlmCacheStore {
    pub fn new(kv: Arc<dyn KvStore>, keys: KeySpace) -> Self {
        Self {
            kv,
            keys,
            ttl: DEFAULT_TTL,
        }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub async fn get(&self, rule_id: &str, context_hash: &str) -> Result<Option<CachedDecision>> {
        let key = self.keys.llm_cache(rule_id, context_hash);
        match self.kv.get(&key).await? {
            Some(raw) => Ok(serde_json::from_str(&raw).ok()),
            None => Ok(None),
        }
    }

    pub async fn set(
        &self,
        rule_id: &str,
        context_hash: &str,
        decision: &CachedDecision,
    ) -> Result<()> {
        let key = self.keys.llm_cache(rule_id, context_hash);
        let raw = serde_json::to_string(decision)?;
        self.kv.set_ex(&key, &raw, self.ttl).await
    }
}
