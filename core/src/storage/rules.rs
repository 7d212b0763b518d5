//! Rule storage
//!
//! Rules live in the shared store as a hash per rule plus two indexes: the
//! `all` set and one set per event type. Every mutation bumps the global
//! version counter and publishes a change message; [`RuleCache`] subscribes
//! to that channel so workers can serve lookups from a local copy that is
//! stale for at most one evaluation.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::keys::KeySpace;
use super::kv::KvStore;
use crate::error::{Result, TriggerError};
use crate::models::Rule;

/// A rule mutation broadcast on the update channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleChange {
    pub action: String,
    pub rule_id: String,
    /// Milliseconds since the epoch
    pub timestamp: i64,
}

#[derive(Clone)]
pub struct RuleStore {
    kv: Arc<dyn KvStore>,
    keys: KeySpace,
}

impl RuleStore {
    pub fn new(kv: Arc<dyn KvStore>, keys: KeySpace) -> Self {
        Self { kv, keys }
    }

    pub async fn create(&self, rule: Rule) -> Result<Rule> {
        rule.validate()
            .map_err(|message| TriggerError::invalid_rule(&rule.rule_id, message))?;

        self.write_detail(&rule).await?;
        self.kv.sadd(&self.keys.rules_all(), &rule.rule_id).await?;
        for event_type in &rule.event_types {
            self.kv
                .sadd(&self.keys.rule_index(event_type), &rule.rule_id)
                .await?;
        }
        self.publish_update("create", &rule.rule_id).await?;
        Ok(rule)
    }

    pub async fn get(&self, rule_id: &str) -> Result<Option<Rule>> {
        let key = self.keys.rule_detail(rule_id);
        let Some(raw) = self.kv.hget(&key, "config").await? else {
            return Ok(None);
        };
        Ok(Some(serde_json::from_str(&raw)?))
    }

    /// Replace an existing rule; bumps the rule version and reconciles the
    /// event-type indexes. Returns None if the rule does not exist.
    pub async fn update(&self, rule_id: &str, mut rule: Rule) -> Result<Option<Rule>> {
        let Some(existing) = self.get(rule_id).await? else {
            return Ok(None);
        };
        rule.rule_id = rule_id.to_string();
        rule.validate()
            .map_err(|message| TriggerError::invalid_rule(rule_id, message))?;
        rule.metadata.created_at = existing.metadata.created_at;
        rule.metadata.updated_at = Utc::now();
        rule.metadata.version = existing.metadata.version + 1;

        for removed in existing
            .event_types
            .iter()
            .filter(|t| !rule.event_types.contains(*t))
        {
            self.kv
                .srem(&self.keys.rule_index(removed), rule_id)
                .await?;
        }
        for added in rule
            .event_types
            .iter()
            .filter(|t| !existing.event_types.contains(*t))
        {
            self.kv.sadd(&self.keys.rule_index(added), rule_id).await?;
        }

        self.write_detail(&rule).await?;
        self.publish_update("update", rule_id).await?;
        Ok(Some(rule))
    }

    pub async fn delete(&self, rule_id: &str) -> Result<bool> {
        let Some(existing) = self.get(rule_id).await? else {
            return Ok(false);
        };
        for event_type in &existing.event_types {
            self.kv
                .srem(&self.keys.rule_index(event_type), rule_id)
                .await?;
        }
        self.kv.srem(&self.keys.rules_all(), rule_id).await?;
        self.kv.del(&self.keys.rule_detail(rule_id)).await?;
        self.publish_update("delete", rule_id).await?;
        Ok(true)
    }

    pub async fn list_all(&self) -> Result<Vec<Rule>> {
        let rule_ids = self.kv.smembers(&self.keys.rules_all()).await?;
        let mut rules = Vec::with_capacity(rule_ids.len());
        for rule_id in rule_ids {
            if let Some(rule) = self.get(&rule_id).await? {
                rules.push(rule);
            }
        }
        Ok(rules)
    }

    /// Enabled rules matching the event type, highest priority first.
    /// Ties break on `rule_id` so the order is deterministic.
    pub async fn list_by_event_type(&self, event_type: &str) -> Result<Vec<Rule>> {
        let rule_ids = self.kv.smembers(&self.keys.rule_index(event_type)).await?;
        let mut rules = Vec::with_capacity(rule_ids.len());
        for rule_id in rule_ids {
            if let Some(rule) = self.get(&rule_id).await? {
                if rule.enabled {
                    rules.push(rule);
                }
            }
        }
        rules.sort_by(|a, b| {
            b.priority
                .cmp(&a.priority)
                .then_with(|| a.rule_id.cmp(&b.rule_id))
        });
        Ok(rules)
    }

    pub async fn set_enabled(&self, rule_id: &str, enabled: bool) -> Result<bool> {
        let Some(mut rule) = self.get(rule_id).await? else {
            return Ok(false);
        };
        rule.enabled = enabled;
        rule.metadata.updated_at = Utc::now();
        rule.metadata.version += 1;
        self.write_detail(&rule).await?;
        self.publish_update("update", rule_id).await?;
        Ok(true)
    }

    /// Global monotonic version, bumped on every mutation.
    pub async fn version(&self) -> Result<u64> {
        let raw = self.kv.get(&self.keys.rules_version()).await?;
        Ok(raw.and_then(|v| v.parse().ok()).unwrap_or(0))
    }

    /// Receive rule change notifications.
    pub async fn subscribe_changes(&self) -> Result<mpsc::Receiver<RuleChange>> {
        let mut raw_rx = self.kv.subscribe(&self.keys.rules_channel()).await?;
        let (tx, rx) = mpsc::channel(64);
        tokio::spawn(async move {
            while let Some(payload) = raw_rx.recv().await {
                match serde_json::from_str::<RuleChange>(&payload) {
                    Ok(change) => {
                        if tx.send(change).await.is_err() {
                            break;
                        }
                    }
                    Err(error) => warn!(%error, "ignoring malformed rule change message"),
                }
            }
        });
        Ok(rx)
    }

    async fn write_detail(&self, rule: &Rule) -> Result<()> {
        let key = self.keys.rule_detail(&rule.rule_id);
        let config = serde_json::to_string(rule)?;
        self.kv
            .hset(
                &key,
                &[
                    ("config", config),
                    ("enabled", rule.enabled.to_string()),
                    ("version", rule.metadata.version.to_string()),
                    (
                        "created_at",
                        rule.metadata.created_at.timestamp_millis().to_string(),
                    ),
                    (
                        "updated_at",
                        rule.metadata.updated_at.timestamp_millis().to_string(),
                    ),
                ],
            )
            .await
    }

    async fn publish_update(&self, action: &str, rule_id: &str) -> Result<()> {
        self.kv.incr(&self.keys.rules_version()).await?;
        let message = serde_json::to_string(&RuleChange {
            action: action.to_string(),
            rule_id: rule_id.to_string(),
            timestamp: Utc::now().timestamp_millis(),
        })?;
        self.kv
            .publish(&self.keys.rules_channel(), &message)
            .await
    }
}

/// Per-process rule cache keyed by event type.
///
/// Lookups hit the store once per event type and are then served locally;
/// any change message empties the cache, so a stale answer survives at most
/// the propagation delay of one pub/sub hop.
pub struct RuleCache {
    store: RuleStore,
    cache: Mutex<HashMap<String, Vec<Rule>>>,
}

impl RuleCache {
    pub fn new(store: RuleStore) -> Self {
        Self {
            store,
            cache: Mutex::new(HashMap::new()),
        }
    }

    pub async fn rules_for(&self, event_type: &str) -> Result<Vec<Rule>> {
        if let Some(rules) = self.cache.lock().get(event_type) {
            return Ok(rules.clone());
        }
        let rules = self.store.list_by_event_type(event_type).await?;
        self.cache
            .lock()
            .insert(event_type.to_string(), rules.clone());
        Ok(rules)
    }

    pub fn invalidate(&self) {
        self.cache.lock().clear();
    }

    /// Drain change notifications until cancelled, invalidating on each.
    pub async fn watch(self: Arc<Self>, cancel: CancellationToken) -> Result<()> {
        let mut changes = self.store.subscribe_changes().await?;
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                change = changes.recv() => {
                    match change {
                        Some(change) => {
                            debug!(action = %change.action, rule_id = %change.rule_id, "rule changed, invalidating cache");
                            self.invalidate();
                        }
                        None => break,
                    }
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{PreFilter, RuleConfig, RuleType};
    use crate::storage::memory::MemoryStore;

    fn rule(rule_id: &str, priority: i64, event_types: &[&str]) -> Rule {
        Rule {
            rule_id: rule_id.to_string(),
            name: format!("rule {rule_id}"),
            description: String::new(),
            enabled: true,
            priority,
            event_types: event_types.iter().map(|s| s.to_string()).collect(),
            context_keys: Vec::new(),
            rule_config: RuleConfig {
                rule_type: RuleType::Traditional,
                pre_filter: Some(PreFilter {
                    filter_type: "expression".to_string(),
                    expression: "profit_rate > 0.05".to_string(),
                }),
                llm_config: None,
            },
            notify_policy: Default::default(),
            metadata: Default::default(),
        }
    }

    fn store() -> RuleStore {
        RuleStore::new(Arc::new(MemoryStore::new()), KeySpace::new("t:"))
    }

    #[tokio::test]
    async fn create_get_round_trip() {
        let store = store();
        store.create(rule("r1", 100, &["trade.profit"])).await.unwrap();
        let fetched = store.get("r1").await.unwrap().unwrap();
        assert_eq!(fetched.name, "rule r1");
        assert!(store.get("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn list_by_event_type_sorts_by_priority_desc() {
        let store = store();
        store.create(rule("low", 10, &["t.a"])).await.unwrap();
        store.create(rule("high", 200, &["t.a"])).await.unwrap();
        store.create(rule("mid", 100, &["t.a", "t.b"])).await.unwrap();
        store.create(rule("other", 500, &["t.b"])).await.unwrap();

        let rules = store.list_by_event_type("t.a").await.unwrap();
        let ids: Vec<&str> = rules.iter().map(|r| r.rule_id.as_str()).collect();
        assert_eq!(ids, vec!["high", "mid", "low"]);
    }

    #[tokio::test]
    async fn disabled_rules_are_not_listed() {
        let store = store();
        store.create(rule("r1", 100, &["t.a"])).await.unwrap();
        store.set_enabled("r1", false).await.unwrap();
        assert!(store.list_by_event_type("t.a").await.unwrap().is_empty());
        // still retrievable directly
        assert!(!store.get("r1").await.unwrap().unwrap().enabled);
    }

    #[tokio::test]
    async fn update_bumps_version_and_reindexes() {
        let store = store();
        store.create(rule("r1", 100, &["t.a"])).await.unwrap();
        let updated = store
            .update("r1", rule("r1", 50, &["t.b"]))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(updated.metadata.version, 2);
        assert!(store.list_by_event_type("t.a").await.unwrap().is_empty());
        assert_eq!(store.list_by_event_type("t.b").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn delete_removes_indexes() {
        let store = store();
        store.create(rule("r1", 100, &["t.a"])).await.unwrap();
        assert!(store.delete("r1").await.unwrap());
        assert!(!store.delete("r1").await.unwrap());
        assert!(store.list_by_event_type("t.a").await.unwrap().is_empty());
        assert!(store.list_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn mutations_bump_global_version_and_publish() {
        let store = store();
        let mut changes = store.subscribe_changes().await.unwrap();
        assert_eq!(store.version().await.unwrap(), 0);
        store.create(rule("r1", 100, &["t.a"])).await.unwrap();
        store.delete("r1").await.unwrap();
        assert_eq!(store.version().await.unwrap(), 2);

        let first = changes.recv().await.unwrap();
        assert_eq!(first.action, "create");
        assert_eq!(first.rule_id, "r1");
        let second = changes.recv().await.unwrap();
        assert_eq!(second.action, "delete");
    }

    #[tokio::test]
    async fn invalid_rule_is_rejected() {
        let store = store();
        let mut bad = rule("r1", 100, &["t.a"]);
        bad.rule_config.pre_filter = None;
        assert!(store.create(bad).await.is_err());
    }

    #[tokio::test]
    async fn cache_serves_local_copy_until_invalidated() {
        let store = store();
        store.create(rule("r1", 100, &["t.a"])).await.unwrap();
        let cache = RuleCache::new(store.clone());

        assert_eq!(cache.rules_for("t.a").await.unwrap().len(), 1);
        // mutate behind the cache's back
        store.create(rule("r2", 100, &["t.a"])).await.unwrap();
        assert_eq!(cache.rules_for("t.a").await.unwrap().len(), 1);
        cache.invalidate();
        assert_eq!(cache.rules_for("t.a").await.unwrap().len(), 2);
    }
}
