//! Key namespace layout for the shared store.
//!
//! Every key carries the configurable prefix so several deployments can
//! share one Redis. Rule ids must not contain `:`; context keys may.

/// Builds namespaced keys from the configured prefix.
#[derive(Debug, Clone)]
pub struct KeySpace {
    prefix: String,
}

impl KeySpace {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    // Rules

    pub fn rule_detail(&self, rule_id: &str) -> String {
        format!("{}rules:detail:{rule_id}", self.prefix)
    }

    pub fn rule_index(&self, event_type: &str) -> String {
        format!("{}rules:index:{event_type}", self.prefix)
    }

    pub fn rules_all(&self) -> String {
        format!("{}rules:all", self.prefix)
    }

    pub fn rules_version(&self) -> String {
        format!("{}rules:version", self.prefix)
    }

    pub fn rules_channel(&self) -> String {
        format!("{}rules:update", self.prefix)
    }

    // Context windows

    pub fn context(&self, context_key: &str) -> String {
        format!("{}context:{context_key}", self.prefix)
    }

    // Auxiliary

    pub fn processed(&self, event_id: &str) -> String {
        format!("{}processed:{event_id}", self.prefix)
    }

    pub fn llm_cache(&self, rule_id: &str, context_hash: &str) -> String {
        format!("{}llm_cache:{rule_id}:{context_hash}", self.prefix)
    }

    pub fn notify_queue(&self) -> String {
        format!("{}notify:queue", self.prefix)
    }

    pub fn notify_dead_letter(&self) -> String {
        format!("{}notify:dead_letter", self.prefix)
    }

    pub fn notify_dedup(&self, rule_id: &str, context_key: &str) -> String {
        format!("{}notify:dedup:{rule_id}:{context_key}", self.prefix)
    }

    pub fn notify_rate(&self, rule_id: &str, minute: &str) -> String {
        format!("{}notify:rate:{rule_id}:{minute}", self.prefix)
    }

    // Trigger-mode state

    pub fn trigger_batch(&self, rule_id: &str, context_key: &str) -> String {
        format!("{}mode:batch:{rule_id}:{context_key}", self.trigger_prefix())
    }

    /// Scan pattern matching every batch key in this namespace.
    pub fn trigger_batch_pattern(&self) -> String {
        format!("{}mode:batch:*", self.trigger_prefix())
    }

    /// Recover `(rule_id, context_key)` from a batch key produced by
    /// [`Self::trigger_batch`]. Rule ids never contain `:`, context keys may.
    pub fn parse_trigger_batch(&self, key: &str) -> Option<(String, String)> {
        let head = format!("{}mode:batch:", self.trigger_prefix());
        let rest = key.strip_prefix(head.as_str())?;
        let (rule_id, context_key) = rest.split_once(':')?;
        Some((rule_id.to_string(), context_key.to_string()))
    }

    pub fn trigger_last_analysis(&self, rule_id: &str, context_key: &str) -> String {
        format!("{}mode:last:{rule_id}:{context_key}", self.trigger_prefix())
    }

    pub fn trigger_interval_lock(&self, rule_id: &str) -> String {
        format!("{}mode:interval_lock:{rule_id}", self.trigger_prefix())
    }

    fn trigger_prefix(&self) -> String {
        format!("{}trigger:", self.prefix)
    }
}
