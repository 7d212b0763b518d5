//! Rule domain model
//!
//! A rule pairs a matching scope (event types + optional context-key
//! patterns) with a typed configuration: a sandboxed predicate, an LLM
//! analysis, or both (hybrid). The discriminant is `rule_config.rule_type`;
//! [`Rule::validate`] enforces that the matching sub-structure is populated.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleType {
    Traditional,
    Llm,
    Hybrid,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TriggerMode {
    Realtime,
    Batch,
    Interval,
}

impl Default for TriggerMode {
    fn default() -> Self {
        TriggerMode::Realtime
    }
}

/// Pre-filter for traditional and hybrid rules.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PreFilter {
    #[serde(rename = "type", default = "default_filter_type")]
    pub filter_type: String,
    /// Predicate source, e.g. `profit_rate > 0.05`
    pub expression: String,
}

fn default_filter_type() -> String {
    "expression".to_string()
}

/// LLM analysis configuration for llm and hybrid rules.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmRuleConfig {
    /// Natural language rule description handed to the model
    pub description: String,
    #[serde(default)]
    pub trigger_mode: TriggerMode,
    // Batch mode settings
    #[serde(default = "default_batch_size")]
    pub batch_size: u32,
    #[serde(default = "default_max_wait")]
    pub max_wait_seconds: u64,
    // Interval mode settings
    #[serde(default = "default_interval")]
    pub interval_seconds: u64,
    // Common settings
    #[serde(default = "default_confidence_threshold")]
    pub confidence_threshold: f64,
}

fn default_batch_size() -> u32 {
    5
}

fn default_max_wait() -> u64 {
    30
}

fn default_interval() -> u64 {
    30
}

fn default_confidence_threshold() -> f64 {
    0.7
}

/// Typed rule configuration, discriminated on `rule_type`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleConfig {
    pub rule_type: RuleType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pre_filter: Option<PreFilter>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub llm_config: Option<LlmRuleConfig>,
}

impl RuleConfig {
    /// Check that the sub-structure matching `rule_type` is populated and
    /// that numeric bounds hold.
    pub fn validate(&self) -> Result<(), String> {
        match self.rule_type {
            RuleType::Traditional if self.pre_filter.is_none() => {
                return Err("pre_filter is required for traditional rules".to_string());
            }
            RuleType::Llm if self.llm_config.is_none() => {
                return Err("llm_config is required for llm rules".to_string());
            }
            RuleType::Hybrid if self.pre_filter.is_none() || self.llm_config.is_none() => {
                return Err("pre_filter and llm_config are required for hybrid rules".to_string());
            }
            _ => {}
        }
        if let Some(llm) = &self.llm_config {
            if llm.batch_size < 1 {
                return Err("batch_size must be >= 1".to_string());
            }
            if llm.max_wait_seconds < 1 {
                return Err("max_wait_seconds must be >= 1".to_string());
            }
            if llm.interval_seconds < 1 {
                return Err("interval_seconds must be >= 1".to_string());
            }
            if !(0.0..=1.0).contains(&llm.confidence_threshold) {
                return Err("confidence_threshold must be within [0, 1]".to_string());
            }
        }
        Ok(())
    }
}

/// A single notification recipient.
///
/// `target_type` is an open string so unknown channel types survive
/// deserialization and can be skipped (with a log) at send time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotifyTarget {
    #[serde(rename = "type")]
    pub target_type: String,
    /// Telegram user ID
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    /// Telegram chat/group ID
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chat_id: Option<String>,
    /// WeCom webhook key
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub webhook_key: Option<String>,
}

impl NotifyTarget {
    pub fn telegram_chat(chat_id: impl Into<String>) -> Self {
        Self {
            target_type: "telegram".to_string(),
            user_id: None,
            chat_id: Some(chat_id.into()),
            webhook_key: None,
        }
    }

    pub fn wecom(webhook_key: impl Into<String>) -> Self {
        Self {
            target_type: "wecom".to_string(),
            user_id: None,
            chat_id: None,
            webhook_key: Some(webhook_key.into()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimit {
    #[serde(default = "default_max_per_minute")]
    pub max_per_minute: u32,
    /// Cooldown between notifications for the same (rule, context key)
    #[serde(default = "default_cooldown")]
    pub cooldown_seconds: u64,
}

fn default_max_per_minute() -> u32 {
    5
}

fn default_cooldown() -> u64 {
    60
}

impl Default for RateLimit {
    fn default() -> Self {
        Self {
            max_per_minute: default_max_per_minute(),
            cooldown_seconds: default_cooldown(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NotifyPolicy {
    #[serde(default)]
    pub targets: Vec<NotifyTarget>,
    #[serde(default)]
    pub rate_limit: RateLimit,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleMetadata {
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
    #[serde(default = "default_created_by")]
    pub created_by: String,
    /// Monotonically increases on each write
    #[serde(default = "default_version")]
    pub version: u64,
}

fn default_created_by() -> String {
    "system".to_string()
}

fn default_version() -> u64 {
    1
}

impl Default for RuleMetadata {
    fn default() -> Self {
        Self {
            created_at: Utc::now(),
            updated_at: Utc::now(),
            created_by: default_created_by(),
            version: default_version(),
        }
    }
}

/// Complete rule model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rule {
    pub rule_id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Higher priority rules are evaluated first
    #[serde(default = "default_priority")]
    pub priority: i64,
    pub event_types: Vec<String>,
    /// Context key patterns; `*` is a wildcard, empty means match-all
    #[serde(default)]
    pub context_keys: Vec<String>,
    pub rule_config: RuleConfig,
    #[serde(default)]
    pub notify_policy: NotifyPolicy,
    #[serde(default)]
    pub metadata: RuleMetadata,
}

fn default_enabled() -> bool {
    true
}

fn default_priority() -> i64 {
    100
}

impl Rule {
    pub fn validate(&self) -> Result<(), String> {
        if self.rule_id.is_empty() {
            return Err("rule_id must not be empty".to_string());
        }
        if self.rule_id.contains(':') {
            return Err("rule_id must not contain ':'".to_string());
        }
        if self.event_types.is_empty() {
            return Err("event_types must not be empty".to_string());
        }
        self.rule_config.validate()
    }

    pub fn matches_event_type(&self, event_type: &str) -> bool {
        self.event_types.iter().any(|t| t == event_type)
    }

    /// Check the context key against the rule's patterns; no patterns means
    /// match-all.
    pub fn matches_context_key(&self, context_key: &str) -> bool {
        if self.context_keys.is_empty() {
            return true;
        }
        self.context_keys
            .iter()
            .any(|pattern| wildcard_match(pattern, context_key))
    }
}

/// Glob-style matching where `*` matches any run of characters.
pub fn wildcard_match(pattern: &str, value: &str) -> bool {
    if pattern == "*" {
        return true;
    }
    if !pattern.contains('*') {
        return pattern == value;
    }

    let parts: Vec<&str> = pattern.split('*').collect();
    let mut rest = value;

    // First part must anchor at the start, last at the end.
    if let Some(first) = parts.first() {
        if !rest.starts_with(first) {
            return false;
        }
        rest = &rest[first.len()..];
    }
    for part in &parts[1..parts.len() - 1] {
        if part.is_empty() {
            continue;
        }
        match rest.find(part) {
            Some(idx) => rest = &rest[idx + part.len()..],
            None => return false,
        }
    }
    let last = parts[parts.len() - 1];
    last.is_empty() || rest.ends_with(last)
}
