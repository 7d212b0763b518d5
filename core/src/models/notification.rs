//! Notification task model, serialized as JSON on the queue.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::rule::NotifyTarget;

/// A queued notification awaiting delivery.
///
/// Lives from enqueue until either a successful send (dropped) or retry
/// exhaustion (moved to the dead-letter list).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationTask {
    pub task_id: String,
    pub rule_id: String,
    pub context_key: String,
    pub targets: Vec<NotifyTarget>,
    /// Rendered message body
    pub message: String,
    #[serde(default)]
    pub retry_count: u32,
    pub created_at: DateTime<Utc>,
    /// Earliest retry time; stamped on requeue but not enforced
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_after: Option<DateTime<Utc>>,
    /// Triggering event id, confidence, decision reason
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl NotificationTask {
    pub fn should_retry(&self, max_retry: u32) -> bool {
        self.retry_count < max_retry
    }

    /// Exponential backoff: `base * 2^retry_count`.
    pub fn retry_delay(&self, base: Duration) -> Duration {
        base.saturating_mul(2u32.saturating_pow(self.retry_count))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn task(retry_count: u32) -> NotificationTask {
        NotificationTask {
            task_id: "notify_abc123".to_string(),
            rule_id: "r1".to_string(),
            context_key: "trade.profit".to_string(),
            targets: vec![NotifyTarget::telegram_chat("42")],
            message: "hello".to_string(),
            retry_count,
            created_at: Utc::now(),
            retry_after: None,
            metadata: Map::new(),
        }
    }

    #[test]
    fn retry_budget() {
        assert!(task(0).should_retry(3));
        assert!(task(2).should_retry(3));
        assert!(!task(3).should_retry(3));
    }

    #[test]
    fn backoff_doubles() {
        let base = Duration::from_secs(1);
        assert_eq!(task(0).retry_delay(base), Duration::from_secs(1));
        assert_eq!(task(1).retry_delay(base), Duration::from_secs(2));
        assert_eq!(task(3).retry_delay(base), Duration::from_secs(8));
    }

    #[test]
    fn queue_round_trip() {
        let mut t = task(1);
        t.metadata.insert("event_id".into(), json!("e1"));
        let raw = serde_json::to_string(&t).unwrap();
        let parsed: NotificationTask = serde_json::from_str(&raw).unwrap();
        assert_eq!(parsed.task_id, t.task_id);
        assert_eq!(parsed.retry_count, 1);
        assert_eq!(parsed.metadata["event_id"], json!("e1"));
        assert_eq!(parsed.targets[0].target_type, "telegram");
    }
}
