//! Notification dispatcher: limiter check, message render, enqueue.

use chrono::Utc;
use serde_json::{json, Value};
use tracing::{debug, info};
use uuid::Uuid;

use super::limiter::{NotificationLimiter, Verdict};
use crate::engine::EvaluationResult;
use crate::error::Result;
use crate::models::{Event, NotificationTask, Rule};
use crate::storage::NotificationQueue;

#[derive(Clone)]
pub struct NotificationDispatcher {
    queue: NotificationQueue,
    limiter: NotificationLimiter,
}

impl NotificationDispatcher {
    pub fn new(queue: NotificationQueue, limiter: NotificationLimiter) -> Self {
        Self { queue, limiter }
    }

    /// Queue a notification for a triggered rule. Returns true if a task was
    /// enqueued; rate-limited and target-less dispatches are dropped.
    pub async fn dispatch(
        &self,
        event: &Event,
        rule: &Rule,
        result: &EvaluationResult,
    ) -> Result<bool> {
        let policy = &rule.notify_policy;
        if policy.targets.is_empty() {
            debug!(rule_id = %rule.rule_id, "no notification targets");
            return Ok(false);
        }

        match self
            .limiter
            .check(&rule.rule_id, &event.context_key, &policy.rate_limit)
            .await?
        {
            Verdict::Rejected(reason) => {
                info!(rule_id = %rule.rule_id, reason, "notification suppressed");
                return Ok(false);
            }
            Verdict::Allowed => {}
        }

        let task = NotificationTask {
            task_id: new_task_id(),
            rule_id: rule.rule_id.clone(),
            context_key: event.context_key.clone(),
            targets: policy.targets.clone(),
            message: render_message(event, rule, result),
            retry_count: 0,
            created_at: Utc::now(),
            retry_after: None,
            metadata: serde_json::Map::from_iter([
                ("event_id".to_string(), json!(event.event_id)),
                ("event_type".to_string(), json!(event.event_type)),
                ("confidence".to_string(), json!(result.confidence)),
                ("reason".to_string(), json!(result.reason)),
            ]),
        };

        self.queue.enqueue(&task).await?;
        info!(
            task_id = %task.task_id,
            rule_id = %rule.rule_id,
            targets = task.targets.len(),
            "notification queued"
        );
        Ok(true)
    }
}

fn new_task_id() -> String {
    let hex = Uuid::new_v4().simple().to_string();
    format!("notify_{}", &hex[..12])
}

/// Deterministic plain-text rendering: header with rule name, trigger time,
/// decision reason, optional confidence, and up to five data fields.
fn render_message(event: &Event, rule: &Rule, result: &EvaluationResult) -> String {
    let mut lines = vec![
        format!("[{}]", rule.name),
        String::new(),
        format!(
            "Triggered at: {} UTC",
            event.timestamp.format("%Y-%m-%d %H:%M:%S")
        ),
        format!("Event type: {}", event.event_type),
        String::new(),
        format!("Reason: {}", result.reason),
    ];

    if let Some(confidence) = result.confidence {
        lines.push(format!("Confidence: {:.0}%", confidence * 100.0));
    }

    if !event.data.is_empty() {
        lines.push(String::new());
        lines.push("Event data:".to_string());
        for (key, value) in event.data.iter().take(5) {
            lines.push(format!("  - {key}: {}", scalar_text(value)));
        }
    }

    lines.join("\n")
}

fn scalar_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
