//! Event handler: the per-event pipeline.
//!
//! idempotency → context window → rule lookup → priority-ordered routing →
//! dispatch. A failing rule never aborts the remaining rules.

use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, error, info};

use crate::engine::RuleRouter;
use crate::error::Result;
use crate::models::Event;
use crate::notification::NotificationDispatcher;
use crate::storage::{ContextStore, IdempotencyStore, RuleCache};

pub struct EventHandler {
    idempotency: IdempotencyStore,
    context: ContextStore,
    rules: Arc<RuleCache>,
    router: RuleRouter,
    dispatcher: NotificationDispatcher,
}

impl EventHandler {
    pub fn new(
        idempotency: IdempotencyStore,
        context: ContextStore,
        rules: Arc<RuleCache>,
        router: RuleRouter,
        dispatcher: NotificationDispatcher,
    ) -> Self {
        Self {
            idempotency,
            context,
            rules,
            router,
            dispatcher,
        }
    }

    pub async fn handle(&self, event: Event) -> Result<()> {
        let started = Instant::now();
        info!(
            event_id = %event.event_id,
            event_type = %event.event_type,
            context_key = %event.context_key,
            "processing event"
        );

        if !self.idempotency.mark_processed(&event.event_id).await? {
            debug!(event_id = %event.event_id, "event already processed");
            return Ok(());
        }

        self.context.add(&event).await?;

        let rules = self.rules.rules_for(&event.event_type).await?;
        if rules.is_empty() {
            debug!(event_type = %event.event_type, "no rules match event type");
            return Ok(());
        }
        info!(
            event_type = %event.event_type,
            rule_count = rules.len(),
            "found matching rules"
        );

        for rule in &rules {
            if !rule.matches_context_key(&event.context_key) {
                debug!(
                    rule_id = %rule.rule_id,
                    context_key = %event.context_key,
                    "context key outside rule patterns"
                );
                continue;
            }
            match self.router.evaluate(&event, rule).await {
                Ok(result) if result.should_trigger => {
                    info!(
                        rule_id = %rule.rule_id,
                        event_id = %event.event_id,
                        confidence = ?result.confidence,
                        reason = %result.reason,
                        "rule triggered"
                    );
                    if let Err(error) = self.dispatcher.dispatch(&event, rule, &result).await {
                        error!(rule_id = %rule.rule_id, %error, "notification dispatch failed");
                    }
                }
                Ok(result) => {
                    debug!(
                        rule_id = %rule.rule_id,
                        event_id = %event.event_id,
                        reason = %result.reason,
                        "rule not triggered"
                    );
                }
                Err(error) => {
                    error!(rule_id = %rule.rule_id, %error, "rule evaluation failed");
                }
            }
        }

        info!(
            event_id = %event.event_id,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "event processing complete"
        );
        Ok(())
    }
}
