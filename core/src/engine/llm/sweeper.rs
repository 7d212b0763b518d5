//! Batch timeout sweeper.
//!
//! Batch triggering is event-driven, so a context key that goes silent
//! would never flush on its own. This background task periodically scans
//! the non-empty batch lists and pushes any batch older than its
//! `max_wait_seconds` through the normal evaluate → mark → dispatch path,
//! using the newest batched entry as the current event.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::engine::LlmEngine;
use super::trigger_mode::TriggerModeManager;
use crate::error::Result;
use crate::models::TriggerMode;
use crate::notification::NotificationDispatcher;
use crate::storage::{KeySpace, KvStore, RuleStore};

pub struct BatchSweeper {
    kv: Arc<dyn KvStore>,
    keys: KeySpace,
    manager: TriggerModeManager,
    llm: LlmEngine,
    rules: RuleStore,
    dispatcher: NotificationDispatcher,
    interval: Duration,
}

impl BatchSweeper {
    pub fn new(
        kv: Arc<dyn KvStore>,
        keys: KeySpace,
        manager: TriggerModeManager,
        llm: LlmEngine,
        rules: RuleStore,
        dispatcher: NotificationDispatcher,
        interval: Duration,
    ) -> Self {
        Self {
            kv,
            keys,
            manager,
            llm,
            rules,
            dispatcher,
            interval,
        }
    }

    /// Sweep on a fixed cadence until cancelled. Individual sweep failures
    /// are logged and retried on the next tick.
    pub async fn run(&self, cancel: CancellationToken) {
        info!(interval_secs = self.interval.as_secs(), "batch sweeper started");
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(self.interval) => {
                    if let Err(error) = self.sweep().await {
                        warn!(%error, "batch sweep failed");
                    }
                }
            }
        }
        info!("batch sweeper stopped");
    }

    /// One pass over all pending batches.
    pub async fn sweep(&self) -> Result<()> {
        let batch_keys = self.kv.scan_keys(&self.keys.trigger_batch_pattern()).await?;
        for key in batch_keys {
            let Some((rule_id, context_key)) = self.keys.parse_trigger_batch(&key) else {
                continue;
            };
            if let Err(error) = self.flush_if_expired(&rule_id, &context_key).await {
                warn!(%error, rule_id, context_key, "batch flush failed");
            }
        }
        Ok(())
    }

    async fn flush_if_expired(&self, rule_id: &str, context_key: &str) -> Result<()> {
        let store = self.manager.store();

        let Some(rule) = self.rules.get(rule_id).await? else {
            // rule deleted while a batch was pending
            store.clear_batch(rule_id, context_key).await?;
            return Ok(());
        };
        if !rule.enabled {
            return Ok(());
        }
        let Some(llm_config) = rule.rule_config.llm_config.as_ref() else {
            return Ok(());
        };
        if llm_config.trigger_mode != TriggerMode::Batch {
            return Ok(());
        }

        let Some(first_ts) = store.batch_first_timestamp(rule_id, context_key).await? else {
            return Ok(());
        };
        let elapsed = Utc::now().timestamp_millis() as f64 / 1000.0 - first_ts;
        if elapsed < llm_config.max_wait_seconds as f64 {
            return Ok(());
        }

        let batch = store.get_batch(rule_id, context_key).await?;
        let Some(current) = batch.last().cloned() else {
            return Ok(());
        };

        info!(
            rule_id,
            context_key,
            batch_size = batch.len(),
            elapsed_secs = format!("{elapsed:.1}"),
            "flushing expired batch"
        );

        let result = self.llm.evaluate(&current, &rule).await?;
        self.manager.mark_analyzed(&rule, context_key).await?;

        if result.should_trigger {
            self.dispatcher.dispatch(&current, &rule, &result).await?;
        } else {
            debug!(rule_id, reason = %result.reason, "flushed batch did not trigger");
        }
        Ok(())
    }
}
