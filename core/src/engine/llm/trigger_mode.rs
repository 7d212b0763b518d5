//! Trigger mode management for LLM rules.
//!
//! Per-rule-per-context-key scheduling of LLM analyses:
//! - REALTIME: every event triggers an analysis
//! - BATCH: accumulate events until `batch_size` or `max_wait_seconds`
//! - INTERVAL: at most one analysis per `interval_seconds` across workers,
//!   guarded by a set-if-absent lock
//!
//! All state lives in the shared store so any worker can continue another
//! worker's batch or honor its interval lock.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::Value;
use tracing::warn;

use crate::error::Result;
use crate::models::event::parse_timestamp;
use crate::models::{ContextEntry, Event, Rule, TriggerMode};
use crate::storage::{KeySpace, KvStore};

/// Decision on whether to run an LLM analysis now.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerDecision {
    /// Execute the analysis now
    Trigger,
    /// Conditions not met, skip this event
    Skip,
    /// Event accumulated into a batch, waiting for more
    Pending,
}

/// Result of the trigger mode check.
#[derive(Debug, Clone)]
pub struct TriggerOutcome {
    pub decision: TriggerDecision,
    pub reason: String,
    /// Accumulated events when a batch triggers
    pub batch: Vec<Event>,
}

impl TriggerOutcome {
    fn trigger(reason: String) -> Self {
        Self {
            decision: TriggerDecision::Trigger,
            reason,
            batch: Vec::new(),
        }
    }

    fn skip(reason: String) -> Self {
        Self {
            decision: TriggerDecision::Skip,
            reason,
            batch: Vec::new(),
        }
    }

    fn pending(reason: String) -> Self {
        Self {
            decision: TriggerDecision::Pending,
            reason,
            batch: Vec::new(),
        }
    }
}

/// `last_analysis` lifetime; a key quiet for this long starts fresh.
const LAST_ANALYSIS_TTL: Duration = Duration::from_secs(3600);

/// Storage for trigger mode state.
#[derive(Clone)]
pub struct TriggerModeStore {
    kv: Arc<dyn KvStore>,
    keys: KeySpace,
}

impl TriggerModeStore {
    pub fn new(kv: Arc<dyn KvStore>, keys: KeySpace) -> Self {
        Self { kv, keys }
    }

    /// Append an event to the batch list, setting the list TTL on first
    /// insert. Returns the current batch size.
    pub async fn add_to_batch(
        &self,
        rule_id: &str,
        context_key: &str,
        event: &Event,
        max_wait: Duration,
    ) -> Result<u64> {
        let key = self.keys.trigger_batch(rule_id, context_key);
        let entry = serde_json::to_string(&event.to_context_entry())?;
        let len = self.kv.rpush(&key, &entry).await?;
        if len == 1 {
            self.kv
                .expire(&key, max_wait + Duration::from_secs(10))
                .await?;
        }
        Ok(len)
    }

    pub async fn get_batch(&self, rule_id: &str, context_key: &str) -> Result<Vec<Event>> {
        let key = self.keys.trigger_batch(rule_id, context_key);
        let entries = self.kv.lrange(&key, 0, -1).await?;
        let mut events = Vec::with_capacity(entries.len());
        for raw in entries {
            match serde_json::from_str::<ContextEntry>(&raw) {
                Ok(entry) => events.push(Event::from_context_entry(entry, context_key)),
                Err(error) => warn!(%error, rule_id, "skipping malformed batch entry"),
            }
        }
        Ok(events)
    }

    pub async fn clear_batch(&self, rule_id: &str, context_key: &str) -> Result<()> {
        self.kv
            .del(&self.keys.trigger_batch(rule_id, context_key))
            .await
    }

    /// Timestamp of the first batched event as epoch seconds. The raw field
    /// is accepted as either epoch seconds or ISO-8601 (UTC when naive).
    pub async fn batch_first_timestamp(
        &self,
        rule_id: &str,
        context_key: &str,
    ) -> Result<Option<f64>> {
        let key = self.keys.trigger_batch(rule_id, context_key);
        let Some(first) = self.kv.lindex(&key, 0).await? else {
            return Ok(None);
        };
        let Ok(value) = serde_json::from_str::<Value>(&first) else {
            return Ok(None);
        };
        let Some(raw_ts) = value.get("timestamp") else {
            return Ok(None);
        };
        Ok(parse_timestamp(raw_ts)
            .map(|dt| dt.timestamp() as f64 + f64::from(dt.timestamp_subsec_millis()) / 1000.0))
    }

    pub async fn set_last_analysis(&self, rule_id: &str, context_key: &str) -> Result<()> {
        let key = self.keys.trigger_last_analysis(rule_id, context_key);
        let now = Utc::now().timestamp_millis() as f64 / 1000.0;
        self.kv
            .set_ex(&key, &now.to_string(), LAST_ANALYSIS_TTL)
            .await
    }

    pub async fn last_analysis(&self, rule_id: &str, context_key: &str) -> Result<Option<f64>> {
        let key = self.keys.trigger_last_analysis(rule_id, context_key);
        Ok(self
            .kv
            .get(&key)
            .await?
            .and_then(|raw| raw.parse::<f64>().ok()))
    }

    /// Set-if-absent lock with a TTL of the poll interval: at most one
    /// worker analyzes an interval rule per interval.
    pub async fn try_acquire_interval_lock(
        &self,
        rule_id: &str,
        interval: Duration,
    ) -> Result<bool> {
        let key = self.keys.trigger_interval_lock(rule_id);
        let now = Utc::now().timestamp_millis() as f64 / 1000.0;
        let acquired = self.kv.set_nx(&key, &now.to_string()).await?;
        if acquired {
            self.kv.expire(&key, interval).await?;
        }
        Ok(acquired)
    }
}

/// Manager for the three LLM trigger modes.
#[derive(Clone)]
pub struct TriggerModeManager {
    store: TriggerModeStore,
}

impl TriggerModeManager {
    pub fn new(store: TriggerModeStore) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &TriggerModeStore {
        &self.store
    }

    pub async fn should_trigger(&self, event: &Event, rule: &Rule) -> Result<TriggerOutcome> {
        let Some(llm_config) = rule.rule_config.llm_config.as_ref() else {
            return Ok(TriggerOutcome::skip("No LLM config".to_string()));
        };

        match llm_config.trigger_mode {
            TriggerMode::Realtime => Ok(TriggerOutcome::trigger(
                "Realtime mode: analyze every event".to_string(),
            )),
            TriggerMode::Batch => self.check_batch(event, rule, llm_config).await,
            TriggerMode::Interval => self.check_interval(event, rule, llm_config).await,
        }
    }

    /// Record a completed analysis: stamp `last_analysis` and, in batch
    /// mode, drop the flushed batch.
    pub async fn mark_analyzed(&self, rule: &Rule, context_key: &str) -> Result<()> {
        let Some(llm_config) = rule.rule_config.llm_config.as_ref() else {
            return Ok(());
        };
        self.store
            .set_last_analysis(&rule.rule_id, context_key)
            .await?;
        if llm_config.trigger_mode == TriggerMode::Batch {
            self.store.clear_batch(&rule.rule_id, context_key).await?;
        }
        Ok(())
    }

    /// Batch mode: trigger when the list reaches `batch_size`, or when the
    /// first entry has been waiting `max_wait_seconds`. The timeout check is
    /// also performed lazily here so a busy key flushes without the sweeper.
    async fn check_batch(
        &self,
        event: &Event,
        rule: &Rule,
        llm_config: &crate::models::LlmRuleConfig,
    ) -> Result<TriggerOutcome> {
        let batch_size = u64::from(llm_config.batch_size);
        let max_wait = llm_config.max_wait_seconds;

        let current_size = self
            .store
            .add_to_batch(
                &rule.rule_id,
                &event.context_key,
                event,
                Duration::from_secs(max_wait),
            )
            .await?;

        if current_size >= batch_size {
            let batch = self
                .store
                .get_batch(&rule.rule_id, &event.context_key)
                .await?;
            return Ok(TriggerOutcome {
                decision: TriggerDecision::Trigger,
                reason: format!("Batch full: {current_size}/{batch_size} events"),
                batch,
            });
        }

        if let Some(first_ts) = self
            .store
            .batch_first_timestamp(&rule.rule_id, &event.context_key)
            .await?
        {
            let elapsed = now_secs() - first_ts;
            if elapsed >= max_wait as f64 {
                let batch = self
                    .store
                    .get_batch(&rule.rule_id, &event.context_key)
                    .await?;
                return Ok(TriggerOutcome {
                    decision: TriggerDecision::Trigger,
                    reason: format!("Batch timeout: {elapsed:.1}s >= {max_wait}s"),
                    batch,
                });
            }
        }

        Ok(TriggerOutcome::pending(format!(
            "Batch pending: {current_size}/{batch_size} events"
        )))
    }

    /// Interval mode: skip inside the interval, otherwise race for the lock.
    async fn check_interval(
        &self,
        event: &Event,
        rule: &Rule,
        llm_config: &crate::models::LlmRuleConfig,
    ) -> Result<TriggerOutcome> {
        let interval = llm_config.interval_seconds;

        if let Some(last) = self
            .store
            .last_analysis(&rule.rule_id, &event.context_key)
            .await?
        {
            let elapsed = now_secs() - last;
            if elapsed < interval as f64 {
                return Ok(TriggerOutcome::skip(format!(
                    "Interval not reached: {elapsed:.1}s < {interval}s"
                )));
            }
        }

        if self
            .store
            .try_acquire_interval_lock(&rule.rule_id, Duration::from_secs(interval))
            .await?
        {
            Ok(TriggerOutcome::trigger(format!(
                "Interval reached: analyzing at {interval}s interval"
            )))
        } else {
            Ok(TriggerOutcome::skip(
                "Interval analysis already in progress".to_string(),
            ))
        }
    }
}

fn now_secs() -> f64 {
    Utc::now().timestamp_millis() as f64 / 1000.0
}
