//! LLM inference engine for intelligent rule evaluation.
//!
//! Summarizes the context window, consults the result cache, calls the
//! backend and applies the rule's confidence threshold. The failure policy
//! is strict: any transport or parse failure becomes a non-triggering
//! fallback decision; repeat attempts only happen through future events.

use std::sync::Arc;
use std::time::Instant;

use sha2::{Digest, Sha256};
use tracing::{debug, error, info};

use super::client::LlmBackend;
use super::parser::{parse_llm_response, LlmDecision};
use super::prompt::{build_user_prompt, SYSTEM_PROMPT};
use crate::context::ContextSummarizer;
use crate::engine::EvaluationResult;
use crate::error::Result;
use crate::models::{Event, Rule};
use crate::storage::{CachedDecision, ContextStore, LlmCacheStore};

#[derive(Clone)]
pub struct LlmEngine {
    backend: Arc<dyn LlmBackend>,
    cache: LlmCacheStore,
    context: ContextStore,
    summarizer: ContextSummarizer,
}

impl LlmEngine {
    pub fn new(backend: Arc<dyn LlmBackend>, cache: LlmCacheStore, context: ContextStore) -> Self {
        Self {
            backend,
            cache,
            context,
            summarizer: ContextSummarizer::new(),
        }
    }

    pub async fn evaluate(&self, event: &Event, rule: &Rule) -> Result<EvaluationResult> {
        let Some(llm_config) = rule.rule_config.llm_config.as_ref() else {
            return Ok(EvaluationResult::not_triggered("Missing LLM configuration"));
        };

        let started = Instant::now();
        let context_events = self.context.get(&event.context_key, None).await?;
        let context_summary = self.summarizer.summarize(&context_events);

        let cache_key = compute_cache_key(&rule.rule_id, &context_summary, event)?;
        if let Some(cached) = self.cache.get(&rule.rule_id, &cache_key).await? {
            debug!(rule_id = %rule.rule_id, "llm cache hit");
            return Ok(EvaluationResult {
                should_trigger: cached.should_trigger,
                confidence: Some(cached.confidence),
                reason: format!("{} (cached)", cached.reason),
            });
        }

        let user_prompt = build_user_prompt(
            &llm_config.description,
            &context_summary,
            &event.event_type,
            &event.timestamp.to_rfc3339(),
            &serde_json::to_string(&event.data)?,
        );

        let mut decision = match self.backend.complete(SYSTEM_PROMPT, &user_prompt).await {
            Ok(content) => parse_llm_response(&content),
            Err(err) => {
                error!(rule_id = %rule.rule_id, error = %err, "llm call failed");
                return Ok(EvaluationResult::not_triggered(format!(
                    "LLM service error: {err}"
                )));
            }
        };

        info!(
            rule_id = %rule.rule_id,
            should_trigger = decision.should_trigger,
            confidence = decision.confidence,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "llm evaluation complete"
        );

        // Confidence gate: positive decisions below the threshold downgrade.
        let threshold = llm_config.confidence_threshold;
        if decision.should_trigger && decision.confidence < threshold {
            decision = LlmDecision {
                should_trigger: false,
                confidence: decision.confidence,
                reason: format!(
                    "Confidence {:.2} below threshold {threshold}",
                    decision.confidence
                ),
            };
        }

        self.cache
            .set(
                &rule.rule_id,
                &cache_key,
                &CachedDecision {
                    should_trigger: decision.should_trigger,
                    confidence: decision.confidence,
                    reason: decision.reason.clone(),
                },
            )
            .await?;

        Ok(EvaluationResult {
            should_trigger: decision.should_trigger,
            confidence: Some(decision.confidence),
            reason: decision.reason,
        })
    }
}

/// `SHA-256(rule_id : context_summary : event_type : event_data_json)`,
/// truncated to 16 hex characters. Stable because the summarizer is.
fn compute_cache_key(rule_id: &str, context_summary: &str, event: &Event) -> Result<String> {
    let data_json = serde_json::to_string(&event.data)?;
    let mut hasher = Sha256::new();
    hasher.update(rule_id.as_bytes());
    hasher.update(b":");
    hasher.update(context_summary.as_bytes());
    hasher.update(b":");
    hasher.update(event.event_type.as_bytes());
    hasher.update(b":");
    hasher.update(data_json.as_bytes());
    let digest = hasher.finalize();
    Ok(hex::encode(digest)[..16].to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{LlmRuleConfig, RuleConfig, RuleType, TriggerMode};
    use crate::storage::{KeySpace, MemoryStore};
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use serde_json::json;
    use std::time::Duration;

    /// Backend double: returns scripted responses and records call counts.
    pub(crate) struct ScriptedBackend {
        responses: Mutex<Vec<Result<String>>>,
        pub calls: Mutex<Vec<String>>,
    }

    impl ScriptedBackend {
        pub(crate) fn new(responses: Vec<Result<String>>) -> Self {
            Self {
                responses: Mutex::new(responses),
                calls: Mutex::new(Vec::new()),
            }
        }

        pub(crate) fn call_count(&self) -> usize {
            self.calls.lock().len()
        }
    }

    #[async_trait]
    impl LlmBackend for ScriptedBackend {
        async fn complete(&self, _system: &str, user: &str) -> Result<String> {
            self.calls.lock().push(user.to_string());
            let mut responses = self.responses.lock();
            if responses.is_empty() {
                Ok(r#"{"should_trigger": false, "confidence": 0.0, "reason": "default"}"#.into())
            } else {
                responses.remove(0)
            }
        }
    }

    fn llm_rule(threshold: f64) -> Rule {
        Rule {
            rule_id: "r1".to_string(),
            name: "llm rule".to_string(),
            description: String::new(),
            enabled: true,
            priority: 100,
            event_types: vec!["trade.signal".to_string()],
            context_keys: Vec::new(),
            rule_config: RuleConfig {
                rule_type: RuleType::Llm,
                pre_filter: None,
                llm_config: Some(LlmRuleConfig {
                    description: "sustained buying".to_string(),
                    trigger_mode: TriggerMode::Realtime,
                    batch_size: 5,
                    max_wait_seconds: 30,
                    interval_seconds: 30,
                    confidence_threshold: threshold,
                }),
            },
            notify_policy: Default::default(),
            metadata: Default::default(),
        }
    }

    fn engine_with(backend: Arc<ScriptedBackend>) -> LlmEngine {
        let kv: Arc<MemoryStore> = Arc::new(MemoryStore::new());
        let keys = KeySpace::new("t:");
        LlmEngine::new(
            backend,
            LlmCacheStore::new(kv.clone(), keys.clone()),
            ContextStore::new(kv, keys, Duration::from_secs(300), 100),
        )
    }

    fn event() -> Event {
        let mut data = serde_json::Map::new();
        data.insert("signal".into(), json!("buy"));
        Event::new("e1", "trade.signal").with_data(data)
    }

    #[tokio::test]
    async fn positive_decision_passes_through() {
        let backend = Arc::new(ScriptedBackend::new(vec![Ok(
            r#"{"should_trigger": true, "confidence": 0.9, "reason": "strong"}"#.into(),
        )]));
        let engine = engine_with(backend.clone());
        let result = engine.evaluate(&event(), &llm_rule(0.7)).await.unwrap();
        assert!(result.should_trigger);
        assert_eq!(result.confidence, Some(0.9));
        assert_eq!(backend.call_count(), 1);
    }

    #[tokio::test]
    async fn low_confidence_is_downgraded() {
        let backend = Arc::new(ScriptedBackend::new(vec![Ok(
            r#"{"should_trigger": true, "confidence": 0.5, "reason": "weak"}"#.into(),
        )]));
        let engine = engine_with(backend);
        let result = engine.evaluate(&event(), &llm_rule(0.7)).await.unwrap();
        assert!(!result.should_trigger);
        assert_eq!(result.confidence, Some(0.5));
        assert!(result.reason.contains("below threshold"), "{}", result.reason);
    }

    #[tokio::test]
    async fn backend_failure_is_a_fallback_non_trigger() {
        let backend = Arc::new(ScriptedBackend::new(vec![Err(
            crate::error::TriggerError::llm("connect timeout"),
        )]));
        let engine = engine_with(backend);
        let result = engine.evaluate(&event(), &llm_rule(0.7)).await.unwrap();
        assert!(!result.should_trigger);
        assert!(result.reason.starts_with("LLM service error:"), "{}", result.reason);
    }

    #[tokio::test]
    async fn identical_evaluation_hits_cache() {
        let backend = Arc::new(ScriptedBackend::new(vec![Ok(
            r#"{"should_trigger": true, "confidence": 0.9, "reason": "strong"}"#.into(),
        )]));
        let engine = engine_with(backend.clone());
        let rule = llm_rule(0.7);

        let first = engine.evaluate(&event(), &rule).await.unwrap();
        assert!(!first.reason.ends_with("(cached)"));
        let second = engine.evaluate(&event(), &rule).await.unwrap();
        assert!(second.should_trigger);
        assert!(second.reason.ends_with("(cached)"), "{}", second.reason);
        assert_eq!(backend.call_count(), 1);
    }

    #[test]
    fn cache_key_is_deterministic_and_distinguishes_inputs() {
        let e = event();
        let k1 = compute_cache_key("r1", "summary", &e).unwrap();
        let k2 = compute_cache_key("r1", "summary", &e).unwrap();
        assert_eq!(k1, k2);
        assert_eq!(k1.len(), 16);
        assert_ne!(k1, compute_cache_key("r2", "summary", &e).unwrap());
        assert_ne!(k1, compute_cache_key("r1", "other", &e).unwrap());
    }
}
