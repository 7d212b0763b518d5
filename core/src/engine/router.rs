//! Rule router: dispatches an (event, rule) pair to the matching engine.

use tracing::debug;

use super::llm::{LlmEngine, TriggerDecision, TriggerModeManager};
use super::traditional::TraditionalEngine;
use super::EvaluationResult;
use crate::error::Result;
use crate::models::{Event, Rule, RuleType};

#[derive(Clone)]
pub struct RuleRouter {
    traditional: TraditionalEngine,
    llm: LlmEngine,
    trigger_mode: TriggerModeManager,
}

impl RuleRouter {
    pub fn new(llm: LlmEngine, trigger_mode: TriggerModeManager) -> Self {
        Self {
            traditional: TraditionalEngine::new(),
            llm,
            trigger_mode,
        }
    }

    pub async fn evaluate(&self, event: &Event, rule: &Rule) -> Result<EvaluationResult> {
        debug!(rule_id = %rule.rule_id, rule_type = ?rule.rule_config.rule_type, "routing rule evaluation");

        match rule.rule_config.rule_type {
            RuleType::Traditional => Ok(self.traditional.evaluate(event, rule)),
            RuleType::Llm => self.evaluate_llm(event, rule).await,
            RuleType::Hybrid => self.evaluate_hybrid(event, rule).await,
        }
    }

    /// LLM rules go through the trigger-mode manager first; only a TRIGGER
    /// decision reaches the model, after which the analysis is recorded.
    async fn evaluate_llm(&self, event: &Event, rule: &Rule) -> Result<EvaluationResult> {
        let outcome = self.trigger_mode.should_trigger(event, rule).await?;
        match outcome.decision {
            TriggerDecision::Skip | TriggerDecision::Pending => {
                Ok(EvaluationResult::not_triggered(outcome.reason))
            }
            TriggerDecision::Trigger => {
                let result = self.llm.evaluate(event, rule).await?;
                self.trigger_mode
                    .mark_analyzed(rule, &event.context_key)
                    .await?;
                Ok(result)
            }
        }
    }

    /// Hybrid rules screen with the predicate and escalate to the LLM; the
    /// LLM's decision is authoritative.
    async fn evaluate_hybrid(&self, event: &Event, rule: &Rule) -> Result<EvaluationResult> {
        let pre = self.traditional.evaluate(event, rule);
        if !pre.should_trigger {
            debug!(rule_id = %rule.rule_id, reason = %pre.reason, "hybrid pre-filter rejected");
            return Ok(EvaluationResult::not_triggered(format!(
                "Pre-filter: {}",
                pre.reason
            )));
        }

        let llm_result = self.evaluate_llm(event, rule).await?;
        if llm_result.should_trigger {
            Ok(EvaluationResult {
                should_trigger: true,
                confidence: llm_result.confidence,
                reason: format!("Pre-filter passed, LLM: {}", llm_result.reason),
            })
        } else {
            Ok(EvaluationResult {
                should_trigger: false,
                confidence: llm_result.confidence,
                reason: format!("LLM: {}", llm_result.reason),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::llm::client::LlmBackend;
    use crate::engine::llm::TriggerModeStore;
    use crate::error::Result;
    use crate::models::{LlmRuleConfig, PreFilter, RuleConfig, TriggerMode};
    use crate::storage::{ContextStore, KeySpace, LlmCacheStore, MemoryStore};
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use serde_json::json;
    use std::sync::Arc;
    use std::time::Duration;

    struct CountingBackend {
        response: String,
        calls: Mutex<u32>,
    }

    impl CountingBackend {
        fn new(response: &str) -> Arc<Self> {
            Arc::new(Self {
                response: response.to_string(),
                calls: Mutex::new(0),
            })
        }

        fn calls(&self) -> u32 {
            *self.calls.lock()
        }
    }

    #[async_trait]
    impl LlmBackend for CountingBackend {
        async fn complete(&self, _system: &str, _user: &str) -> Result<String> {
            *self.calls.lock() += 1;
            Ok(self.response.clone())
        }
    }

    fn router_with(backend: Arc<CountingBackend>) -> RuleRouter {
        let kv: Arc<MemoryStore> = Arc::new(MemoryStore::new());
        let keys = KeySpace::new("t:");
        let llm = LlmEngine::new(
            backend,
            LlmCacheStore::new(kv.clone(), keys.clone()),
            ContextStore::new(kv.clone(), keys.clone(), Duration::from_secs(300), 100),
        );
        let trigger_mode = TriggerModeManager::new(TriggerModeStore::new(kv, keys));
        RuleRouter::new(llm, trigger_mode)
    }

    fn hybrid_rule(expression: &str, mode: TriggerMode) -> Rule {
        Rule {
            rule_id: "r1".to_string(),
            name: "hybrid".to_string(),
            description: String::new(),
            enabled: true,
            priority: 100,
            event_types: vec!["trade.profit".to_string()],
            context_keys: Vec::new(),
            rule_config: RuleConfig {
                rule_type: RuleType::Hybrid,
                pre_filter: Some(PreFilter {
                    filter_type: "expression".to_string(),
                    expression: expression.to_string(),
                }),
                llm_config: Some(LlmRuleConfig {
                    description: "profitable streak".to_string(),
                    trigger_mode: mode,
                    batch_size: 5,
                    max_wait_seconds: 30,
                    interval_seconds: 30,
                    confidence_threshold: 0.7,
                }),
            },
            notify_policy: Default::default(),
            metadata: Default::default(),
        }
    }

    fn event(data: serde_json::Value) -> Event {
        let serde_json::Value::Object(map) = data else {
            panic!("data must be an object");
        };
        Event::new("e1", "trade.profit").with_data(map)
    }

    #[tokio::test]
    async fn hybrid_short_circuits_without_llm_call() {
        let backend = CountingBackend::new(
            r#"{"should_trigger": true, "confidence": 0.9, "reason": "should not be reached"}"#,
        );
        let router = router_with(backend.clone());
        let rule = hybrid_rule("profit_rate > 0.05", TriggerMode::Realtime);

        let result = router
            .evaluate(&event(json!({"profit_rate": 0.02})), &rule)
            .await
            .unwrap();
        assert!(!result.should_trigger);
        assert!(result.reason.starts_with("Pre-filter:"), "{}", result.reason);
        assert_eq!(backend.calls(), 0);
    }

    #[tokio::test]
    async fn hybrid_escalates_when_pre_filter_passes() {
        let backend = CountingBackend::new(
            r#"{"should_trigger": true, "confidence": 0.9, "reason": "sustained gains"}"#,
        );
        let router = router_with(backend.clone());
        let rule = hybrid_rule("profit_rate > 0.05", TriggerMode::Realtime);

        let result = router
            .evaluate(&event(json!({"profit_rate": 0.08})), &rule)
            .await
            .unwrap();
        assert!(result.should_trigger);
        assert_eq!(result.confidence, Some(0.9));
        assert!(
            result.reason.starts_with("Pre-filter passed, LLM:"),
            "{}",
            result.reason
        );
        assert_eq!(backend.calls(), 1);
    }

    #[tokio::test]
    async fn llm_negative_decision_is_authoritative() {
        let backend = CountingBackend::new(
            r#"{"should_trigger": false, "confidence": 0.3, "reason": "noise"}"#,
        );
        let router = router_with(backend);
        let rule = hybrid_rule("profit_rate > 0.05", TriggerMode::Realtime);

        let result = router
            .evaluate(&event(json!({"profit_rate": 0.08})), &rule)
            .await
            .unwrap();
        assert!(!result.should_trigger);
        assert!(result.reason.starts_with("LLM:"), "{}", result.reason);
    }

    #[tokio::test]
    async fn pending_batch_reports_manager_reason() {
        let backend = CountingBackend::new(
            r#"{"should_trigger": true, "confidence": 0.9, "reason": "r"}"#,
        );
        let router = router_with(backend.clone());
        let mut rule = hybrid_rule("profit_rate > 0.05", TriggerMode::Batch);
        rule.rule_config.rule_type = RuleType::Llm;
        rule.rule_config.pre_filter = None;

        let result = router
            .evaluate(&event(json!({"profit_rate": 0.08})), &rule)
            .await
            .unwrap();
        assert!(!result.should_trigger);
        assert_eq!(result.reason, "Batch pending: 1/5 events");
        assert_eq!(backend.calls(), 0);
    }

    #[tokio::test]
    async fn traditional_rule_routes_to_expression_engine() {
        let backend = CountingBackend::new("{}");
        let router = router_with(backend.clone());
        let mut rule = hybrid_rule("profit_rate > 0.05", TriggerMode::Realtime);
        rule.rule_config.rule_type = RuleType::Traditional;
        rule.rule_config.llm_config = None;

        let result = router
            .evaluate(&event(json!({"profit_rate": 0.08})), &rule)
            .await
            .unwrap();
        assert!(result.should_trigger);
        assert_eq!(result.confidence, Some(1.0));
        assert_eq!(backend.calls(), 0);
    }
}
