//! Traditional rule engine: predicate-driven evaluation.

use tracing::error;

use super::expr::ExpressionEvaluator;
use super::EvaluationResult;
use crate::models::{Event, Rule};

/// Evaluates a rule's pre-filter expression against the event environment.
///
/// Expression failures are not retried: the rule simply does not trigger and
/// the error is carried in the reason.
#[derive(Debug, Clone, Default)]
pub struct TraditionalEngine {
    evaluator: ExpressionEvaluator,
}

impl TraditionalEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn evaluate(&self, event: &Event, rule: &Rule) -> EvaluationResult {
        let Some(pre_filter) = rule.rule_config.pre_filter.as_ref() else {
            return EvaluationResult::not_triggered("Missing pre_filter configuration");
        };
        let expression = &pre_filter.expression;

        match self.evaluator.evaluate_event(expression, event) {
            Ok(true) => EvaluationResult::triggered(
                1.0,
                format!("Expression '{expression}' evaluated to true"),
            ),
            Ok(false) => EvaluationResult::not_triggered(format!(
                "Expression '{expression}' evaluated to false"
            )),
            Err(err) => {
                error!(
                    rule_id = %rule.rule_id,
                    expression,
                    error = %err,
                    "expression evaluation failed"
                );
                EvaluationResult::not_triggered(format!("Expression evaluation error: {err}"))
            }
        }
    }
}
