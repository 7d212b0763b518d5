//! Rule evaluation engines and the router that dispatches between them.

pub mod expr;
pub mod llm;
pub mod router;
pub mod traditional;

pub use expr::ExpressionEvaluator;
pub use router::RuleRouter;
pub use traditional::TraditionalEngine;

/// Outcome of evaluating one rule against one event.
#[derive(Debug, Clone)]
pub struct EvaluationResult {
    pub should_trigger: bool,
    /// Absent when the engine has no confidence notion (e.g. skip reasons)
    pub confidence: Option<f64>,
    pub reason: String,
}

impl EvaluationResult {
    pub fn triggered(confidence: f64, reason: impl Into<String>) -> Self {
        Self {
            should_trigger: true,
            confidence: Some(confidence),
            reason: reason.into(),
        }
    }

    pub fn not_triggered(reason: impl Into<String>) -> Self {
        Self {
            should_trigger: false,
            confidence: None,
            reason: reason.into(),
        }
    }
}
