//! Parsing of LLM responses into structured decisions.
//!
//! The model is instructed to answer with a single JSON object, but smaller
//! models wrap it in prose or fences; the first brace-delimited object is
//! extracted. Anything unparseable degrades to a safe non-trigger.

use std::sync::OnceLock;

use regex::Regex;
use serde_json::Value;
use tracing::warn;

/// A structured trigger decision from the model.
#[derive(Debug, Clone, PartialEq)]
pub struct LlmDecision {
    pub should_trigger: bool,
    pub confidence: f64,
    pub reason: String,
}

fn json_object_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"(?s)\{[^{}]*\}").expect("static regex"))
}

/// Parse a raw LLM response. Falls back to a non-trigger on any shape error.
pub fn parse_llm_response(response: &str) -> LlmDecision {
    let Some(json_match) = json_object_pattern().find(response) else {
        warn!(
            response = %truncate(response, 200),
            "no JSON found in LLM response"
        );
        return fallback("No JSON found in response");
    };

    let data: Value = match serde_json::from_str(json_match.as_str()) {
        Ok(data) => data,
        Err(error) => {
            warn!(%error, "JSON parse error in LLM response");
            return fallback(&format!("JSON parse error: {error}"));
        }
    };

    let should_trigger = match data.get("should_trigger") {
        Some(Value::Bool(b)) => *b,
        Some(Value::String(s)) => s.eq_ignore_ascii_case("true"),
        _ => false,
    };
    let confidence = data
        .get("confidence")
        .and_then(Value::as_f64)
        .unwrap_or(0.0)
        .clamp(0.0, 1.0);
    let reason = data
        .get("reason")
        .and_then(Value::as_str)
        .unwrap_or("No reason provided")
        .to_string();

    LlmDecision {
        should_trigger,
        confidence,
        reason,
    }
}

fn fallback(reason: &str) -> LlmDecision {
    LlmDecision {
        should_trigger: false,
        confidence: 0.0,
        reason: format!("Fallback decision: {reason}"),
    }
}

fn truncate(text: &str, limit: usize) -> String {
    text.chars().take(limit).collect()
}
