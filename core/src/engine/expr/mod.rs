//! Sandboxed predicate expressions
//!
//! A small boolean language evaluated against an environment derived from
//! the event: comparison and arithmetic operators, boolean connectives and a
//! fixed function whitelist. There is deliberately no interpreter behind it;
//! anything outside the grammar is rejected when the expression compiles.

mod lexer;
mod parser;
mod value;

use std::collections::HashMap;

use serde_json::{Map, Value as JsonValue};

use crate::error::{Result, TriggerError};
use crate::models::Event;

pub use value::Value;

#[derive(Debug, Clone, Default)]
pub struct ExpressionEvaluator;

impl ExpressionEvaluator {
    pub fn new() -> Self {
        Self
    }

    /// Evaluate an expression to a boolean against the given environment.
    pub fn evaluate(&self, expression: &str, env: &HashMap<String, Value>) -> Result<bool> {
        let compiled = parser::parse(expression)
            .map_err(|message| TriggerError::expression(expression, message))?;
        let value = compiled
            .eval(env)
            .map_err(|message| TriggerError::expression(expression, message))?;
        Ok(value.truthy())
    }

    /// Evaluate against the environment derived from an event.
    pub fn evaluate_event(&self, expression: &str, event: &Event) -> Result<bool> {
        self.evaluate(expression, &Self::environment(event))
    }

    /// Compile-only check; reports the parse or whitelist error without
    /// evaluating. Unknown identifiers cannot be checked here because they
    /// depend on the event payload.
    pub fn validate(&self, expression: &str) -> std::result::Result<(), String> {
        parser::parse(expression).map(|_| ())
    }

    /// Build the expression environment from an event: `event_type`,
    /// `context_key`, and the payload flattened with `_` separators. Both the
    /// full flattened path and the bare leaf name are bound, so
    /// `stats_profit` and `profit` both resolve.
    pub fn environment(event: &Event) -> HashMap<String, Value> {
        let mut env = HashMap::new();
        env.insert(
            "event_type".to_string(),
            Value::Str(event.event_type.clone()),
        );
        env.insert(
            "context_key".to_string(),
            Value::Str(event.context_key.clone()),
        );
        flatten_into(&mut env, "", &event.data);
        env
    }
}

fn flatten_into(env: &mut HashMap<String, Value>, prefix: &str, data: &Map<String, JsonValue>) {
    for (key, value) in data {
        let path = if prefix.is_empty() {
            key.clone()
        } else {
            format!("{prefix}_{key}")
        };
        match value {
            JsonValue::Object(nested) => flatten_into(env, &path, nested),
            _ => {
                let converted = Value::from_json(value);
                env.insert(path, converted.clone());
                env.insert(key.clone(), converted);
            }
        }
    }
}
