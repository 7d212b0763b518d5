//! Structured error types for tripwire
//!
//! One error enum for the whole engine: transport failures from the store,
//! broker and HTTP layers wrap their source errors, while domain failures
//! (bad expressions, bad rule configs) carry enough context to be surfaced
//! to the rule author.

use thiserror::Error;

/// Primary error type for tripwire operations
#[derive(Error, Debug)]
pub enum TriggerError {
    /// Key-value store failure (connection, protocol, timeout)
    #[error("storage error: {0}")]
    Storage(#[from] redis::RedisError),

    /// Message broker failure (connection, channel, consume)
    #[error("broker error: {0}")]
    Broker(#[from] lapin::Error),

    /// The broker closed the consume stream without an error
    #[error("consumer stream closed")]
    ConsumerClosed,

    /// HTTP transport failure (LLM backend or notification channel)
    #[error("http transport error: {0}")]
    Http(#[from] reqwest::Error),

    /// LLM backend returned an unusable response
    #[error("llm error: {message}")]
    Llm { message: String },

    /// Expression could not be compiled or evaluated
    #[error("invalid expression '{expression}': {message}")]
    Expression { expression: String, message: String },

    /// Rule configuration violates a type invariant
    #[error("invalid rule '{rule_id}': {message}")]
    InvalidRule { rule_id: String, message: String },

    /// Rule does not exist in the store
    #[error("rule not found: {0}")]
    RuleNotFound(String),

    /// Payload could not be serialized or deserialized
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Configuration could not be loaded
    #[error("configuration error: {0}")]
    Config(#[from] config::ConfigError),
}

impl TriggerError {
    pub fn llm(message: impl Into<String>) -> Self {
        Self::Llm {
            message: message.into(),
        }
    }

    pub fn expression(expression: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Expression {
            expression: expression.into(),
            message: message.into(),
        }
    }

    pub fn invalid_rule(rule_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidRule {
            rule_id: rule_id.into(),
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, TriggerError>;
