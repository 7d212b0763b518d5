//! Domain models: events, rules and notification tasks.

pub mod event;
pub mod notification;
pub mod rule;

pub use event::{ContextEntry, Event};
pub use notification::NotificationTask;
pub use rule::{
    LlmRuleConfig, NotifyPolicy, NotifyTarget, PreFilter, RateLimit, Rule, RuleConfig,
    RuleMetadata, RuleType, TriggerMode,
};
