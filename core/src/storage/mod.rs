//! Storage layer: typed accessors over the shared key-value store.
//!
//! All mutable state lives behind [`KvStore`]; worker processes themselves
//! are stateless. Cross-worker coordination uses set-if-absent with expiry
//! (advisory locks) only.

pub mod cache;
pub mod context;
pub mod idempotency;
pub mod keys;
pub mod kv;
pub mod limits;
pub mod memory;
pub mod queue;
pub mod redis;
pub mod rules;

pub use cache::{CachedDecision, LlmCacheStore};
pub use context::ContextStore;
pub use idempotency::IdempotencyStore;
pub use keys::KeySpace;
pub use kv::{KeyTtl, KvStore};
pub use limits::{DedupStore, RateStore};
pub use memory::MemoryStore;
pub use queue::NotificationQueue;
pub use self::redis::RedisStore;
pub use rules::{RuleCache, RuleChange, RuleStore};
