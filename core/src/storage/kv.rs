//! Key-value store abstraction
//!
//! The narrow waist between the typed namespace accessors and the shared
//! store. The surface mirrors the Redis commands the engine actually uses:
//! strings with TTL, set-if-absent, counters, lists with a blocking pop,
//! sorted sets, sets, hashes, key scans and pub/sub. [`RedisStore`] is the
//! production implementation; [`MemoryStore`] backs tests and embedded runs.
//!
//! [`RedisStore`]: super::redis::RedisStore
//! [`MemoryStore`]: super::memory::MemoryStore

use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::Result;

/// Remaining lifetime of a key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyTtl {
    /// Key does not exist
    Missing,
    /// Key exists without an expiry
    Persistent,
    /// Key expires after this many whole seconds
    ExpiresIn(u64),
}

#[async_trait]
pub trait KvStore: Send + Sync {
    // Strings / counters

    async fn get(&self, key: &str) -> Result<Option<String>>;
    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<()>;
    /// Set only if absent; returns true when the key was newly created.
    async fn set_nx(&self, key: &str, value: &str) -> Result<bool>;
    async fn incr(&self, key: &str) -> Result<i64>;
    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool>;
    async fn ttl(&self, key: &str) -> Result<KeyTtl>;
    async fn del(&self, key: &str) -> Result<()>;
    async fn exists(&self, key: &str) -> Result<bool>;

    // Lists

    async fn lpush(&self, key: &str, value: &str) -> Result<u64>;
    async fn rpush(&self, key: &str, value: &str) -> Result<u64>;
    async fn lrange(&self, key: &str, start: i64, stop: i64) -> Result<Vec<String>>;
    async fn llen(&self, key: &str) -> Result<u64>;
    async fn lindex(&self, key: &str, index: i64) -> Result<Option<String>>;
    /// Blocking pop from the tail; returns None on timeout.
    async fn brpop(&self, key: &str, timeout: Duration) -> Result<Option<String>>;

    // Sorted sets (score = timestamp-ms for context windows)

    async fn zadd(&self, key: &str, member: &str, score: f64) -> Result<()>;
    async fn zrange_all(&self, key: &str) -> Result<Vec<String>>;
    async fn zcard(&self, key: &str) -> Result<u64>;
    /// Remove members by rank range (negative indices count from the tail).
    async fn zremrangebyrank(&self, key: &str, start: i64, stop: i64) -> Result<u64>;
    /// Remove members with a score strictly below `cutoff`.
    async fn zremrangebyscore_below(&self, key: &str, cutoff: f64) -> Result<u64>;

    // Sets

    async fn sadd(&self, key: &str, member: &str) -> Result<()>;
    async fn srem(&self, key: &str, member: &str) -> Result<()>;
    async fn smembers(&self, key: &str) -> Result<Vec<String>>;

    // Hashes

    async fn hset(&self, key: &str, fields: &[(&str, String)]) -> Result<()>;
    async fn hget(&self, key: &str, field: &str) -> Result<Option<String>>;

    // Keyspace

    /// Collect keys matching a `*` glob pattern. Used by the batch sweeper;
    /// patterns are narrow enough that a full scan is acceptable.
    async fn scan_keys(&self, pattern: &str) -> Result<Vec<String>>;

    // Pub/sub

    async fn publish(&self, channel: &str, message: &str) -> Result<()>;
    /// Subscribe to a channel; messages arrive on the returned receiver
    /// until it is dropped.
    async fn subscribe(&self, channel: &str) -> Result<mpsc::Receiver<String>>;
}
