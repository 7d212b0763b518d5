//! In-memory [`KvStore`] implementation.
//!
//! TTL-aware and semantically aligned with the Redis commands the engine
//! uses. Backs the test suite and embedded single-process runs; it is not a
//! shared store, so cross-worker coordination only means anything within one
//! process.

use std::collections::{BTreeSet, HashMap, VecDeque};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::{mpsc, Notify};

use super::kv::{KeyTtl, KvStore};
use crate::error::Result;
use crate::models::rule::wildcard_match;

#[derive(Debug, Clone)]
enum ValueKind {
    Str(String),
    List(VecDeque<String>),
    // (score, member), kept sorted
    Zset(Vec<(f64, String)>),
    Set(BTreeSet<String>),
    Hash(HashMap<String, String>),
}

#[derive(Debug, Clone)]
struct Entry {
    value: ValueKind,
    expires_at: Option<Instant>,
}

impl Entry {
    fn expired(&self) -> bool {
        self.expires_at.is_some_and(|at| Instant::now() >= at)
    }
}

#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, Entry>>,
    subscribers: Mutex<HashMap<String, Vec<mpsc::Sender<String>>>>,
    push_signal: Notify,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_entries<T>(&self, f: impl FnOnce(&mut HashMap<String, Entry>) -> T) -> T {
        let mut entries = self.entries.lock();
        entries.retain(|_, entry| !entry.expired());
        f(&mut entries)
    }

    fn insert(&self, key: &str, value: ValueKind, ttl: Option<Duration>) {
        self.with_entries(|entries| {
            entries.insert(
                key.to_string(),
                Entry {
                    value,
                    expires_at: ttl.map(|t| Instant::now() + t),
                },
            );
        });
    }

    fn try_pop_tail(&self, key: &str) -> Option<String> {
        self.with_entries(|entries| {
            let entry = entries.get_mut(key)?;
            let ValueKind::List(list) = &mut entry.value else {
                return None;
            };
            let value = list.pop_back();
            if list.is_empty() {
                entries.remove(key);
            }
            value
        })
    }
}

/// Normalize a possibly-negative rank range against a collection length.
fn rank_range(len: usize, start: i64, stop: i64) -> Option<(usize, usize)> {
    let len = len as i64;
    let mut start = if start < 0 { len + start } else { start };
    let mut stop = if stop < 0 { len + stop } else { stop };
    start = start.max(0);
    stop = stop.min(len - 1);
    if start > stop || len == 0 {
        return None;
    }
    Some((start as usize, stop as usize))
}

#[async_trait]
impl KvStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.with_entries(|entries| match entries.get(key) {
            Some(Entry {
                value: ValueKind::Str(s),
                ..
            }) => Some(s.clone()),
            _ => None,
        }))
    }

    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        self.insert(key, ValueKind::Str(value.to_string()), Some(ttl));
        Ok(())
    }

    async fn set_nx(&self, key: &str, value: &str) -> Result<bool> {
        Ok(self.with_entries(|entries| {
            if entries.contains_key(key) {
                false
            } else {
                entries.insert(
                    key.to_string(),
                    Entry {
                        value: ValueKind::Str(value.to_string()),
                        expires_at: None,
                    },
                );
                true
            }
        }))
    }

    async fn incr(&self, key: &str) -> Result<i64> {
        Ok(self.with_entries(|entries| {
            let current = match entries.get(key) {
                Some(Entry {
                    value: ValueKind::Str(s),
                    ..
                }) => s.parse::<i64>().unwrap_or(0),
                _ => 0,
            };
            let next = current + 1;
            let expires_at = entries.get(key).and_then(|e| e.expires_at);
            entries.insert(
                key.to_string(),
                Entry {
                    value: ValueKind::Str(next.to_string()),
                    expires_at,
                },
            );
            next
        }))
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool> {
        Ok(self.with_entries(|entries| {
            if ttl.is_zero() {
                return entries.remove(key).is_some();
            }
            match entries.get_mut(key) {
                Some(entry) => {
                    entry.expires_at = Some(Instant::now() + ttl);
                    true
                }
                None => false,
            }
        }))
    }

    async fn ttl(&self, key: &str) -> Result<KeyTtl> {
        Ok(self.with_entries(|entries| match entries.get(key) {
            None => KeyTtl::Missing,
            Some(Entry {
                expires_at: None, ..
            }) => KeyTtl::Persistent,
            Some(Entry {
                expires_at: Some(at),
                ..
            }) => KeyTtl::ExpiresIn(at.saturating_duration_since(Instant::now()).as_secs()),
        }))
    }

    async fn del(&self, key: &str) -> Result<()> {
        self.with_entries(|entries| {
            entries.remove(key);
        });
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        Ok(self.with_entries(|entries| entries.contains_key(key)))
    }

    async fn lpush(&self, key: &str, value: &str) -> Result<u64> {
        let len = self.with_entries(|entries| {
            let entry = entries.entry(key.to_string()).or_insert_with(|| Entry {
                value: ValueKind::List(VecDeque::new()),
                expires_at: None,
            });
            if let ValueKind::List(list) = &mut entry.value {
                list.push_front(value.to_string());
                list.len() as u64
            } else {
                entry.value = ValueKind::List(VecDeque::from([value.to_string()]));
                1
            }
        });
        self.push_signal.notify_waiters();
        Ok(len)
    }

    async fn rpush(&self, key: &str, value: &str) -> Result<u64> {
        let len = self.with_entries(|entries| {
            let entry = entries.entry(key.to_string()).or_insert_with(|| Entry {
                value: ValueKind::List(VecDeque::new()),
                expires_at: None,
            });
            if let ValueKind::List(list) = &mut entry.value {
                list.push_back(value.to_string());
                list.len() as u64
            } else {
                entry.value = ValueKind::List(VecDeque::from([value.to_string()]));
                1
            }
        });
        self.push_signal.notify_waiters();
        Ok(len)
    }

    async fn lrange(&self, key: &str, start: i64, stop: i64) -> Result<Vec<String>> {
        Ok(self.with_entries(|entries| match entries.get(key) {
            Some(Entry {
                value: ValueKind::List(list),
                ..
            }) => match rank_range(list.len(), start, stop) {
                Some((lo, hi)) => list.iter().skip(lo).take(hi - lo + 1).cloned().collect(),
                None => Vec::new(),
            },
            _ => Vec::new(),
        }))
    }

    async fn llen(&self, key: &str) -> Result<u64> {
        Ok(self.with_entries(|entries| match entries.get(key) {
            Some(Entry {
                value: ValueKind::List(list),
                ..
            }) => list.len() as u64,
            _ => 0,
        }))
    }

    async fn lindex(&self, key: &str, index: i64) -> Result<Option<String>> {
        Ok(self.with_entries(|entries| match entries.get(key) {
            Some(Entry {
                value: ValueKind::List(list),
                ..
            }) => {
                let idx = if index < 0 {
                    list.len() as i64 + index
                } else {
                    index
                };
                if idx < 0 {
                    None
                } else {
                    list.get(idx as usize).cloned()
                }
            }
            _ => None,
        }))
    }

    async fn brpop(&self, key: &str, timeout: Duration) -> Result<Option<String>> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(value) = self.try_pop_tail(key) {
                return Ok(Some(value));
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Ok(None);
            }
            let _ = tokio::time::timeout(remaining, self.push_signal.notified()).await;
        }
    }

    async fn zadd(&self, key: &str, member: &str, score: f64) -> Result<()> {
        self.with_entries(|entries| {
            let entry = entries.entry(key.to_string()).or_insert_with(|| Entry {
                value: ValueKind::Zset(Vec::new()),
                expires_at: None,
            });
            if let ValueKind::Zset(zset) = &mut entry.value {
                zset.retain(|(_, m)| m != member);
                let pos = zset
                    .iter()
                    .position(|(s, _)| *s > score)
                    .unwrap_or(zset.len());
                zset.insert(pos, (score, member.to_string()));
            } else {
                entry.value = ValueKind::Zset(vec![(score, member.to_string())]);
            }
        });
        Ok(())
    }

    async fn zrange_all(&self, key: &str) -> Result<Vec<String>> {
        Ok(self.with_entries(|entries| match entries.get(key) {
            Some(Entry {
                value: ValueKind::Zset(zset),
                ..
            }) => zset.iter().map(|(_, m)| m.clone()).collect(),
            _ => Vec::new(),
        }))
    }

    async fn zcard(&self, key: &str) -> Result<u64> {
        Ok(self.with_entries(|entries| match entries.get(key) {
            Some(Entry {
                value: ValueKind::Zset(zset),
                ..
            }) => zset.len() as u64,
            _ => 0,
        }))
    }

    async fn zremrangebyrank(&self, key: &str, start: i64, stop: i64) -> Result<u64> {
        Ok(self.with_entries(|entries| {
            let Some(Entry {
                value: ValueKind::Zset(zset),
                ..
            }) = entries.get_mut(key)
            else {
                return 0;
            };
            match rank_range(zset.len(), start, stop) {
                Some((lo, hi)) => {
                    let removed = (hi - lo + 1) as u64;
                    zset.drain(lo..=hi);
                    removed
                }
                None => 0,
            }
        }))
    }

    async fn zremrangebyscore_below(&self, key: &str, cutoff: f64) -> Result<u64> {
        Ok(self.with_entries(|entries| {
            let Some(Entry {
                value: ValueKind::Zset(zset),
                ..
            }) = entries.get_mut(key)
            else {
                return 0;
            };
            let before = zset.len();
            zset.retain(|(score, _)| *score >= cutoff);
            (before - zset.len()) as u64
        }))
    }

    async fn sadd(&self, key: &str, member: &str) -> Result<()> {
        self.with_entries(|entries| {
            let entry = entries.entry(key.to_string()).or_insert_with(|| Entry {
                value: ValueKind::Set(BTreeSet::new()),
                expires_at: None,
            });
            if let ValueKind::Set(set) = &mut entry.value {
                set.insert(member.to_string());
            } else {
                entry.value = ValueKind::Set(BTreeSet::from([member.to_string()]));
            }
        });
        Ok(())
    }

    async fn srem(&self, key: &str, member: &str) -> Result<()> {
        self.with_entries(|entries| {
            if let Some(Entry {
                value: ValueKind::Set(set),
                ..
            }) = entries.get_mut(key)
            {
                set.remove(member);
            }
        });
        Ok(())
    }

    async fn smembers(&self, key: &str) -> Result<Vec<String>> {
        Ok(self.with_entries(|entries| match entries.get(key) {
            Some(Entry {
                value: ValueKind::Set(set),
                ..
            }) => set.iter().cloned().collect(),
            _ => Vec::new(),
        }))
    }

    async fn hset(&self, key: &str, fields: &[(&str, String)]) -> Result<()> {
        self.with_entries(|entries| {
            let entry = entries.entry(key.to_string()).or_insert_with(|| Entry {
                value: ValueKind::Hash(HashMap::new()),
                expires_at: None,
            });
            if !matches!(entry.value, ValueKind::Hash(_)) {
                entry.value = ValueKind::Hash(HashMap::new());
            }
            if let ValueKind::Hash(hash) = &mut entry.value {
                for (field, value) in fields {
                    hash.insert(field.to_string(), value.clone());
                }
            }
        });
        Ok(())
    }

    async fn hget(&self, key: &str, field: &str) -> Result<Option<String>> {
        Ok(self.with_entries(|entries| match entries.get(key) {
            Some(Entry {
                value: ValueKind::Hash(hash),
                ..
            }) => hash.get(field).cloned(),
            _ => None,
        }))
    }

    async fn scan_keys(&self, pattern: &str) -> Result<Vec<String>> {
        Ok(self.with_entries(|entries| {
            entries
                .keys()
                .filter(|key| wildcard_match(pattern, key))
                .cloned()
                .collect()
        }))
    }

    async fn publish(&self, channel: &str, message: &str) -> Result<()> {
        let mut subscribers = self.subscribers.lock();
        if let Some(senders) = subscribers.get_mut(channel) {
            senders.retain(|tx| tx.try_send(message.to_string()).is_ok());
        }
        Ok(())
    }

    async fn subscribe(&self, channel: &str) -> Result<mpsc::Receiver<String>> {
        let (tx, rx) = mpsc::channel(64);
        self.subscribers
            .lock()
            .entry(channel.to_string())
            .or_default()
            .push(tx);
        Ok(rx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn set_nx_only_sets_once() {
        let store = MemoryStore::new();
        assert!(store.set_nx("k", "1").await.unwrap());
        assert!(!store.set_nx("k", "2").await.unwrap());
        assert_eq!(store.get("k").await.unwrap(), Some("1".to_string()));
    }

    #[tokio::test]
    async fn expired_keys_disappear() {
        let store = MemoryStore::new();
        store
            .set_ex("k", "v", Duration::from_millis(10))
            .await
            .unwrap();
        assert!(store.exists("k").await.unwrap());
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!store.exists("k").await.unwrap());
        assert_eq!(store.ttl("k").await.unwrap(), KeyTtl::Missing);
    }

    #[tokio::test]
    async fn zset_orders_by_score() {
        let store = MemoryStore::new();
        store.zadd("z", "b", 2.0).await.unwrap();
        store.zadd("z", "a", 1.0).await.unwrap();
        store.zadd("z", "c", 3.0).await.unwrap();
        assert_eq!(store.zrange_all("z").await.unwrap(), vec!["a", "b", "c"]);
        assert_eq!(store.zcard("z").await.unwrap(), 3);

        // keep only the newest 2
        store.zremrangebyrank("z", 0, -3).await.unwrap();
        assert_eq!(store.zrange_all("z").await.unwrap(), vec!["b", "c"]);
    }

    #[tokio::test]
    async fn list_push_pop_order() {
        let store = MemoryStore::new();
        store.lpush("q", "first").await.unwrap();
        store.lpush("q", "second").await.unwrap();
        // LPUSH + BRPOP = FIFO
        assert_eq!(
            store.brpop("q", Duration::from_millis(10)).await.unwrap(),
            Some("first".to_string())
        );
        assert_eq!(
            store.brpop("q", Duration::from_millis(10)).await.unwrap(),
            Some("second".to_string())
        );
        assert_eq!(
            store.brpop("q", Duration::from_millis(10)).await.unwrap(),
            None
        );
    }

    #[tokio::test]
    async fn brpop_wakes_on_push() {
        let store = Arc::new(MemoryStore::new());
        let waiter = {
            let store = store.clone();
            tokio::spawn(async move { store.brpop("q", Duration::from_secs(5)).await.unwrap() })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        store.lpush("q", "v").await.unwrap();
        assert_eq!(waiter.await.unwrap(), Some("v".to_string()));
    }

    #[tokio::test]
    async fn pubsub_delivers_to_subscribers() {
        let store = MemoryStore::new();
        let mut rx = store.subscribe("chan").await.unwrap();
        store.publish("chan", "hello").await.unwrap();
        assert_eq!(rx.recv().await, Some("hello".to_string()));
    }

    #[tokio::test]
    async fn scan_matches_glob() {
        let store = MemoryStore::new();
        store.lpush("t:mode:batch:r1:k1", "x").await.unwrap();
        store.lpush("t:mode:batch:r2:k2", "x").await.unwrap();
        store.lpush("t:other", "x").await.unwrap();
        let mut keys = store.scan_keys("t:mode:batch:*").await.unwrap();
        keys.sort();
        assert_eq!(keys, vec!["t:mode:batch:r1:k1", "t:mode:batch:r2:k2"]);
    }
}
