//! Notification queue and dead-letter list.

use std::sync::Arc;
use std::time::Duration;

use super::keys::KeySpace;
use super::kv::KvStore;
use crate::error::Result;
use crate::models::NotificationTask;

#[derive(Clone)]
pub struct NotificationQueue {
    kv: Arc<dyn KvStore>,
    keys: KeySpace,
}

impl NotificationQueue {
    pub fn new(kv: Arc<dyn KvStore>, keys: KeySpace) -> Self {
        Self { kv, keys }
    }

    pub async fn enqueue(&self, task: &NotificationTask) -> Result<()> {
        let raw = serde_json::to_string(task)?;
        self.kv.lpush(&self.keys.notify_queue(), &raw).await?;
        Ok(())
    }

    /// Blocking pop; returns None on timeout.
    pub async fn dequeue(&self, timeout: Duration) -> Result<Option<NotificationTask>> {
        match self.kv.brpop(&self.keys.notify_queue(), timeout).await? {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    pub async fn move_to_dead_letter(&self, task: &NotificationTask) -> Result<()> {
        let raw = serde_json::to_string(task)?;
        self.kv.lpush(&self.keys.notify_dead_letter(), &raw).await?;
        Ok(())
    }

    pub async fn len(&self) -> Result<u64> {
        self.kv.llen(&self.keys.notify_queue()).await
    }

    pub async fn dead_letter_len(&self) -> Result<u64> {
        self.kv.llen(&self.keys.notify_dead_letter()).await
    }
}
