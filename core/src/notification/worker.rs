//! Notification worker
//!
//! Drains the notification queue with a blocking pop, fans each task out to
//! its targets' channels, and applies the retry policy: one successful send
//! delivers the task, an all-failure requeues it (with the computed backoff
//! recorded, not enforced) until the retry budget runs out, after which the
//! task moves to the dead-letter list.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::channels::NotificationChannel;
use crate::error::Result;
use crate::models::NotificationTask;
use crate::storage::NotificationQueue;

const POP_TIMEOUT: Duration = Duration::from_secs(5);
const RETRY_BASE_DELAY: Duration = Duration::from_secs(1);

pub struct NotificationWorker {
    queue: NotificationQueue,
    channels: HashMap<&'static str, Arc<dyn NotificationChannel>>,
    max_retry: u32,
}

impl NotificationWorker {
    pub fn new(
        queue: NotificationQueue,
        channels: HashMap<&'static str, Arc<dyn NotificationChannel>>,
        max_retry: u32,
    ) -> Self {
        Self {
            queue,
            channels,
            max_retry,
        }
    }

    /// Process the queue until cancelled, then close the channels.
    pub async fn run(&self, cancel: CancellationToken) {
        info!("notification worker started");
        loop {
            let popped = tokio::select! {
                _ = cancel.cancelled() => break,
                popped = self.queue.dequeue(POP_TIMEOUT) => popped,
            };
            match popped {
                Ok(Some(task)) => self.process(task).await,
                Ok(None) => {}
                Err(error) => {
                    error!(%error, "notification worker dequeue failed");
                    tokio::time::sleep(Duration::from_secs(1)).await;
                }
            }
        }
        for channel in self.channels.values() {
            channel.close().await;
        }
        info!("notification worker stopped");
    }

    /// Fan a task out to its targets and settle its fate.
    pub async fn process(&self, mut task: NotificationTask) {
        debug!(task_id = %task.task_id, "processing notification");

        let mut success = 0u32;
        let mut failed = 0u32;
        for target in &task.targets {
            let Some(channel) = self.channels.get(target.target_type.as_str()) else {
                warn!(channel = %target.target_type, "unknown channel type");
                continue;
            };
            match channel.send(target, &task).await {
                Ok(true) => success += 1,
                Ok(false) => failed += 1,
                Err(error) => {
                    error!(channel = %target.target_type, %error, "channel send error");
                    failed += 1;
                }
            }
        }

        if failed > 0 && success == 0 {
            if task.should_retry(self.max_retry) {
                let delay = task.retry_delay(RETRY_BASE_DELAY);
                task.retry_count += 1;
                task.retry_after = Some(Utc::now());
                match self.queue.enqueue(&task).await {
                    Ok(()) => info!(
                        task_id = %task.task_id,
                        retry_count = task.retry_count,
                        backoff_secs = delay.as_secs(),
                        "notification requeued for retry"
                    ),
                    Err(error) => error!(task_id = %task.task_id, %error, "requeue failed"),
                }
            } else {
                if let Err(error) = self.queue.move_to_dead_letter(&task).await {
                    error!(task_id = %task.task_id, %error, "dead-letter move failed");
                } else {
                    warn!(task_id = %task.task_id, "notification moved to dead letter");
                }
            }
        } else {
            info!(
                task_id = %task.task_id,
                success,
                failed,
                "notification processed"
            );
        }
    }
}
