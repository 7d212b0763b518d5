//! Notification channel transports.
//!
//! A channel is one outbound transport with a uniform contract: look it up
//! by `channel_type`, hand it a target and a task, get back whether the send
//! landed. Unknown target types are the caller's problem (logged, skipped).

pub mod telegram;
pub mod wecom;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::config::Settings;
use crate::error::Result;
use crate::models::{NotificationTask, NotifyTarget};

pub use telegram::TelegramChannel;
pub use wecom::WeComChannel;

#[async_trait]
pub trait NotificationChannel: Send + Sync {
    /// Identifier matched against `NotifyTarget::target_type`.
    fn channel_type(&self) -> &'static str;

    /// Deliver the task's message to one target. `Ok(false)` means the
    /// channel declined (misconfigured target, rejected by the provider);
    /// `Err` means the transport itself failed.
    async fn send(&self, target: &NotifyTarget, task: &NotificationTask) -> Result<bool>;

    /// Release any transport resources.
    async fn close(&self) {}
}

/// Build the default channel registry from settings.
pub fn default_channels(
    settings: &Settings,
) -> Result<HashMap<&'static str, Arc<dyn NotificationChannel>>> {
    let mut channels: HashMap<&'static str, Arc<dyn NotificationChannel>> = HashMap::new();
    let telegram = TelegramChannel::new(settings)?;
    channels.insert(telegram.channel_type(), Arc::new(telegram));
    let wecom = WeComChannel::new(settings)?;
    channels.insert(wecom.channel_type(), Arc::new(wecom));
    Ok(channels)
}
