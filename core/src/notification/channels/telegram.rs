//! Telegram Bot API channel.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tracing::{info, warn};

use super::NotificationChannel;
use crate::config::Settings;
use crate::error::Result;
use crate::models::{NotificationTask, NotifyTarget};

pub struct TelegramChannel {
    http: reqwest::Client,
    token: String,
}

#[derive(Debug, Deserialize)]
struct SendMessageResponse {
    ok: bool,
    #[serde(default)]
    description: Option<String>,
}

impl TelegramChannel {
    pub fn new(settings: &Settings) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(settings.channel_send_timeout))
            .build()?;
        Ok(Self {
            http,
            token: settings.telegram_bot_token.clone(),
        })
    }
}

#[async_trait]
impl NotificationChannel for TelegramChannel {
    fn channel_type(&self) -> &'static str {
        "telegram"
    }

    async fn send(&self, target: &NotifyTarget, task: &NotificationTask) -> Result<bool> {
        if self.token.is_empty() {
            warn!("telegram bot not configured");
            return Ok(false);
        }
        let Some(chat_id) = target.chat_id.as_deref().or(target.user_id.as_deref()) else {
            warn!(task_id = %task.task_id, "telegram target missing chat_id/user_id");
            return Ok(false);
        };

        let url = format!("https://api.telegram.org/bot{}/sendMessage", self.token);
        let response = self
            .http
            .post(&url)
            .json(&json!({
                "chat_id": chat_id,
                "text": task.message,
            }))
            .send()
            .await?;

        let parsed: SendMessageResponse = response.json().await?;
        if parsed.ok {
            info!(chat_id, task_id = %task.task_id, "telegram message sent");
            Ok(true)
        } else {
            warn!(
                chat_id,
                task_id = %task.task_id,
                description = parsed.description.as_deref().unwrap_or("unknown"),
                "telegram send rejected"
            );
            Ok(false)
        }
    }
}
