//! WeCom (WeChat Work) group robot webhook channel.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tracing::{info, warn};

use super::NotificationChannel;
use crate::config::Settings;
use crate::error::Result;
use crate::models::{NotificationTask, NotifyTarget};

const WEBHOOK_URL: &str = "https://qyapi.weixin.qq.com/cgi-bin/webhook/send";

pub struct WeComChannel {
    http: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct WebhookResponse {
    #[serde(default)]
    errcode: i64,
    #[serde(default)]
    errmsg: String,
}

impl WeComChannel {
    pub fn new(settings: &Settings) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(settings.channel_send_timeout))
            .build()?;
        Ok(Self { http })
    }
}

#[async_trait]
impl NotificationChannel for WeComChannel {
    fn channel_type(&self) -> &'static str {
        "wecom"
    }

    async fn send(&self, target: &NotifyTarget, task: &NotificationTask) -> Result<bool> {
        let Some(webhook_key) = target.webhook_key.as_deref() else {
            warn!(task_id = %task.task_id, "wecom target missing webhook_key");
            return Ok(false);
        };

        let response = self
            .http
            .post(WEBHOOK_URL)
            .query(&[("key", webhook_key)])
            .json(&json!({
                "msgtype": "text",
                "text": {"content": task.message},
            }))
            .send()
            .await?;

        let parsed: WebhookResponse = response.json().await?;
        if parsed.errcode == 0 {
            info!(task_id = %task.task_id, "wecom message sent");
            Ok(true)
        } else {
            warn!(
                task_id = %task.task_id,
                errcode = parsed.errcode,
                errmsg = %parsed.errmsg,
                "wecom send rejected"
            );
            Ok(false)
        }
    }
}
