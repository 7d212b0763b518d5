//! Broker consumer
//!
//! One AMQP channel over an auto-reconnecting connection, prefetch 10,
//! consuming the durable event queue. Each message decodes to an [`Event`]
//! and runs through the handler; malformed messages are acked away, handler
//! failures nack without requeue (redelivery is covered by idempotency, and
//! upstream must not rely on nack). Stop is cooperative via the cancellation
//! token, checked at every iteration boundary.

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use lapin::message::Delivery;
use lapin::options::{
    BasicAckOptions, BasicConsumeOptions, BasicNackOptions, BasicQosOptions, QueueDeclareOptions,
};
use lapin::types::FieldTable;
use lapin::{Connection, ConnectionProperties};
use rand::Rng;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::handler::EventHandler;
use crate::error::{Result, TriggerError};
use crate::models::Event;

const PREFETCH: u16 = 10;
const RECONNECT_DELAY: Duration = Duration::from_secs(5);

pub struct BrokerConsumer {
    url: String,
    queue: String,
    handler: Arc<EventHandler>,
}

impl BrokerConsumer {
    pub fn new(url: impl Into<String>, queue: impl Into<String>, handler: Arc<EventHandler>) -> Self {
        Self {
            url: url.into(),
            queue: queue.into(),
            handler,
        }
    }

    /// Consume until cancelled, reconnecting with jittered backoff on any
    /// connection-level failure.
    pub async fn run(&self, cancel: CancellationToken) {
        while !cancel.is_cancelled() {
            match self.consume(&cancel).await {
                Ok(()) => break,
                Err(error) => {
                    error!(%error, "broker connection lost, reconnecting");
                    let jitter = Duration::from_millis(rand::thread_rng().gen_range(0..1000));
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = tokio::time::sleep(RECONNECT_DELAY + jitter) => {}
                    }
                }
            }
        }
        info!("consumer stopped");
    }

    async fn consume(&self, cancel: &CancellationToken) -> Result<()> {
        let connection = Connection::connect(&self.url, ConnectionProperties::default()).await?;
        let channel = connection.create_channel().await?;
        channel
            .basic_qos(PREFETCH, BasicQosOptions::default())
            .await?;
        channel
            .queue_declare(
                &self.queue,
                QueueDeclareOptions {
                    durable: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await?;

        let mut consumer = channel
            .basic_consume(
                &self.queue,
                "tripwire-worker",
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await?;

        info!(queue = %self.queue, "consuming events");

        loop {
            let delivery = tokio::select! {
                _ = cancel.cancelled() => {
                    info!("consumer stop requested");
                    return Ok(());
                }
                delivery = consumer.next() => delivery,
            };
            let Some(delivery) = delivery else {
                return Err(TriggerError::ConsumerClosed);
            };
            self.process_delivery(delivery?).await;
        }
    }

    async fn process_delivery(&self, delivery: Delivery) {
        match decode_event(&delivery.data) {
            Ok(Some(event)) => {
                debug!(
                    event_id = %event.event_id,
                    event_type = %event.event_type,
                    "received event"
                );
                match self.handler.handle(event).await {
                    Ok(()) => {
                        if let Err(error) = delivery.ack(BasicAckOptions::default()).await {
                            warn!(%error, "ack failed");
                        }
                    }
                    Err(error) => {
                        error!(%error, "event handling failed");
                        let nack = BasicNackOptions {
                            requeue: false,
                            ..Default::default()
                        };
                        if let Err(error) = delivery.nack(nack).await {
                            warn!(%error, "nack failed");
                        }
                    }
                }
            }
            Ok(None) => {
                warn!("message missing event_type, discarding");
                if let Err(error) = delivery.ack(BasicAckOptions::default()).await {
                    warn!(%error, "ack failed");
                }
            }
            Err(error) => {
                error!(%error, "invalid JSON message, discarding");
                if let Err(error) = delivery.ack(BasicAckOptions::default()).await {
                    warn!(%error, "ack failed");
                }
            }
        }
    }
}

/// Decode a broker message body. `Ok(None)` means the required `event_type`
/// is absent; a missing `event_id` falls back to a fresh UUID (such events
/// simply cannot be deduplicated). Unknown fields are ignored.
pub fn decode_event(body: &[u8]) -> serde_json::Result<Option<Event>> {
    let mut value: serde_json::Value = serde_json::from_slice(body)?;
    let Some(object) = value.as_object_mut() else {
        return Ok(None);
    };
    if !object.get("event_type").is_some_and(|v| v.is_string()) {
        return Ok(None);
    }
    if !object.get("event_id").is_some_and(|v| v.is_string()) {
        object.insert(
            "event_id".to_string(),
            serde_json::Value::String(uuid::Uuid::new_v4().to_string()),
        );
    }
    let event: Event = serde_json::from_value(value)?;
    Ok(Some(event.normalized()))
}
