//! Event publisher for test traffic and producer tooling.

use lapin::options::{BasicPublishOptions, QueueDeclareOptions};
use lapin::types::FieldTable;
use lapin::{BasicProperties, Connection, ConnectionProperties};
use tracing::info;

use crate::error::Result;

/// Publish one persistent JSON event to the durable event queue.
pub async fn publish_event(url: &str, queue: &str, payload: &serde_json::Value) -> Result<()> {
    let connection = Connection::connect(url, ConnectionProperties::default()).await?;
    let channel = connection.create_channel().await?;
    channel
        .queue_declare(
            queue,
            QueueDeclareOptions {
                durable: true,
                ..Default::default()
            },
            FieldTable::default(),
        )
        .await?;

    let body = serde_json::to_vec(payload)?;
    channel
        .basic_publish(
            "",
            queue,
            BasicPublishOptions::default(),
            &body,
            BasicProperties::default().with_delivery_mode(2),
        )
        .await?
        .await?;

    info!(queue, "event published");
    connection.close(200, "bye").await?;
    Ok(())
}
