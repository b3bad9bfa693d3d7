use async_trait::async_trait;
use lapin::{
    BasicProperties, Channel, Connection, ConnectionProperties, options::*,
    types::{AMQPValue, FieldTable},
};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::{MessageQueue, QueueError, QueueMessage, QueueResult};

const DELIVERY_COUNT_HEADER: &str = "x-delivery-count";

#[derive(Clone)]
pub struct RabbitMqService {
    url: String,
    queue: String,
    conn: Arc<Mutex<Connection>>,
    channel: Arc<Mutex<Channel>>,
    /// Bumped on every reconnect. Delivery tags are only valid on the
    /// channel that handed them out.
    epoch: Arc<AtomicU64>,
}

impl RabbitMqService {
    async fn connect(url: &str, queue: &str) -> QueueResult<(Connection, Channel)> {
        info!("Connecting to RabbitMQ at {}", url);
        let conn = Connection::connect(url, ConnectionProperties::default())
            .await
            .map_err(|e| QueueError::transport(format!("Failed to connect to RabbitMQ: {}", e)))?;

        let channel = conn
            .create_channel()
            .await
            .map_err(|e| QueueError::transport(format!("Failed to create channel: {}", e)))?;

        // Quorum queues track x-delivery-count, which drives poison detection.
        let mut arguments = FieldTable::default();
        arguments.insert("x-queue-type".into(), AMQPValue::LongString("quorum".into()));

        channel
            .queue_declare(
                queue,
                QueueDeclareOptions {
                    durable: true,
                    ..QueueDeclareOptions::default()
                },
                arguments,
            )
            .await
            .map_err(|e| QueueError::transport(format!("Failed to declare queue: {}", e)))?;

        info!("Connected to RabbitMQ, queue '{}'", queue);
        Ok((conn, channel))
    }

    pub async fn new(url: &str, queue: &str) -> QueueResult<Self> {
        let (conn, channel) = Self::connect(url, queue).await?;

        Ok(Self {
            url: url.to_string(),
            queue: queue.to_string(),
            conn: Arc::new(Mutex::new(conn)),
            channel: Arc::new(Mutex::new(channel)),
            epoch: Arc::new(AtomicU64::new(0)),
        })
    }

    async fn reconnect(&self) -> QueueResult<()> {
        warn!("RabbitMQ connection dropped, reconnecting...");
        let (conn, new_channel) = Self::connect(&self.url, &self.queue).await?;
        *self.conn.lock().await = conn;
        let mut channel = self.channel.lock().await;
        *channel = new_channel;
        self.epoch.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn poll_internal(&self) -> QueueResult<Option<QueueMessage>> {
        let channel = self.channel.lock().await;
        let epoch = self.epoch.load(Ordering::SeqCst);

        // Without no_ack the broker holds the message until ack or nack.
        let fetched = channel
            .basic_get(&self.queue, BasicGetOptions::default())
            .await
            .map_err(|e| QueueError::transport(format!("Failed to get message: {}", e)))?;

        Ok(fetched.map(|message| {
            let delivery = &message.delivery;
            QueueMessage {
                receipt: delivery.delivery_tag,
                epoch,
                delivery_count: delivery_count(&delivery.properties, delivery.redelivered),
                payload: delivery.data.clone(),
            }
        }))
    }

    /// Settles a delivery on the channel it came from. After a failure the
    /// channel is replaced and the broker redelivers the message itself.
    async fn settle(&self, message: &QueueMessage, ack: bool) -> QueueResult<()> {
        let result = {
            let channel = self.channel.lock().await;
            let current = self.epoch.load(Ordering::SeqCst);
            if let Some(outcome) = settle_stale(message, ack, current) {
                return outcome;
            }

            if ack {
                channel
                    .basic_ack(message.receipt, BasicAckOptions::default())
                    .await
            } else {
                channel
                    .basic_nack(
                        message.receipt,
                        BasicNackOptions {
                            multiple: false,
                            requeue: true,
                        },
                    )
                    .await
            }
        };

        if let Err(e) = result {
            let op = if ack { "ack" } else { "nack" };
            warn!("RabbitMQ {} failed: {}", op, e);
            self.reconnect().await?;
            return Err(QueueError::transport(format!("Failed to {} message: {}", op, e)));
        }

        Ok(())
    }
}

/// Outcome for a delivery whose channel has been replaced, `None` when it
/// is still current. The old channel's close already requeued it, so a
/// release is done while an ack cannot succeed anymore.
fn settle_stale(message: &QueueMessage, ack: bool, current_epoch: u64) -> Option<QueueResult<()>> {
    if message.epoch == current_epoch {
        return None;
    }
    if ack {
        Some(Err(QueueError::transport(format!(
            "Delivery {} came from a closed channel and will be redelivered",
            message.receipt
        ))))
    } else {
        debug!("Delivery {} already requeued by channel close", message.receipt);
        Some(Ok(()))
    }
}

#[async_trait]
impl MessageQueue for RabbitMqService {
    async fn poll(&self) -> QueueResult<Option<QueueMessage>> {
        match self.poll_internal().await {
            Ok(message) => Ok(message),
            Err(e) => {
                warn!("RabbitMQ poll failed: {}. Retrying after reconnect.", e);
                self.reconnect().await?;
                self.poll_internal().await
            }
        }
    }

    async fn delete(&self, message: &QueueMessage) -> QueueResult<()> {
        debug!("Acknowledging delivery {}", message.receipt);
        self.settle(message, true).await
    }

    async fn release(&self, message: &QueueMessage) -> QueueResult<()> {
        debug!("Requeueing delivery {}", message.receipt);
        self.settle(message, false).await
    }
}

/// Quorum queues count earlier deliveries in `x-delivery-count`; classic
/// queues only expose the `redelivered` flag.
fn delivery_count(properties: &BasicProperties, redelivered: bool) -> u32 {
    let previous = properties.headers().as_ref().and_then(|headers| {
        headers
            .inner()
            .iter()
            .find(|(key, _)| key.as_str() == DELIVERY_COUNT_HEADER)
            .and_then(|(_, value)| amqp_to_u32(value))
    });

    match previous {
        Some(count) => count.saturating_add(1),
        None if redelivered => 2,
        None => 1,
    }
}

fn amqp_to_u32(value: &AMQPValue) -> Option<u32> {
    let n: i64 = match value {
        AMQPValue::ShortShortInt(v) => i64::from(*v),
        AMQPValue::ShortShortUInt(v) => i64::from(*v),
        AMQPValue::ShortInt(v) => i64::from(*v),
        AMQPValue::ShortUInt(v) => i64::from(*v),
        AMQPValue::LongInt(v) => i64::from(*v),
        AMQPValue::LongUInt(v) => i64::from(*v),
        AMQPValue::LongLongInt(v) => *v,
        _ => return None,
    };
    u32::try_from(n).ok()
}
