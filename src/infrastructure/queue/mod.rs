//! At-least-once message queue consumed by the worker.

use async_trait::async_trait;
use thiserror::Error;

#[cfg(test)]
pub mod memory;
pub mod rabbitmq;

pub type QueueResult<T> = Result<T, QueueError>;

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("Queue transport error: {0}")]
    Transport(String),

    #[error("Message payload is not valid UTF-8")]
    InvalidPayload,
}

impl QueueError {
    pub fn transport(msg: impl Into<String>) -> Self {
        Self::Transport(msg.into())
    }
}

/// A leased message. The worker holds it until it is deleted or released.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueMessage {
    /// Queue-specific handle used to acknowledge or release the lease.
    pub receipt: u64,
    /// Session the receipt belongs to. Receipts from a replaced session can
    /// no longer be settled.
    pub epoch: u64,
    pub payload: Vec<u8>,
    /// Number of times this message has been handed out, this delivery included.
    pub delivery_count: u32,
}

impl QueueMessage {
    pub fn as_text(&self) -> QueueResult<&str> {
        std::str::from_utf8(&self.payload).map_err(|_| QueueError::InvalidPayload)
    }

    /// Payload for log lines, lossy on invalid UTF-8.
    pub fn display_payload(&self) -> String {
        String::from_utf8_lossy(&self.payload).into_owned()
    }
}

#[async_trait]
pub trait MessageQueue: Send + Sync {
    /// Lease one visible message, `None` when the queue is empty.
    async fn poll(&self) -> QueueResult<Option<QueueMessage>>;

    /// Acknowledge the message, removing it for good.
    async fn delete(&self, message: &QueueMessage) -> QueueResult<()>;

    /// Give up the lease so the message is delivered again.
    async fn release(&self, message: &QueueMessage) -> QueueResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_non_utf8_payload() {
        let message = QueueMessage {
            receipt: 1,
            epoch: 0,
            payload: vec![0xff, 0xfe],
            delivery_count: 1,
        };
        assert!(matches!(message.as_text(), Err(QueueError::InvalidPayload)));
        assert_eq!(message.display_payload(), "\u{fffd}\u{fffd}");
    }
}
