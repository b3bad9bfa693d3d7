use async_trait::async_trait;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use super::{MessageQueue, QueueError, QueueMessage, QueueResult};

struct Entry {
    receipt: u64,
    payload: Vec<u8>,
    delivery_count: u32,
    invisible_until: Option<Instant>,
}

/// Visibility-lease queue held in memory.
pub struct MemoryQueue {
    entries: Mutex<Vec<Entry>>,
    next_receipt: Mutex<u64>,
    lease: Duration,
    fail_transport: AtomicBool,
}

impl MemoryQueue {
    pub fn new(lease: Duration) -> Self {
        Self {
            entries: Mutex::new(Vec::new()),
            next_receipt: Mutex::new(1),
            lease,
            fail_transport: AtomicBool::new(false),
        }
    }

    pub fn enqueue(&self, payload: &str) -> u64 {
        let mut next = self.next_receipt.lock().unwrap();
        let receipt = *next;
        *next += 1;
        self.entries.lock().unwrap().push(Entry {
            receipt,
            payload: payload.as_bytes().to_vec(),
            delivery_count: 0,
            invisible_until: None,
        });
        receipt
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    pub fn delivery_count(&self, receipt: u64) -> Option<u32> {
        self.entries
            .lock()
            .unwrap()
            .iter()
            .find(|e| e.receipt == receipt)
            .map(|e| e.delivery_count)
    }

    pub fn set_fail_transport(&self, fail: bool) {
        self.fail_transport.store(fail, Ordering::SeqCst);
    }

    fn check_transport(&self) -> QueueResult<()> {
        if self.fail_transport.load(Ordering::SeqCst) {
            return Err(QueueError::transport("queue service unavailable"));
        }
        Ok(())
    }
}

#[async_trait]
impl MessageQueue for MemoryQueue {
    async fn poll(&self) -> QueueResult<Option<QueueMessage>> {
        self.check_transport()?;
        let now = Instant::now();
        let mut entries = self.entries.lock().unwrap();

        let visible = entries
            .iter_mut()
            .find(|e| e.invisible_until.is_none_or(|until| until <= now));

        Ok(visible.map(|entry| {
            entry.delivery_count += 1;
            entry.invisible_until = Some(now + self.lease);
            QueueMessage {
                receipt: entry.receipt,
                epoch: 0,
                payload: entry.payload.clone(),
                delivery_count: entry.delivery_count,
            }
        }))
    }

    async fn delete(&self, message: &QueueMessage) -> QueueResult<()> {
        self.check_transport()?;
        self.entries
            .lock()
            .unwrap()
            .retain(|e| e.receipt != message.receipt);
        Ok(())
    }

    async fn release(&self, message: &QueueMessage) -> QueueResult<()> {
        self.check_transport()?;
        if let Some(entry) = self
            .entries
            .lock()
            .unwrap()
            .iter_mut()
            .find(|e| e.receipt == message.receipt)
        {
            entry.invisible_until = None;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn leased_message_is_hidden_until_released() {
        let queue = MemoryQueue::new(Duration::from_secs(60));
        queue.enqueue("in/abc.mp4");

        let first = queue.poll().await.unwrap().unwrap();
        assert_eq!(first.delivery_count, 1);
        assert!(queue.poll().await.unwrap().is_none());

        tokio_test::assert_ok!(queue.release(&first).await);
        let second = queue.poll().await.unwrap().unwrap();
        assert_eq!(second.receipt, first.receipt);
        assert_eq!(second.delivery_count, 2);
    }

    #[tokio::test]
    async fn expired_lease_makes_message_visible_again() {
        let queue = MemoryQueue::new(Duration::ZERO);
        queue.enqueue("in/abc.mp4");

        queue.poll().await.unwrap().unwrap();
        let again = queue.poll().await.unwrap().unwrap();
        assert_eq!(again.delivery_count, 2);
    }
}
