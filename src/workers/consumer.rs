use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::settings::WorkerConfig;
use crate::infrastructure::queue::QueueMessage;
use crate::modules::clip::error::{FaultKind, JobFailure};
use crate::modules::clip::model::JobReport;
use crate::modules::clip::service::JobProcessor;

/// Result of one poll of the queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    /// Nothing to do.
    Idle,
    Completed(JobReport),
    /// The job failed and the message was left for redelivery.
    RetryPending { kind: FaultKind, delivery_count: u32 },
    /// The job failed past the poison threshold and the message was deleted.
    Discarded { payload: String, delivery_count: u32 },
    /// The queue itself could not be polled.
    QueueUnavailable,
}

/// Single-consumer loop: one message in flight at a time.
pub struct QueueConsumer {
    processor: JobProcessor,
    poll_idle: Duration,
    fault_backoff: Duration,
    poison_threshold: u32,
}

impl QueueConsumer {
    pub fn new(processor: JobProcessor, config: &WorkerConfig) -> Self {
        Self {
            processor,
            poll_idle: config.poll_idle,
            fault_backoff: config.fault_backoff,
            poison_threshold: config.poison_threshold,
        }
    }

    /// Polls until `shutdown` is cancelled. Sleeps wake on cancellation and a
    /// running transcode is killed; other job steps finish first.
    pub async fn run(&self, shutdown: CancellationToken) {
        info!("🎥 Clip worker is running");

        while !shutdown.is_cancelled() {
            let outcome = self.poll_once(&shutdown).await;

            if let Some(pause) = self.pause_after(&outcome) {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = tokio::time::sleep(pause) => {}
                }
            }
        }

        info!("Clip worker is stopping");
    }

    pub async fn poll_once(&self, shutdown: &CancellationToken) -> PollOutcome {
        let message = match self.processor.queue().poll().await {
            Ok(Some(message)) => message,
            Ok(None) => return PollOutcome::Idle,
            Err(e) => {
                error!("Exception in clip worker while polling: {}", e);
                return PollOutcome::QueueUnavailable;
            }
        };

        match self.processor.process(&message, shutdown).await {
            Ok(report) => PollOutcome::Completed(report),
            Err(failure) => self.handle_failure(&message, failure).await,
        }
    }

    pub fn pause_after(&self, outcome: &PollOutcome) -> Option<Duration> {
        match outcome {
            PollOutcome::Completed(_) => None,
            PollOutcome::Idle => Some(self.poll_idle),
            PollOutcome::RetryPending { .. }
            | PollOutcome::Discarded { .. }
            | PollOutcome::QueueUnavailable => Some(self.fault_backoff),
        }
    }

    async fn handle_failure(&self, message: &QueueMessage, failure: JobFailure) -> PollOutcome {
        let kind = failure.kind();
        let delivery_count = message.delivery_count;
        error!(
            state = %failure.state,
            kind = %kind,
            delivery = delivery_count,
            "Exception in clip worker: {}",
            failure.error
        );

        let queue = self.processor.queue();

        if failure.error.is_shutdown() {
            // Not a processing fault, so it never counts towards poisoning.
            if let Err(e) = queue.release(message).await {
                warn!("Failed to release message on shutdown: {}", e);
            }
            info!(delivery = delivery_count, "Message released on shutdown");
            return PollOutcome::RetryPending {
                kind,
                delivery_count,
            };
        }

        if delivery_count > self.poison_threshold {
            let payload = message.display_payload();
            match queue.delete(message).await {
                Ok(()) => {
                    error!("Deleting poison queue item: '{}'", payload);
                    return PollOutcome::Discarded {
                        payload,
                        delivery_count,
                    };
                }
                Err(e) => {
                    error!("Failed to delete poison queue item '{}': {}", payload, e);
                }
            }
        } else if let Err(e) = queue.release(message).await {
            // The lease still runs out, so the message comes back regardless.
            warn!("Failed to release message, leaving it to lease expiry: {}", e);
        }

        warn!(
            kind = %kind,
            delivery = delivery_count,
            "Message left for redelivery"
        );
        PollOutcome::RetryPending {
            kind,
            delivery_count,
        }
    }
}
