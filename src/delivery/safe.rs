use crate::kafka::{preview, OutboundMessage, SyncProducer};
use crate::metrics::{Path, TrackerMetrics};
use crate::queue::{DurableQueue, RetryEntry};
use crate::{Error, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// What happens when the broker does not acknowledge a safe message.
#[derive(Clone)]
pub enum SafePolicy {
    /// Return the producer's final error to the caller.
    ProducerRetry,
    /// Park the message in a durable queue and report success.
    DiskQueue(Arc<dyn DurableQueue>),
}

impl std::fmt::Debug for SafePolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SafePolicy::ProducerRetry => f.write_str("ProducerRetry"),
            SafePolicy::DiskQueue(queue) => f
                .debug_struct("DiskQueue")
                .field("len", &queue.len())
                .finish(),
        }
    }
}

/// Acknowledged delivery path.
pub struct SafeChannel {
    producer: Arc<dyn SyncProducer>,
    policy: SafePolicy,
    metrics: Arc<TrackerMetrics>,
    closed: AtomicBool,
}

impl SafeChannel {
    pub fn new(
        producer: Arc<dyn SyncProducer>,
        policy: SafePolicy,
        metrics: Arc<TrackerMetrics>,
    ) -> Self {
        if let SafePolicy::DiskQueue(queue) = &policy {
            metrics.set_queue_depth(queue.len());
        }

        Self {
            producer,
            policy,
            metrics,
            closed: AtomicBool::new(false),
        }
    }

    /// Producer shared with the recovery worker.
    pub fn producer(&self) -> &Arc<dyn SyncProducer> {
        &self.producer
    }

    pub fn policy(&self) -> &SafePolicy {
        &self.policy
    }

    /// Sends and waits for the acknowledgement.
    ///
    /// Under [`SafePolicy::DiskQueue`] a failed delivery is stored for
    /// redelivery without its key and `Ok` is returned once the entry is on
    /// disk.
    ///
    /// # Errors
    ///
    /// - the delivery error under [`SafePolicy::ProducerRetry`]
    /// - [`Error::InvalidTopic`] if a failed message cannot be stored
    /// - the queue error if storing it fails
    /// - [`Error::Closed`] after [`close`](Self::close)
    pub async fn send(&self, message: OutboundMessage) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(Error::Closed);
        }

        self.metrics.record_message(Path::Safe);
        debug!(
            topic = %message.topic,
            payload = %preview(&message.payload),
            "Sending safe message"
        );

        let error = match self.producer.send(&message).await {
            Ok(()) => return Ok(()),
            Err(e) => e,
        };

        self.metrics.record_error(Path::Safe);

        match &self.policy {
            SafePolicy::ProducerRetry => {
                warn!(topic = %message.topic, error = %error, "Safe message delivery failed");
                Err(error)
            }
            SafePolicy::DiskQueue(queue) => {
                let entry = RetryEntry::new(message.topic, message.payload)?;
                queue.enqueue(&entry.encode()).await?;
                self.metrics.set_queue_depth(queue.len());

                warn!(
                    topic = %entry.topic,
                    error = %error,
                    queued = queue.len(),
                    "Safe message delivery failed, queued for redelivery"
                );
                Ok(())
            }
        }
    }

    /// Flushes the producer. The durable queue stays open for its owner to
    /// close. Idempotent.
    pub async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        self.producer.close().await?;
        info!("Closed safe channel");
        Ok(())
    }
}
