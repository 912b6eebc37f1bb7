use super::Tracker;
use crate::config::{DeliveryPolicy, TrackerConfig};
use crate::delivery::{FastChannel, RecoveryHandle, RecoveryWorker, SafeChannel, SafePolicy, WorkerState};
use crate::encoder::{Encode, Encoder};
use crate::health::{ErrorRateCheck, HealthCheck, DEFAULT_ERROR_RATE_THRESHOLD};
use crate::kafka::{AsyncProducer, KafkaAsyncProducer, KafkaSyncProducer, OutboundMessage, SyncProducer};
use crate::metrics::{Path, TrackerMetrics};
use crate::queue::{DurableQueue, FileQueue};
use crate::{Error, Result};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Pre-built components for [`KafkaTracker::from_parts`].
pub struct TrackerParts {
    pub encoder: Encoder,
    pub fast: Box<dyn AsyncProducer>,
    pub safe: Arc<dyn SyncProducer>,
    pub policy: SafePolicy,
    pub metrics: Arc<TrackerMetrics>,
    pub poll_interval: Duration,
    pub error_rate_threshold: f64,
}

impl TrackerParts {
    /// Parts with fresh metrics, the default poll interval and health threshold.
    pub fn new(
        encoder: Encoder,
        fast: Box<dyn AsyncProducer>,
        safe: Arc<dyn SyncProducer>,
        policy: SafePolicy,
    ) -> Result<Self> {
        Ok(Self {
            encoder,
            fast,
            safe,
            policy,
            metrics: Arc::new(TrackerMetrics::new()?),
            poll_interval: Duration::from_millis(100),
            error_rate_threshold: DEFAULT_ERROR_RATE_THRESHOLD,
        })
    }
}

/// Tracker backed by Kafka.
pub struct KafkaTracker {
    encoder: Encoder,
    fast: FastChannel,
    safe: SafeChannel,
    queue: Option<Arc<dyn DurableQueue>>,
    worker: Option<RecoveryHandle>,
    metrics: Arc<TrackerMetrics>,
    health: ErrorRateCheck,
    closed: bool,
}

impl KafkaTracker {
    /// Creates both producers and, under the disk queue policy, opens the
    /// retry queue and starts the recovery worker.
    ///
    /// # Errors
    ///
    /// Returns `Err` if a producer cannot be created or the queue cannot be
    /// opened.
    pub async fn connect(config: &TrackerConfig) -> Result<Self> {
        let fast = KafkaAsyncProducer::new(&config.kafka, &config.client_id(Path::Fast))?;
        let safe = KafkaSyncProducer::new(&config.kafka, &config.client_id(Path::Safe))?;

        let policy = match config.delivery.policy {
            DeliveryPolicy::ProducerRetry => SafePolicy::ProducerRetry,
            DeliveryPolicy::DiskQueue => {
                let queue = FileQueue::open(config.queue_path()).await?;
                SafePolicy::DiskQueue(Arc::new(queue))
            }
        };

        info!(
            brokers = %config.kafka.brokers.join(","),
            policy = ?config.delivery.policy,
            "Connecting Kafka tracker"
        );

        Ok(Self::from_parts(TrackerParts {
            encoder: Encoder::new(config.metadata.clone()),
            fast: Box::new(fast),
            safe: Arc::new(safe),
            policy,
            metrics: Arc::new(TrackerMetrics::new()?),
            poll_interval: config.delivery.poll_interval(),
            error_rate_threshold: config.health.error_rate_threshold,
        }))
    }

    /// Assembles a tracker from injected components.
    ///
    /// Spawns tasks, so it must be called inside a tokio runtime.
    pub fn from_parts(parts: TrackerParts) -> Self {
        let TrackerParts {
            encoder,
            fast,
            safe,
            policy,
            metrics,
            poll_interval,
            error_rate_threshold,
        } = parts;

        let (queue, worker) = match &policy {
            SafePolicy::DiskQueue(queue) => {
                let worker =
                    RecoveryWorker::new(queue.clone(), safe.clone(), metrics.clone(), poll_interval)
                        .spawn();
                (Some(queue.clone()), Some(worker))
            }
            SafePolicy::ProducerRetry => (None, None),
        };

        Self {
            encoder,
            fast: FastChannel::new(fast, metrics.clone()),
            safe: SafeChannel::new(safe, policy, metrics.clone()),
            queue,
            worker,
            health: ErrorRateCheck::new(metrics.clone(), error_rate_threshold),
            metrics,
            closed: false,
        }
    }

    pub fn metrics(&self) -> &Arc<TrackerMetrics> {
        &self.metrics
    }

    pub fn encoder(&self) -> &Encoder {
        &self.encoder
    }

    /// State of the recovery worker, `None` without a retry queue.
    pub fn worker_state(&self) -> Option<WorkerState> {
        self.worker.as_ref().map(RecoveryHandle::state)
    }

    /// Resolves with the reason once the recovery worker fails. Pending
    /// forever when there is no worker or it never fails.
    pub async fn wait_for_worker_failure(&self) -> String {
        match &self.worker {
            Some(worker) => worker.wait_for_failure().await,
            None => std::future::pending().await,
        }
    }

    fn message(&self, topic: &str, message: &mut (dyn Encode + Send), key: Option<&[u8]>) -> Result<OutboundMessage> {
        let payload = self.encoder.encode(message)?;
        Ok(OutboundMessage::new(topic, payload).with_key(key))
    }
}

impl HealthCheck for KafkaTracker {
    fn check_health(&self) -> Result<()> {
        if let Some(WorkerState::Failed(message)) = self.worker_state() {
            return Err(Error::WorkerFailed { message });
        }
        self.health.check_health()
    }
}

#[async_trait]
impl Tracker for KafkaTracker {
    fn fast_message_with_key(
        &self,
        topic: &str,
        message: &mut (dyn Encode + Send),
        key: Option<&[u8]>,
    ) -> Result<()> {
        let message = self.message(topic, message, key)?;
        self.fast.send(message)
    }

    async fn safe_message_with_key(
        &self,
        topic: &str,
        message: &mut (dyn Encode + Send),
        key: Option<&[u8]>,
    ) -> Result<()> {
        let message = self.message(topic, message, key)?;
        self.safe.send(message).await
    }

    async fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;

        let mut first_error = None;
        let mut keep = |step: &str, result: Result<()>| {
            if let Err(e) = result {
                warn!(step, error = %e, "Error while closing tracker");
                first_error.get_or_insert(e);
            }
        };

        if let Some(worker) = self.worker.as_mut() {
            keep("recovery worker", worker.shutdown().await);
        }
        keep("safe channel", self.safe.close().await);
        keep("fast channel", self.fast.close().await);
        if let Some(queue) = &self.queue {
            keep("retry queue", queue.close().await);
        }

        info!(
            fast_errors = self.metrics.errors(Path::Fast),
            safe_errors = self.metrics.errors(Path::Safe),
            queued = self.queue.as_ref().map_or(0, |q| q.len()),
            "Closed Kafka tracker"
        );

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}
