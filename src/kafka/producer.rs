use crate::config::KafkaConfig;
use crate::event::EventMetadata;
use crate::kafka::message::{DeliveryFailure, OutboundMessage};
use crate::metrics::Path;
use crate::{Error, Result};
use async_trait::async_trait;
use rdkafka::client::ClientContext;
use rdkafka::producer::{
    BaseRecord, DeliveryResult, FutureProducer, FutureRecord, Producer, ProducerContext,
    ThreadedProducer,
};
use rdkafka::error::KafkaResult;
use rdkafka::util::Timeout;
use rdkafka::{ClientConfig, Message};
use std::io;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info};

const FLUSH_TIMEOUT: Duration = Duration::from_secs(10);

/// Fire-and-forget producer.
///
/// `send` only enqueues. Broker failures arrive later on the stream handed
/// out once by `take_failures`.
#[async_trait]
pub trait AsyncProducer: Send + Sync {
    fn send(&self, message: OutboundMessage) -> Result<()>;

    fn take_failures(&mut self) -> Option<mpsc::UnboundedReceiver<DeliveryFailure>>;

    /// Flushes outstanding messages and releases the producer.
    async fn close(&self) -> Result<()>;
}

/// Producer that waits for the broker acknowledgement.
#[async_trait]
pub trait SyncProducer: Send + Sync {
    async fn send(&self, message: &OutboundMessage) -> Result<()>;

    async fn close(&self) -> Result<()>;
}

/// Builds the client id `tracker.<path>-<env>-<cluster>-<host>-<service>`.
pub fn client_id(path: Path, metadata: &EventMetadata) -> String {
    format!(
        "tracker.{}-{}-{}-{}-{}",
        path.as_str(),
        metadata.environment,
        metadata.cluster,
        metadata.host,
        metadata.service
    )
}

/// Runs a librdkafka flush on the blocking pool. `flush` waits on the
/// broker for up to [`FLUSH_TIMEOUT`] and must not hold a runtime thread.
pub(crate) async fn flush_blocking<F>(flush: F) -> Result<()>
where
    F: FnOnce() -> KafkaResult<()> + Send + 'static,
{
    tokio::task::spawn_blocking(flush)
        .await
        .map_err(|e| Error::Io(io::Error::new(io::ErrorKind::Other, e)))?
        .map_err(Error::Kafka)
}

fn base_config(config: &KafkaConfig, client_id: &str) -> ClientConfig {
    let mut client_config = ClientConfig::new();
    client_config
        .set("bootstrap.servers", config.brokers.join(","))
        .set("client.id", client_id)
        .set("compression.type", &config.compression)
        .set("message.timeout.ms", config.message_timeout_ms.to_string());
    client_config
}

/// Forwards delivery failures from librdkafka's callback thread.
pub struct FailureForwarder {
    failures: mpsc::UnboundedSender<DeliveryFailure>,
}

impl ClientContext for FailureForwarder {}

impl ProducerContext for FailureForwarder {
    type DeliveryOpaque = ();

    fn delivery(&self, delivery_result: &DeliveryResult<'_>, _delivery_opaque: Self::DeliveryOpaque) {
        if let Err((error, message)) = delivery_result {
            let failure = DeliveryFailure {
                topic: message.topic().to_string(),
                error: error.to_string(),
            };
            if self.failures.send(failure).is_err() {
                debug!("Failure stream closed, dropping delivery report");
            }
        }
    }
}

pub struct KafkaAsyncProducer {
    producer: Arc<ThreadedProducer<FailureForwarder>>,
    failures: Option<mpsc::UnboundedReceiver<DeliveryFailure>>,
}

impl KafkaAsyncProducer {
    pub fn new(config: &KafkaConfig, client_id: &str) -> Result<Self> {
        let (tx, rx) = mpsc::unbounded_channel();

        let producer: ThreadedProducer<FailureForwarder> = base_config(config, client_id)
            .set("acks", config.fast_acks.as_str())
            .set(
                "queue.buffering.max.messages",
                config.channel_buffer_size.to_string(),
            )
            .set("linger.ms", config.linger_ms.to_string())
            .create_with_context(FailureForwarder { failures: tx })
            .map_err(Error::Kafka)?;

        info!(client_id, "Created fast producer");

        Ok(Self {
            producer: Arc::new(producer),
            failures: Some(rx),
        })
    }
}

#[async_trait]
impl AsyncProducer for KafkaAsyncProducer {
    fn send(&self, message: OutboundMessage) -> Result<()> {
        let mut record = BaseRecord::<[u8], [u8]>::to(&message.topic);
        if !message.is_tombstone() {
            record = record.payload(&message.payload[..]);
        }
        if let Some(key) = message.key.as_deref() {
            record = record.key(key);
        }

        self.producer.send(record).map_err(|(e, _)| Error::Kafka(e))
    }

    fn take_failures(&mut self) -> Option<mpsc::UnboundedReceiver<DeliveryFailure>> {
        self.failures.take()
    }

    async fn close(&self) -> Result<()> {
        let producer = Arc::clone(&self.producer);
        flush_blocking(move || producer.flush(Timeout::After(FLUSH_TIMEOUT))).await
    }
}

pub struct KafkaSyncProducer {
    producer: FutureProducer,
}

impl KafkaSyncProducer {
    pub fn new(config: &KafkaConfig, client_id: &str) -> Result<Self> {
        let producer: FutureProducer = base_config(config, client_id)
            .set("acks", config.safe_acks.as_str())
            .set("message.send.max.retries", config.retries.to_string())
            .set("retry.backoff.ms", config.retry_backoff_ms.to_string())
            .create()
            .map_err(Error::Kafka)?;

        info!(client_id, "Created safe producer");

        Ok(Self { producer })
    }
}

#[async_trait]
impl SyncProducer for KafkaSyncProducer {
    async fn send(&self, message: &OutboundMessage) -> Result<()> {
        let mut record = FutureRecord::<[u8], [u8]>::to(&message.topic);
        if !message.is_tombstone() {
            record = record.payload(&message.payload[..]);
        }
        if let Some(key) = message.key.as_deref() {
            record = record.key(key);
        }

        self.producer
            .send(record, Timeout::Never)
            .await
            .map(|_| ())
            .map_err(|(e, _)| Error::Kafka(e))
    }

    async fn close(&self) -> Result<()> {
        let producer = self.producer.clone();
        flush_blocking(move || producer.flush(Timeout::After(FLUSH_TIMEOUT))).await
    }
}
