#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use event_tracker::kafka::{AsyncProducer, DeliveryFailure, OutboundMessage, SyncProducer};
use event_tracker::time::FixedClock;
use event_tracker::{Encoder, Error, EventMetadata, Result};
use parking_lot::Mutex;
use std::env;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

pub fn init_logging() {
    tracing_subscriber::fmt()
        .with_env_filter("event_tracker=debug")
        .with_test_writer()
        .try_init()
        .ok();
}

pub fn test_metadata() -> EventMetadata {
    EventMetadata::new("tracker", "development", "local", "localhost", "master")
}

/// Encoder whose clock is stuck at 1982-04-03T12:00:00Z.
pub fn fixed_encoder() -> Encoder {
    let clock = FixedClock(Utc.with_ymd_and_hms(1982, 4, 3, 12, 0, 0).unwrap());
    Encoder::with_clock(test_metadata(), Arc::new(clock))
}

/// Broker addresses for tests that need a real Kafka.
pub fn test_brokers() -> Vec<String> {
    env::var("TEST_KAFKA_BROKERS")
        .unwrap_or_else(|_| "localhost:9092".to_string())
        .split(',')
        .map(|s| s.trim().to_string())
        .collect()
}

/// In-memory stand-in for a Kafka cluster that can be taken down and
/// brought back.
#[derive(Default)]
pub struct MockBroker {
    down: AtomicBool,
    attempts: AtomicUsize,
    delivered: Mutex<Vec<OutboundMessage>>,
}

impl MockBroker {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_down(&self, down: bool) {
        self.down.store(down, Ordering::SeqCst);
    }

    pub fn is_down(&self) -> bool {
        self.down.load(Ordering::SeqCst)
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    pub fn delivered(&self) -> Vec<OutboundMessage> {
        self.delivered.lock().clone()
    }

    fn accept(&self, message: &OutboundMessage) -> Result<()> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if self.is_down() {
            return Err(Error::Delivery {
                topic: message.topic.clone(),
                message: "all brokers down".to_string(),
            });
        }
        self.delivered.lock().push(message.clone());
        Ok(())
    }
}

/// Fire-and-forget producer. Failures arrive on the failure stream, never
/// from `send`.
pub struct MockAsyncProducer {
    broker: Arc<MockBroker>,
    failures_tx: mpsc::UnboundedSender<DeliveryFailure>,
    failures: Option<mpsc::UnboundedReceiver<DeliveryFailure>>,
}

impl MockAsyncProducer {
    pub fn new(broker: Arc<MockBroker>) -> Self {
        let (failures_tx, failures) = mpsc::unbounded_channel();
        Self {
            broker,
            failures_tx,
            failures: Some(failures),
        }
    }
}

#[async_trait]
impl AsyncProducer for MockAsyncProducer {
    fn send(&self, message: OutboundMessage) -> Result<()> {
        if let Err(e) = self.broker.accept(&message) {
            let _ = self.failures_tx.send(DeliveryFailure {
                topic: message.topic,
                error: e.to_string(),
            });
        }
        Ok(())
    }

    fn take_failures(&mut self) -> Option<mpsc::UnboundedReceiver<DeliveryFailure>> {
        self.failures.take()
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

pub struct MockSyncProducer {
    broker: Arc<MockBroker>,
}

impl MockSyncProducer {
    pub fn new(broker: Arc<MockBroker>) -> Self {
        Self { broker }
    }
}

#[async_trait]
impl SyncProducer for MockSyncProducer {
    async fn send(&self, message: &OutboundMessage) -> Result<()> {
        self.broker.accept(message)
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

/// Polls `condition` every 10ms until it holds or `limit` passes.
pub async fn wait_until<F, Fut>(limit: Duration, mut condition: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + limit;
    while tokio::time::Instant::now() < deadline {
        if condition().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition().await
}
