use super::Tracker;
use crate::encoder::{Encode, Encoder};
use crate::event::EventMetadata;
use crate::health::HealthCheck;
use crate::Result;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;

#[derive(Debug, Clone)]
struct Recorded {
    key: Option<Vec<u8>>,
    payload: Vec<u8>,
}

/// In-memory tracker for tests. Both paths record the encoded payload.
#[derive(Debug)]
pub struct MockTracker {
    encoder: Encoder,
    topics: Mutex<HashMap<String, Vec<Recorded>>>,
}

impl MockTracker {
    pub fn new(metadata: EventMetadata) -> Self {
        Self::with_encoder(Encoder::new(metadata))
    }

    pub fn with_encoder(encoder: Encoder) -> Self {
        Self {
            encoder,
            topics: Mutex::new(HashMap::new()),
        }
    }

    /// Payload of the `idx`th message sent to `topic`.
    pub fn get(&self, topic: &str, idx: usize) -> Option<Vec<u8>> {
        self.topics
            .lock()
            .get(topic)
            .and_then(|messages| messages.get(idx))
            .map(|recorded| recorded.payload.clone())
    }

    /// Key of the `idx`th message sent to `topic`, `None` when unkeyed.
    pub fn get_key(&self, topic: &str, idx: usize) -> Option<Vec<u8>> {
        self.topics
            .lock()
            .get(topic)
            .and_then(|messages| messages.get(idx))
            .and_then(|recorded| recorded.key.clone())
    }

    /// All payloads sent to `topic`, oldest first.
    pub fn messages(&self, topic: &str) -> Vec<Vec<u8>> {
        self.topics
            .lock()
            .get(topic)
            .map(|messages| messages.iter().map(|r| r.payload.clone()).collect())
            .unwrap_or_default()
    }

    fn record(&self, topic: &str, message: &mut (dyn Encode + Send), key: Option<&[u8]>) -> Result<()> {
        let payload = self.encoder.encode(message)?;
        self.topics
            .lock()
            .entry(topic.to_string())
            .or_default()
            .push(Recorded {
                key: key.map(<[u8]>::to_vec),
                payload,
            });
        Ok(())
    }
}

impl HealthCheck for MockTracker {
    fn check_health(&self) -> Result<()> {
        Ok(())
    }
}

#[async_trait]
impl Tracker for MockTracker {
    fn fast_message_with_key(
        &self,
        topic: &str,
        message: &mut (dyn Encode + Send),
        key: Option<&[u8]>,
    ) -> Result<()> {
        self.record(topic, message, key)
    }

    async fn safe_message_with_key(
        &self,
        topic: &str,
        message: &mut (dyn Encode + Send),
        key: Option<&[u8]>,
    ) -> Result<()> {
        self.record(topic, message, key)
    }

    async fn close(&mut self) -> Result<()> {
        Ok(())
    }
}
