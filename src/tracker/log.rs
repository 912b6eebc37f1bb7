use super::Tracker;
use crate::encoder::{Encode, Encoder};
use crate::event::EventMetadata;
use crate::health::HealthCheck;
use crate::kafka::preview;
use crate::Result;
use async_trait::async_trait;
use tracing::info;

/// Tracker that writes every message to the log instead of a broker.
#[derive(Debug)]
pub struct LogTracker {
    name: String,
    encoder: Encoder,
}

impl LogTracker {
    pub fn new(name: impl Into<String>, metadata: EventMetadata) -> Self {
        Self::with_encoder(name, Encoder::new(metadata))
    }

    pub fn with_encoder(name: impl Into<String>, encoder: Encoder) -> Self {
        Self {
            name: name.into(),
            encoder,
        }
    }

    fn log(&self, path: &str, topic: &str, message: &mut (dyn Encode + Send), key: Option<&[u8]>) -> Result<()> {
        let payload = self.encoder.encode(message)?;
        info!(
            tracker = %self.name,
            path,
            topic,
            key = key.map(preview).as_deref().unwrap_or(""),
            message = %preview(&payload),
            "Tracked message"
        );
        Ok(())
    }
}

impl HealthCheck for LogTracker {
    fn check_health(&self) -> Result<()> {
        Ok(())
    }
}

#[async_trait]
impl Tracker for LogTracker {
    fn fast_message_with_key(
        &self,
        topic: &str,
        message: &mut (dyn Encode + Send),
        key: Option<&[u8]>,
    ) -> Result<()> {
        self.log("fast", topic, message, key)
    }

    async fn safe_message_with_key(
        &self,
        topic: &str,
        message: &mut (dyn Encode + Send),
        key: Option<&[u8]>,
    ) -> Result<()> {
        self.log("safe", topic, message, key)
    }

    async fn close(&mut self) -> Result<()> {
        Ok(())
    }
}
