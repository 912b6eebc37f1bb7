//! Durable retry queue for the safe delivery path.
//!
//! Messages the broker refused are stored as [`RetryEntry`] records in a
//! [`DurableQueue`] until the recovery worker redelivers them. Entries use
//! the layout `<topic bytes> 0x00 <payload bytes>`.

pub mod file;
pub mod memory;

pub use file::FileQueue;
pub use memory::MemoryQueue;

use crate::kafka::OutboundMessage;
use crate::{Error, Result};
use async_trait::async_trait;
use bytes::Bytes;

/// Separates the topic from the payload in an encoded entry.
pub const DELIMITER: u8 = 0x00;

/// Ordered byte queue that survives process restarts.
///
/// One task enqueues and one task dequeues. Implementations must tolerate
/// both running at the same time.
#[async_trait]
pub trait DurableQueue: Send + Sync {
    /// Appends an item at the tail.
    async fn enqueue(&self, item: &[u8]) -> Result<()>;

    /// Removes and returns the oldest item, or `None` when the queue is empty.
    ///
    /// Any error other than emptiness means the queue is unusable.
    async fn dequeue(&self) -> Result<Option<Vec<u8>>>;

    /// Number of items waiting.
    fn len(&self) -> u64;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Flushes and releases the queue. Later calls fail with [`Error::Closed`].
    async fn close(&self) -> Result<()>;
}

/// A message parked for redelivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryEntry {
    pub topic: String,
    pub payload: Bytes,
}

impl RetryEntry {
    /// # Errors
    ///
    /// Returns [`Error::InvalidTopic`] if the topic contains the delimiter.
    pub fn new(topic: impl Into<String>, payload: impl Into<Bytes>) -> Result<Self> {
        let topic = topic.into();
        if topic.as_bytes().contains(&DELIMITER) {
            return Err(Error::InvalidTopic { topic });
        }
        Ok(Self {
            topic,
            payload: payload.into(),
        })
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut raw = Vec::with_capacity(self.topic.len() + 1 + self.payload.len());
        raw.extend_from_slice(self.topic.as_bytes());
        raw.push(DELIMITER);
        raw.extend_from_slice(&self.payload);
        raw
    }

    /// Splits at the first delimiter.
    ///
    /// # Errors
    ///
    /// Returns [`Error::QueueCorrupted`] when there is no delimiter or the
    /// topic is not UTF-8.
    pub fn decode(raw: &[u8]) -> Result<Self> {
        let idx = raw
            .iter()
            .position(|b| *b == DELIMITER)
            .ok_or_else(|| Error::QueueCorrupted {
                message: format!("entry of {} bytes has no topic delimiter", raw.len()),
            })?;

        let topic = std::str::from_utf8(&raw[..idx]).map_err(|e| Error::QueueCorrupted {
            message: format!("entry topic is not UTF-8: {}", e),
        })?;

        Ok(Self {
            topic: topic.to_string(),
            payload: Bytes::copy_from_slice(&raw[idx + 1..]),
        })
    }

    pub fn into_message(self) -> OutboundMessage {
        OutboundMessage::new(self.topic, self.payload)
    }
}
