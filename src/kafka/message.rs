use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use bytes::Bytes;
use std::borrow::Cow;

/// A single message bound for a topic.
///
/// An empty payload is produced as a null value, which Kafka treats as a
/// tombstone on compacted topics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundMessage {
    pub topic: String,
    pub payload: Bytes,
    pub key: Option<Bytes>,
}

impl OutboundMessage {
    pub fn new(topic: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
            key: None,
        }
    }

    pub fn with_key(mut self, key: Option<&[u8]>) -> Self {
        self.key = key.map(Bytes::copy_from_slice);
        self
    }

    pub fn is_tombstone(&self) -> bool {
        self.payload.is_empty()
    }
}

/// A failure reported by the broker after a fire-and-forget send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryFailure {
    pub topic: String,
    pub error: String,
}

/// Printable form of a payload for debug logs: text as is, binary as base64.
pub fn preview(payload: &[u8]) -> Cow<'_, str> {
    match std::str::from_utf8(payload) {
        Ok(text) => Cow::Borrowed(text),
        Err(_) => Cow::Owned(STANDARD.encode(payload)),
    }
}
