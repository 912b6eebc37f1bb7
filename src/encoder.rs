//! Turns caller values into wire-ready payloads.
//!
//! Every value handed to a tracker implements [`Encode`], which resolves the
//! value to one [`Payload`] variant. The [`Encoder`] then applies the
//! enrichment rules for that variant:
//!
//! | Payload      | Output                                              |
//! |--------------|-----------------------------------------------------|
//! | `Tombstone`  | empty payload                                       |
//! | `Raw`        | bytes unchanged                                     |
//! | `Text`       | UTF-8 bytes                                         |
//! | `Map`        | JSON, with `ts` added when missing                  |
//! | `Event`      | metadata and timestamp injected, then its own JSON  |
//! | `Structured` | plain JSON                                          |

use crate::event::{Event, EventMetadata};
use crate::time::{iso8601, Clock, SystemClock};
use crate::Result;
use bytes::Bytes;
use serde::Serialize;
use serde_json::{Map, Value};
use std::sync::Arc;

/// Key under which maps receive their timestamp.
pub const TIMESTAMP_KEY: &str = "ts";

/// Serializes a value to JSON bytes.
///
/// Implemented for every `Serialize` type. Types with a custom wire form
/// implement it directly.
pub trait ToJson {
    fn to_json(&self) -> serde_json::Result<Vec<u8>>;
}

impl<T: Serialize + ?Sized> ToJson for T {
    fn to_json(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }
}

/// How a value is to be encoded.
pub enum Payload<'a> {
    Tombstone,
    Raw(&'a [u8]),
    Text(&'a str),
    Map(&'a mut Map<String, Value>),
    Event(&'a mut dyn Event),
    Structured(&'a dyn ToJson),
}

/// A value that can be sent through a tracker.
pub trait Encode {
    fn payload(&mut self) -> Payload<'_>;
}

/// Explicit empty message, produced to Kafka as a null value.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Tombstone;

/// Wraps any `Serialize` value for plain JSON encoding without enrichment.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Plain<T>(pub T);

impl<E: Event> Encode for E {
    fn payload(&mut self) -> Payload<'_> {
        Payload::Event(self)
    }
}

impl<T: Serialize> Encode for Plain<T> {
    fn payload(&mut self) -> Payload<'_> {
        Payload::Structured(&self.0)
    }
}

impl Encode for Tombstone {
    fn payload(&mut self) -> Payload<'_> {
        Payload::Tombstone
    }
}

impl Encode for () {
    fn payload(&mut self) -> Payload<'_> {
        Payload::Tombstone
    }
}

impl Encode for [u8] {
    fn payload(&mut self) -> Payload<'_> {
        Payload::Raw(self)
    }
}

impl Encode for &[u8] {
    fn payload(&mut self) -> Payload<'_> {
        Payload::Raw(*self)
    }
}

impl Encode for Vec<u8> {
    fn payload(&mut self) -> Payload<'_> {
        Payload::Raw(self)
    }
}

impl Encode for Bytes {
    fn payload(&mut self) -> Payload<'_> {
        Payload::Raw(self)
    }
}

impl Encode for str {
    fn payload(&mut self) -> Payload<'_> {
        Payload::Text(self)
    }
}

impl Encode for &str {
    fn payload(&mut self) -> Payload<'_> {
        Payload::Text(*self)
    }
}

impl Encode for String {
    fn payload(&mut self) -> Payload<'_> {
        Payload::Text(self)
    }
}

impl Encode for Map<String, Value> {
    fn payload(&mut self) -> Payload<'_> {
        Payload::Map(self)
    }
}

impl Encode for Value {
    fn payload(&mut self) -> Payload<'_> {
        match self {
            Value::Null => Payload::Tombstone,
            Value::String(text) => Payload::Text(text),
            Value::Object(map) => Payload::Map(map),
            other => Payload::Structured(&*other),
        }
    }
}

/// Encodes messages and stamps them with deployment metadata and time.
#[derive(Debug, Clone)]
pub struct Encoder {
    metadata: Arc<EventMetadata>,
    clock: Arc<dyn Clock>,
}

impl Encoder {
    pub fn new(metadata: EventMetadata) -> Self {
        Self::with_clock(metadata, Arc::new(SystemClock))
    }

    pub fn with_clock(metadata: EventMetadata, clock: Arc<dyn Clock>) -> Self {
        Self {
            metadata: Arc::new(metadata),
            clock,
        }
    }

    pub fn metadata(&self) -> &EventMetadata {
        &self.metadata
    }

    /// Encodes `message`, mutating it in place when it accepts enrichment.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Serialization`] if the value cannot be
    /// serialized.
    pub fn encode<M: Encode + ?Sized>(&self, message: &mut M) -> Result<Vec<u8>> {
        match message.payload() {
            Payload::Tombstone => Ok(Vec::new()),
            Payload::Raw(bytes) => Ok(bytes.to_vec()),
            Payload::Text(text) => Ok(text.as_bytes().to_vec()),
            Payload::Map(map) => {
                if !map.contains_key(TIMESTAMP_KEY) {
                    map.insert(
                        TIMESTAMP_KEY.to_string(),
                        Value::String(iso8601(&self.clock.now())),
                    );
                }
                Ok(serde_json::to_vec(&*map)?)
            }
            Payload::Event(event) => {
                if let Some(target) = event.metadata_mut() {
                    target.set_metadata(&self.metadata);
                }
                if let Some(target) = event.timestamp_mut() {
                    target.set_timestamp(self.clock.now());
                }
                Ok(event.to_json()?)
            }
            Payload::Structured(value) => Ok(value.to_json()?),
        }
    }
}
