//! Event capabilities and deployment metadata.
//!
//! Events opt into enrichment through a small closed set of capabilities:
//! [`Metadatable`] for deployment identity and [`Timestampable`] for the send
//! time. The [`Event`] trait exposes which of them a value supports so the
//! encoder can resolve them once per value.
//!
//! # Example
//!
//! ```rust
//! use event_tracker::event::{Event, EventBase, EventMetadata, Metadatable, Timestampable};
//! use serde::Serialize;
//!
//! #[derive(Serialize, Default)]
//! struct Click {
//!     #[serde(flatten)]
//!     base: EventBase,
//!     button: String,
//! }
//!
//! impl Event for Click {
//!     fn metadata_mut(&mut self) -> Option<&mut dyn Metadatable> {
//!         Some(&mut self.base)
//!     }
//!
//!     fn timestamp_mut(&mut self) -> Option<&mut dyn Timestampable> {
//!         Some(&mut self.base)
//!     }
//! }
//! ```

use crate::encoder::ToJson;
use crate::time::iso8601;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Deployment identity injected into every event.
///
/// Empty strings mean "unset" and are omitted when serialized.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventMetadata {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub service: String,
    #[serde(
        rename = "env",
        alias = "environment",
        default,
        skip_serializing_if = "String::is_empty"
    )]
    pub environment: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub cluster: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub host: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub release: String,
}

impl EventMetadata {
    pub fn new(
        service: impl Into<String>,
        environment: impl Into<String>,
        cluster: impl Into<String>,
        host: impl Into<String>,
        release: impl Into<String>,
    ) -> Self {
        Self {
            service: service.into(),
            environment: environment.into(),
            cluster: cluster.into(),
            host: host.into(),
            release: release.into(),
        }
    }

    /// Fills every empty field from `stamp`. Fields already set are kept.
    pub fn backfill(&mut self, stamp: &EventMetadata) {
        fill(&mut self.service, &stamp.service);
        fill(&mut self.environment, &stamp.environment);
        fill(&mut self.cluster, &stamp.cluster);
        fill(&mut self.host, &stamp.host);
        fill(&mut self.release, &stamp.release);
    }
}

fn fill(field: &mut String, value: &str) {
    if field.is_empty() {
        field.push_str(value);
    }
}

/// Accepts deployment metadata from the tracker.
pub trait Metadatable {
    fn set_metadata(&mut self, metadata: &EventMetadata);
}

/// Accepts the time at which the event is encoded.
pub trait Timestampable {
    fn set_timestamp(&mut self, now: DateTime<Utc>);
}

/// A structured message with optional enrichment capabilities.
///
/// Both capabilities default to absent. Serialization goes through
/// [`ToJson`], which every `Serialize` type gets for free; types that need a
/// custom wire form implement `ToJson` by hand instead of deriving `Serialize`.
pub trait Event: ToJson {
    fn metadata_mut(&mut self) -> Option<&mut dyn Metadatable> {
        None
    }

    fn timestamp_mut(&mut self) -> Option<&mut dyn Timestampable> {
        None
    }
}

/// Common event fields: timestamp, unique id and deployment metadata.
///
/// Embed it with `#[serde(flatten)]` and delegate both capabilities to it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventBase {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub ts: String,
    #[serde(rename = "_uuid", default, skip_serializing_if = "String::is_empty")]
    pub uuid: String,
    #[serde(flatten)]
    pub metadata: EventMetadata,
}

impl Metadatable for EventBase {
    fn set_metadata(&mut self, metadata: &EventMetadata) {
        if self.uuid.is_empty() {
            self.uuid = Uuid::new_v4().to_string();
        }
        self.metadata.backfill(metadata);
    }
}

impl Timestampable for EventBase {
    fn set_timestamp(&mut self, now: DateTime<Utc>) {
        self.ts = iso8601(&now);
    }
}

impl Event for EventBase {
    fn metadata_mut(&mut self) -> Option<&mut dyn Metadatable> {
        Some(self)
    }

    fn timestamp_mut(&mut self) -> Option<&mut dyn Timestampable> {
        Some(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn stamp() -> EventMetadata {
        EventMetadata::new("test", "testing", "t1", "testhost", "123abc")
    }

    #[test]
    fn test_event_metadata() {
        let mut event = EventBase::default();
        event.set_metadata(&stamp());

        assert_eq!(event.metadata.service, "test");
        assert_eq!(event.metadata.environment, "testing");
        assert_eq!(event.metadata.cluster, "t1");
        assert_eq!(event.metadata.host, "testhost");
        assert_eq!(event.metadata.release, "123abc");
        assert!(!event.uuid.is_empty());
    }

    #[test]
    fn test_backfill_keeps_caller_values() {
        let mut event = EventBase::default();
        event.metadata.service = "override".to_string();
        event.uuid = "fixed".to_string();
        event.set_metadata(&stamp());

        assert_eq!(event.metadata.service, "override");
        assert_eq!(event.metadata.environment, "testing");
        assert_eq!(event.uuid, "fixed");
    }

    #[test]
    fn test_backfill_is_idempotent() {
        let mut event = EventBase::default();
        event.set_metadata(&stamp());
        let first = event.clone();
        event.set_metadata(&stamp());
        assert_eq!(first, event);
    }

    #[test]
    fn test_event_base_serialization() {
        let mut event = EventBase {
            uuid: "u-1".to_string(),
            ..Default::default()
        };
        event.set_metadata(&stamp());
        event.set_timestamp(Utc.with_ymd_and_hms(1982, 4, 3, 12, 0, 0).unwrap());

        let json = serde_json::to_string(&event).unwrap();
        assert_eq!(
            json,
            r#"{"ts":"1982-04-03T12:00:00Z","_uuid":"u-1","service":"test","env":"testing","cluster":"t1","host":"testhost","release":"123abc"}"#
        );
    }

    #[test]
    fn test_metadata_accepts_environment_alias() {
        let metadata: EventMetadata =
            serde_json::from_str(r#"{"service":"s","environment":"prod"}"#).unwrap();
        assert_eq!(metadata.environment, "prod");
    }
}
