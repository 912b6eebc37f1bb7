pub mod config;
pub mod delivery;
pub mod encoder;
pub mod error;
pub mod event;
pub mod health;
pub mod kafka;
pub mod metrics;
pub mod queue;
pub mod time;
pub mod tracker;

pub use crate::config::TrackerConfig;
pub use encoder::{Encode, Encoder, Plain, Tombstone};
pub use error::{Error, Result};
pub use event::{Event, EventBase, EventMetadata, Metadatable, Timestampable};
pub use health::HealthCheck;
pub use metrics::TrackerMetrics;
pub use tracker::{KafkaTracker, LogTracker, MockTracker, Tracker, TrackerParts};
