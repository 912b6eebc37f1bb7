//! The `Tracker` facade applications send events through.
//!
//! ```rust,no_run
//! use event_tracker::{KafkaTracker, Tracker, TrackerConfig};
//! use serde_json::json;
//!
//! # async fn example() -> event_tracker::Result<()> {
//! let config = TrackerConfig::from_file("tracker.toml")?;
//! let mut tracker = KafkaTracker::connect(&config).await?;
//!
//! tracker.fast_message("page-views", &mut json!({"page": "/"}))?;
//! tracker.safe_message("orders", &mut json!({"id": 17})).await?;
//!
//! tracker.close().await?;
//! # Ok(())
//! # }
//! ```

pub mod kafka;
pub mod log;
pub mod mock;

pub use kafka::{KafkaTracker, TrackerParts};
pub use log::LogTracker;
pub use mock::MockTracker;

use crate::encoder::Encode;
use crate::health::HealthCheck;
use crate::Result;
use async_trait::async_trait;

/// Sends events to topics over a fast and a safe path.
#[async_trait]
pub trait Tracker: HealthCheck + Send + Sync {
    /// Best-effort send that never waits for the broker.
    fn fast_message_with_key(
        &self,
        topic: &str,
        message: &mut (dyn Encode + Send),
        key: Option<&[u8]>,
    ) -> Result<()>;

    fn fast_message(&self, topic: &str, message: &mut (dyn Encode + Send)) -> Result<()> {
        self.fast_message_with_key(topic, message, None)
    }

    /// Send that completes once the message is acknowledged or durably
    /// stored for redelivery.
    async fn safe_message_with_key(
        &self,
        topic: &str,
        message: &mut (dyn Encode + Send),
        key: Option<&[u8]>,
    ) -> Result<()>;

    async fn safe_message(&self, topic: &str, message: &mut (dyn Encode + Send)) -> Result<()> {
        self.safe_message_with_key(topic, message, None).await
    }

    /// Flushes and releases everything. A second call does nothing.
    async fn close(&mut self) -> Result<()>;
}
