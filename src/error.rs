//! Error types and result handling for event-tracker.
//!
//! This module defines the main error type [`Error`] and a convenience
//! [`Result`] type alias used throughout the crate.
//!
//! # Example
//!
//! ```rust
//! use event_tracker::{Error, Result};
//!
//! fn deliver() -> Result<()> {
//!     Err(Error::Delivery {
//!         topic: "clicks".to_string(),
//!         message: "broker unreachable".to_string(),
//!     })
//! }
//!
//! match deliver() {
//!     Ok(()) => println!("Delivered"),
//!     Err(Error::Delivery { topic, message }) => eprintln!("{}: {}", topic, message),
//!     Err(e) => eprintln!("Other error: {}", e),
//! }
//! ```

use thiserror::Error;

/// The main error type for event-tracker operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error, typically from an invalid file or environment variable.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Kafka client or producer error.
    #[error("Kafka error: {0}")]
    Kafka(#[from] rdkafka::error::KafkaError),

    /// The payload could not be encoded. Never retried.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// I/O error, typically from the retry queue files.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Metric registration failed.
    #[error("Metrics error: {0}")]
    Metrics(#[from] prometheus::Error),

    /// The broker rejected or never acknowledged a message.
    #[error("Delivery to '{topic}' failed: {message}")]
    Delivery {
        /// Destination topic
        topic: String,
        /// Description of the failure
        message: String,
    },

    /// Topic names must not contain the retry entry delimiter.
    #[error("Invalid topic {topic:?}: contains a NUL byte")]
    InvalidTopic {
        /// The offending topic
        topic: String,
    },

    /// The durable retry queue is structurally broken.
    ///
    /// Continuing would silently drop data, so the recovery worker halts
    /// when it sees this.
    #[error("Retry queue corrupted: {message}")]
    QueueCorrupted {
        /// Description of the corruption
        message: String,
    },

    /// The recovery worker halted and no longer drains the retry queue.
    #[error("Recovery worker failed: {message}")]
    WorkerFailed {
        /// Why the worker stopped
        message: String,
    },

    /// Advisory health failure, only ever returned from a health check.
    #[error("Kafka error rate too high: fast={fast_rate:.4}/s safe={safe_rate:.4}/s")]
    Unhealthy {
        /// One-minute fast path failure rate
        fast_rate: f64,
        /// One-minute safe path failure rate
        safe_rate: f64,
    },

    /// The tracker or channel was already closed.
    #[error("Tracker is closed")]
    Closed,
}

impl Error {
    /// Whether the error leaves the retry queue unusable.
    ///
    /// The recovery worker only ever stops with a fatal error. Queue I/O
    /// failures it hits are reported as [`Error::WorkerFailed`].
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::QueueCorrupted { .. } | Error::WorkerFailed { .. })
    }
}

impl From<config::ConfigError> for Error {
    fn from(e: config::ConfigError) -> Self {
        Error::Config(e.to_string())
    }
}

/// A convenient Result type alias for event-tracker operations.
///
/// This is equivalent to `std::result::Result<T, event_tracker::Error>`.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_classification() {
        let corrupted = Error::QueueCorrupted {
            message: "short record".to_string(),
        };
        assert!(corrupted.is_fatal());

        let delivery = Error::Delivery {
            topic: "t".to_string(),
            message: "down".to_string(),
        };
        assert!(!delivery.is_fatal());
        assert!(!Error::Closed.is_fatal());

        let failed = Error::WorkerFailed {
            message: "retry queue unreadable".to_string(),
        };
        assert!(failed.is_fatal());
    }

    #[test]
    fn test_unhealthy_names_both_rates() {
        let err = Error::Unhealthy {
            fast_rate: 0.1,
            safe_rate: 0.0,
        };
        let text = err.to_string();
        assert!(text.contains("fast=0.1000"));
        assert!(text.contains("safe=0.0000"));
    }
}
