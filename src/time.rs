//! Wall clock abstraction for event timestamps.
//!
//! The encoder stamps maps and events with the current time. Injecting the
//! clock keeps encoded output deterministic in tests.

use chrono::{DateTime, SecondsFormat, Utc};
use std::fmt::Debug;

/// Source of the current UTC time.
pub trait Clock: Send + Sync + Debug {
    /// Returns the current wall clock time.
    fn now(&self) -> DateTime<Utc>;
}

/// Clock backed by the system time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock frozen at a single instant.
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub DateTime<Utc>);

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.0
    }
}

/// Formats a timestamp as ISO-8601 in UTC with second precision,
/// e.g. `1982-04-03T12:00:00Z`.
pub fn iso8601(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Secs, true)
}
