//! Delivery metrics for the fast and safe paths.
//!
//! [`TrackerMetrics`] is constructed once per tracker and handed to each
//! channel. It owns a private prometheus registry, so several trackers can
//! live in one process without clashing, and the two [`ErrorRateMeter`]s read
//! by the health check.

use crate::Result;
use prometheus::{Encoder, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

const TICK_INTERVAL: Duration = Duration::from_secs(5);
const ONE_MINUTE_SECS: f64 = 60.0;

/// Which delivery path a metric belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Path {
    Fast,
    Safe,
}

impl Path {
    pub fn as_str(&self) -> &'static str {
        match self {
            Path::Fast => "fast",
            Path::Safe => "safe",
        }
    }
}

/// Exponentially weighted failure rate with one-minute decay.
///
/// Marks accumulate between 5 second ticks. Ticks are applied lazily on
/// `mark` and `rate1`, so the meter needs no background task.
#[derive(Debug)]
pub struct ErrorRateMeter {
    count: AtomicU64,
    uncounted: AtomicU64,
    rate: AtomicU64,
    initialized: AtomicBool,
    last_tick_nanos: AtomicU64,
    start: Instant,
    alpha: f64,
}

impl Default for ErrorRateMeter {
    fn default() -> Self {
        Self::new()
    }
}

impl ErrorRateMeter {
    pub fn new() -> Self {
        Self {
            count: AtomicU64::new(0),
            uncounted: AtomicU64::new(0),
            rate: AtomicU64::new(0f64.to_bits()),
            initialized: AtomicBool::new(false),
            last_tick_nanos: AtomicU64::new(0),
            start: Instant::now(),
            alpha: 1.0 - (-TICK_INTERVAL.as_secs_f64() / ONE_MINUTE_SECS).exp(),
        }
    }

    /// Records one failure.
    pub fn mark(&self) {
        self.tick_if_necessary();
        self.count.fetch_add(1, Ordering::Relaxed);
        self.uncounted.fetch_add(1, Ordering::Relaxed);
    }

    /// Total failures since creation.
    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }

    /// One-minute moving average in failures per second.
    pub fn rate1(&self) -> f64 {
        self.tick_if_necessary();
        f64::from_bits(self.rate.load(Ordering::Acquire))
    }

    /// Folds marks since the previous tick into the average.
    pub fn tick(&self) {
        let count = self.uncounted.swap(0, Ordering::AcqRel) as f64;
        let instant_rate = count / TICK_INTERVAL.as_secs_f64();

        if self.initialized.swap(true, Ordering::AcqRel) {
            let current = f64::from_bits(self.rate.load(Ordering::Acquire));
            let next = current + self.alpha * (instant_rate - current);
            self.rate.store(next.to_bits(), Ordering::Release);
        } else {
            self.rate.store(instant_rate.to_bits(), Ordering::Release);
        }
    }

    fn tick_if_necessary(&self) {
        let interval = TICK_INTERVAL.as_nanos() as u64;
        let now = self.start.elapsed().as_nanos() as u64;
        let last = self.last_tick_nanos.load(Ordering::Acquire);
        let age = now.saturating_sub(last);
        if age <= interval {
            return;
        }

        let next = now - age % interval;
        if self
            .last_tick_nanos
            .compare_exchange(last, next, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            for _ in 0..age / interval {
                self.tick();
            }
        }
    }
}

/// Metrics shared by the channels, the recovery worker and the health check.
pub struct TrackerMetrics {
    registry: Registry,
    messages: IntCounterVec,
    errors: IntCounterVec,
    redeliveries: IntCounter,
    queue_depth: IntGauge,
    fast_error_rate: Arc<ErrorRateMeter>,
    safe_error_rate: Arc<ErrorRateMeter>,
}

impl std::fmt::Debug for TrackerMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrackerMetrics")
            .field("fast_error_rate", &self.fast_error_rate.rate1())
            .field("safe_error_rate", &self.safe_error_rate.rate1())
            .field("queue_depth", &self.queue_depth.get())
            .finish()
    }
}

impl TrackerMetrics {
    /// Creates the metrics and registers them in a fresh registry.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Metrics`] if registration fails.
    pub fn new() -> Result<Self> {
        let registry = Registry::new();

        let messages = IntCounterVec::new(
            Opts::new("tracker_messages_total", "Messages handed to a delivery path"),
            &["type"],
        )?;
        let errors = IntCounterVec::new(
            Opts::new("tracker_errors_total", "Delivery failures by path"),
            &["type"],
        )?;
        let redeliveries = IntCounter::new(
            "tracker_redeliveries_total",
            "Retry queue entries delivered by the recovery worker",
        )?;
        let queue_depth = IntGauge::new(
            "tracker_retry_queue_depth",
            "Entries waiting in the durable retry queue",
        )?;

        registry.register(Box::new(messages.clone()))?;
        registry.register(Box::new(errors.clone()))?;
        registry.register(Box::new(redeliveries.clone()))?;
        registry.register(Box::new(queue_depth.clone()))?;

        Ok(Self {
            registry,
            messages,
            errors,
            redeliveries,
            queue_depth,
            fast_error_rate: Arc::new(ErrorRateMeter::new()),
            safe_error_rate: Arc::new(ErrorRateMeter::new()),
        })
    }

    pub fn record_message(&self, path: Path) {
        self.messages.with_label_values(&[path.as_str()]).inc();
    }

    /// Counts a failure and marks the path's error rate.
    pub fn record_error(&self, path: Path) {
        self.errors.with_label_values(&[path.as_str()]).inc();
        self.error_rate(path).mark();
    }

    pub fn record_redelivery(&self) {
        self.redeliveries.inc();
    }

    pub fn set_queue_depth(&self, depth: u64) {
        self.queue_depth.set(i64::try_from(depth).unwrap_or(i64::MAX));
    }

    pub fn error_rate(&self, path: Path) -> &Arc<ErrorRateMeter> {
        match path {
            Path::Fast => &self.fast_error_rate,
            Path::Safe => &self.safe_error_rate,
        }
    }

    pub fn messages(&self, path: Path) -> u64 {
        self.messages.with_label_values(&[path.as_str()]).get()
    }

    pub fn errors(&self, path: Path) -> u64 {
        self.errors.with_label_values(&[path.as_str()]).get()
    }

    pub fn redeliveries(&self) -> u64 {
        self.redeliveries.get()
    }

    pub fn queue_depth(&self) -> i64 {
        self.queue_depth.get()
    }

    /// Renders all metrics in the prometheus text format.
    pub fn render(&self) -> Result<String> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        Ok(String::from_utf8_lossy(&buffer).into_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_meter_starts_at_zero() {
        let meter = ErrorRateMeter::new();
        assert_eq!(meter.count(), 0);
        assert_eq!(meter.rate1(), 0.0);
    }

    #[test]
    fn test_first_tick_uses_instant_rate() {
        let meter = ErrorRateMeter::new();
        for _ in 0..10 {
            meter.mark();
        }
        meter.tick();

        assert_eq!(meter.count(), 10);
        assert!((meter.rate1() - 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_rate_decays_without_failures() {
        let meter = ErrorRateMeter::new();
        for _ in 0..10 {
            meter.mark();
        }
        meter.tick();
        let initial = meter.rate1();

        // One minute of quiet ticks.
        for _ in 0..12 {
            meter.tick();
        }
        let decayed = meter.rate1();
        assert!(decayed < initial);
        assert!((decayed / initial - (-1.0f64).exp()).abs() < 1e-6);
    }

    #[test]
    fn test_record_error_by_path() {
        let metrics = TrackerMetrics::new().unwrap();
        metrics.record_error(Path::Fast);
        metrics.record_error(Path::Fast);
        metrics.record_error(Path::Safe);

        assert_eq!(metrics.errors(Path::Fast), 2);
        assert_eq!(metrics.errors(Path::Safe), 1);
        assert_eq!(metrics.error_rate(Path::Fast).count(), 2);
        assert_eq!(metrics.error_rate(Path::Safe).count(), 1);
    }

    #[test]
    fn test_render_contains_type_labels() {
        let metrics = TrackerMetrics::new().unwrap();
        metrics.record_message(Path::Safe);
        metrics.record_error(Path::Fast);
        metrics.set_queue_depth(3);

        let text = metrics.render().unwrap();
        assert!(text.contains(r#"tracker_errors_total{type="fast"} 1"#));
        assert!(text.contains(r#"tracker_messages_total{type="safe"} 1"#));
        assert!(text.contains("tracker_retry_queue_depth 3"));
    }
}
