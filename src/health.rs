//! Advisory health checks over the delivery error rates.

use crate::metrics::{Path, TrackerMetrics};
use crate::{Error, Result};
use std::sync::Arc;

/// Default one-minute failure rate, in failures per second, above which a
/// tracker reports itself unhealthy.
pub const DEFAULT_ERROR_RATE_THRESHOLD: f64 = 0.05;

/// Anything that can report on its own health.
///
/// Intended to be polled by a liveness or readiness probe. It never blocks or
/// gates message delivery.
pub trait HealthCheck {
    fn check_health(&self) -> Result<()>;
}

/// Compares the fast and safe error rates against a fixed threshold.
#[derive(Debug, Clone)]
pub struct ErrorRateCheck {
    metrics: Arc<TrackerMetrics>,
    threshold: f64,
}

impl ErrorRateCheck {
    pub fn new(metrics: Arc<TrackerMetrics>, threshold: f64) -> Self {
        Self { metrics, threshold }
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }
}

impl HealthCheck for ErrorRateCheck {
    fn check_health(&self) -> Result<()> {
        let fast_rate = self.metrics.error_rate(Path::Fast).rate1();
        let safe_rate = self.metrics.error_rate(Path::Safe).rate1();

        if fast_rate > self.threshold || safe_rate > self.threshold {
            return Err(Error::Unhealthy {
                fast_rate,
                safe_rate,
            });
        }
        Ok(())
    }
}
