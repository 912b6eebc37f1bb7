use crate::kafka::{preview, AsyncProducer, DeliveryFailure, OutboundMessage};
use crate::metrics::{Path, TrackerMetrics};
use crate::{Error, Result};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Best-effort delivery path.
///
/// `send` hands the message to the producer and returns. Failures reported
/// later by the broker are drained by a background task that only counts and
/// logs them.
pub struct FastChannel {
    producer: Box<dyn AsyncProducer>,
    metrics: Arc<TrackerMetrics>,
    token: CancellationToken,
    drain: Mutex<Option<JoinHandle<()>>>,
    closed: AtomicBool,
}

impl FastChannel {
    /// Wraps `producer` and starts draining its failure stream.
    ///
    /// Must be called inside a tokio runtime.
    pub fn new(mut producer: Box<dyn AsyncProducer>, metrics: Arc<TrackerMetrics>) -> Self {
        let token = CancellationToken::new();

        let drain = match producer.take_failures() {
            Some(failures) => Some(tokio::spawn(drain_failures(
                failures,
                metrics.clone(),
                token.clone(),
            ))),
            None => {
                debug!("Fast producer has no failure stream, asynchronous errors are not counted");
                None
            }
        };

        Self {
            producer,
            metrics,
            token,
            drain: Mutex::new(drain),
            closed: AtomicBool::new(false),
        }
    }

    /// Enqueues the message without waiting for the broker.
    ///
    /// A local rejection is counted like an asynchronous failure and does not
    /// fail the call.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Closed`] after [`close`](Self::close).
    pub fn send(&self, message: OutboundMessage) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(Error::Closed);
        }

        self.metrics.record_message(Path::Fast);
        debug!(
            topic = %message.topic,
            payload = %preview(&message.payload),
            "Sending fast message"
        );

        let topic = message.topic.clone();
        if let Err(e) = self.producer.send(message) {
            self.metrics.record_error(Path::Fast);
            warn!(topic = %topic, error = %e, "Fast message rejected by producer");
        }
        Ok(())
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Stops the drain task and flushes the producer. Idempotent.
    pub async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        self.token.cancel();
        let drain = self.drain.lock().take();
        if let Some(handle) = drain {
            if let Err(e) = handle.await {
                warn!(error = %e, "Fast failure drain task ended abnormally");
            }
        }

        self.producer.close().await?;
        info!("Closed fast channel");
        Ok(())
    }
}

async fn drain_failures(
    mut failures: mpsc::UnboundedReceiver<DeliveryFailure>,
    metrics: Arc<TrackerMetrics>,
    token: CancellationToken,
) {
    loop {
        tokio::select! {
            () = token.cancelled() => break,
            failure = failures.recv() => match failure {
                Some(failure) => {
                    metrics.record_error(Path::Fast);
                    warn!(
                        topic = %failure.topic,
                        error = %failure.error,
                        "Fast message delivery failed"
                    );
                }
                None => break,
            },
        }
    }

    // Count reports that were already waiting when cancelled.
    while let Ok(failure) = failures.try_recv() {
        metrics.record_error(Path::Fast);
        warn!(
            topic = %failure.topic,
            error = %failure.error,
            "Fast message delivery failed"
        );
    }
    debug!("Fast failure drain task stopped");
}
