//! Background redelivery of parked safe messages.
//!
//! The worker is the only reader of the retry queue. It takes the oldest
//! entry, sends it with the safe producer and puts it back at the tail when
//! the broker still refuses it, then waits one poll interval. Entries are
//! retried until they are delivered.
//!
//! A structurally broken queue stops the worker. The failure is published on
//! a watch channel and returned from the task; deciding whether the process
//! should exit is left to the owner.

use crate::kafka::{preview, SyncProducer};
use crate::metrics::{Path, TrackerMetrics};
use crate::queue::{DurableQueue, RetryEntry};
use crate::{Error, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Lifecycle of a recovery worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerState {
    Running,
    Stopped,
    Failed(String),
}

/// Outcome of one worker iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Empty,
    Delivered,
    Requeued,
}

pub struct RecoveryWorker {
    queue: Arc<dyn DurableQueue>,
    producer: Arc<dyn SyncProducer>,
    metrics: Arc<TrackerMetrics>,
    poll_interval: Duration,
    token: CancellationToken,
}

impl RecoveryWorker {
    pub fn new(
        queue: Arc<dyn DurableQueue>,
        producer: Arc<dyn SyncProducer>,
        metrics: Arc<TrackerMetrics>,
        poll_interval: Duration,
    ) -> Self {
        Self {
            queue,
            producer,
            metrics,
            poll_interval,
            token: CancellationToken::new(),
        }
    }

    /// Starts the worker on the current runtime.
    pub fn spawn(self) -> RecoveryHandle {
        let token = self.token.clone();
        let (state_tx, state_rx) = watch::channel(WorkerState::Running);
        let join = tokio::spawn(self.run(state_tx));

        RecoveryHandle {
            token,
            join: Some(join),
            state: state_rx,
        }
    }

    async fn run(self, state: watch::Sender<WorkerState>) -> Result<()> {
        info!(
            poll_interval_ms = self.poll_interval.as_millis() as u64,
            pending = self.queue.len(),
            "Recovery worker started"
        );

        loop {
            if self.token.is_cancelled() {
                break;
            }

            match self.process_next().await {
                Ok(Step::Delivered) => {}
                // Nothing to do, or the broker is still refusing: wait a poll
                // interval before the next attempt.
                Ok(Step::Empty | Step::Requeued) => {
                    tokio::select! {
                        () = tokio::time::sleep(self.poll_interval) => {}
                        () = self.token.cancelled() => break,
                    }
                }
                Err(e) => {
                    error!(error = %e, "Recovery worker halted, retry queue is no longer drained");
                    state.send_replace(WorkerState::Failed(e.to_string()));
                    return Err(e);
                }
            }
        }

        state.send_replace(WorkerState::Stopped);
        info!(pending = self.queue.len(), "Recovery worker stopped");
        Ok(())
    }

    /// Runs a single iteration.
    ///
    /// # Errors
    ///
    /// Every error is fatal ([`Error::is_fatal`]): a queue that cannot be
    /// read or written, or an entry that cannot be decoded.
    pub async fn process_next(&self) -> Result<Step> {
        let dequeued = self.queue.dequeue().await.map_err(|e| {
            if e.is_fatal() {
                e
            } else {
                Error::WorkerFailed {
                    message: format!("retry queue unreadable: {}", e),
                }
            }
        })?;
        let raw = match dequeued {
            Some(raw) => raw,
            None => return Ok(Step::Empty),
        };

        let entry = RetryEntry::decode(&raw)?;
        let topic = entry.topic.clone();
        let message = entry.into_message();

        match self.producer.send(&message).await {
            Ok(()) => {
                self.metrics.record_redelivery();
                self.metrics.set_queue_depth(self.queue.len());
                debug!(topic = %topic, "Redelivered queued message");
                Ok(Step::Delivered)
            }
            Err(e) => {
                self.metrics.record_error(Path::Safe);
                warn!(
                    topic = %topic,
                    error = %e,
                    payload = %preview(&message.payload),
                    "Redelivery failed, requeueing"
                );

                self.queue.enqueue(&raw).await.map_err(|e| Error::WorkerFailed {
                    message: format!("could not requeue entry for '{}': {}", topic, e),
                })?;
                self.metrics.set_queue_depth(self.queue.len());
                Ok(Step::Requeued)
            }
        }
    }
}

/// Control handle for a spawned [`RecoveryWorker`].
pub struct RecoveryHandle {
    token: CancellationToken,
    join: Option<JoinHandle<Result<()>>>,
    state: watch::Receiver<WorkerState>,
}

impl RecoveryHandle {
    pub fn state(&self) -> WorkerState {
        self.state.borrow().clone()
    }

    /// Stream of state changes, for supervisors.
    pub fn subscribe(&self) -> watch::Receiver<WorkerState> {
        self.state.clone()
    }

    /// Cancels the worker and waits for it.
    ///
    /// The worker finishes its current iteration first, so an entry is never
    /// lost mid-flight. Returns the worker's own error if it had failed.
    /// Calling it again is a no-op.
    pub async fn shutdown(&mut self) -> Result<()> {
        self.token.cancel();

        let join = match self.join.take() {
            Some(join) => join,
            None => return Ok(()),
        };

        match join.await {
            Ok(result) => result,
            Err(e) => Err(Error::WorkerFailed {
                message: format!("recovery worker task aborted: {}", e),
            }),
        }
    }

    /// Resolves when the worker fails. Never resolves if it stops cleanly.
    pub async fn wait_for_failure(&self) -> String {
        let mut state = self.state.clone();
        loop {
            if let WorkerState::Failed(message) = &*state.borrow_and_update() {
                return message.clone();
            }
            if state.changed().await.is_err() {
                // Sender gone without a failure.
                std::future::pending::<()>().await;
            }
        }
    }
}
