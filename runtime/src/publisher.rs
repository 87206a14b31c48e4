//! Asynchronous claim event emission.
//!
//! The claim path must not wait for the message channel: the allocation is
//! already committed in the cache and the HTTP answer does not depend on the
//! audit pipeline. [`ClaimPublisher::emit`] therefore only enqueues; a
//! background [`PublisherWorker`] publishes with retry.
//!
//! A publish that fails for good is logged with the full event and counted.
//! The cache allocation is never rolled back; [`Reconciler`](crate::Reconciler)
//! finds and republishes such events.

use crate::retry::{RetryPolicy, retry_with_backoff};
use redpacket_core::claim::ClaimEvent;
use redpacket_core::environment::{PublishResult, Telemetry};
use redpacket_core::event_bus::EventBus;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

/// Publisher tuning.
#[derive(Debug, Clone)]
pub struct PublisherConfig {
    /// Events that may wait for the background task (default: 10 000)
    pub queue_capacity: usize,
    /// Retry policy per event
    pub retry: RetryPolicy,
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 10_000,
            retry: RetryPolicy::default(),
        }
    }
}

/// Cheap, cloneable handle that enqueues claim events.
#[derive(Clone)]
pub struct ClaimPublisher {
    tx: mpsc::Sender<ClaimEvent>,
    telemetry: Arc<dyn Telemetry>,
}

impl ClaimPublisher {
    /// Start the background task and return the handle plus the worker that
    /// owns it.
    ///
    /// Must be called inside a tokio runtime.
    #[must_use]
    pub fn spawn(
        event_bus: Arc<dyn EventBus>,
        config: PublisherConfig,
        telemetry: Arc<dyn Telemetry>,
    ) -> (Self, PublisherWorker) {
        let (tx, rx) = mpsc::channel(config.queue_capacity.max(1));
        let (stop_tx, stop_rx) = oneshot::channel();

        let task = PublishLoop {
            event_bus,
            retry: config.retry,
            telemetry: Arc::clone(&telemetry),
        };
        let join = tokio::spawn(task.run(rx, stop_rx));

        tracing::info!(queue_capacity = config.queue_capacity, "Claim publisher started");

        (
            Self { tx, telemetry },
            PublisherWorker {
                stop: Some(stop_tx),
                join,
            },
        )
    }

    /// Enqueue an event without waiting.
    ///
    /// Returns `false` if the event was dropped because the queue is full or
    /// the worker has stopped. The caller's allocation stands either way.
    pub fn emit(&self, event: ClaimEvent) -> bool {
        match self.tx.try_send(event) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(event)) => {
                tracing::error!(
                    campaign_id = event.campaign_id.get(),
                    user_id = %event.user_id,
                    amount = event.amount,
                    "Publish queue full, claim event dropped"
                );
                self.telemetry.event_published(PublishResult::Dropped);
                false
            }
            Err(mpsc::error::TrySendError::Closed(event)) => {
                tracing::error!(
                    campaign_id = event.campaign_id.get(),
                    user_id = %event.user_id,
                    amount = event.amount,
                    "Publisher stopped, claim event dropped"
                );
                self.telemetry.event_published(PublishResult::Dropped);
                false
            }
        }
    }

    /// Events currently waiting in the queue.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.tx.max_capacity() - self.tx.capacity()
    }
}

/// Owner of the background publish task.
pub struct PublisherWorker {
    stop: Option<oneshot::Sender<()>>,
    join: JoinHandle<()>,
}

impl PublisherWorker {
    /// Stop accepting events, publish everything already queued, then return.
    pub async fn shutdown(mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        if let Err(e) = (&mut self.join).await {
            tracing::error!(error = %e, "Publisher task failed");
        }
    }
}

struct PublishLoop {
    event_bus: Arc<dyn EventBus>,
    retry: RetryPolicy,
    telemetry: Arc<dyn Telemetry>,
}

impl PublishLoop {
    async fn run(self, mut rx: mpsc::Receiver<ClaimEvent>, mut stop: oneshot::Receiver<()>) {
        // A dropped worker handle detaches the task rather than stopping it.
        let mut stop_armed = true;
        loop {
            tokio::select! {
                biased;
                signal = &mut stop, if stop_armed => {
                    if signal.is_err() {
                        stop_armed = false;
                        continue;
                    }
                    rx.close();
                    let mut drained = 0usize;
                    while let Some(event) = rx.recv().await {
                        self.publish(&event).await;
                        drained += 1;
                    }
                    tracing::info!(drained, "Claim publisher drained and stopped");
                    return;
                }
                next = rx.recv() => match next {
                    Some(event) => self.publish(&event).await,
                    None => {
                        tracing::info!("All publisher handles dropped, stopping");
                        return;
                    }
                },
            }
        }
    }

    async fn publish(&self, event: &ClaimEvent) {
        let result = retry_with_backoff(&self.retry, || self.event_bus.publish(event)).await;

        match result {
            Ok(()) => self.telemetry.event_published(PublishResult::Published),
            Err(failure) => {
                // The allocation stands; reconciliation recovers the audit row.
                tracing::error!(
                    campaign_id = event.campaign_id.get(),
                    user_id = %event.user_id,
                    amount = event.amount,
                    ts = %event.timestamp,
                    attempts = failure.attempts,
                    error = %failure.error,
                    "Claim event could not be published"
                );
                self.telemetry.event_published(PublishResult::Failed);
            }
        }
    }
}
