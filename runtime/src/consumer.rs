//! Claim event consumer with automatic reconnection.
//!
//! [`ClaimConsumer`] runs the subscribe-process-reconnect loop that feeds the
//! [`ClaimRecorder`]:
//!
//! ```text
//! loop {
//!     subscribe (retry after delay on failure)
//!     for each delivery:
//!         recorder.handle(delivery)      // acks once durable
//!         if not durable: resubscribe    // the delivery comes back
//!     stream ended: resubscribe after delay
//! }
//! ```
//!
//! A delivery that has been taken off the stream is always handled to
//! completion; shutdown is only observed between deliveries.

use crate::recorder::ClaimRecorder;
use futures::StreamExt;
use redpacket_core::event_bus::{DeliveryStream, EventBus};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{error, info, warn};

/// Why a stream stopped being processed.
enum StreamEnd {
    Shutdown,
    Ended,
    NotDurable,
}

/// Consumes claim events and hands them to the recorder.
pub struct ClaimConsumer {
    name: String,
    event_bus: Arc<dyn EventBus>,
    recorder: Arc<ClaimRecorder>,
    shutdown: broadcast::Receiver<()>,
    retry_delay: Duration,
}

impl ClaimConsumer {
    /// Create a consumer with the default retry delay (5 seconds).
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        event_bus: Arc<dyn EventBus>,
        recorder: Arc<ClaimRecorder>,
        shutdown: broadcast::Receiver<()>,
    ) -> Self {
        Self {
            name: name.into(),
            event_bus,
            recorder,
            shutdown,
            retry_delay: Duration::from_secs(5),
        }
    }

    /// Set the delay before resubscribing after a failure.
    #[must_use]
    pub const fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    /// Spawn the consumer as a background task.
    #[must_use]
    pub fn spawn(mut self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            self.run().await;
        })
    }

    /// Run until a shutdown signal is received.
    pub async fn run(&mut self) {
        info!(consumer = %self.name, "Claim consumer started");

        loop {
            tokio::select! {
                _ = self.shutdown.recv() => {
                    info!(consumer = %self.name, "Claim consumer received shutdown signal");
                    break;
                }
                subscribe_result = self.event_bus.subscribe() => {
                    match subscribe_result {
                        Ok(mut stream) => {
                            info!(consumer = %self.name, "Subscribed to claim events");

                            match self.process_stream(&mut stream).await {
                                StreamEnd::Shutdown => break,
                                StreamEnd::Ended => {
                                    warn!(consumer = %self.name, "Event stream ended, reconnecting in {:?}", self.retry_delay);
                                }
                                StreamEnd::NotDurable => {
                                    warn!(consumer = %self.name, "Delivery left unacknowledged, resubscribing in {:?}", self.retry_delay);
                                }
                            }
                        }
                        Err(e) => {
                            error!(
                                consumer = %self.name,
                                error = %e,
                                "Failed to subscribe to event bus, retrying in {:?}",
                                self.retry_delay
                            );
                        }
                    }

                    // Dropping the stream above releases the group membership.
                    if self.wait_or_shutdown().await {
                        break;
                    }
                }
            }
        }

        info!(consumer = %self.name, "Claim consumer stopped");
    }

    async fn process_stream(&mut self, stream: &mut DeliveryStream) -> StreamEnd {
        loop {
            tokio::select! {
                _ = self.shutdown.recv() => {
                    info!(consumer = %self.name, "Claim consumer received shutdown signal during processing");
                    return StreamEnd::Shutdown;
                }
                next = stream.next() => match next {
                    Some(Ok(delivery)) => {
                        if let Err(e) = self.recorder.handle(delivery).await {
                            error!(consumer = %self.name, error = %e, "Claim event is not durable");
                            return StreamEnd::NotDurable;
                        }
                    }
                    Some(Err(e)) => {
                        error!(consumer = %self.name, error = %e, "Error receiving claim event");
                    }
                    None => return StreamEnd::Ended,
                },
            }
        }
    }

    /// Sleep for the retry delay. Returns `true` if shutdown arrived first.
    async fn wait_or_shutdown(&mut self) -> bool {
        tokio::select! {
            _ = self.shutdown.recv() => {
                info!(consumer = %self.name, "Claim consumer received shutdown signal");
                true
            }
            () = tokio::time::sleep(self.retry_delay) => false,
        }
    }
}
