//! Message channel abstraction between the fast path and the durable store.
//!
//! Successful claims are published as [`ClaimEvent`]s; the Claim Recorder
//! consumes them and writes the audit log. The channel exists purely for
//! durability and reporting. It never takes part in allocation decisions.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐
//! │ AllocationCache │◄─── 1. Decision (already visible)
//! └────────┬────────┘
//!          │ OK
//!          ▼
//! ┌─────────────────┐
//! │ 2. Publish to   │
//! │    Event Bus    │◄─── acks from all replicas
//! └────────┬────────┘
//!          │
//!          ▼
//! ┌─────────────────┐
//! │ 3. Recorder     │◄─── ack AFTER the durable write
//! └─────────────────┘
//! ```
//!
//! # Key Principles
//!
//! - **Cache first**: an event is only published after its allocation is visible
//! - **Ordered within partition**: events are keyed by campaign id
//! - **At-least-once**: a delivery that is not acknowledged is delivered again
//!   after the consumer restarts, so the recorder must be idempotent
//!
//! # Implementations
//!
//! - `InMemoryEventBus` (`redpacket-testing`) - for tests
//! - `RedpandaEventBus` (`redpacket-redpanda`) - Kafka-compatible, for production

use crate::BoxFuture;
use crate::claim::ClaimEvent;
use futures::Stream;
use futures::channel::oneshot;
use std::pin::Pin;
use thiserror::Error;

/// Errors that can occur during event bus operations.
#[derive(Error, Debug, Clone)]
pub enum EventBusError {
    /// Failed to connect to the event bus
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Failed to publish an event to a topic
    #[error("Publish failed for topic '{topic}': {reason}")]
    PublishFailed {
        /// The topic that failed
        topic: String,
        /// The reason for failure
        reason: String,
    },

    /// Failed to subscribe to the topic
    #[error("Subscription failed for topic '{topic}': {reason}")]
    SubscriptionFailed {
        /// The topic that failed to subscribe
        topic: String,
        /// The reason for failure
        reason: String,
    },

    /// A message could not be decoded as a claim event
    #[error("Deserialization failed: {0}")]
    DeserializationFailed(String),

    /// Failed to commit a consumed offset
    #[error("Commit failed: {0}")]
    CommitFailed(String),

    /// Network or transport error
    #[error("Transport error: {0}")]
    TransportError(String),
}

/// One consumed claim event awaiting acknowledgement.
///
/// Calling [`Delivery::ack`] lets the channel commit the message. Dropping a
/// delivery without acknowledging it leaves the message uncommitted and ends
/// the subscription, so the message is delivered again to the next consumer.
#[derive(Debug)]
pub struct Delivery {
    /// The decoded event
    pub event: ClaimEvent,
    /// Partition the message came from
    pub partition: i32,
    /// Offset within the partition
    pub offset: i64,
    ack: oneshot::Sender<()>,
}

impl Delivery {
    /// Create a delivery together with the receiver the channel waits on.
    #[must_use]
    pub fn new(event: ClaimEvent, partition: i32, offset: i64) -> (Self, oneshot::Receiver<()>) {
        let (ack, acked) = oneshot::channel();
        (
            Self {
                event,
                partition,
                offset,
                ack,
            },
            acked,
        )
    }

    /// Acknowledge the message; it will not be delivered again.
    pub fn ack(self) {
        // The receiver is gone only if the subscription already ended.
        let _ = self.ack.send(());
    }
}

/// Stream of deliveries from a subscription.
///
/// Each item is a `Result`; an error item reports a transport or decoding
/// problem and does not end the stream by itself.
pub type DeliveryStream = Pin<Box<dyn Stream<Item = Result<Delivery, EventBusError>> + Send>>;

/// Trait for event bus implementations.
///
/// # Thread Safety
///
/// All implementations must be `Send + Sync`: the publisher task and request
/// handlers share one instance.
///
/// # Dyn Compatibility
///
/// This trait uses explicit boxed futures instead of `async fn` so it can be
/// used as `Arc<dyn EventBus>`.
pub trait EventBus: Send + Sync {
    /// Publish a claim event.
    ///
    /// Resolves once every in-sync replica acknowledged the write.
    ///
    /// # Errors
    ///
    /// Returns [`EventBusError::PublishFailed`] if the publish operation fails.
    fn publish<'a>(&'a self, event: &'a ClaimEvent) -> BoxFuture<'a, Result<(), EventBusError>>;

    /// Join the consumer group and stream deliveries.
    ///
    /// # Errors
    ///
    /// Returns [`EventBusError::SubscriptionFailed`] if subscription fails.
    fn subscribe(&self) -> BoxFuture<'_, Result<DeliveryStream, EventBusError>>;
}
