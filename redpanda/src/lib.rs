//! Redpanda claim event channel for the red packet service.
//!
//! This crate implements the [`EventBus`] trait from `redpacket-core` on top of
//! rdkafka, so it works against Redpanda or any Kafka-compatible cluster.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐
//! │  ClaimPublisher │
//! └────────┬────────┘
//!          │ JSON, key = campaign id, acks = all
//!          ▼
//! ┌─────────────────┐
//! │  claim_events   │◄─── Durable, replicated log
//! └────────┬────────┘
//!          │ consumer group
//!          ▼
//! ┌─────────────────┐
//! │  ClaimRecorder  │◄─── acks each Delivery after the durable write
//! └─────────────────┘
//! ```
//!
//! # Delivery Semantics
//!
//! **At-least-once delivery** with manual offset commits:
//! - An offset is committed only after the subscriber acknowledged its [`Delivery`]
//! - A delivery dropped without acknowledgement ends the subscription without
//!   committing, so the message is redelivered to the next consumer
//! - Messages that cannot be decoded are logged, reported on the stream and
//!   committed; they can never be recorded
//! - Ordering is guaranteed within a partition, i.e. within one campaign
//!
//! # Example
//!
//! ```no_run
//! use redpacket_redpanda::RedpandaEventBus;
//! use redpacket_core::event_bus::EventBus;
//! use futures::StreamExt;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let event_bus = RedpandaEventBus::builder()
//!     .brokers("localhost:9092")
//!     .topic("claim_events")
//!     .consumer_group("redpacket-claim-consumer")
//!     .build()?;
//!
//! let mut stream = event_bus.subscribe().await?;
//! while let Some(result) = stream.next().await {
//!     match result {
//!         Ok(delivery) => {
//!             println!("Claimed: {:?}", delivery.event);
//!             delivery.ack();
//!         }
//!         Err(e) => eprintln!("Error: {e}"),
//!     }
//! }
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use redpacket_core::BoxFuture;
use redpacket_core::claim::ClaimEvent;
use redpacket_core::event_bus::{Delivery, DeliveryStream, EventBus, EventBusError};
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::message::{BorrowedMessage, Message};
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::util::Timeout;
use std::time::Duration;

/// Default topic for claim events.
pub const DEFAULT_TOPIC: &str = "claim_events";

/// Default consumer group of the Claim Recorder.
pub const DEFAULT_CONSUMER_GROUP: &str = "redpacket-claim-consumer";

/// Redpanda claim event channel.
///
/// # Configuration
///
/// - **Broker addresses**: Bootstrap servers (required)
/// - **Topic**: Where claim events go (default: `claim_events`)
/// - **Producer settings**: Acks (default: `all`), compression, timeout
/// - **Consumer group**: Shared by every recorder instance
/// - **Buffer size**: Decoded messages waiting for the subscriber (default: 1000)
/// - **Offset reset**: Where a new group starts reading (default: `latest`)
///
/// # Example
///
/// ```no_run
/// use redpacket_redpanda::RedpandaEventBus;
///
/// # fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let event_bus = RedpandaEventBus::builder()
///     .brokers("localhost:9092,localhost:9093")
///     .compression("lz4")
///     .build()?;
/// # Ok(())
/// # }
/// ```
pub struct RedpandaEventBus {
    /// Kafka producer for publishing events
    producer: FutureProducer,
    /// Broker addresses (for creating consumers)
    brokers: String,
    /// Claim event topic
    topic: String,
    /// Producer timeout
    timeout: Duration,
    /// Consumer group ID
    consumer_group: String,
    /// Event buffer size for subscribers
    buffer_size: usize,
    /// Auto offset reset policy
    auto_offset_reset: String,
}

impl RedpandaEventBus {
    /// Create an event bus with default configuration.
    ///
    /// # Errors
    ///
    /// Returns [`EventBusError::ConnectionFailed`] if the producer cannot be created.
    pub fn new(brokers: &str) -> Result<Self, EventBusError> {
        Self::builder().brokers(brokers).build()
    }

    /// Create a new builder for configuring the event bus.
    #[must_use]
    pub fn builder() -> RedpandaEventBusBuilder {
        RedpandaEventBusBuilder::default()
    }

    /// Get a reference to the brokers string.
    #[must_use]
    pub fn brokers(&self) -> &str {
        &self.brokers
    }

    /// The claim event topic.
    #[must_use]
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// The consumer group used by [`EventBus::subscribe`].
    #[must_use]
    pub fn consumer_group(&self) -> &str {
        &self.consumer_group
    }

    fn create_consumer(&self) -> Result<StreamConsumer, EventBusError> {
        let consumer: StreamConsumer = ClientConfig::new()
            .set("bootstrap.servers", &self.brokers)
            .set("group.id", &self.consumer_group)
            .set("enable.auto.commit", "false")
            .set("auto.offset.reset", &self.auto_offset_reset)
            .set("session.timeout.ms", "6000")
            .set("enable.partition.eof", "false")
            .create()
            .map_err(|e| EventBusError::SubscriptionFailed {
                topic: self.topic.clone(),
                reason: format!("Failed to create consumer: {e}"),
            })?;

        consumer
            .subscribe(&[self.topic.as_str()])
            .map_err(|e| EventBusError::SubscriptionFailed {
                topic: self.topic.clone(),
                reason: format!("Failed to subscribe to topic: {e}"),
            })?;

        Ok(consumer)
    }
}

/// Builder for configuring a [`RedpandaEventBus`].
///
/// # Example
///
/// ```no_run
/// use redpacket_redpanda::RedpandaEventBus;
/// use std::time::Duration;
///
/// # fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let event_bus = RedpandaEventBus::builder()
///     .brokers("localhost:9092")
///     .topic("claim_events")
///     .timeout(Duration::from_secs(10))
///     .auto_offset_reset("earliest")
///     .build()?;
/// # Ok(())
/// # }
/// ```
#[derive(Default)]
pub struct RedpandaEventBusBuilder {
    brokers: Option<String>,
    topic: Option<String>,
    producer_acks: Option<String>,
    compression: Option<String>,
    timeout: Option<Duration>,
    consumer_group: Option<String>,
    buffer_size: Option<usize>,
    auto_offset_reset: Option<String>,
}

impl RedpandaEventBusBuilder {
    /// Set the broker addresses (comma-separated).
    #[must_use]
    pub fn brokers(mut self, brokers: impl Into<String>) -> Self {
        self.brokers = Some(brokers.into());
        self
    }

    /// Set the claim event topic.
    #[must_use]
    pub fn topic(mut self, topic: impl Into<String>) -> Self {
        self.topic = Some(topic.into());
        self
    }

    /// Set producer acknowledgment mode ("0", "1", or "all").
    ///
    /// Defaults to "all": a claim is only considered published once every
    /// in-sync replica has it.
    #[must_use]
    pub fn producer_acks(mut self, acks: impl Into<String>) -> Self {
        self.producer_acks = Some(acks.into());
        self
    }

    /// Set compression type ("none", "gzip", "snappy", "lz4", "zstd").
    #[must_use]
    pub fn compression(mut self, compression: impl Into<String>) -> Self {
        self.compression = Some(compression.into());
        self
    }

    /// Set producer timeout.
    #[must_use]
    pub const fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Set the consumer group ID.
    #[must_use]
    pub fn consumer_group(mut self, consumer_group: impl Into<String>) -> Self {
        self.consumer_group = Some(consumer_group.into());
        self
    }

    /// Set the buffer between the Kafka consumer and the subscriber.
    ///
    /// Values below 1 are raised to 1.
    #[must_use]
    pub fn buffer_size(mut self, buffer_size: usize) -> Self {
        self.buffer_size = Some(buffer_size.max(1));
        self
    }

    /// Set where a new consumer group starts reading ("earliest" or "latest").
    #[must_use]
    pub fn auto_offset_reset(mut self, policy: impl Into<String>) -> Self {
        self.auto_offset_reset = Some(policy.into());
        self
    }

    /// Build the event bus.
    ///
    /// # Errors
    ///
    /// Returns [`EventBusError::ConnectionFailed`] if:
    /// - Brokers not set
    /// - Cannot create producer
    pub fn build(self) -> Result<RedpandaEventBus, EventBusError> {
        let brokers = self.brokers.ok_or_else(|| {
            EventBusError::ConnectionFailed("Brokers not configured".to_string())
        })?;
        let acks = self.producer_acks.as_deref().unwrap_or("all");
        let compression = self.compression.as_deref().unwrap_or("none");

        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", &brokers)
            .set("message.timeout.ms", "5000")
            .set("acks", acks)
            .set("compression.type", compression)
            .create()
            .map_err(|e| {
                EventBusError::ConnectionFailed(format!("Failed to create producer: {e}"))
            })?;

        let topic = self.topic.unwrap_or_else(|| DEFAULT_TOPIC.to_string());
        let consumer_group = self
            .consumer_group
            .unwrap_or_else(|| DEFAULT_CONSUMER_GROUP.to_string());

        tracing::info!(
            brokers = %brokers,
            topic = %topic,
            consumer_group = %consumer_group,
            acks,
            compression,
            "RedpandaEventBus created"
        );

        Ok(RedpandaEventBus {
            producer,
            brokers,
            topic,
            timeout: self.timeout.unwrap_or(Duration::from_secs(5)),
            consumer_group,
            buffer_size: self.buffer_size.unwrap_or(1000),
            auto_offset_reset: self
                .auto_offset_reset
                .unwrap_or_else(|| "latest".to_string()),
        })
    }
}

fn decode(message: &BorrowedMessage<'_>) -> Result<ClaimEvent, EventBusError> {
    let payload = message.payload().ok_or_else(|| {
        EventBusError::DeserializationFailed("Message has no payload".to_string())
    })?;
    ClaimEvent::from_json(payload).map_err(|e| {
        EventBusError::DeserializationFailed(format!("Failed to decode claim event: {e}"))
    })
}

fn commit(consumer: &StreamConsumer, message: &BorrowedMessage<'_>) {
    if let Err(e) = consumer.commit_message(message, CommitMode::Async) {
        tracing::warn!(
            partition = message.partition(),
            offset = message.offset(),
            error = %e,
            "Failed to commit offset (message may be redelivered)"
        );
    }
}

impl EventBus for RedpandaEventBus {
    fn publish<'a>(&'a self, event: &'a ClaimEvent) -> BoxFuture<'a, Result<(), EventBusError>> {
        Box::pin(async move {
            let payload = event.to_json().map_err(|e| EventBusError::PublishFailed {
                topic: self.topic.clone(),
                reason: format!("Failed to serialize event: {e}"),
            })?;

            // One campaign, one partition: per-campaign ordering.
            let key = event.campaign_id.to_string();
            let record = FutureRecord::to(&self.topic).payload(&payload).key(&key);

            match self.producer.send(record, Timeout::After(self.timeout)).await {
                Ok((partition, offset)) => {
                    tracing::debug!(
                        topic = %self.topic,
                        partition,
                        offset,
                        campaign_id = event.campaign_id.get(),
                        user_id = %event.user_id,
                        "Claim event published"
                    );
                    Ok(())
                }
                Err((kafka_error, _)) => {
                    tracing::error!(
                        topic = %self.topic,
                        error = %kafka_error,
                        "Failed to publish claim event"
                    );
                    Err(EventBusError::PublishFailed {
                        topic: self.topic.clone(),
                        reason: kafka_error.to_string(),
                    })
                }
            }
        })
    }

    fn subscribe(&self) -> BoxFuture<'_, Result<DeliveryStream, EventBusError>> {
        Box::pin(async move {
            let consumer = self.create_consumer()?;

            tracing::info!(
                topic = %self.topic,
                consumer_group = %self.consumer_group,
                buffer_size = self.buffer_size,
                auto_offset_reset = %self.auto_offset_reset,
                manual_commit = true,
                "Subscribed to claim events"
            );

            let (tx, rx) = tokio::sync::mpsc::channel(self.buffer_size);

            // The task owns the consumer and commits each offset only after
            // the subscriber acknowledged the delivery.
            tokio::spawn(async move {
                use futures::StreamExt;

                let mut stream = consumer.stream();

                while let Some(msg_result) = stream.next().await {
                    let message = match msg_result {
                        Ok(message) => message,
                        Err(e) => {
                            let err = EventBusError::TransportError(format!(
                                "Failed to receive message: {e}"
                            ));
                            if tx.send(Err(err)).await.is_err() {
                                break;
                            }
                            continue;
                        }
                    };

                    let event = match decode(&message) {
                        Ok(event) => event,
                        Err(err) => {
                            tracing::warn!(
                                partition = message.partition(),
                                offset = message.offset(),
                                error = %err,
                                "Skipping undecodable claim message"
                            );
                            if tx.send(Err(err)).await.is_err() {
                                break;
                            }
                            commit(&consumer, &message);
                            continue;
                        }
                    };

                    let (delivery, acked) =
                        Delivery::new(event, message.partition(), message.offset());
                    if tx.send(Ok(delivery)).await.is_err() {
                        tracing::debug!("Subscriber dropped, exiting consumer task");
                        break;
                    }

                    if acked.await.is_err() {
                        tracing::warn!(
                            partition = message.partition(),
                            offset = message.offset(),
                            "Delivery dropped without ack, stopping so it is redelivered"
                        );
                        break;
                    }
                    commit(&consumer, &message);
                }

                tracing::debug!("Consumer task exiting");
            });

            let stream = async_stream::stream! {
                let mut rx = rx;
                while let Some(result) = rx.recv().await {
                    yield result;
                }
            };

            Ok(Box::pin(stream) as DeliveryStream)
        })
    }
}
