//! In-memory message channel with consumer-group offset semantics.

use redpacket_core::BoxFuture;
use redpacket_core::claim::ClaimEvent;
use redpacket_core::event_bus::{Delivery, DeliveryStream, EventBus, EventBusError};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::{Notify, mpsc};

const TOPIC: &str = "claim_events";

#[derive(Debug, Default)]
struct Log {
    events: Vec<ClaimEvent>,
    committed: usize,
}

#[derive(Debug, Default)]
struct Shared {
    log: Mutex<Log>,
    appended: Notify,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Log> {
        self.log.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn event_at(&self, offset: usize) -> Option<ClaimEvent> {
        self.lock().events.get(offset).cloned()
    }

    fn commit(&self, next_offset: usize) {
        let mut log = self.lock();
        log.committed = log.committed.max(next_offset);
    }
}

/// Single-partition, single-group message channel kept in process memory.
///
/// Behaves like the Kafka consumer group the recorder runs in production:
///
/// - a subscription starts at the group's committed offset
/// - deliveries are handed out one at a time, in publish order
/// - [`Delivery::ack`] commits the offset and releases the next delivery
/// - a delivery dropped without an ack ends the subscription; the next
///   subscription starts from the same message again
///
/// # Failure injection
///
/// - [`fail_publishes`](Self::fail_publishes): publishing fails until reset
/// - [`fail_next_publishes`](Self::fail_next_publishes): the next `n` publishes fail
/// - [`fail_subscribes`](Self::fail_subscribes): subscribing fails until reset
#[derive(Debug, Clone, Default)]
pub struct InMemoryEventBus {
    shared: Arc<Shared>,
    failing: Arc<AtomicBool>,
    failing_next: Arc<AtomicU32>,
    failing_subscribes: Arc<AtomicBool>,
}

impl InMemoryEventBus {
    /// Create an empty channel.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make publishing fail (or succeed again).
    pub fn fail_publishes(&self, fail: bool) {
        self.failing.store(fail, Ordering::SeqCst);
    }

    /// Fail the next `n` publishes.
    pub fn fail_next_publishes(&self, n: u32) {
        self.failing_next.store(n, Ordering::SeqCst);
    }

    /// Make subscribing fail (or succeed again).
    pub fn fail_subscribes(&self, fail: bool) {
        self.failing_subscribes.store(fail, Ordering::SeqCst);
    }

    /// Every event published so far, in order.
    #[must_use]
    pub fn published(&self) -> Vec<ClaimEvent> {
        self.shared.lock().events.clone()
    }

    /// Offset of the next message the group will receive.
    #[must_use]
    pub fn committed_offset(&self) -> usize {
        self.shared.lock().committed
    }

    /// Published but not yet acknowledged messages.
    #[must_use]
    pub fn lag(&self) -> usize {
        let log = self.shared.lock();
        log.events.len() - log.committed
    }

    fn publish_failure(&self) -> Option<EventBusError> {
        let injected = self.failing.load(Ordering::SeqCst)
            || self
                .failing_next
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
        injected.then(|| EventBusError::PublishFailed {
            topic: TOPIC.to_string(),
            reason: "not enough in-sync replicas".to_string(),
        })
    }
}

impl EventBus for InMemoryEventBus {
    fn publish<'a>(&'a self, event: &'a ClaimEvent) -> BoxFuture<'a, Result<(), EventBusError>> {
        Box::pin(async move {
            if let Some(error) = self.publish_failure() {
                return Err(error);
            }
            self.shared.lock().events.push(event.clone());
            self.shared.appended.notify_waiters();
            Ok(())
        })
    }

    fn subscribe(&self) -> BoxFuture<'_, Result<DeliveryStream, EventBusError>> {
        Box::pin(async move {
            if self.failing_subscribes.load(Ordering::SeqCst) {
                return Err(EventBusError::SubscriptionFailed {
                    topic: TOPIC.to_string(),
                    reason: "group coordinator not available".to_string(),
                });
            }

            let shared = Arc::clone(&self.shared);
            let (tx, rx) = mpsc::channel::<Result<Delivery, EventBusError>>(1);

            tokio::spawn(async move {
                let mut offset = shared.lock().committed;
                loop {
                    // Registered before the check so a concurrent publish is not missed.
                    let appended = shared.appended.notified();
                    let Some(event) = shared.event_at(offset) else {
                        tokio::select! {
                            () = appended => continue,
                            () = tx.closed() => break,
                        }
                    };

                    let (delivery, acked) =
                        Delivery::new(event, 0, i64::try_from(offset).unwrap_or(i64::MAX));
                    if tx.send(Ok(delivery)).await.is_err() {
                        break;
                    }
                    if acked.await.is_err() {
                        break;
                    }
                    offset += 1;
                    shared.commit(offset);
                }
            });

            let stream = async_stream::stream! {
                let mut rx = rx;
                while let Some(item) = rx.recv().await {
                    yield item;
                }
            };

            Ok(Box::pin(stream) as DeliveryStream)
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use chrono::Utc;
    use futures::StreamExt;
    use redpacket_core::campaign::CampaignId;

    fn event(user: &str) -> ClaimEvent {
        ClaimEvent::new(user, CampaignId::new(1), 10, Utc::now())
    }

    async fn wait_for_commit(bus: &InMemoryEventBus, offset: usize) {
        tokio::time::timeout(std::time::Duration::from_secs(1), async {
            while bus.committed_offset() < offset {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn acked_deliveries_advance_the_group() {
        let bus = InMemoryEventBus::new();
        bus.publish(&event("a")).await.unwrap();
        bus.publish(&event("b")).await.unwrap();

        let mut stream = bus.subscribe().await.unwrap();
        let first = stream.next().await.unwrap().unwrap();
        assert_eq!(first.event.user_id, "a");
        first.ack();
        let second = stream.next().await.unwrap().unwrap();
        assert_eq!(second.event.user_id, "b");
        second.ack();

        wait_for_commit(&bus, 2).await;
        assert_eq!(bus.lag(), 0);
    }

    #[tokio::test]
    async fn dropped_delivery_is_redelivered_to_next_subscription() {
        let bus = InMemoryEventBus::new();
        bus.publish(&event("a")).await.unwrap();

        let mut stream = bus.subscribe().await.unwrap();
        let delivery = stream.next().await.unwrap().unwrap();
        drop(delivery);
        assert!(stream.next().await.is_none());

        let mut again = bus.subscribe().await.unwrap();
        let redelivered = again.next().await.unwrap().unwrap();
        assert_eq!(redelivered.event.user_id, "a");
        assert_eq!(redelivered.offset, 0);
    }

    #[tokio::test]
    async fn waiting_subscription_sees_later_publish() {
        let bus = InMemoryEventBus::new();
        let mut stream = bus.subscribe().await.unwrap();

        let publisher = bus.clone();
        tokio::spawn(async move {
            publisher.publish(&event("late")).await.unwrap();
        });

        let delivery = tokio::time::timeout(std::time::Duration::from_secs(1), stream.next())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(delivery.event.user_id, "late");
    }

    #[tokio::test]
    async fn injected_publish_failures() {
        let bus = InMemoryEventBus::new();
        bus.fail_next_publishes(1);
        assert!(bus.publish(&event("a")).await.is_err());
        assert!(bus.publish(&event("a")).await.is_ok());
        assert_eq!(bus.published().len(), 1);
    }
}
