//! # Red Packet Testing
//!
//! In-memory implementations of every seam of the red packet service, plus
//! deterministic time and recording telemetry.
//!
//! This crate provides:
//! - [`InMemoryAllocationCache`]: claim decisions with the claim script's semantics
//! - [`InMemoryCampaignStore`] / [`InMemoryDeadLetterQueue`]: the durable side
//! - [`InMemoryEventBus`]: consumer-group channel with acknowledgements
//! - [`FixedClock`]: settable time for window-boundary tests
//! - [`RecordingTelemetry`]: captures what components report
//!
//! All of them support failure injection so error paths can be driven from
//! tests.
//!
//! ## Example
//!
//! ```ignore
//! use redpacket_testing::mocks::{InMemoryAllocationCache, InMemoryCampaignStore, test_clock};
//!
//! #[tokio::test]
//! async fn test_claim_flow() {
//!     let cache = Arc::new(InMemoryAllocationCache::new());
//!     let store = Arc::new(InMemoryCampaignStore::new());
//!     let orchestrator = ClaimOrchestrator::new(store, cache, publisher)
//!         .with_clock(Arc::new(test_clock()));
//!
//!     let outcome = orchestrator.open(campaign.id, "alice").await?;
//!     assert_eq!(outcome.status, ClaimStatus::Ok);
//! }
//! ```

mod cache;
mod event_bus;
mod store;

/// Mock implementations for testing.
pub mod mocks {
    use chrono::{DateTime, Duration, Utc};
    use redpacket_core::claim::ClaimStatus;
    use redpacket_core::environment::{Clock, PublishResult, RecordResult, Telemetry};
    use std::sync::{Mutex, PoisonError};

    pub use crate::cache::InMemoryAllocationCache;
    pub use crate::event_bus::InMemoryEventBus;
    pub use crate::store::{InMemoryCampaignStore, InMemoryDeadLetterQueue};

    /// Fixed clock for deterministic tests
    ///
    /// Returns the same time until moved with [`set`](Self::set) or
    /// [`advance`](Self::advance).
    ///
    /// # Example
    ///
    /// ```
    /// use redpacket_testing::mocks::FixedClock;
    /// use redpacket_core::environment::Clock;
    /// use chrono::Utc;
    ///
    /// let clock = FixedClock::new(Utc::now());
    /// let time1 = clock.now();
    /// let time2 = clock.now();
    /// assert_eq!(time1, time2); // Always the same!
    /// ```
    #[derive(Debug)]
    pub struct FixedClock {
        time: Mutex<DateTime<Utc>>,
    }

    impl FixedClock {
        /// Create a new fixed clock with the given time
        #[must_use]
        pub const fn new(time: DateTime<Utc>) -> Self {
            Self {
                time: Mutex::new(time),
            }
        }

        /// Move the clock to `time`.
        pub fn set(&self, time: DateTime<Utc>) {
            *self.time.lock().unwrap_or_else(PoisonError::into_inner) = time;
        }

        /// Move the clock forward by `by`.
        pub fn advance(&self, by: Duration) {
            let mut time = self.time.lock().unwrap_or_else(PoisonError::into_inner);
            *time += by;
        }
    }

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            *self.time.lock().unwrap_or_else(PoisonError::into_inner)
        }
    }

    /// Create a default fixed clock for tests (2025-01-01 00:00:00 UTC)
    #[must_use]
    pub fn test_clock() -> FixedClock {
        FixedClock::new(DateTime::<Utc>::UNIX_EPOCH + Duration::seconds(1_735_689_600))
    }

    /// One call made on a [`RecordingTelemetry`].
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum TelemetryEvent {
        /// `claim_decided`
        ClaimDecided(ClaimStatus),
        /// `claim_failed`
        ClaimFailed,
        /// `campaign_created`
        CampaignCreated,
        /// `event_published`
        EventPublished(PublishResult),
        /// `event_recorded`
        EventRecorded(RecordResult),
    }

    /// Telemetry that keeps every call for later assertions.
    #[derive(Debug, Default)]
    pub struct RecordingTelemetry {
        events: Mutex<Vec<TelemetryEvent>>,
    }

    impl RecordingTelemetry {
        /// Create an empty recorder.
        #[must_use]
        pub fn new() -> Self {
            Self::default()
        }

        /// Everything reported so far, in order.
        #[must_use]
        pub fn events(&self) -> Vec<TelemetryEvent> {
            self.events
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .clone()
        }

        /// How many times `event` was reported.
        #[must_use]
        pub fn count(&self, event: TelemetryEvent) -> usize {
            self.events
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .iter()
                .filter(|&&e| e == event)
                .count()
        }

        fn push(&self, event: TelemetryEvent) {
            self.events
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(event);
        }
    }

    impl Telemetry for RecordingTelemetry {
        fn claim_decided(&self, status: ClaimStatus, _elapsed: std::time::Duration) {
            self.push(TelemetryEvent::ClaimDecided(status));
        }

        fn claim_failed(&self, _elapsed: std::time::Duration) {
            self.push(TelemetryEvent::ClaimFailed);
        }

        fn campaign_created(&self) {
            self.push(TelemetryEvent::CampaignCreated);
        }

        fn event_published(&self, result: PublishResult) {
            self.push(TelemetryEvent::EventPublished(result));
        }

        fn event_recorded(&self, result: RecordResult) {
            self.push(TelemetryEvent::EventRecorded(result));
        }
    }
}

// Re-export commonly used items
pub use mocks::{
    FixedClock, InMemoryAllocationCache, InMemoryCampaignStore, InMemoryDeadLetterQueue,
    InMemoryEventBus, RecordingTelemetry, TelemetryEvent, test_clock,
};
