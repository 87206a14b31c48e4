//! Injected environment dependencies: clock and telemetry.

use crate::claim::ClaimStatus;
use chrono::{DateTime, Utc};
use std::time::Duration;

/// Clock trait - abstracts time operations for testability
///
/// The orchestrator reads the current time through this trait so tests can
/// probe the campaign window boundaries exactly.
///
/// # Examples
///
/// ```
/// use redpacket_core::environment::{Clock, SystemClock};
///
/// let clock = SystemClock;
/// let _now = clock.now();
/// ```
pub trait Clock: Send + Sync {
    /// Get the current time
    fn now(&self) -> DateTime<Utc>;
}

/// Wall-clock time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Outcome label of one publish attempt cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PublishResult {
    /// The channel acknowledged the event
    Published,
    /// Every retry failed; the event did not reach the channel
    Failed,
    /// The publish queue was full; the event was never attempted
    Dropped,
}

impl PublishResult {
    /// Metric label.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Published => "published",
            Self::Failed => "failed",
            Self::Dropped => "dropped",
        }
    }
}

/// What the recorder did with one delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecordResult {
    /// Audit row appended and counter incremented
    Recorded,
    /// Redelivery of an event already recorded
    Duplicate,
    /// Parked in the dead-letter queue
    DeadLettered,
    /// Acknowledged without a durable write
    Dropped,
}

impl RecordResult {
    /// Metric label.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Recorded => "recorded",
            Self::Duplicate => "duplicate",
            Self::DeadLettered => "dead_lettered",
            Self::Dropped => "dropped",
        }
    }
}

/// Injected observability interface.
///
/// Components receive an `Arc<dyn Telemetry>` instead of writing to a
/// process-wide registry, so tests can assert on what was reported.
pub trait Telemetry: Send + Sync {
    /// A claim was decided by the cache.
    fn claim_decided(&self, status: ClaimStatus, elapsed: Duration);

    /// A claim failed with an infrastructure error.
    fn claim_failed(&self, elapsed: Duration);

    /// A campaign was persisted and primed.
    fn campaign_created(&self);

    /// A claim event left the publisher.
    fn event_published(&self, result: PublishResult);

    /// The recorder finished with a delivery.
    fn event_recorded(&self, result: RecordResult);
}

/// Telemetry that reports nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopTelemetry;

impl Telemetry for NoopTelemetry {
    fn claim_decided(&self, _status: ClaimStatus, _elapsed: Duration) {}

    fn claim_failed(&self, _elapsed: Duration) {}

    fn campaign_created(&self) {}

    fn event_published(&self, _result: PublishResult) {}

    fn event_recorded(&self, _result: RecordResult) {}
}
