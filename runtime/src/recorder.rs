//! The Claim Recorder: turns delivered claim events into durable audit rows.
//!
//! # Acknowledgement
//!
//! With the default [`AckPolicy::AfterDurableWrite`] a delivery is only
//! acknowledged once one of these is durable:
//!
//! 1. the audit row plus counter increment ([`RecordResult::Recorded`]),
//! 2. proof that they already exist ([`RecordResult::Duplicate`]),
//! 3. a dead-letter entry ([`RecordResult::DeadLettered`]).
//!
//! If even the dead-letter write fails the delivery is left unacknowledged and
//! the channel redelivers it. Together with the store's uniqueness constraint
//! on `(campaign_id, user_id)` this gives at-least-once delivery with
//! idempotent effects.
//!
//! [`AckPolicy::Always`] acknowledges after a single attempt whatever happens,
//! which silently loses audit rows on failure. It exists to reproduce the
//! legacy behaviour and should not be used in production.

use crate::retry::{RetryPolicy, retry_with_predicate};
use redpacket_core::claim::ClaimEvent;
use redpacket_core::environment::{NoopTelemetry, RecordResult, Telemetry};
use redpacket_core::event_bus::Delivery;
use redpacket_core::store::{
    CampaignStore, DeadLetterQueue, DeadLetterStatus, RecordOutcome, StoreError,
};
use std::sync::Arc;
use thiserror::Error;

/// When the recorder acknowledges a delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AckPolicy {
    /// Acknowledge only after the event is durable (recorded or dead-lettered)
    #[default]
    AfterDurableWrite,
    /// Acknowledge after one attempt regardless of the outcome (at-most-once)
    Always,
}

/// The recorder could neither persist nor dead-letter an event.
///
/// The delivery must not be acknowledged.
#[derive(Error, Debug, Clone)]
#[error("claim event not durable: {record_error}; dead-letter write failed: {dead_letter_error}")]
pub struct RecordError {
    /// Why the claim could not be recorded
    pub record_error: StoreError,
    /// Why it could not be dead-lettered either
    pub dead_letter_error: StoreError,
}

/// Outcome of a dead-letter replay run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplayReport {
    /// Entries now recorded (or found already recorded) and resolved
    pub resolved: usize,
    /// Entries that failed again and went back to pending
    pub failed: usize,
}

/// Writes claim events to the Campaign Store.
pub struct ClaimRecorder {
    store: Arc<dyn CampaignStore>,
    dead_letters: Arc<dyn DeadLetterQueue>,
    retry: RetryPolicy,
    ack_policy: AckPolicy,
    telemetry: Arc<dyn Telemetry>,
}

impl ClaimRecorder {
    /// Create a recorder with the default retry policy and
    /// [`AckPolicy::AfterDurableWrite`].
    #[must_use]
    pub fn new(store: Arc<dyn CampaignStore>, dead_letters: Arc<dyn DeadLetterQueue>) -> Self {
        Self {
            store,
            dead_letters,
            retry: RetryPolicy::builder().max_retries(5).build(),
            ack_policy: AckPolicy::default(),
            telemetry: Arc::new(NoopTelemetry),
        }
    }

    /// Set the retry policy for store writes.
    #[must_use]
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Set the acknowledgement policy.
    #[must_use]
    pub const fn with_ack_policy(mut self, ack_policy: AckPolicy) -> Self {
        self.ack_policy = ack_policy;
        self
    }

    /// Set the telemetry sink.
    #[must_use]
    pub fn with_telemetry(mut self, telemetry: Arc<dyn Telemetry>) -> Self {
        self.telemetry = telemetry;
        self
    }

    /// The acknowledgement policy in effect.
    #[must_use]
    pub const fn ack_policy(&self) -> AckPolicy {
        self.ack_policy
    }

    /// Make one event durable.
    ///
    /// # Errors
    ///
    /// Returns [`RecordError`] only under [`AckPolicy::AfterDurableWrite`]
    /// when neither the claim nor its dead-letter entry could be written.
    pub async fn record(&self, event: &ClaimEvent) -> Result<RecordResult, RecordError> {
        let result = match self.ack_policy {
            AckPolicy::Always => self.record_once(event).await,
            AckPolicy::AfterDurableWrite => self.record_durably(event).await,
        };
        if let Ok(result) = result {
            self.telemetry.event_recorded(result);
        }
        result
    }

    /// Record the delivery's event, then acknowledge it if it is durable.
    ///
    /// # Errors
    ///
    /// Returns [`RecordError`] when the delivery was left unacknowledged; the
    /// subscription should be restarted so the event is redelivered.
    pub async fn handle(&self, delivery: Delivery) -> Result<RecordResult, RecordError> {
        let result = self.record(&delivery.event).await?;
        tracing::debug!(
            partition = delivery.partition,
            offset = delivery.offset,
            outcome = result.as_str(),
            "Delivery acknowledged"
        );
        delivery.ack();
        Ok(result)
    }

    async fn record_once(&self, event: &ClaimEvent) -> Result<RecordResult, RecordError> {
        match self.store.record_claim(event).await {
            Ok(outcome) => Ok(log_recorded(event, outcome)),
            Err(e) => {
                tracing::error!(
                    campaign_id = event.campaign_id.get(),
                    user_id = %event.user_id,
                    amount = event.amount,
                    error = %e,
                    "Failed to record claim, acknowledging anyway"
                );
                Ok(RecordResult::Dropped)
            }
        }
    }

    async fn record_durably(&self, event: &ClaimEvent) -> Result<RecordResult, RecordError> {
        let attempt = retry_with_predicate(
            &self.retry,
            || self.store.record_claim(event),
            StoreError::is_transient,
        )
        .await;

        let failure = match attempt {
            Ok(outcome) => return Ok(log_recorded(event, outcome)),
            Err(failure) => failure,
        };

        let attempts = i32::try_from(failure.attempts).unwrap_or(i32::MAX);
        match self
            .dead_letters
            .push(event, &failure.error.to_string(), attempts)
            .await
        {
            Ok(dlq_id) => {
                tracing::warn!(
                    dlq_id,
                    campaign_id = event.campaign_id.get(),
                    user_id = %event.user_id,
                    attempts,
                    error = %failure.error,
                    "Claim event dead-lettered"
                );
                Ok(RecordResult::DeadLettered)
            }
            Err(dead_letter_error) => {
                tracing::error!(
                    campaign_id = event.campaign_id.get(),
                    user_id = %event.user_id,
                    error = %failure.error,
                    dlq_error = %dead_letter_error,
                    "Claim event neither recorded nor dead-lettered"
                );
                Err(RecordError {
                    record_error: failure.error,
                    dead_letter_error,
                })
            }
        }
    }

    /// Replay up to `limit` pending dead letters through the store.
    ///
    /// Each entry is marked `processing`, written once, then marked
    /// `resolved` or put back to `pending`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the queue itself cannot be read or updated.
    pub async fn replay_dead_letters(&self, limit: i64) -> Result<ReplayReport, StoreError> {
        let mut report = ReplayReport::default();

        for entry in self.dead_letters.list_pending(limit).await? {
            self.dead_letters
                .update_status(entry.id, DeadLetterStatus::Processing)
                .await?;

            match self.store.record_claim(&entry.event).await {
                Ok(outcome) => {
                    log_recorded(&entry.event, outcome);
                    self.dead_letters
                        .update_status(entry.id, DeadLetterStatus::Resolved)
                        .await?;
                    report.resolved += 1;
                }
                Err(e) => {
                    tracing::warn!(dlq_id = entry.id, error = %e, "Dead letter replay failed");
                    self.dead_letters
                        .update_status(entry.id, DeadLetterStatus::Pending)
                        .await?;
                    report.failed += 1;
                }
            }
        }

        if report != ReplayReport::default() {
            tracing::info!(
                resolved = report.resolved,
                failed = report.failed,
                "Dead letter replay finished"
            );
        }
        Ok(report)
    }
}

fn log_recorded(event: &ClaimEvent, outcome: RecordOutcome) -> RecordResult {
    match outcome {
        RecordOutcome::Recorded => {
            tracing::debug!(
                campaign_id = event.campaign_id.get(),
                user_id = %event.user_id,
                amount = event.amount,
                "Claim recorded"
            );
            RecordResult::Recorded
        }
        RecordOutcome::Duplicate => {
            tracing::debug!(
                campaign_id = event.campaign_id.get(),
                user_id = %event.user_id,
                "Duplicate claim event ignored"
            );
            RecordResult::Duplicate
        }
    }
}
