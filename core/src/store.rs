//! The durable Campaign Store and dead-letter seams.
//!
//! The Campaign Store is the relational system of record: campaign metadata,
//! per-tier initial totals, the append-only claim log and the
//! eventually-consistent `opened_count` per tier. It never takes part in claim
//! decisions. Only campaign creation and the Claim Recorder write to it.

use crate::BoxFuture;
use crate::campaign::{Campaign, CampaignId, NewCampaign, TierCounter};
use crate::claim::ClaimEvent;
use chrono::{DateTime, Utc};
use thiserror::Error;

/// Errors from the durable store.
#[derive(Error, Debug, Clone)]
pub enum StoreError {
    /// Connection or pool failure
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    /// A statement failed
    #[error("Database error: {0}")]
    DatabaseError(String),

    /// The claim references a tier the campaign does not have
    #[error("No tier with amount {amount} in campaign {campaign_id}")]
    UnknownTier {
        /// Campaign of the claim
        campaign_id: CampaignId,
        /// Claimed amount
        amount: i64,
    },

    /// Incrementing the opened count would exceed the tier's initial total
    #[error("Tier {amount} of campaign {campaign_id} is already fully recorded")]
    TierExhausted {
        /// Campaign of the claim
        campaign_id: CampaignId,
        /// Claimed amount
        amount: i64,
    },
}

impl StoreError {
    /// Whether retrying the same write can succeed.
    ///
    /// Data errors ([`StoreError::UnknownTier`], [`StoreError::TierExhausted`])
    /// are deterministic and go straight to the dead-letter queue.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable(_) | Self::DatabaseError(_))
    }
}

/// What [`CampaignStore::record_claim`] did with an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordOutcome {
    /// A claim log row was appended and the tier counter incremented
    Recorded,
    /// The `(campaign, user)` pair was already logged; nothing changed
    Duplicate,
}

/// One row of the durable claim log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuditRecord {
    /// Claimant
    pub user_id: String,
    /// Campaign
    pub campaign_id: CampaignId,
    /// Allocated amount
    pub amount: i64,
    /// When the allocation was decided (event timestamp)
    pub claimed_at: DateTime<Utc>,
    /// When the recorder wrote the row
    pub recorded_at: DateTime<Utc>,
}

/// The durable Campaign Store.
pub trait CampaignStore: Send + Sync {
    /// Insert the campaign and all its tiers in one transaction.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the transaction fails; nothing is persisted then.
    fn create_campaign<'a>(
        &'a self,
        campaign: &'a NewCampaign,
    ) -> BoxFuture<'a, Result<Campaign, StoreError>>;

    /// Delete a campaign and its tiers. Compensates a creation whose cache
    /// priming failed.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the delete fails.
    fn delete_campaign(&self, campaign_id: CampaignId) -> BoxFuture<'_, Result<(), StoreError>>;

    /// Load campaign metadata.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the query fails.
    fn get_campaign(
        &self,
        campaign_id: CampaignId,
    ) -> BoxFuture<'_, Result<Option<Campaign>, StoreError>>;

    /// Durable tier counters, ordered by amount.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the query fails.
    fn tier_counters(
        &self,
        campaign_id: CampaignId,
    ) -> BoxFuture<'_, Result<Vec<TierCounter>, StoreError>>;

    /// Append the audit row and increment the tier counter in one transaction.
    ///
    /// Idempotent per `(campaign_id, user_id)`: a redelivered event yields
    /// [`RecordOutcome::Duplicate`] and changes nothing.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the transaction fails; nothing is persisted then.
    fn record_claim<'a>(
        &'a self,
        event: &'a ClaimEvent,
    ) -> BoxFuture<'a, Result<RecordOutcome, StoreError>>;

    /// All audit rows of a campaign.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the query fails.
    fn claim_log(
        &self,
        campaign_id: CampaignId,
    ) -> BoxFuture<'_, Result<Vec<AuditRecord>, StoreError>>;
}

/// Status of a dead-lettered claim event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeadLetterStatus {
    /// Waiting for investigation or replay
    Pending,
    /// Being replayed
    Processing,
    /// Replayed successfully
    Resolved,
    /// Given up on
    Discarded,
}

impl DeadLetterStatus {
    /// Database representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Resolved => "resolved",
            Self::Discarded => "discarded",
        }
    }

    /// Parse the database representation.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::DatabaseError`] for an unknown status.
    pub fn parse(s: &str) -> Result<Self, StoreError> {
        match s {
            "pending" => Ok(Self::Pending),
            "processing" => Ok(Self::Processing),
            "resolved" => Ok(Self::Resolved),
            "discarded" => Ok(Self::Discarded),
            _ => Err(StoreError::DatabaseError(format!(
                "Invalid dead letter status: {s}"
            ))),
        }
    }
}

/// A claim event the recorder gave up on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeadLetter {
    /// Queue entry id
    pub id: i64,
    /// The event that could not be recorded
    pub event: ClaimEvent,
    /// Last error message
    pub error_message: String,
    /// Attempts made before giving up
    pub attempts: i32,
    /// When the entry was created
    pub failed_at: DateTime<Utc>,
    /// Current status
    pub status: DeadLetterStatus,
}

/// Where the recorder parks events it cannot persist.
pub trait DeadLetterQueue: Send + Sync {
    /// Park an event.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the entry cannot be written.
    fn push<'a>(
        &'a self,
        event: &'a ClaimEvent,
        error_message: &'a str,
        attempts: i32,
    ) -> BoxFuture<'a, Result<i64, StoreError>>;

    /// Oldest pending entries first.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the query fails.
    fn list_pending(&self, limit: i64) -> BoxFuture<'_, Result<Vec<DeadLetter>, StoreError>>;

    /// Move an entry to a new status.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the update fails.
    fn update_status(
        &self,
        id: i64,
        status: DeadLetterStatus,
    ) -> BoxFuture<'_, Result<(), StoreError>>;
}
