//! Orchestrator-level errors.

use redpacket_core::cache::CacheError;
use redpacket_core::campaign::{CampaignId, ValidationError};
use redpacket_core::event_bus::EventBusError;
use redpacket_core::store::StoreError;
use thiserror::Error;

/// Everything a campaign operation can fail with.
///
/// `Validation`, `NotFound` and `Inactive` are deterministic business errors
/// and must not be retried. The remaining variants are infrastructure
/// failures; a retried claim is safe because the claim script is idempotent
/// per `(campaign, user)`.
#[derive(Error, Debug, Clone)]
pub enum CampaignError {
    /// Rejected input
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// The campaign does not exist (or is not primed)
    #[error("campaign {0} not found")]
    NotFound(CampaignId),

    /// The campaign exists but `now` is outside its window
    #[error("campaign {0} is not active")]
    Inactive(CampaignId),

    /// The Allocation Cache failed
    #[error(transparent)]
    Cache(#[from] CacheError),

    /// The Campaign Store failed
    #[error(transparent)]
    Store(#[from] StoreError),

    /// The message channel failed
    #[error(transparent)]
    Channel(#[from] EventBusError),
}

impl CampaignError {
    /// Whether the failure is infrastructure rather than a business outcome.
    #[must_use]
    pub const fn is_infrastructure(&self) -> bool {
        matches!(self, Self::Cache(_) | Self::Store(_) | Self::Channel(_))
    }
}
