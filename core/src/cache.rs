//! The Allocation Cache seam.
//!
//! The cache holds, per campaign, the active window, one remaining counter per
//! tier and the opened map (`user_id → amount`). It is the **sole source of
//! truth for claim decisions**: every claim is adjudicated by
//! [`AllocationCache::run_claim`], which must execute as one indivisible unit
//! with respect to every other claim against the same campaign.
//!
//! # Invariants an implementation must uphold
//!
//! - `remaining` never drops below zero
//! - at most one allocation per `(campaign, user)`; replays return the original amount
//! - `initial_total - remaining == allocations of that tier` at every instant
//! - counters are only ever decremented by `run_claim`
//!
//! # Implementations
//!
//! - `RedisAllocationCache` (`redpacket-redis`) - Lua script on a Redis server
//! - `InMemoryAllocationCache` (`redpacket-testing`) - per-campaign mutex

use crate::BoxFuture;
use crate::campaign::{CampaignId, CampaignWindow, Inventory};
use crate::claim::{ClaimOutcome, TierPolicy};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use thiserror::Error;

/// Infrastructure failures of the Allocation Cache.
///
/// None of these is a business outcome. Callers must not map them to
/// `SOLD_OUT`, `ALREADY_OPENED` or any other claim status.
#[derive(Error, Debug, Clone)]
pub enum CacheError {
    /// The cache could not be reached
    #[error("Cache unavailable: {0}")]
    Unavailable(String),

    /// A command or script failed on the server
    #[error("Cache command failed: {0}")]
    CommandFailed(String),

    /// The claim script replied with something other than `{status, amount}`
    #[error("Unexpected claim script reply: {0}")]
    UnexpectedReply(String),
}

/// One claim request, as handed to the claim script.
#[derive(Debug, Clone, PartialEq)]
pub struct ClaimRequest {
    /// Campaign being claimed from
    pub campaign_id: CampaignId,
    /// Claimant; never empty
    pub user_id: String,
    /// Decision time
    pub now: DateTime<Utc>,
    /// Tier-selection policy
    pub policy: TierPolicy,
    /// Random roll in `[0, 1)` consumed by random policies
    pub roll: f64,
}

/// The Allocation Cache.
///
/// # Dyn Compatibility
///
/// Methods return boxed futures so the orchestrator can hold an
/// `Arc<dyn AllocationCache>`.
pub trait AllocationCache: Send + Sync {
    /// Seed a campaign: set the window, set one counter per tier and clear
    /// the opened map, as a single atomic batch.
    ///
    /// Must not be called twice for the same campaign with different data.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError`] if the batch could not be applied.
    fn prime_campaign(
        &self,
        campaign_id: CampaignId,
        window: CampaignWindow,
        inventory: &Inventory,
    ) -> BoxFuture<'_, Result<(), CacheError>>;

    /// Run the claim script.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError`] only for infrastructure failures; every business
    /// result is a [`ClaimOutcome`].
    fn run_claim(&self, request: ClaimRequest) -> BoxFuture<'_, Result<ClaimOutcome, CacheError>>;

    /// Remove every key of a campaign. Used to compensate a failed creation.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError`] if the keys could not be removed.
    fn evict_campaign(&self, campaign_id: CampaignId) -> BoxFuture<'_, Result<(), CacheError>>;

    /// Cached window, if the campaign is primed.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError`] if the cache cannot be read.
    fn window(
        &self,
        campaign_id: CampaignId,
    ) -> BoxFuture<'_, Result<Option<CampaignWindow>, CacheError>>;

    /// Remaining counter per configured amount.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError`] if the cache cannot be read.
    fn remaining(&self, campaign_id: CampaignId) -> BoxFuture<'_, Result<Inventory, CacheError>>;

    /// Allocation held by one user, if any.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError`] if the cache cannot be read.
    fn allocation<'a>(
        &'a self,
        campaign_id: CampaignId,
        user_id: &'a str,
    ) -> BoxFuture<'a, Result<Option<i64>, CacheError>>;

    /// The full opened map.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError`] if the cache cannot be read.
    fn allocations(
        &self,
        campaign_id: CampaignId,
    ) -> BoxFuture<'_, Result<HashMap<String, i64>, CacheError>>;
}
