//! The Claim Orchestrator.
//!
//! Campaign creation writes the Campaign Store first and primes the Allocation
//! Cache second. A failed priming is compensated by deleting the durable rows,
//! so a campaign is either claimable or absent.
//!
//! Claims are decided entirely by the cache. The orchestrator only supplies
//! the decision time, the tier policy and a random roll, translates the
//! outcome, and hands successful allocations to the [`ClaimPublisher`]
//! without waiting for them to be published.

use crate::error::CampaignError;
use crate::publisher::ClaimPublisher;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use redpacket_core::cache::{AllocationCache, ClaimRequest};
use redpacket_core::campaign::{Campaign, CampaignId, NewCampaign, ValidationError};
use redpacket_core::claim::{ClaimEvent, ClaimOutcome, ClaimStatus, TierPolicy};
use redpacket_core::environment::{Clock, NoopTelemetry, SystemClock, Telemetry};
use redpacket_core::store::CampaignStore;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;

/// One tier in a [`CampaignOverview`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TierOverview {
    /// Reward amount
    pub amount: i64,
    /// Packets configured at creation
    pub initial_total: i64,
    /// Claims recorded durably so far (eventually consistent)
    pub opened_count: i64,
    /// Packets left according to the cache, if it could be read
    pub remaining: Option<i64>,
}

/// Durable campaign metadata with durable and cached tier state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CampaignOverview {
    /// The campaign
    pub campaign: Campaign,
    /// Tiers ordered by amount
    pub tiers: Vec<TierOverview>,
}

/// Creates campaigns and adjudicates claims.
pub struct ClaimOrchestrator {
    store: Arc<dyn CampaignStore>,
    cache: Arc<dyn AllocationCache>,
    publisher: ClaimPublisher,
    clock: Arc<dyn Clock>,
    telemetry: Arc<dyn Telemetry>,
    policy: TierPolicy,
    /// Set by [`ClaimOrchestrator::with_seed`]; otherwise rolls come from the
    /// thread-local generator.
    seeded_rng: Option<Mutex<StdRng>>,
}

impl ClaimOrchestrator {
    /// Create an orchestrator using the system clock, uniform tier selection
    /// and no telemetry.
    #[must_use]
    pub fn new(
        store: Arc<dyn CampaignStore>,
        cache: Arc<dyn AllocationCache>,
        publisher: ClaimPublisher,
    ) -> Self {
        Self {
            store,
            cache,
            publisher,
            clock: Arc::new(SystemClock),
            telemetry: Arc::new(NoopTelemetry),
            policy: TierPolicy::default(),
            seeded_rng: None,
        }
    }

    /// Read time from `clock`.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Report to `telemetry`.
    #[must_use]
    pub fn with_telemetry(mut self, telemetry: Arc<dyn Telemetry>) -> Self {
        self.telemetry = telemetry;
        self
    }

    /// Select tiers with `policy`.
    #[must_use]
    pub const fn with_policy(mut self, policy: TierPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Make tier rolls reproducible.
    ///
    /// Seeded rolls share one generator, so concurrent claims take turns
    /// drawing from it.
    #[must_use]
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seeded_rng = Some(Mutex::new(StdRng::seed_from_u64(seed)));
        self
    }

    /// The tier policy in effect.
    #[must_use]
    pub const fn policy(&self) -> TierPolicy {
        self.policy
    }

    /// Validate, persist and prime a campaign.
    ///
    /// # Errors
    ///
    /// - [`CampaignError::Validation`] for rejected input; nothing is written
    /// - [`CampaignError::Store`] if the durable transaction fails
    /// - [`CampaignError::Cache`] if priming fails; the durable rows are
    ///   removed again before returning
    pub async fn create_campaign(&self, new: NewCampaign) -> Result<Campaign, CampaignError> {
        new.validate()?;

        let campaign = self.store.create_campaign(&new).await?;

        if let Err(prime_error) = self
            .cache
            .prime_campaign(campaign.id, new.window(), &new.inventory)
            .await
        {
            tracing::warn!(
                campaign_id = campaign.id.get(),
                error = %prime_error,
                "Priming failed, compensating campaign creation"
            );
            self.compensate(campaign.id).await;
            return Err(prime_error.into());
        }

        tracing::info!(
            campaign_id = campaign.id.get(),
            name = %campaign.name,
            tiers = new.inventory.len(),
            packets = new.total_packets(),
            "Campaign created"
        );
        self.telemetry.campaign_created();
        Ok(campaign)
    }

    async fn compensate(&self, campaign_id: CampaignId) {
        // The batch may have been applied even though the reply was lost.
        if let Err(e) = self.cache.evict_campaign(campaign_id).await {
            tracing::warn!(campaign_id = campaign_id.get(), error = %e, "Cache eviction failed");
        }
        if let Err(e) = self.store.delete_campaign(campaign_id).await {
            tracing::error!(
                campaign_id = campaign_id.get(),
                error = %e,
                "Compensation failed: campaign persisted but not primed, needs remediation"
            );
        }
    }

    /// Claim a packet for `user_id`.
    ///
    /// Returns [`ClaimStatus::Ok`], [`ClaimStatus::AlreadyOpened`] (with the
    /// original amount) or [`ClaimStatus::SoldOut`]. Safe to retry: a repeated
    /// call never allocates twice.
    ///
    /// # Errors
    ///
    /// - [`CampaignError::Validation`] for an empty user id
    /// - [`CampaignError::NotFound`] if the campaign is not in the cache
    /// - [`CampaignError::Inactive`] outside the campaign window
    /// - [`CampaignError::Cache`] if the cache could not decide
    pub async fn open(
        &self,
        campaign_id: CampaignId,
        user_id: &str,
    ) -> Result<ClaimOutcome, CampaignError> {
        if user_id.trim().is_empty() {
            return Err(ValidationError::MissingUserId.into());
        }

        let now = self.clock.now();
        let request = ClaimRequest {
            campaign_id,
            user_id: user_id.to_string(),
            now,
            policy: self.policy,
            roll: self.roll(),
        };

        let started = Instant::now();
        let outcome = match self.cache.run_claim(request).await {
            Ok(outcome) => outcome,
            Err(e) => {
                self.telemetry.claim_failed(started.elapsed());
                tracing::error!(
                    campaign_id = campaign_id.get(),
                    user_id,
                    error = %e,
                    "Claim failed"
                );
                return Err(e.into());
            }
        };
        self.telemetry.claim_decided(outcome.status, started.elapsed());

        tracing::debug!(
            campaign_id = campaign_id.get(),
            user_id,
            status = outcome.status.as_str(),
            amount = outcome.amount,
            "Claim decided"
        );

        match (outcome.status, outcome.amount) {
            (ClaimStatus::CampaignNotFound, _) => Err(CampaignError::NotFound(campaign_id)),
            (ClaimStatus::CampaignInactive, _) => Err(CampaignError::Inactive(campaign_id)),
            (ClaimStatus::Ok, Some(amount)) => {
                self.publisher
                    .emit(ClaimEvent::new(user_id, campaign_id, amount, now));
                Ok(outcome)
            }
            _ => Ok(outcome),
        }
    }

    fn roll(&self) -> f64 {
        match &self.seeded_rng {
            Some(rng) => rng
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .r#gen::<f64>(),
            None => rand::thread_rng().r#gen::<f64>(),
        }
    }

    /// Durable campaign with durable counters and cached remaining counts.
    ///
    /// A cache that cannot be read leaves `remaining` empty rather than
    /// failing the call.
    ///
    /// # Errors
    ///
    /// - [`CampaignError::NotFound`] if the store has no such campaign
    /// - [`CampaignError::Store`] if the store cannot be read
    pub async fn campaign_overview(
        &self,
        campaign_id: CampaignId,
    ) -> Result<CampaignOverview, CampaignError> {
        let campaign = self
            .store
            .get_campaign(campaign_id)
            .await?
            .ok_or(CampaignError::NotFound(campaign_id))?;
        let counters = self.store.tier_counters(campaign_id).await?;

        let remaining = match self.cache.remaining(campaign_id).await {
            Ok(remaining) => Some(remaining),
            Err(e) => {
                tracing::warn!(campaign_id = campaign_id.get(), error = %e, "Cache read failed");
                None
            }
        };

        let tiers = counters
            .into_iter()
            .map(|counter| TierOverview {
                amount: counter.amount,
                initial_total: counter.initial_total,
                opened_count: counter.opened_count,
                remaining: remaining
                    .as_ref()
                    .and_then(|r| r.get(&counter.amount).copied()),
            })
            .collect();

        Ok(CampaignOverview { campaign, tiers })
    }
}
