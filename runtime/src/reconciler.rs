//! Reconciliation sweep between the Allocation Cache and the Campaign Store.
//!
//! Allocations are final once the cache decided them, but their audit rows
//! arrive asynchronously and can be lost (publish retries exhausted, queue
//! overflow, legacy acknowledgement). The sweep compares the cache's opened
//! map with the durable claim log and tier counters and can republish the
//! events whose audit row is missing. Republishing is safe because the
//! recorder ignores duplicates.

use crate::error::CampaignError;
use redpacket_core::cache::AllocationCache;
use redpacket_core::campaign::CampaignId;
use redpacket_core::claim::ClaimEvent;
use redpacket_core::environment::{Clock, SystemClock};
use redpacket_core::event_bus::EventBus;
use redpacket_core::store::CampaignStore;
use std::collections::HashMap;
use std::sync::Arc;

/// Cache-consumed versus durably recorded count of one tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TierDrift {
    /// Tier amount
    pub amount: i64,
    /// `initial_total - remaining` according to the cache
    pub consumed_in_cache: i64,
    /// `opened_count` according to the store
    pub opened_count: i64,
}

/// Findings of one sweep.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Campaign swept
    pub campaign_id: CampaignId,
    /// Entries in the cache's opened map
    pub cache_allocations: usize,
    /// Rows in the durable claim log
    pub audit_rows: usize,
    /// Allocations without an audit row, as events ready to republish
    pub missing_audit: Vec<ClaimEvent>,
    /// Users with an audit row but no cache allocation
    pub unknown_audit: Vec<String>,
    /// Users whose audit amount differs from their allocation
    pub amount_mismatches: Vec<String>,
    /// Tiers whose durable counter differs from the cache
    pub tier_drift: Vec<TierDrift>,
}

impl ReconcileReport {
    /// Whether cache and store agree completely.
    #[must_use]
    pub fn is_consistent(&self) -> bool {
        self.missing_audit.is_empty()
            && self.unknown_audit.is_empty()
            && self.amount_mismatches.is_empty()
            && self.tier_drift.is_empty()
    }
}

/// Compares cache and store state of a campaign.
pub struct Reconciler {
    cache: Arc<dyn AllocationCache>,
    store: Arc<dyn CampaignStore>,
    event_bus: Arc<dyn EventBus>,
    clock: Arc<dyn Clock>,
}

impl Reconciler {
    /// Create a reconciler.
    #[must_use]
    pub fn new(
        cache: Arc<dyn AllocationCache>,
        store: Arc<dyn CampaignStore>,
        event_bus: Arc<dyn EventBus>,
    ) -> Self {
        Self {
            cache,
            store,
            event_bus,
            clock: Arc::new(SystemClock),
        }
    }

    /// Stamp republished events with `clock` (the original decision time is
    /// not kept by the cache).
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Compare the opened map with the claim log and tier counters.
    ///
    /// Meaningful once the pipeline is idle; while events are in flight the
    /// report shows them as missing.
    ///
    /// # Errors
    ///
    /// - [`CampaignError::NotFound`] if the store has no such campaign
    /// - [`CampaignError::Cache`] / [`CampaignError::Store`] on read failures
    pub async fn sweep(&self, campaign_id: CampaignId) -> Result<ReconcileReport, CampaignError> {
        if self.store.get_campaign(campaign_id).await?.is_none() {
            return Err(CampaignError::NotFound(campaign_id));
        }

        let allocations = self.cache.allocations(campaign_id).await?;
        let remaining = self.cache.remaining(campaign_id).await?;
        let audit = self.store.claim_log(campaign_id).await?;
        let counters = self.store.tier_counters(campaign_id).await?;

        let audited: HashMap<&str, i64> = audit
            .iter()
            .map(|row| (row.user_id.as_str(), row.amount))
            .collect();

        let now = self.clock.now();
        let mut missing_audit = Vec::new();
        let mut amount_mismatches = Vec::new();
        for (user_id, &amount) in &allocations {
            match audited.get(user_id.as_str()) {
                None => missing_audit.push(ClaimEvent::new(user_id, campaign_id, amount, now)),
                Some(&recorded) if recorded != amount => amount_mismatches.push(user_id.clone()),
                Some(_) => {}
            }
        }
        missing_audit.sort_by(|a, b| a.user_id.cmp(&b.user_id));
        amount_mismatches.sort();

        let mut unknown_audit: Vec<String> = audit
            .iter()
            .filter(|row| !allocations.contains_key(&row.user_id))
            .map(|row| row.user_id.clone())
            .collect();
        unknown_audit.sort();

        let tier_drift: Vec<TierDrift> = counters
            .iter()
            .filter_map(|counter| {
                let left = remaining.get(&counter.amount).copied().unwrap_or(0);
                let consumed_in_cache = counter.initial_total - left;
                (consumed_in_cache != counter.opened_count).then_some(TierDrift {
                    amount: counter.amount,
                    consumed_in_cache,
                    opened_count: counter.opened_count,
                })
            })
            .collect();

        let report = ReconcileReport {
            campaign_id,
            cache_allocations: allocations.len(),
            audit_rows: audit.len(),
            missing_audit,
            unknown_audit,
            amount_mismatches,
            tier_drift,
        };

        if report.is_consistent() {
            tracing::info!(
                campaign_id = campaign_id.get(),
                allocations = report.cache_allocations,
                "Campaign is consistent"
            );
        } else {
            tracing::warn!(
                campaign_id = campaign_id.get(),
                allocations = report.cache_allocations,
                audit_rows = report.audit_rows,
                missing = report.missing_audit.len(),
                unknown = report.unknown_audit.len(),
                mismatched = report.amount_mismatches.len(),
                drifting_tiers = report.tier_drift.len(),
                "Campaign drift detected"
            );
        }
        Ok(report)
    }

    /// Sweep, then publish an event for every allocation without an audit row.
    ///
    /// Returns the number of events published.
    ///
    /// # Errors
    ///
    /// Returns the sweep's errors, or [`CampaignError::Channel`] on the first
    /// publish failure (events published before it stay published).
    pub async fn republish_missing(&self, campaign_id: CampaignId) -> Result<usize, CampaignError> {
        let report = self.sweep(campaign_id).await?;

        for event in &report.missing_audit {
            self.event_bus.publish(event).await?;
        }

        tracing::info!(
            campaign_id = campaign_id.get(),
            republished = report.missing_audit.len(),
            "Missing claim events republished"
        );
        Ok(report.missing_audit.len())
    }
}
