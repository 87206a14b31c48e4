//! In-memory Campaign Store and dead-letter queue.

use chrono::Utc;
use redpacket_core::BoxFuture;
use redpacket_core::campaign::{Campaign, CampaignId, NewCampaign, TierCounter};
use redpacket_core::claim::ClaimEvent;
use redpacket_core::store::{
    AuditRecord, CampaignStore, DeadLetter, DeadLetterQueue, DeadLetterStatus, RecordOutcome,
    StoreError,
};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

#[derive(Debug, Default)]
struct StoreState {
    next_id: i64,
    campaigns: BTreeMap<CampaignId, Campaign>,
    tiers: BTreeMap<CampaignId, BTreeMap<i64, TierCounter>>,
    claim_log: Vec<AuditRecord>,
}

/// Campaign Store kept in process memory.
///
/// Mirrors the relational constraints: one claim log row per
/// `(campaign, user)`, `opened_count` bounded by `initial_total`, and claim
/// rows only for existing tiers.
///
/// # Failure injection
///
/// - [`set_unavailable`](Self::set_unavailable): every call fails with
///   [`StoreError::Unavailable`]
/// - [`fail_next_records`](Self::fail_next_records): the next `n`
///   `record_claim` calls fail with [`StoreError::Unavailable`]
/// - [`fail_deletes`](Self::fail_deletes): `delete_campaign` fails
#[derive(Debug, Default)]
pub struct InMemoryCampaignStore {
    state: Mutex<StoreState>,
    unavailable: AtomicBool,
    failing_records: AtomicU32,
    fail_deletes: AtomicBool,
}

impl InMemoryCampaignStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every operation fail (or succeed again).
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Fail the next `n` claim writes with a transient error.
    pub fn fail_next_records(&self, n: u32) {
        self.failing_records.store(n, Ordering::SeqCst);
    }

    /// Make campaign deletion fail (or succeed again).
    pub fn fail_deletes(&self, fail: bool) {
        self.fail_deletes.store(fail, Ordering::SeqCst);
    }

    /// Number of stored campaigns.
    #[must_use]
    pub fn campaign_count(&self) -> usize {
        self.lock().campaigns.len()
    }

    fn lock(&self) -> MutexGuard<'_, StoreState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn check_available(&self) -> Result<(), StoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("connection refused".to_string()));
        }
        Ok(())
    }

    fn take_record_failure(&self) -> bool {
        self.failing_records
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }

    fn insert(&self, new: &NewCampaign) -> Result<Campaign, StoreError> {
        self.check_available()?;
        let mut state = self.lock();

        state.next_id += 1;
        let campaign = Campaign {
            id: CampaignId::new(state.next_id),
            name: new.name.clone(),
            start_time: new.start_time,
            end_time: new.end_time,
        };
        let tiers = new
            .inventory
            .iter()
            .map(|(&amount, &count)| {
                (
                    amount,
                    TierCounter {
                        amount,
                        initial_total: count,
                        opened_count: 0,
                    },
                )
            })
            .collect();

        state.campaigns.insert(campaign.id, campaign.clone());
        state.tiers.insert(campaign.id, tiers);
        Ok(campaign)
    }

    fn delete(&self, campaign_id: CampaignId) -> Result<(), StoreError> {
        self.check_available()?;
        if self.fail_deletes.load(Ordering::SeqCst) {
            return Err(StoreError::DatabaseError("delete rejected".to_string()));
        }
        let mut state = self.lock();
        state.campaigns.remove(&campaign_id);
        state.tiers.remove(&campaign_id);
        state.claim_log.retain(|row| row.campaign_id != campaign_id);
        Ok(())
    }

    fn record(&self, event: &ClaimEvent) -> Result<RecordOutcome, StoreError> {
        self.check_available()?;
        if self.take_record_failure() {
            return Err(StoreError::Unavailable("connection reset".to_string()));
        }

        let unknown_tier = StoreError::UnknownTier {
            campaign_id: event.campaign_id,
            amount: event.amount,
        };
        let mut state = self.lock();

        if !state.campaigns.contains_key(&event.campaign_id) {
            return Err(unknown_tier);
        }
        if state
            .claim_log
            .iter()
            .any(|row| row.campaign_id == event.campaign_id && row.user_id == event.user_id)
        {
            return Ok(RecordOutcome::Duplicate);
        }

        let tier = state
            .tiers
            .get_mut(&event.campaign_id)
            .and_then(|tiers| tiers.get_mut(&event.amount))
            .ok_or(unknown_tier)?;
        if tier.opened_count >= tier.initial_total {
            return Err(StoreError::TierExhausted {
                campaign_id: event.campaign_id,
                amount: event.amount,
            });
        }
        tier.opened_count += 1;

        state.claim_log.push(AuditRecord {
            user_id: event.user_id.clone(),
            campaign_id: event.campaign_id,
            amount: event.amount,
            claimed_at: event.timestamp,
            recorded_at: Utc::now(),
        });
        Ok(RecordOutcome::Recorded)
    }
}

impl CampaignStore for InMemoryCampaignStore {
    fn create_campaign<'a>(
        &'a self,
        campaign: &'a NewCampaign,
    ) -> BoxFuture<'a, Result<Campaign, StoreError>> {
        Box::pin(async move { self.insert(campaign) })
    }

    fn delete_campaign(&self, campaign_id: CampaignId) -> BoxFuture<'_, Result<(), StoreError>> {
        Box::pin(async move { self.delete(campaign_id) })
    }

    fn get_campaign(
        &self,
        campaign_id: CampaignId,
    ) -> BoxFuture<'_, Result<Option<Campaign>, StoreError>> {
        Box::pin(async move {
            self.check_available()?;
            Ok(self.lock().campaigns.get(&campaign_id).cloned())
        })
    }

    fn tier_counters(
        &self,
        campaign_id: CampaignId,
    ) -> BoxFuture<'_, Result<Vec<TierCounter>, StoreError>> {
        Box::pin(async move {
            self.check_available()?;
            Ok(self
                .lock()
                .tiers
                .get(&campaign_id)
                .map(|tiers| tiers.values().copied().collect())
                .unwrap_or_default())
        })
    }

    fn record_claim<'a>(
        &'a self,
        event: &'a ClaimEvent,
    ) -> BoxFuture<'a, Result<RecordOutcome, StoreError>> {
        Box::pin(async move { self.record(event) })
    }

    fn claim_log(
        &self,
        campaign_id: CampaignId,
    ) -> BoxFuture<'_, Result<Vec<AuditRecord>, StoreError>> {
        Box::pin(async move {
            self.check_available()?;
            Ok(self
                .lock()
                .claim_log
                .iter()
                .filter(|row| row.campaign_id == campaign_id)
                .cloned()
                .collect())
        })
    }
}

/// Dead-letter queue kept in process memory.
#[derive(Debug, Default)]
pub struct InMemoryDeadLetterQueue {
    entries: Mutex<Vec<DeadLetter>>,
    unavailable: AtomicBool,
}

impl InMemoryDeadLetterQueue {
    /// Create an empty queue.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every operation fail (or succeed again).
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Snapshot of every entry, oldest first.
    #[must_use]
    pub fn entries(&self) -> Vec<DeadLetter> {
        self.lock().clone()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<DeadLetter>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn check_available(&self) -> Result<(), StoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("connection refused".to_string()));
        }
        Ok(())
    }
}

impl DeadLetterQueue for InMemoryDeadLetterQueue {
    fn push<'a>(
        &'a self,
        event: &'a ClaimEvent,
        error_message: &'a str,
        attempts: i32,
    ) -> BoxFuture<'a, Result<i64, StoreError>> {
        Box::pin(async move {
            self.check_available()?;
            let mut entries = self.lock();
            let id = i64::try_from(entries.len()).unwrap_or(i64::MAX - 1) + 1;
            entries.push(DeadLetter {
                id,
                event: event.clone(),
                error_message: error_message.to_string(),
                attempts,
                failed_at: Utc::now(),
                status: DeadLetterStatus::Pending,
            });
            Ok(id)
        })
    }

    fn list_pending(&self, limit: i64) -> BoxFuture<'_, Result<Vec<DeadLetter>, StoreError>> {
        Box::pin(async move {
            self.check_available()?;
            let limit = usize::try_from(limit).unwrap_or(0);
            Ok(self
                .lock()
                .iter()
                .filter(|entry| entry.status == DeadLetterStatus::Pending)
                .take(limit)
                .cloned()
                .collect())
        })
    }

    fn update_status(
        &self,
        id: i64,
        status: DeadLetterStatus,
    ) -> BoxFuture<'_, Result<(), StoreError>> {
        Box::pin(async move {
            self.check_available()?;
            match self.lock().iter_mut().find(|entry| entry.id == id) {
                Some(entry) => {
                    entry.status = status;
                    Ok(())
                }
                None => Err(StoreError::DatabaseError(format!(
                    "No dead letter with id {id}"
                ))),
            }
        })
    }
}
