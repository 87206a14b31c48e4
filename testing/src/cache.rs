//! In-memory Allocation Cache.

use redpacket_core::BoxFuture;
use redpacket_core::cache::{AllocationCache, CacheError, ClaimRequest};
use redpacket_core::campaign::{CampaignId, CampaignWindow, Inventory};
use redpacket_core::claim::{ClaimOutcome, ClaimStatus};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

#[derive(Debug, Clone)]
struct CampaignSlot {
    window: CampaignWindow,
    remaining: Inventory,
    opened: HashMap<String, i64>,
}

/// Allocation Cache kept in process memory.
///
/// Every claim runs under one mutex, which gives the same indivisibility as
/// the Redis claim script: the check-select-decrement-record sequence of one
/// claim never interleaves with another. The decision steps and their order
/// are the script's.
///
/// # Failure injection
///
/// - [`set_unavailable`](Self::set_unavailable): every call fails with
///   [`CacheError::Unavailable`]
/// - [`fail_primes`](Self::fail_primes): only priming fails
#[derive(Debug, Default)]
pub struct InMemoryAllocationCache {
    campaigns: Mutex<HashMap<CampaignId, CampaignSlot>>,
    unavailable: AtomicBool,
    fail_primes: AtomicBool,
}

impl InMemoryAllocationCache {
    /// Create an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every operation fail (or succeed again).
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Make priming fail (or succeed again).
    pub fn fail_primes(&self, fail: bool) {
        self.fail_primes.store(fail, Ordering::SeqCst);
    }

    /// Whether a campaign is primed.
    #[must_use]
    pub fn contains(&self, campaign_id: CampaignId) -> bool {
        self.lock().contains_key(&campaign_id)
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<CampaignId, CampaignSlot>> {
        self.campaigns.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn check_available(&self) -> Result<(), CacheError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(CacheError::Unavailable("connection refused".to_string()));
        }
        Ok(())
    }

    fn prime(
        &self,
        campaign_id: CampaignId,
        window: CampaignWindow,
        inventory: &Inventory,
    ) -> Result<(), CacheError> {
        self.check_available()?;
        if self.fail_primes.load(Ordering::SeqCst) {
            return Err(CacheError::CommandFailed("EXECABORT".to_string()));
        }
        self.lock().insert(
            campaign_id,
            CampaignSlot {
                window,
                remaining: inventory.clone(),
                opened: HashMap::new(),
            },
        );
        Ok(())
    }

    fn claim(&self, request: &ClaimRequest) -> Result<ClaimOutcome, CacheError> {
        self.check_available()?;
        let mut campaigns = self.lock();

        let Some(slot) = campaigns.get_mut(&request.campaign_id) else {
            return Ok(ClaimOutcome::without_amount(ClaimStatus::CampaignNotFound));
        };
        if !slot.window.contains(request.now) {
            return Ok(ClaimOutcome::without_amount(ClaimStatus::CampaignInactive));
        }
        if let Some(&amount) = slot.opened.get(&request.user_id) {
            return Ok(ClaimOutcome::already_opened(amount));
        }

        let candidates: Vec<(i64, i64)> = slot
            .remaining
            .iter()
            .filter(|&(_, &left)| left > 0)
            .map(|(&amount, &left)| (amount, left))
            .collect();
        let counts: Vec<i64> = candidates.iter().map(|&(_, left)| left).collect();

        let Some(index) = request.policy.select(&counts, request.roll) else {
            return Ok(ClaimOutcome::without_amount(ClaimStatus::SoldOut));
        };
        let amount = candidates[index].0;

        if let Some(left) = slot.remaining.get_mut(&amount) {
            *left -= 1;
        }
        slot.opened.insert(request.user_id.clone(), amount);
        Ok(ClaimOutcome::ok(amount))
    }
}

impl AllocationCache for InMemoryAllocationCache {
    fn prime_campaign(
        &self,
        campaign_id: CampaignId,
        window: CampaignWindow,
        inventory: &Inventory,
    ) -> BoxFuture<'_, Result<(), CacheError>> {
        let result = self.prime(campaign_id, window, inventory);
        Box::pin(async move { result })
    }

    fn run_claim(&self, request: ClaimRequest) -> BoxFuture<'_, Result<ClaimOutcome, CacheError>> {
        Box::pin(async move { self.claim(&request) })
    }

    fn evict_campaign(&self, campaign_id: CampaignId) -> BoxFuture<'_, Result<(), CacheError>> {
        Box::pin(async move {
            self.check_available()?;
            self.lock().remove(&campaign_id);
            Ok(())
        })
    }

    fn window(
        &self,
        campaign_id: CampaignId,
    ) -> BoxFuture<'_, Result<Option<CampaignWindow>, CacheError>> {
        Box::pin(async move {
            self.check_available()?;
            Ok(self.lock().get(&campaign_id).map(|slot| slot.window))
        })
    }

    fn remaining(&self, campaign_id: CampaignId) -> BoxFuture<'_, Result<Inventory, CacheError>> {
        Box::pin(async move {
            self.check_available()?;
            Ok(self
                .lock()
                .get(&campaign_id)
                .map(|slot| slot.remaining.clone())
                .unwrap_or_default())
        })
    }

    fn allocation<'a>(
        &'a self,
        campaign_id: CampaignId,
        user_id: &'a str,
    ) -> BoxFuture<'a, Result<Option<i64>, CacheError>> {
        Box::pin(async move {
            self.check_available()?;
            Ok(self
                .lock()
                .get(&campaign_id)
                .and_then(|slot| slot.opened.get(user_id).copied()))
        })
    }

    fn allocations(
        &self,
        campaign_id: CampaignId,
    ) -> BoxFuture<'_, Result<HashMap<String, i64>, CacheError>> {
        Box::pin(async move {
            self.check_available()?;
            Ok(self
                .lock()
                .get(&campaign_id)
                .map(|slot| slot.opened.clone())
                .unwrap_or_default())
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};
    use redpacket_core::claim::TierPolicy;
    use std::collections::BTreeMap;

    fn window() -> CampaignWindow {
        let start = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        CampaignWindow::new(start, start + Duration::hours(1))
    }

    fn request(user: &str, policy: TierPolicy, roll: f64) -> ClaimRequest {
        ClaimRequest {
            campaign_id: CampaignId::new(1),
            user_id: user.to_string(),
            now: window().start_time,
            policy,
            roll,
        }
    }

    #[tokio::test]
    async fn unprimed_campaign_is_not_found() {
        let cache = InMemoryAllocationCache::new();
        let outcome = cache
            .run_claim(request("u", TierPolicy::Uniform, 0.0))
            .await
            .unwrap();
        assert_eq!(outcome.status, ClaimStatus::CampaignNotFound);
    }

    #[tokio::test]
    async fn smallest_first_drains_cheapest_tier_first() {
        let cache = InMemoryAllocationCache::new();
        cache
            .prime_campaign(CampaignId::new(1), window(), &BTreeMap::from([(10, 1), (50, 1)]))
            .await
            .unwrap();

        let first = cache
            .run_claim(request("a", TierPolicy::SmallestFirst, 0.9))
            .await
            .unwrap();
        let second = cache
            .run_claim(request("b", TierPolicy::SmallestFirst, 0.9))
            .await
            .unwrap();
        let third = cache
            .run_claim(request("c", TierPolicy::SmallestFirst, 0.9))
            .await
            .unwrap();

        assert_eq!(first, ClaimOutcome::ok(10));
        assert_eq!(second, ClaimOutcome::ok(50));
        assert_eq!(third.status, ClaimStatus::SoldOut);
    }

    #[tokio::test]
    async fn replay_does_not_touch_counters() {
        let cache = InMemoryAllocationCache::new();
        let id = CampaignId::new(1);
        cache
            .prime_campaign(id, window(), &BTreeMap::from([(10, 5)]))
            .await
            .unwrap();

        cache.run_claim(request("a", TierPolicy::Uniform, 0.0)).await.unwrap();
        let replay = cache.run_claim(request("a", TierPolicy::Uniform, 0.0)).await.unwrap();

        assert_eq!(replay, ClaimOutcome::already_opened(10));
        assert_eq!(cache.remaining(id).await.unwrap(), BTreeMap::from([(10, 4)]));
        assert_eq!(cache.allocation(id, "a").await.unwrap(), Some(10));
    }

    #[tokio::test]
    async fn unavailable_cache_reports_infrastructure_error() {
        let cache = InMemoryAllocationCache::new();
        cache.set_unavailable(true);
        let result = cache.run_claim(request("a", TierPolicy::Uniform, 0.0)).await;
        assert!(matches!(result, Err(CacheError::Unavailable(_))));
    }
}
