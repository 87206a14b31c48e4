//! Integration tests against a live Redis server.
//!
//! Run with `REDIS_URL=redis://127.0.0.1:6379 cargo test -p redpacket-redis -- --ignored`.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use chrono::{Duration, Utc};
use redpacket_core::cache::{AllocationCache, ClaimRequest};
use redpacket_core::campaign::{CampaignId, CampaignWindow, Inventory, MAX_TIER_VALUE};
use redpacket_core::claim::{ClaimOutcome, ClaimStatus, TierPolicy};
use redpacket_redis::RedisAllocationCache;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};

static NEXT_ID: AtomicI64 = AtomicI64::new(0);

fn redis_url() -> String {
    std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string())
}

/// Campaign ids unique per test run so parallel tests never share keys.
fn fresh_campaign() -> CampaignId {
    let base = Utc::now().timestamp_micros() % 1_000_000_000;
    CampaignId::new(base * 100 + NEXT_ID.fetch_add(1, Ordering::SeqCst))
}

fn active_window() -> CampaignWindow {
    let now = Utc::now();
    CampaignWindow::new(now - Duration::hours(1), now + Duration::hours(1))
}

fn request(campaign_id: CampaignId, user_id: &str) -> ClaimRequest {
    ClaimRequest {
        campaign_id,
        user_id: user_id.to_string(),
        now: Utc::now(),
        policy: TierPolicy::Uniform,
        roll: 0.5,
    }
}

async fn cache() -> RedisAllocationCache {
    RedisAllocationCache::new(&redis_url())
        .await
        .expect("Redis must be running for ignored tests")
}

#[tokio::test]
#[ignore = "requires a running Redis server"]
async fn scenario_a_sells_exactly_the_inventory() {
    let cache = Arc::new(cache().await);
    let campaign = fresh_campaign();
    let inventory: Inventory = [(10, 100), (50, 10)].into_iter().collect();
    cache
        .prime_campaign(campaign, active_window(), &inventory)
        .await
        .unwrap();

    let mut handles = Vec::new();
    for user in 0..150 {
        let cache = Arc::clone(&cache);
        handles.push(tokio::spawn(async move {
            cache
                .run_claim(request(campaign, &format!("user-{user}")))
                .await
                .unwrap()
        }));
    }

    let mut tens = 0;
    let mut fifties = 0;
    let mut sold_out = 0;
    for handle in handles {
        let outcome = handle.await.unwrap();
        match (outcome.status, outcome.amount) {
            (ClaimStatus::Ok, Some(10)) => tens += 1,
            (ClaimStatus::Ok, Some(50)) => fifties += 1,
            (ClaimStatus::SoldOut, None) => sold_out += 1,
            other => panic!("unexpected outcome {other:?}"),
        }
    }
    assert_eq!((tens, fifties, sold_out), (100, 10, 40));

    let remaining = cache.remaining(campaign).await.unwrap();
    assert_eq!(remaining.get(&10), Some(&0));
    assert_eq!(remaining.get(&50), Some(&0));
    assert_eq!(cache.allocations(campaign).await.unwrap().len(), 110);

    cache.evict_campaign(campaign).await.unwrap();
}

#[tokio::test]
#[ignore = "requires a running Redis server"]
async fn replay_returns_the_original_amount() {
    let cache = cache().await;
    let campaign = fresh_campaign();
    let inventory: Inventory = [(10, 5)].into_iter().collect();
    cache
        .prime_campaign(campaign, active_window(), &inventory)
        .await
        .unwrap();

    let first = cache.run_claim(request(campaign, "alice")).await.unwrap();
    let second = cache.run_claim(request(campaign, "alice")).await.unwrap();

    assert_eq!(first, ClaimOutcome::ok(10));
    assert_eq!(second, ClaimOutcome::already_opened(10));
    assert_eq!(cache.remaining(campaign).await.unwrap().get(&10), Some(&4));
    assert_eq!(cache.allocation(campaign, "alice").await.unwrap(), Some(10));

    cache.evict_campaign(campaign).await.unwrap();
}

#[tokio::test]
#[ignore = "requires a running Redis server"]
async fn window_is_half_open() {
    let cache = cache().await;
    let campaign = fresh_campaign();
    let start = Utc::now() - Duration::hours(1);
    let end = start + Duration::hours(2);
    let window = CampaignWindow::from_epochs(start.timestamp(), end.timestamp()).unwrap();
    let inventory: Inventory = [(10, 5)].into_iter().collect();
    cache.prime_campaign(campaign, window, &inventory).await.unwrap();

    let mut at_end = request(campaign, "late");
    at_end.now = window.end_time;
    assert_eq!(
        cache.run_claim(at_end).await.unwrap(),
        ClaimOutcome::without_amount(ClaimStatus::CampaignInactive)
    );

    let mut at_start = request(campaign, "early");
    at_start.now = window.start_time;
    assert_eq!(cache.run_claim(at_start).await.unwrap(), ClaimOutcome::ok(10));

    assert_eq!(cache.window(campaign).await.unwrap(), Some(window));
    cache.evict_campaign(campaign).await.unwrap();
}

#[tokio::test]
#[ignore = "requires a running Redis server"]
async fn unknown_campaign_is_not_found() {
    let cache = cache().await;
    let outcome = cache
        .run_claim(request(fresh_campaign(), "nobody"))
        .await
        .unwrap();
    assert_eq!(
        outcome,
        ClaimOutcome::without_amount(ClaimStatus::CampaignNotFound)
    );
}

#[tokio::test]
#[ignore = "requires a running Redis server"]
async fn smallest_first_drains_cheapest_tier() {
    let cache = cache().await;
    let campaign = fresh_campaign();
    let inventory: Inventory = [(5, 1), (100, 1)].into_iter().collect();
    cache
        .prime_campaign(campaign, active_window(), &inventory)
        .await
        .unwrap();

    let mut first = request(campaign, "a");
    first.policy = TierPolicy::SmallestFirst;
    let mut second = request(campaign, "b");
    second.policy = TierPolicy::SmallestFirst;

    assert_eq!(cache.run_claim(first).await.unwrap(), ClaimOutcome::ok(5));
    assert_eq!(cache.run_claim(second).await.unwrap(), ClaimOutcome::ok(100));

    cache.evict_campaign(campaign).await.unwrap();
    assert_eq!(cache.window(campaign).await.unwrap(), None);
    assert!(cache.remaining(campaign).await.unwrap().is_empty());
}

#[tokio::test]
#[ignore = "requires a running Redis server"]
async fn largest_amounts_keep_their_keys() {
    let cache = cache().await;
    let campaign = fresh_campaign();
    let large = MAX_TIER_VALUE;
    let inventory: Inventory = [(100_000_000_000_000, 1), (large, 1)].into_iter().collect();
    cache
        .prime_campaign(campaign, active_window(), &inventory)
        .await
        .unwrap();

    let mut first = request(campaign, "a");
    first.policy = TierPolicy::SmallestFirst;
    let mut second = request(campaign, "b");
    second.policy = TierPolicy::SmallestFirst;

    assert_eq!(
        cache.run_claim(first).await.unwrap(),
        ClaimOutcome::ok(100_000_000_000_000)
    );
    assert_eq!(cache.run_claim(second).await.unwrap(), ClaimOutcome::ok(large));
    assert_eq!(
        cache.run_claim(request(campaign, "a")).await.unwrap(),
        ClaimOutcome::already_opened(100_000_000_000_000)
    );
    assert_eq!(cache.allocation(campaign, "b").await.unwrap(), Some(large));

    let remaining = cache.remaining(campaign).await.unwrap();
    assert!(remaining.values().all(|&count| count == 0));

    cache.evict_campaign(campaign).await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
#[ignore = "requires a running Redis server"]
async fn concurrent_repeat_claims_allocate_once() {
    let cache = Arc::new(cache().await);
    let campaign = fresh_campaign();
    let inventory: Inventory = [(10, 20), (50, 20)].into_iter().collect();
    cache
        .prime_campaign(campaign, active_window(), &inventory)
        .await
        .unwrap();

    let mut handles = Vec::new();
    for attempt in 0..50 {
        let cache = Arc::clone(&cache);
        let user = if attempt % 5 == 0 {
            format!("other-{attempt}")
        } else {
            "alice".to_string()
        };
        handles.push(tokio::spawn(async move {
            (user.clone(), cache.run_claim(request(campaign, &user)).await.unwrap())
        }));
    }

    let mut alice = Vec::new();
    let mut others = 0;
    for handle in handles {
        let (user, outcome) = handle.await.unwrap();
        if user == "alice" {
            alice.push(outcome);
        } else {
            assert_eq!(outcome.status, ClaimStatus::Ok);
            others += 1;
        }
    }

    let oks: Vec<_> = alice.iter().filter(|o| o.status == ClaimStatus::Ok).collect();
    assert_eq!(oks.len(), 1);
    let amount = oks[0].amount;
    assert_eq!(alice.len(), 40);
    assert!(
        alice
            .iter()
            .filter(|o| o.status != ClaimStatus::Ok)
            .all(|o| o.status == ClaimStatus::AlreadyOpened && o.amount == amount)
    );

    let remaining: i64 = cache.remaining(campaign).await.unwrap().values().sum();
    assert_eq!(remaining, 40 - 1 - others);
    assert_eq!(cache.allocation(campaign, "alice").await.unwrap(), amount);

    cache.evict_campaign(campaign).await.unwrap();
}
