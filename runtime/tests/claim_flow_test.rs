//! Integration tests for campaign creation and claim handling.
//!
//! Runs the orchestrator against the in-memory cache, store and channel:
//! - Scenario A: 150 concurrent users against `{10: 100, 50: 10}`
//! - Scenario B: idempotent replay for one user, sequential and concurrent
//! - Scenario C: unknown campaign
//! - Window boundaries, validation, compensation and infrastructure failures

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)] // Test code can use unwrap/expect/panic

use chrono::Duration as ChronoDuration;
use proptest::prelude::*;
use redpacket_core::cache::AllocationCache;
use redpacket_core::campaign::{CampaignId, NewCampaign, ValidationError};
use redpacket_core::claim::{ClaimOutcome, ClaimStatus, TierPolicy};
use redpacket_core::environment::{Clock, PublishResult};
use redpacket_core::store::CampaignStore;
use redpacket_runtime::{
    CampaignError, ClaimOrchestrator, ClaimPublisher, PublisherConfig, PublisherWorker,
    RetryPolicy,
};
use redpacket_testing::mocks::{
    FixedClock, InMemoryAllocationCache, InMemoryCampaignStore, InMemoryEventBus,
    RecordingTelemetry, TelemetryEvent, test_clock,
};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

// ============================================================================
// Test Fixtures
// ============================================================================

struct Harness {
    cache: Arc<InMemoryAllocationCache>,
    store: Arc<InMemoryCampaignStore>,
    bus: Arc<InMemoryEventBus>,
    clock: Arc<FixedClock>,
    telemetry: Arc<RecordingTelemetry>,
    orchestrator: Arc<ClaimOrchestrator>,
    worker: PublisherWorker,
}

fn publisher_config() -> PublisherConfig {
    PublisherConfig {
        queue_capacity: 1024,
        retry: RetryPolicy::builder()
            .max_retries(2)
            .initial_delay(Duration::from_millis(1))
            .build(),
    }
}

fn harness_with_policy(policy: TierPolicy) -> Harness {
    let cache = Arc::new(InMemoryAllocationCache::new());
    let store = Arc::new(InMemoryCampaignStore::new());
    let bus = Arc::new(InMemoryEventBus::new());
    let clock = Arc::new(test_clock());
    let telemetry = Arc::new(RecordingTelemetry::new());

    let (publisher, worker) = ClaimPublisher::spawn(bus.clone(), publisher_config(), telemetry.clone());
    let orchestrator = ClaimOrchestrator::new(store.clone(), cache.clone(), publisher)
        .with_clock(clock.clone())
        .with_telemetry(telemetry.clone())
        .with_policy(policy)
        .with_seed(7);

    Harness {
        cache,
        store,
        bus,
        clock,
        telemetry,
        orchestrator: Arc::new(orchestrator),
        worker,
    }
}

fn harness() -> Harness {
    harness_with_policy(TierPolicy::Uniform)
}

fn spring(clock: &FixedClock) -> NewCampaign {
    let start = clock.now();
    NewCampaign {
        name: "Spring".to_string(),
        inventory: BTreeMap::from([(10, 100), (50, 10)]),
        start_time: start,
        end_time: start + ChronoDuration::hours(1),
    }
}

// ============================================================================
// Scenarios
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn scenario_a_concurrent_claims_never_oversell() {
    let h = harness();
    let campaign = h.orchestrator.create_campaign(spring(&h.clock)).await.unwrap();

    let id = campaign.id;
    let mut handles = Vec::new();
    for i in 0..150 {
        let orchestrator = Arc::clone(&h.orchestrator);
        handles.push(tokio::spawn(async move {
            orchestrator.open(id, &format!("user-{i}")).await
        }));
    }

    let mut by_amount: HashMap<i64, usize> = HashMap::new();
    let mut sold_out = 0;
    for handle in handles {
        let outcome = handle.await.unwrap().unwrap();
        match outcome.status {
            ClaimStatus::Ok => *by_amount.entry(outcome.amount.unwrap()).or_default() += 1,
            ClaimStatus::SoldOut => sold_out += 1,
            other => panic!("unexpected status {other}"),
        }
    }

    assert_eq!(by_amount.get(&10), Some(&100));
    assert_eq!(by_amount.get(&50), Some(&10));
    assert_eq!(sold_out, 40);

    let remaining = h.cache.remaining(campaign.id).await.unwrap();
    assert_eq!(remaining, BTreeMap::from([(10, 0), (50, 0)]));

    h.worker.shutdown().await;
    assert_eq!(h.bus.published().len(), 110);
}

#[tokio::test]
async fn scenario_b_second_open_replays_the_first() {
    let h = harness();
    let campaign = h.orchestrator.create_campaign(spring(&h.clock)).await.unwrap();

    let first = h.orchestrator.open(campaign.id, "alice").await.unwrap();
    let second = h.orchestrator.open(campaign.id, "alice").await.unwrap();

    let amount = first.amount.unwrap();
    assert_eq!(first, ClaimOutcome::ok(amount));
    assert_eq!(second, ClaimOutcome::already_opened(amount));

    let remaining = h.cache.remaining(campaign.id).await.unwrap();
    let consumed: i64 = 110 - remaining.values().sum::<i64>();
    assert_eq!(consumed, 1);

    h.worker.shutdown().await;
    assert_eq!(h.bus.published().len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn scenario_b_concurrent_repeats_allocate_once() {
    let h = harness();
    let campaign = h.orchestrator.create_campaign(spring(&h.clock)).await.unwrap();

    let id = campaign.id;
    let mut handles = Vec::new();
    for attempt in 0..60 {
        let orchestrator = Arc::clone(&h.orchestrator);
        // Every third call is another user racing alongside alice.
        let user = if attempt % 3 == 0 {
            format!("other-{attempt}")
        } else {
            "alice".to_string()
        };
        handles.push(tokio::spawn(async move {
            let outcome = orchestrator.open(id, &user).await;
            (user, outcome)
        }));
    }

    let mut alice = Vec::new();
    let mut others = 0_i64;
    for handle in handles {
        let (user, outcome) = handle.await.unwrap();
        let outcome = outcome.unwrap();
        if user == "alice" {
            alice.push(outcome);
        } else {
            assert_eq!(outcome.status, ClaimStatus::Ok);
            others += 1;
        }
    }

    assert_eq!(alice.len(), 40);
    let granted: Vec<&ClaimOutcome> = alice
        .iter()
        .filter(|o| o.status == ClaimStatus::Ok)
        .collect();
    assert_eq!(granted.len(), 1);
    let amount = granted[0].amount.unwrap();
    for outcome in alice.iter().filter(|o| o.status != ClaimStatus::Ok) {
        assert_eq!(*outcome, ClaimOutcome::already_opened(amount));
    }

    let remaining = h.cache.remaining(id).await.unwrap();
    let consumed: i64 = 110 - remaining.values().sum::<i64>();
    assert_eq!(consumed, others + 1);
    assert_eq!(h.cache.allocation(id, "alice").await.unwrap(), Some(amount));

    h.worker.shutdown().await;
    let alice_events = h
        .bus
        .published()
        .iter()
        .filter(|event| event.user_id == "alice")
        .count();
    assert_eq!(alice_events, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn unseeded_rolls_still_allocate_every_packet() {
    let cache = Arc::new(InMemoryAllocationCache::new());
    let store = Arc::new(InMemoryCampaignStore::new());
    let bus = Arc::new(InMemoryEventBus::new());
    let clock = Arc::new(test_clock());
    let (publisher, worker) = ClaimPublisher::spawn(
        bus.clone(),
        publisher_config(),
        Arc::new(RecordingTelemetry::new()),
    );
    let orchestrator = Arc::new(
        ClaimOrchestrator::new(store, cache.clone(), publisher).with_clock(clock.clone()),
    );
    let id = orchestrator.create_campaign(spring(&clock)).await.unwrap().id;

    let mut handles = Vec::new();
    for i in 0..110 {
        let orchestrator = Arc::clone(&orchestrator);
        handles.push(tokio::spawn(async move {
            orchestrator.open(id, &format!("user-{i}")).await
        }));
    }
    for handle in handles {
        assert_eq!(handle.await.unwrap().unwrap().status, ClaimStatus::Ok);
    }

    let remaining = cache.remaining(id).await.unwrap();
    assert_eq!(remaining, BTreeMap::from([(10, 0), (50, 0)]));
    worker.shutdown().await;
}

#[tokio::test]
async fn scenario_c_unknown_campaign_is_not_found() {
    let h = harness();
    let result = h.orchestrator.open(CampaignId::new(999), "alice").await;

    assert!(matches!(result, Err(CampaignError::NotFound(id)) if id == CampaignId::new(999)));
    assert_eq!(
        h.telemetry
            .count(TelemetryEvent::ClaimDecided(ClaimStatus::CampaignNotFound)),
        1
    );
}

// ============================================================================
// Window boundaries
// ============================================================================

#[tokio::test]
async fn window_is_half_open() {
    let h = harness();
    let new = spring(&h.clock);
    let (start, end) = (new.start_time, new.end_time);
    let campaign = h.orchestrator.create_campaign(new).await.unwrap();

    h.clock.set(start - ChronoDuration::seconds(1));
    let early = h.orchestrator.open(campaign.id, "early").await;
    assert!(matches!(early, Err(CampaignError::Inactive(_))));

    h.clock.set(start);
    let at_start = h.orchestrator.open(campaign.id, "at-start").await.unwrap();
    assert_eq!(at_start.status, ClaimStatus::Ok);

    h.clock.set(end - ChronoDuration::seconds(1));
    let last_second = h.orchestrator.open(campaign.id, "last-second").await.unwrap();
    assert_eq!(last_second.status, ClaimStatus::Ok);

    h.clock.set(end);
    let at_end = h.orchestrator.open(campaign.id, "at-end").await;
    assert!(matches!(at_end, Err(CampaignError::Inactive(_))));
}

#[tokio::test]
async fn inactive_claim_does_not_allocate() {
    let h = harness();
    let new = spring(&h.clock);
    let end = new.end_time;
    let campaign = h.orchestrator.create_campaign(new).await.unwrap();

    h.clock.set(end + ChronoDuration::minutes(5));
    let _ = h.orchestrator.open(campaign.id, "late").await;

    assert_eq!(h.cache.allocation(campaign.id, "late").await.unwrap(), None);
}

// ============================================================================
// Validation
// ============================================================================

#[tokio::test]
async fn invalid_campaign_is_rejected_before_any_write() {
    let h = harness();
    let mut new = spring(&h.clock);
    new.inventory.insert(20, 0);

    let result = h.orchestrator.create_campaign(new).await;

    assert!(matches!(
        result,
        Err(CampaignError::Validation(ValidationError::InvalidCount { amount: 20, count: 0 }))
    ));
    assert_eq!(h.store.campaign_count(), 0);
}

#[tokio::test]
async fn oversized_inventory_is_rejected_before_any_write() {
    let h = harness();
    let mut new = spring(&h.clock);
    new.inventory = BTreeMap::from([(10, i64::MAX), (50, 1)]);

    let result = h.orchestrator.create_campaign(new).await;

    assert!(matches!(
        result,
        Err(CampaignError::Validation(ValidationError::TooLarge { what: "count", .. }))
    ));
    assert_eq!(h.store.campaign_count(), 0);
}

#[tokio::test]
async fn empty_window_is_rejected() {
    let h = harness();
    let mut new = spring(&h.clock);
    new.end_time = new.start_time;

    let result = h.orchestrator.create_campaign(new).await;
    assert!(matches!(
        result,
        Err(CampaignError::Validation(ValidationError::InvalidWindow))
    ));
}

#[tokio::test]
async fn blank_user_id_is_rejected() {
    let h = harness();
    let campaign = h.orchestrator.create_campaign(spring(&h.clock)).await.unwrap();

    let result = h.orchestrator.open(campaign.id, "   ").await;
    assert!(matches!(
        result,
        Err(CampaignError::Validation(ValidationError::MissingUserId))
    ));
}

// ============================================================================
// Creation and compensation
// ============================================================================

#[tokio::test]
async fn created_campaign_is_persisted_and_primed() {
    let h = harness();
    let campaign = h.orchestrator.create_campaign(spring(&h.clock)).await.unwrap();

    let stored = h.store.get_campaign(campaign.id).await.unwrap().unwrap();
    assert_eq!(stored.name, "Spring");
    assert_eq!(
        h.cache.window(campaign.id).await.unwrap(),
        Some(stored.window())
    );
    assert_eq!(
        h.cache.remaining(campaign.id).await.unwrap(),
        BTreeMap::from([(10, 100), (50, 10)])
    );
    assert_eq!(h.telemetry.count(TelemetryEvent::CampaignCreated), 1);
}

#[tokio::test]
async fn failed_priming_is_compensated() {
    let h = harness();
    h.cache.fail_primes(true);

    let result = h.orchestrator.create_campaign(spring(&h.clock)).await;

    assert!(matches!(result, Err(CampaignError::Cache(_))));
    assert_eq!(h.store.campaign_count(), 0);
    assert_eq!(h.telemetry.count(TelemetryEvent::CampaignCreated), 0);
}

#[tokio::test]
async fn failed_compensation_still_reports_the_cache_error() {
    let h = harness();
    h.cache.fail_primes(true);
    h.store.fail_deletes(true);

    let result = h.orchestrator.create_campaign(spring(&h.clock)).await;

    assert!(matches!(result, Err(CampaignError::Cache(_))));
    // Left behind for remediation.
    assert_eq!(h.store.campaign_count(), 1);
}

#[tokio::test]
async fn store_failure_aborts_creation() {
    let h = harness();
    h.store.set_unavailable(true);

    let result = h.orchestrator.create_campaign(spring(&h.clock)).await;

    assert!(matches!(result, Err(CampaignError::Store(_))));
    assert!(!h.cache.contains(CampaignId::new(1)));
}

// ============================================================================
// Infrastructure failures
// ============================================================================

#[tokio::test]
async fn cache_outage_is_not_a_business_outcome() {
    let h = harness();
    let campaign = h.orchestrator.create_campaign(spring(&h.clock)).await.unwrap();
    h.cache.set_unavailable(true);

    let result = h.orchestrator.open(campaign.id, "alice").await;

    let error = result.unwrap_err();
    assert!(matches!(error, CampaignError::Cache(_)));
    assert!(error.is_infrastructure());
    assert_eq!(h.telemetry.count(TelemetryEvent::ClaimFailed), 1);

    h.worker.shutdown().await;
    assert!(h.bus.published().is_empty());
}

#[tokio::test]
async fn publish_failure_keeps_the_allocation() {
    let h = harness();
    let campaign = h.orchestrator.create_campaign(spring(&h.clock)).await.unwrap();
    h.bus.fail_publishes(true);

    let outcome = h.orchestrator.open(campaign.id, "alice").await.unwrap();
    h.worker.shutdown().await;

    assert_eq!(outcome.status, ClaimStatus::Ok);
    assert_eq!(
        h.cache.allocation(campaign.id, "alice").await.unwrap(),
        outcome.amount
    );
    assert_eq!(
        h.telemetry
            .count(TelemetryEvent::EventPublished(PublishResult::Failed)),
        1
    );
}

// ============================================================================
// Policies and overview
// ============================================================================

#[tokio::test]
async fn smallest_first_policy_drains_tiers_in_order() {
    let h = harness_with_policy(TierPolicy::SmallestFirst);
    let mut new = spring(&h.clock);
    new.inventory = BTreeMap::from([(10, 2), (50, 1)]);
    let campaign = h.orchestrator.create_campaign(new).await.unwrap();

    let mut amounts = Vec::new();
    for user in ["a", "b", "c"] {
        amounts.push(h.orchestrator.open(campaign.id, user).await.unwrap().amount);
    }
    let sold_out = h.orchestrator.open(campaign.id, "d").await.unwrap();

    assert_eq!(amounts, vec![Some(10), Some(10), Some(50)]);
    assert_eq!(sold_out.status, ClaimStatus::SoldOut);
}

#[tokio::test]
async fn overview_combines_durable_and_cached_counters() {
    let h = harness();
    let campaign = h.orchestrator.create_campaign(spring(&h.clock)).await.unwrap();
    h.orchestrator.open(campaign.id, "alice").await.unwrap();

    let overview = h.orchestrator.campaign_overview(campaign.id).await.unwrap();
    assert_eq!(overview.campaign, campaign);
    assert_eq!(overview.tiers.len(), 2);
    let cached: i64 = overview.tiers.iter().filter_map(|t| t.remaining).sum();
    assert_eq!(cached, 109);
    // Nothing has been recorded durably yet.
    assert!(overview.tiers.iter().all(|t| t.opened_count == 0));

    h.cache.set_unavailable(true);
    let degraded = h.orchestrator.campaign_overview(campaign.id).await.unwrap();
    assert!(degraded.tiers.iter().all(|t| t.remaining.is_none()));
}

#[tokio::test]
async fn overview_of_unknown_campaign_is_not_found() {
    let h = harness();
    let result = h.orchestrator.campaign_overview(CampaignId::new(42)).await;
    assert!(matches!(result, Err(CampaignError::NotFound(_))));
}

// ============================================================================
// Properties
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    /// `initial_total - remaining` equals the number of allocations of each
    /// tier, and no tier is ever oversold, whatever the inventory and demand.
    #[test]
    fn conservation_holds_for_any_inventory(
        inventory in prop::collection::btree_map(1i64..500, 1i64..20, 1..5),
        users in 0usize..120,
        policy in prop_oneof![
            Just(TierPolicy::Uniform),
            Just(TierPolicy::Weighted),
            Just(TierPolicy::SmallestFirst),
        ],
    ) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();

        runtime.block_on(async {
            let h = harness_with_policy(policy);
            let mut new = spring(&h.clock);
            new.inventory = inventory.clone();
            let campaign = h.orchestrator.create_campaign(new).await.unwrap();

            let mut ok = 0usize;
            for i in 0..users {
                let outcome = h.orchestrator.open(campaign.id, &format!("u{i}")).await.unwrap();
                if outcome.status == ClaimStatus::Ok {
                    ok += 1;
                }
            }

            let total: i64 = inventory.values().sum();
            let expected_ok = users.min(usize::try_from(total).unwrap());
            assert_eq!(ok, expected_ok);

            let remaining = h.cache.remaining(campaign.id).await.unwrap();
            let allocations = h.cache.allocations(campaign.id).await.unwrap();
            for (amount, initial) in &inventory {
                let left = remaining[amount];
                assert!(left >= 0);
                let allocated = allocations.values().filter(|&&a| a == *amount).count();
                assert_eq!(initial - left, i64::try_from(allocated).unwrap());
            }

            h.worker.shutdown().await;
        });
    }
}
