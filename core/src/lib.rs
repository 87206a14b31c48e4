//! # Red Packet Core
//!
//! Domain types and seam traits for the red packet allocation service.
//!
//! A campaign is a finite, tiered pool of rewards. Claims are adjudicated by an
//! in-memory **Allocation Cache** that runs an atomic decision procedure (the
//! claim script); successful claims flow asynchronously through an **Event Bus**
//! into a durable **Campaign Store** that keeps the audit log and reporting
//! counters.
//!
//! ## Architecture
//!
//! ```text
//!   POST /campaign            POST /campaign/{id}/open
//!         │                            │
//!         ▼                            ▼
//! ┌─────────────────┐        ┌─────────────────┐
//! │  CampaignStore  │        │ AllocationCache │◄─── Sole decision authority
//! │  (1. persist)   │        │  (claim script) │
//! └────────┬────────┘        └────────┬────────┘
//!          │ 2. prime                 │ OK
//!          └──────────►cache          ▼
//!                            ┌─────────────────┐
//!                            │    EventBus     │◄─── At-least-once
//!                            └────────┬────────┘
//!                                     ▼
//!                            ┌─────────────────┐
//!                            │  CampaignStore  │◄─── Audit + counters
//!                            │ (record_claim)  │
//!                            └─────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`campaign`]: campaigns, tiers, windows and creation input validation
//! - [`claim`]: claim statuses, outcomes, events and the tier-selection policy
//! - [`cache`]: the [`AllocationCache`](cache::AllocationCache) seam
//! - [`store`]: the [`CampaignStore`](store::CampaignStore) and
//!   [`DeadLetterQueue`](store::DeadLetterQueue) seams
//! - [`event_bus`]: the [`EventBus`](event_bus::EventBus) seam
//! - [`environment`]: injected clock and telemetry

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod cache;
pub mod campaign;
pub mod claim;
pub mod environment;
pub mod event_bus;
pub mod store;

pub use cache::{AllocationCache, CacheError, ClaimRequest};
pub use campaign::{
    Campaign, CampaignId, CampaignWindow, Inventory, NewCampaign, TierCounter, ValidationError,
};
pub use claim::{ClaimEvent, ClaimOutcome, ClaimStatus, TierPolicy};
pub use environment::{
    Clock, NoopTelemetry, PublishResult, RecordResult, SystemClock, Telemetry,
};
pub use event_bus::{Delivery, DeliveryStream, EventBus, EventBusError};
pub use store::{
    AuditRecord, CampaignStore, DeadLetter, DeadLetterQueue, DeadLetterStatus, RecordOutcome,
    StoreError,
};

/// Boxed, `Send` future returned by the dyn-compatible seam traits.
pub type BoxFuture<'a, T> = std::pin::Pin<Box<dyn std::future::Future<Output = T> + Send + 'a>>;
