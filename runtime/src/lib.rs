//! # Red Packet Runtime
//!
//! Claim orchestration and the asynchronous durability pipeline.
//!
//! ## Core Components
//!
//! - **[`ClaimOrchestrator`]**: validates and creates campaigns, delegates every
//!   claim to the Allocation Cache and hands successful claims to the publisher
//! - **[`ClaimPublisher`]**: bounded queue plus background task that publishes
//!   claim events with retry, never blocking the claim path
//! - **[`ClaimRecorder`]**: writes delivered events to the Campaign Store,
//!   retrying transient failures and dead-lettering the rest
//! - **[`ClaimConsumer`]**: subscribe-process-reconnect loop feeding the recorder
//! - **[`Reconciler`]**: compares the cache's opened map with the durable log
//!
//! ## Flow
//!
//! ```text
//! open() ──► AllocationCache::run_claim ──OK──► ClaimPublisher::emit ──► EventBus
//!                                                                          │
//!                       CampaignStore ◄── ClaimRecorder ◄── ClaimConsumer ◄┘
//! ```
//!
//! ## Example
//!
//! ```ignore
//! use redpacket_runtime::{ClaimOrchestrator, ClaimPublisher, PublisherConfig};
//!
//! let (publisher, worker) = ClaimPublisher::spawn(event_bus, PublisherConfig::default(), telemetry.clone());
//! let orchestrator = ClaimOrchestrator::new(store, cache, publisher)
//!     .with_telemetry(telemetry);
//!
//! let outcome = orchestrator.open(campaign_id, "alice").await?;
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

/// Retry logic with exponential backoff
pub mod retry;

/// Prometheus-backed telemetry
pub mod metrics;

pub mod consumer;
pub mod error;
pub mod orchestrator;
pub mod publisher;
pub mod reconciler;
pub mod recorder;

pub use consumer::ClaimConsumer;
pub use error::CampaignError;
pub use metrics::PrometheusTelemetry;
pub use orchestrator::{CampaignOverview, ClaimOrchestrator, TierOverview};
pub use publisher::{ClaimPublisher, PublisherConfig, PublisherWorker};
pub use reconciler::{ReconcileReport, Reconciler, TierDrift};
pub use recorder::{AckPolicy, ClaimRecorder, RecordError, ReplayReport};
pub use retry::{RetryFailure, RetryPolicy};
