//! Red packet HTTP API.
//!
//! This binary:
//! - Connects to Postgres (campaign store) and applies migrations
//! - Connects to Redis (allocation cache, claim script)
//! - Starts the claim event publisher towards Redpanda
//! - Serves the HTTP routes until SIGINT/SIGTERM
//! - Drains queued claim events before exiting
//!
//! # Usage
//!
//! ```bash
//! # Start infrastructure
//! docker compose up -d
//!
//! # Run the API
//! cargo run --bin api
//! ```

use anyhow::Context;
use redpacket_core::environment::{NoopTelemetry, Telemetry};
use redpacket_postgres::PostgresCampaignStore;
use redpacket_redis::RedisAllocationCache;
use redpacket_redpanda::RedpandaEventBus;
use redpacket_runtime::metrics::install_recorder;
use redpacket_runtime::{ClaimOrchestrator, ClaimPublisher, PrometheusTelemetry, PublisherConfig};
use redpacket_server::{Config, init_tracing, shutdown_signal};
use redpacket_web::{AppState, router};
use std::sync::Arc;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_env()?;
    init_tracing();

    info!(
        bind = %config.bind_address(),
        redis = %config.redis.url,
        brokers = %config.redpanda.brokers_list(),
        topic = %config.redpanda.topic,
        tier_policy = %config.claims.tier_policy,
        "Configuration loaded"
    );

    let metrics = if config.metrics.enabled {
        Some(install_recorder()?)
    } else {
        None
    };
    let telemetry: Arc<dyn Telemetry> = if metrics.is_some() {
        Arc::new(PrometheusTelemetry)
    } else {
        Arc::new(NoopTelemetry)
    };

    let store = PostgresCampaignStore::new(&config.postgres.url, config.postgres.max_connections)
        .await
        .context("connecting to Postgres")?;
    if config.postgres.run_migrations {
        store.migrate().await.context("running migrations")?;
    }

    let cache = RedisAllocationCache::new(&config.redis.url)
        .await
        .context("connecting to Redis")?;

    let event_bus = RedpandaEventBus::builder()
        .brokers(config.redpanda.brokers_list())
        .topic(&config.redpanda.topic)
        .build()
        .context("creating Redpanda producer")?;

    let (publisher, worker) = ClaimPublisher::spawn(
        Arc::new(event_bus),
        PublisherConfig {
            queue_capacity: config.claims.publish_queue_capacity,
            ..PublisherConfig::default()
        },
        Arc::clone(&telemetry),
    );

    let orchestrator = ClaimOrchestrator::new(Arc::new(store), Arc::new(cache), publisher)
        .with_telemetry(telemetry)
        .with_policy(config.claims.tier_policy);

    let mut state = AppState::new(Arc::new(orchestrator));
    if let Some(handle) = metrics {
        state = state.with_metrics(handle);
    }

    let listener = tokio::net::TcpListener::bind(config.bind_address())
        .await
        .with_context(|| format!("binding {}", config.bind_address()))?;
    info!(address = %config.bind_address(), "Starting HTTP server");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("HTTP server stopped, draining claim events");
    if tokio::time::timeout(config.server.shutdown_timeout, worker.shutdown())
        .await
        .is_err()
    {
        warn!(
            timeout_secs = config.server.shutdown_timeout.as_secs(),
            "Claim events still queued at shutdown timeout"
        );
    }

    info!("Shutdown complete");
    Ok(())
}
