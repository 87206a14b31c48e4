//! Red packet claim recorder.
//!
//! This binary:
//! - Connects to Postgres (campaign store and dead-letter queue)
//! - Subscribes to the claim topic in Redpanda as one consumer group member
//! - Records every claim event, acknowledging only once it is durable or
//!   dead-lettered
//! - Periodically replays dead letters
//! - Serves `/metrics` on its own port
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin consumer
//! ```

use anyhow::Context;
use axum::{Router, routing::get};
use redpacket_core::environment::{NoopTelemetry, Telemetry};
use redpacket_postgres::{PostgresCampaignStore, PostgresDeadLetterQueue};
use redpacket_redpanda::RedpandaEventBus;
use redpacket_runtime::metrics::install_recorder;
use redpacket_runtime::{ClaimConsumer, ClaimRecorder, PrometheusTelemetry, RetryPolicy};
use redpacket_server::{Config, init_tracing, shutdown_signal};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Dead letters replayed per run.
const REPLAY_BATCH: i64 = 100;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_env()?;
    init_tracing();

    info!(
        brokers = %config.redpanda.brokers_list(),
        topic = %config.redpanda.topic,
        group = %config.redpanda.consumer_group,
        max_retries = config.claims.recorder_max_retries,
        "Configuration loaded"
    );

    let (shutdown_tx, _) = broadcast::channel::<()>(1);
    let mut tasks: Vec<JoinHandle<()>> = Vec::new();

    let telemetry: Arc<dyn Telemetry> = if config.metrics.enabled {
        let handle = install_recorder()?;
        let address = format!("{}:{}", config.server.host, config.metrics.port);
        let listener = tokio::net::TcpListener::bind(&address)
            .await
            .with_context(|| format!("binding {address}"))?;
        let app = Router::new()
            .route("/metrics", get(move || std::future::ready(handle.render())))
            .route("/health", get(|| std::future::ready("ok")));
        let mut shutdown = shutdown_tx.subscribe();
        info!(address = %address, "Serving consumer metrics");
        tasks.push(tokio::spawn(async move {
            let stopped = async move {
                let _ = shutdown.recv().await;
            };
            if let Err(e) = axum::serve(listener, app)
                .with_graceful_shutdown(stopped)
                .await
            {
                warn!(error = %e, "Metrics server stopped");
            }
        }));
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
    let dead_letters = PostgresDeadLetterQueue::new(store.pool().clone());

    let event_bus = RedpandaEventBus::builder()
        .brokers(config.redpanda.brokers_list())
        .topic(&config.redpanda.topic)
        .consumer_group(&config.redpanda.consumer_group)
        .auto_offset_reset(&config.redpanda.auto_offset_reset)
        .build()
        .context("creating Redpanda client")?;

    let recorder = Arc::new(
        ClaimRecorder::new(Arc::new(store), Arc::new(dead_letters))
            .with_retry(
                RetryPolicy::builder()
                    .max_retries(config.claims.recorder_max_retries)
                    .build(),
            )
            .with_telemetry(telemetry),
    );

    tasks.push(
        ClaimConsumer::new(
            "claim-recorder",
            Arc::new(event_bus),
            Arc::clone(&recorder),
            shutdown_tx.subscribe(),
        )
        .spawn(),
    );

    let interval = config.claims.dead_letter_replay_interval;
    if interval > Duration::ZERO {
        tasks.push(spawn_replay(
            Arc::clone(&recorder),
            interval,
            shutdown_tx.subscribe(),
        ));
    }

    info!("Claim recorder running, press Ctrl+C to shutdown");
    shutdown_signal().await;
    let _ = shutdown_tx.send(());

    let stopped = async {
        for task in tasks {
            if let Err(e) = task.await {
                warn!(error = %e, "Task failed during shutdown");
            }
        }
    };
    if tokio::time::timeout(config.server.shutdown_timeout, stopped)
        .await
        .is_err()
    {
        warn!(
            timeout_secs = config.server.shutdown_timeout.as_secs(),
            "Tasks still running at shutdown timeout"
        );
    }

    info!("Shutdown complete");
    Ok(())
}

/// Replay pending dead letters every `interval` until shutdown.
fn spawn_replay(
    recorder: Arc<ClaimRecorder>,
    interval: Duration,
    mut shutdown: broadcast::Receiver<()>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = shutdown.recv() => break,
                _ = ticker.tick() => {
                    if let Err(e) = recorder.replay_dead_letters(REPLAY_BATCH).await {
                        warn!(error = %e, "Dead letter replay failed");
                    }
                }
            }
        }
    })
}
