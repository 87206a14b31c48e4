//! Axum HTTP surface for the red packet service.
//!
//! Handlers are thin: they parse the request, call the
//! [`ClaimOrchestrator`](redpacket_runtime::ClaimOrchestrator), and map the
//! result to a status code. Every decision is made by the Allocation Cache.
//!
//! # Routes
//!
//! | Route | Purpose |
//! |---|---|
//! | `POST /campaign` | create a campaign (`201 {id}`) |
//! | `POST /campaign/:id/open` | claim a packet (`200`/`409`/`410`) |
//! | `GET /campaign/:id` | campaign with durable and cached tier counts |
//! | `GET /health` | liveness |
//! | `GET /metrics` | Prometheus exposition |
//!
//! # Example
//!
//! ```ignore
//! use redpacket_web::{AppState, router};
//!
//! let state = AppState::new(orchestrator).with_metrics(handle);
//! let listener = tokio::net::TcpListener::bind("0.0.0.0:8080").await?;
//! axum::serve(listener, router(state)).await?;
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod error;
pub mod handlers;
pub mod middleware;
pub mod state;

use axum::{
    Router,
    routing::{get, post},
};

// Re-export key types for convenience
pub use error::AppError;
pub use middleware::{REQUEST_ID_HEADER, request_tracing_layer, track_http_metrics};
pub use state::AppState;

/// Build the service router with tracing, request ids and HTTP metrics.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/campaign", post(handlers::create_campaign))
        .route("/campaign/:id", get(handlers::get_campaign))
        .route("/campaign/:id/open", post(handlers::open))
        .route("/health", get(handlers::health_check))
        .route("/metrics", get(handlers::metrics))
        .with_state(state)
        .layer(axum::middleware::from_fn(track_http_metrics))
        .layer(request_tracing_layer())
}
