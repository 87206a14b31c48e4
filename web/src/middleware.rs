//! Request tracking and HTTP metrics.
//!
//! - **Request ids**: every request gets an `x-request-id` (kept if the client
//!   sent one, generated otherwise) that is echoed on the response and
//!   recorded on the request's tracing span.
//! - **HTTP metrics**: `redpacket_http_requests_total{method, route, status}`
//!   and `redpacket_http_request_duration_seconds{method, route}`.
//!
//! # Example
//!
//! ```ignore
//! let app = Router::new()
//!     .route("/campaign", post(create_campaign))
//!     .layer(from_fn(track_http_metrics))
//!     .layer(request_tracing_layer());
//! ```

use axum::{
    body::Body,
    extract::{MatchedPath, Request},
    http::HeaderValue,
    middleware::Next,
    response::Response,
};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tower::ServiceBuilder;
use tower::layer::util::{Identity, Stack};
use tower_http::classify::{ServerErrorsAsFailures, SharedClassifier};
use tower_http::request_id::{
    MakeRequestId, PropagateRequestIdLayer, RequestId, SetRequestIdLayer,
};
use tower_http::trace::{MakeSpan, TraceLayer};
use tracing::Span;

/// Header carrying the request id.
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Generates request ids of the form `<process tag>-<sequence>`.
///
/// The tag is the process start time in milliseconds, so ids stay unique
/// across restarts without a random source.
#[derive(Clone, Debug)]
pub struct SequentialRequestId {
    tag: u64,
    next: Arc<AtomicU64>,
}

impl SequentialRequestId {
    /// Start a new sequence.
    #[must_use]
    pub fn new() -> Self {
        let tag = chrono::Utc::now().timestamp_millis().unsigned_abs();
        Self {
            tag,
            next: Arc::new(AtomicU64::new(1)),
        }
    }
}

impl Default for SequentialRequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl MakeRequestId for SequentialRequestId {
    fn make_request_id<B>(&mut self, _request: &Request<B>) -> Option<RequestId> {
        let seq = self.next.fetch_add(1, Ordering::Relaxed);
        HeaderValue::from_str(&format!("{:x}-{seq}", self.tag))
            .ok()
            .map(RequestId::new)
    }
}

/// Opens an `http_request` span carrying the request id.
#[derive(Clone, Copy, Debug, Default)]
pub struct RequestSpan;

impl<B> MakeSpan<B> for RequestSpan {
    fn make_span(&mut self, request: &Request<B>) -> Span {
        let request_id = request
            .headers()
            .get(REQUEST_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("-");
        tracing::info_span!(
            "http_request",
            request_id,
            method = %request.method(),
            uri = %request.uri(),
        )
    }
}

/// The layer stack [`request_tracing_layer`] returns.
pub type RequestTracingLayer = ServiceBuilder<
    Stack<
        PropagateRequestIdLayer,
        Stack<
            TraceLayer<SharedClassifier<ServerErrorsAsFailures>, RequestSpan>,
            Stack<SetRequestIdLayer<SequentialRequestId>, Identity>,
        >,
    >,
>;

/// Assign, trace and echo request ids.
///
/// The id is set before the trace span opens so the span can record it.
#[must_use]
pub fn request_tracing_layer() -> RequestTracingLayer {
    ServiceBuilder::new()
        .layer(SetRequestIdLayer::x_request_id(SequentialRequestId::new()))
        .layer(TraceLayer::new_for_http().make_span_with(RequestSpan))
        .layer(PropagateRequestIdLayer::x_request_id())
}

/// Count and time every request by its route template.
///
/// Unmatched requests are grouped under `unmatched` so arbitrary paths do
/// not create new label values.
pub async fn track_http_metrics(request: Request<Body>, next: Next) -> Response {
    let started = Instant::now();
    let method = request.method().to_string();
    let route = request
        .extensions()
        .get::<MatchedPath>()
        .map_or_else(|| "unmatched".to_string(), |p| p.as_str().to_string());

    let response = next.run(request).await;

    let status = response.status().as_u16().to_string();
    metrics::counter!(
        "redpacket_http_requests_total",
        "method" => method.clone(),
        "route" => route.clone(),
        "status" => status
    )
    .increment(1);
    metrics::histogram!(
        "redpacket_http_request_duration_seconds",
        "method" => method,
        "route" => route
    )
    .record(started.elapsed().as_secs_f64());

    response
}
