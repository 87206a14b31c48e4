//! Application state for Axum handlers.

use metrics_exporter_prometheus::PrometheusHandle;
use redpacket_runtime::ClaimOrchestrator;
use std::sync::Arc;

/// Application state shared across all HTTP handlers.
///
/// Cloned per request, so everything inside is behind an `Arc` or cheap to
/// clone.
#[derive(Clone)]
pub struct AppState {
    /// Creates campaigns and decides claims
    pub orchestrator: Arc<ClaimOrchestrator>,
    /// Renders `/metrics`; `None` disables the endpoint
    pub metrics: Option<PrometheusHandle>,
}

impl AppState {
    /// Create state without a metrics endpoint.
    #[must_use]
    pub const fn new(orchestrator: Arc<ClaimOrchestrator>) -> Self {
        Self {
            orchestrator,
            metrics: None,
        }
    }

    /// Serve `/metrics` from `handle`.
    #[must_use]
    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.metrics = Some(handle);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_is_clone() {
        // Ensure AppState implements Clone (required for Axum)
        fn assert_clone<T: Clone>() {}
        assert_clone::<AppState>();
    }
}
