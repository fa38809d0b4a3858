//! Shared application state for the axum server.

use std::sync::Arc;

use metrics_exporter_prometheus::PrometheusHandle;
use verpc_core::RouteTable;

/// Shared state accessible by all API handlers. Read-only while serving.
pub struct AppStateInner {
    pub routes: Arc<RouteTable>,
    /// Largest request body a procedure will be handed, in bytes.
    pub body_limit: usize,
    /// Present when the `/metrics` endpoint is enabled.
    pub metrics: Option<PrometheusHandle>,
}

pub type AppState = Arc<AppStateInner>;

impl AppStateInner {
    pub fn new(routes: Arc<RouteTable>, body_limit: usize) -> Self {
        Self {
            routes,
            body_limit,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.metrics = Some(handle);
        self
    }
}
