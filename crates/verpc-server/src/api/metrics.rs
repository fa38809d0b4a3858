//! Prometheus scrape endpoint.

use axum::extract::State;
use axum::http::header::CONTENT_TYPE;
use axum::response::{IntoResponse, Response};
use verpc_core::RpcError;

use crate::state::AppState;

/// GET /metrics: current values in the Prometheus text format.
pub async fn render(State(state): State<AppState>) -> Response {
    match &state.metrics {
        Some(handle) => (
            [(CONTENT_TYPE, "text/plain; version=0.0.4")],
            handle.render(),
        )
            .into_response(),
        None => RpcError::not_found().with_meta("path", "/metrics").into_response(),
    }
}
