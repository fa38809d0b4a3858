pub mod metrics;
pub mod rpc;

use axum::routing::get;
use axum::Router;

use crate::state::AppState;

/// Build the complete API router: operational endpoints plus the RPC
/// fallback that owns every other path.
pub fn api_router(metrics_enabled: bool) -> Router<AppState> {
    let router = Router::new().route("/health", get(health_check));
    let router = if metrics_enabled {
        router.route("/metrics", get(metrics::render))
    } else {
        router
    };
    router.fallback(rpc::dispatch)
}

async fn health_check() -> axum::Json<serde_json::Value> {
    axum::Json(serde_json::json!({
        "status": "ok",
        "server": "verpc-server",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}
