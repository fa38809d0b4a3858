//! verpc Server: HTTP transport for a verpc route table.
//!
//! Serves a resolved [`RouteTable`] over axum:
//! - `POST /<version>/<method>` for every registered procedure
//! - `GET /health` for liveness probes
//! - `GET /metrics` in Prometheus text format (opt-in)
//!
//! Registration happens up front in `verpc-core`; by the time the server
//! starts the table is frozen and shared read-only between requests.

pub mod api;
pub mod state;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use metrics_exporter_prometheus::PrometheusBuilder;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use verpc_core::RouteTable;

use self::state::{AppState, AppStateInner};

/// Configuration for the verpc HTTP server.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Maximum request body size in bytes.
    pub body_limit: usize,
    /// Install a Prometheus recorder and expose `GET /metrics`.
    pub metrics: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 3210,
            body_limit: 1024 * 1024,
            metrics: false,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    #[error("Failed to bind to {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to get local address: {0}")]
    LocalAddr(#[source] std::io::Error),

    #[error("Failed to install metrics recorder: {0}")]
    Metrics(String),
}

/// Build the router for a pre-built `AppState`.
pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    api::api_router(state.metrics.is_some())
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Start serving `routes` in a background task.
///
/// Returns the actual address the server is listening on.
pub async fn start_server(
    config: ServerConfig,
    routes: Arc<RouteTable>,
) -> Result<SocketAddr, ServerError> {
    if !routes.is_authenticated() {
        tracing::warn!("Route table has no authentication step; every call will be denied");
    }

    let mut state = AppStateInner::new(routes, config.body_limit);
    if config.metrics {
        let handle = PrometheusBuilder::new()
            .install_recorder()
            .map_err(|e| ServerError::Metrics(e.to_string()))?;
        state = state.with_metrics(handle);
    }
    let app = build_router(Arc::new(state));

    let addr: SocketAddr = format!("{}:{}", config.host, config.port)
        .parse()
        .map_err(|e| ServerError::InvalidAddress(format!("{}:{} ({})", config.host, config.port, e)))?;

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|source| ServerError::Bind { addr, source })?;

    let local_addr = listener.local_addr().map_err(ServerError::LocalAddr)?;

    tracing::info!("verpc server listening on {}", local_addr);

    // Spawn the server in a background task
    tokio::spawn(async move {
        let service = app.into_make_service_with_connect_info::<SocketAddr>();
        if let Err(e) = axum::serve(listener, service).await {
            tracing::error!("Server error: {}", e);
        }
    });

    Ok(local_addr)
}
