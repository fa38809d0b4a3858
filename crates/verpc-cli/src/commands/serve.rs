//! `verpc serve`: Start the HTTP server with the demo registry.

use verpc_core::middleware::{AllowAnonymous, ApiKeyAuth};
use verpc_core::Registry;
use verpc_server::ServerConfig;

use crate::demo;

pub async fn run(config: ServerConfig, api_keys: Vec<String>) -> Result<(), String> {
    let registry = build_registry(api_keys)?;

    println!("Starting verpc server on {}:{}...", config.host, config.port);

    let addr = verpc_server::start_server(config, registry.routes())
        .await
        .map_err(|e| e.to_string())?;
    println!("verpc server listening on http://{}", addr);

    // Keep the process running until interrupted
    tokio::signal::ctrl_c()
        .await
        .map_err(|e| format!("Failed to listen for Ctrl+C: {}", e))?;

    println!("\nShutting down...");
    Ok(())
}

/// API keys switch on key authentication; without any, calls are anonymous.
pub fn build_registry(api_keys: Vec<String>) -> Result<Registry, String> {
    let keys: Vec<String> = api_keys
        .into_iter()
        .map(|k| k.trim().to_string())
        .filter(|k| !k.is_empty())
        .collect();

    let registry = if keys.is_empty() {
        tracing::warn!("No API keys configured; serving anonymously");
        demo::registry(AllowAnonymous)
    } else {
        tracing::info!("API key authentication enabled ({} key(s))", keys.len());
        demo::registry(ApiKeyAuth::from_keys(keys))
    };
    registry.map_err(|e| format!("Invalid registry: {}", e))
}
