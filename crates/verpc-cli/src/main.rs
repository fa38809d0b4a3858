//! verpc CLI: serve, inspect and call date-versioned procedures.
//!
//! Reuses the same registry (verpc-core) and server bootstrap
//! (verpc-server) that embedding applications use.

use clap::{Parser, Subcommand};
use verpc_cli::commands;

/// verpc: date-versioned RPC over HTTP
#[derive(Parser)]
#[command(name = "verpc", version, about = "verpc: date-versioned RPC over HTTP")]
pub struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP server with the demo registry
    Serve {
        /// Host to bind to
        #[arg(long, env = "VERPC_HOST", default_value = "127.0.0.1")]
        host: String,
        /// Port to listen on
        #[arg(long, env = "VERPC_PORT", default_value_t = 3210)]
        port: u16,
        /// Accepted API keys; without any, calls are anonymous
        #[arg(long = "api-key", env = "VERPC_API_KEYS", value_delimiter = ',')]
        api_keys: Vec<String>,
        /// Maximum request body size in bytes
        #[arg(long, default_value_t = 1024 * 1024)]
        body_limit: usize,
        /// Expose Prometheus metrics on GET /metrics
        #[arg(long)]
        metrics: bool,
    },

    /// Print the demo registry's resolved route table
    Routes,

    /// Call a procedure on a running server
    Call {
        /// Version: YYYY-MM-DD, "latest" or "preview"
        version: String,
        /// Method name (e.g. "greet")
        method: String,
        /// Request body as a JSON string
        #[arg(long)]
        data: Option<String>,
        /// Server base URL
        #[arg(long, env = "VERPC_URL", default_value = "http://127.0.0.1:3210")]
        url: String,
        /// API key sent as X-API-Key
        #[arg(long, env = "VERPC_API_KEY")]
        api_key: Option<String>,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "verpc_core=info,verpc_server=info,verpc_cli=info,tower_http=info".into()
            }),
        )
        .init();

    let result = match cli.command {
        Some(Commands::Serve {
            host,
            port,
            api_keys,
            body_limit,
            metrics,
        }) => {
            let config = verpc_server::ServerConfig {
                host,
                port,
                body_limit,
                metrics,
            };
            commands::serve::run(config, api_keys).await
        }

        Some(Commands::Routes) => commands::routes::run(),

        Some(Commands::Call {
            version,
            method,
            data,
            url,
            api_key,
        }) => {
            commands::call::run(&url, &version, &method, data.as_deref(), api_key.as_deref()).await
        }

        None => {
            // No subcommand: show help
            use clap::CommandFactory;
            Cli::command().print_help().ok();
            println!();
            Ok(())
        }
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}
