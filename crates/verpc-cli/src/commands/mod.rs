//! CLI command implementations.
//!
//! Each submodule corresponds to a top-level CLI command. `serve` and
//! `routes` share the demo registry from [`crate::demo`].

pub mod call;
pub mod routes;
pub mod serve;

/// Pretty-print a JSON value to stdout.
pub fn print_json(value: &serde_json::Value) {
    println!(
        "{}",
        serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
    );
}
