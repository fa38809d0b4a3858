//! `verpc routes`: Print the demo registry's resolved route table.

use serde_json::{json, Map, Value};
use verpc_core::middleware::AllowAnonymous;
use verpc_core::RouteTable;

use super::print_json;
use crate::demo;

pub fn run() -> Result<(), String> {
    let registry = demo::registry(AllowAnonymous).map_err(|e| e.to_string())?;
    print_json(&describe(&registry.routes()));
    Ok(())
}

/// `{"latest": "<date>", "versions": {"<version>": ["<method>", ...]}}`
pub fn describe(routes: &RouteTable) -> Value {
    let versions: Map<String, Value> = routes
        .versions()
        .into_iter()
        .map(|version| {
            let methods: Vec<String> = routes
                .methods(version)
                .unwrap_or_default()
                .into_iter()
                .map(|m| m.to_string())
                .collect();
            (version.to_string(), json!(methods))
        })
        .collect();

    json!({
        "latest": routes.latest_version().map(|v| v.to_string()),
        "versions": versions,
    })
}
