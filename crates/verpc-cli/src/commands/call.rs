//! `verpc call`: POST to a running verpc server and print the outcome.

use serde_json::{json, Value};

use super::print_json;

pub async fn run(
    url: &str,
    version: &str,
    method: &str,
    data: Option<&str>,
    api_key: Option<&str>,
) -> Result<(), String> {
    let outcome = call(url, version, method, data, api_key).await?;
    print_json(&outcome);
    Ok(())
}

/// Perform the call and describe it as `{"status", "endpoint_status", "body"}`.
pub async fn call(
    url: &str,
    version: &str,
    method: &str,
    data: Option<&str>,
    api_key: Option<&str>,
) -> Result<Value, String> {
    let endpoint = format!("{}/{}/{}", url.trim_end_matches('/'), version, method);

    let mut request = reqwest::Client::new().post(&endpoint);
    if let Some(data) = data {
        // Validate locally so typos fail before the round trip.
        let _: Value =
            serde_json::from_str(data).map_err(|e| format!("Invalid JSON data: {}", e))?;
        request = request
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(data.to_string());
    }
    if let Some(key) = api_key {
        request = request.header("x-api-key", key);
    }

    let response = request
        .send()
        .await
        .map_err(|e| format!("Request to {} failed: {}", endpoint, e))?;

    let status = response.status();
    let endpoint_status = response
        .headers()
        .get("x-endpoint-status")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let text = response
        .text()
        .await
        .map_err(|e| format!("Failed to read response: {}", e))?;
    let body = if text.is_empty() {
        Value::Null
    } else {
        serde_json::from_str(&text).unwrap_or(Value::String(text))
    };

    Ok(json!({
        "status": status.as_u16(),
        "endpoint_status": endpoint_status,
        "body": body,
    }))
}
