//! Error types for the verpc core.
//!
//! Two families live here:
//!
//! - [`RpcError`]: the structured error used at request time. It carries a
//!   stable `code`, optional string metadata and nested `reasons`, and is
//!   both the internal propagation vehicle and the JSON wire format.
//! - [`ConfigError`]: registration-time misconfiguration. These are fatal:
//!   the registry refuses the mutation and the caller is expected to abort
//!   process start.
//!
//! When the `axum` feature is enabled, `RpcError` also implements
//! `IntoResponse` so it can be returned directly from axum handlers.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use http::StatusCode;
use serde::{Deserialize, Serialize};

/// Stable error codes understood by [`status_for`].
pub mod codes {
    pub const BAD_REQUEST: &str = "bad_request";
    pub const INVALID_JSON: &str = "invalid_json";
    pub const UNEXPECTED_EOF: &str = "unexpected_eof";
    pub const UNAUTHORIZED: &str = "unauthorized";
    pub const ACCESS_DENIED: &str = "access_denied";
    pub const NOT_FOUND: &str = "not_found";
    pub const METHOD_NOT_ALLOWED: &str = "method_not_allowed";
    pub const CONFLICT: &str = "conflict";
    pub const REQUEST_TOO_LARGE: &str = "request_too_large";
    pub const TOO_MANY_REQUESTS: &str = "too_many_requests";
    pub const EOF: &str = "eof";
    pub const CONTEXT_CANCELED: &str = "context_canceled";
    pub const UNKNOWN: &str = "unknown";
    pub const NOT_IMPLEMENTED: &str = "not_implemented";
    pub const UNAVAILABLE: &str = "unavailable";
    pub const DEADLINE_EXCEEDED: &str = "deadline_exceeded";

    // Reason codes nested under `bad_request`.
    pub const MISSING_REQUEST_BODY: &str = "missing_request_body";
    pub const UNEXPECTED_REQUEST_BODY: &str = "unexpected_request_body";
    pub const INVALID_VALUE: &str = "invalid_value";
    pub const SCHEMA_VIOLATION: &str = "schema_violation";
}

/// Map an error code to its HTTP status. Codes outside the table are 500.
pub fn status_for(code: &str) -> StatusCode {
    match code {
        codes::BAD_REQUEST | codes::INVALID_JSON | codes::UNEXPECTED_EOF => StatusCode::BAD_REQUEST,
        codes::UNAUTHORIZED => StatusCode::UNAUTHORIZED,
        codes::ACCESS_DENIED => StatusCode::FORBIDDEN,
        codes::NOT_FOUND => StatusCode::NOT_FOUND,
        codes::METHOD_NOT_ALLOWED => StatusCode::METHOD_NOT_ALLOWED,
        codes::CONFLICT => StatusCode::CONFLICT,
        codes::REQUEST_TOO_LARGE => StatusCode::PAYLOAD_TOO_LARGE,
        codes::TOO_MANY_REQUESTS => StatusCode::TOO_MANY_REQUESTS,
        // nginx's "client closed request"
        codes::EOF | codes::CONTEXT_CANCELED => {
            StatusCode::from_u16(499).unwrap_or(StatusCode::BAD_REQUEST)
        }
        codes::NOT_IMPLEMENTED => StatusCode::NOT_IMPLEMENTED,
        codes::UNAVAILABLE => StatusCode::SERVICE_UNAVAILABLE,
        codes::DEADLINE_EXCEEDED => StatusCode::GATEWAY_TIMEOUT,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

type Cause = Arc<dyn std::error::Error + Send + Sync>;

/// Structured request-time error.
///
/// Serializes as `{"code": "...", "meta": {...}, "reasons": [...]}` with the
/// empty parts omitted. The optional `cause` never reaches the wire; it is
/// kept for logs and exposed through [`std::error::Error::source`].
#[derive(Clone, Serialize, Deserialize)]
pub struct RpcError {
    code: String,
    #[serde(default, rename = "meta", skip_serializing_if = "BTreeMap::is_empty")]
    metadata: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    reasons: Vec<RpcError>,
    #[serde(skip)]
    cause: Option<Cause>,
}

impl RpcError {
    pub fn new(code: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            metadata: BTreeMap::new(),
            reasons: Vec::new(),
            cause: None,
        }
    }

    pub fn bad_request() -> Self {
        Self::new(codes::BAD_REQUEST)
    }

    pub fn invalid_json() -> Self {
        Self::new(codes::INVALID_JSON)
    }

    pub fn not_found() -> Self {
        Self::new(codes::NOT_FOUND)
    }

    pub fn unauthorized() -> Self {
        Self::new(codes::UNAUTHORIZED)
    }

    pub fn access_denied() -> Self {
        Self::new(codes::ACCESS_DENIED)
    }

    pub fn method_not_allowed() -> Self {
        Self::new(codes::METHOD_NOT_ALLOWED)
    }

    /// An internal failure that is not already a structured error.
    pub fn unknown() -> Self {
        Self::new(codes::UNKNOWN)
    }

    /// Coerce any error into a structured one.
    ///
    /// Values that already are an `RpcError` pass through unchanged; anything
    /// else becomes `unknown` with the original error kept as the cause.
    pub fn coerce<E>(err: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        let err = err.into();
        match err.downcast::<RpcError>() {
            Ok(rpc) => *rpc,
            Err(other) => Self::unknown().with_cause_arc(Arc::from(other)),
        }
    }

    pub fn with_meta(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.metadata.insert(key.into(), value.to_string());
        self
    }

    pub fn with_reason(mut self, reason: RpcError) -> Self {
        self.reasons.push(reason);
        self
    }

    pub fn with_reasons(mut self, reasons: impl IntoIterator<Item = RpcError>) -> Self {
        self.reasons.extend(reasons);
        self
    }

    pub fn with_cause<E>(self, cause: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        self.with_cause_arc(Arc::new(cause))
    }

    fn with_cause_arc(mut self, cause: Cause) -> Self {
        self.cause = Some(cause);
        self
    }

    /// Replace the code while keeping metadata, reasons and cause.
    pub fn recode(mut self, code: impl Into<String>) -> Self {
        self.code = code.into();
        self
    }

    pub fn code(&self) -> &str {
        &self.code
    }

    pub fn is(&self, code: &str) -> bool {
        self.code == code
    }

    pub fn meta(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).map(String::as_str)
    }

    pub fn metadata(&self) -> &BTreeMap<String, String> {
        &self.metadata
    }

    pub fn reasons(&self) -> &[RpcError] {
        &self.reasons
    }

    pub fn cause(&self) -> Option<&(dyn std::error::Error + Send + Sync + 'static)> {
        self.cause.as_deref()
    }

    pub fn status(&self) -> StatusCode {
        status_for(&self.code)
    }
}

impl fmt::Debug for RpcError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RpcError")
            .field("code", &self.code)
            .field("metadata", &self.metadata)
            .field("reasons", &self.reasons)
            .field("cause", &self.cause.as_ref().map(|c| c.to_string()))
            .finish()
    }
}

impl fmt::Display for RpcError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.code)?;
        if !self.metadata.is_empty() {
            let pairs: Vec<String> = self
                .metadata
                .iter()
                .map(|(k, v)| format!("{}={}", k, v))
                .collect();
            write!(f, " [{}]", pairs.join(", "))?;
        }
        if !self.reasons.is_empty() {
            let reasons: Vec<String> = self.reasons.iter().map(|r| r.to_string()).collect();
            write!(f, ": {}", reasons.join("; "))?;
        }
        if let Some(cause) = &self.cause {
            write!(f, ": {}", cause)?;
        }
        Ok(())
    }
}

impl std::error::Error for RpcError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.cause
            .as_deref()
            .map(|c| c as &(dyn std::error::Error + 'static))
    }
}

impl From<serde_json::Error> for RpcError {
    fn from(err: serde_json::Error) -> Self {
        use serde_json::error::Category;

        match err.classify() {
            Category::Syntax | Category::Eof => RpcError::invalid_json()
                .with_meta("line", err.line())
                .with_meta("column", err.column())
                .with_cause(err),
            Category::Data => {
                let reason = RpcError::new(codes::INVALID_VALUE)
                    .with_meta("description", &err)
                    .with_meta("line", err.line())
                    .with_meta("column", err.column());
                RpcError::bad_request().with_reason(reason).with_cause(err)
            }
            Category::Io => RpcError::unknown().with_cause(err),
        }
    }
}

impl From<std::io::Error> for RpcError {
    fn from(err: std::io::Error) -> Self {
        RpcError::unknown().with_cause(err)
    }
}

impl From<Box<dyn std::error::Error + Send + Sync>> for RpcError {
    fn from(err: Box<dyn std::error::Error + Send + Sync>) -> Self {
        RpcError::coerce(err)
    }
}

/// Registration-time misconfiguration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid method name {0:?}: expected lowercase snake_case starting with a letter")]
    InvalidMethod(String),

    #[error("invalid version {0:?}: expected YYYY-MM-DD, \"preview\" or \"latest\"")]
    InvalidVersion(String),

    #[error("cannot register {method} against \"latest\": it is a read-only alias")]
    LatestNotRegistrable { method: String },

    #[error("{method} is already registered at version {version}")]
    DuplicateRegistration { method: String, version: String },

    #[error("cannot withdraw {method} from preview: nothing there has been released")]
    PreviewWithdrawal { method: String },

    #[error("no authentication middleware configured")]
    MissingAuthentication,

    #[error("invalid JSON schema: {0}")]
    InvalidSchema(String),

    #[error("{method}@{version}: request schema supplied but the procedure accepts no request body")]
    UnexpectedRequestSchema { method: String, version: String },

    #[error("{method}@{version}: response schema supplied but the procedure produces no response body")]
    UnexpectedResponseSchema { method: String, version: String },
}

// ---------------------------------------------------------------------------
// axum integration (opt-in via feature flag)
// ---------------------------------------------------------------------------

#[cfg(feature = "axum")]
impl axum::response::IntoResponse for RpcError {
    fn into_response(self) -> axum::response::Response {
        let status = self.status();
        (status, axum::Json(self)).into_response()
    }
}
