//! JSON Schema validation middleware.
//!
//! Schemas are compiled once, when the registration is accepted, so a live
//! call never pays for compilation and a malformed schema fails start-up.

use std::fmt;
use std::sync::Arc;

use http::StatusCode;
use schemars::JsonSchema;
use serde_json::Value;

use crate::body::Body;
use crate::context::{Call, Reply};
use crate::error::{codes, ConfigError, RpcError};
use crate::handler::BoxFuture;

use super::{Middleware, Next};

/// A compiled JSON Schema together with its source document.
#[derive(Clone)]
pub struct Schema {
    source: Arc<Value>,
    validator: Arc<jsonschema::Validator>,
}

/// One way an instance failed its schema.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Violation {
    /// Dotted path of the offending value, `(root)` for the document itself.
    pub field: String,
    /// The schema keyword that failed (`type`, `required`, `minLength`...).
    pub kind: String,
    pub description: String,
}

impl Schema {
    pub fn compile(source: Value) -> Result<Self, ConfigError> {
        let validator =
            jsonschema::validator_for(&source).map_err(|e| ConfigError::InvalidSchema(e.to_string()))?;
        Ok(Self {
            source: Arc::new(source),
            validator: Arc::new(validator),
        })
    }

    /// Derive and compile the schema of a Rust type.
    pub fn for_type<T: JsonSchema>() -> Result<Self, ConfigError> {
        let schema = schemars::schema_for!(T);
        let source =
            serde_json::to_value(&schema).map_err(|e| ConfigError::InvalidSchema(e.to_string()))?;
        Self::compile(source)
    }

    pub fn source(&self) -> &Value {
        &self.source
    }

    pub fn is_valid(&self, instance: &Value) -> bool {
        self.validator.is_valid(instance)
    }

    pub fn violations(&self, instance: &Value) -> Vec<Violation> {
        self.validator
            .iter_errors(instance)
            .map(|e| Violation {
                field: field_path(&e.instance_path.to_string()),
                kind: keyword(&e.schema_path.to_string()),
                description: e.to_string(),
            })
            .collect()
    }
}

impl fmt::Debug for Schema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Schema").field("source", &self.source).finish()
    }
}

/// `/items/0/name` -> `items.0.name`
fn field_path(pointer: &str) -> String {
    let trimmed = pointer.trim_start_matches('/');
    if trimmed.is_empty() {
        "(root)".to_string()
    } else {
        trimmed.replace('/', ".")
    }
}

fn keyword(schema_path: &str) -> String {
    schema_path
        .rsplit('/')
        .find(|segment| !segment.is_empty())
        .unwrap_or("schema")
        .to_string()
}

impl Violation {
    fn into_reason(self) -> RpcError {
        RpcError::new(codes::SCHEMA_VIOLATION)
            .with_meta("field", self.field)
            .with_meta("violation", self.kind)
            .with_meta("description", self.description)
    }
}

// ---------------------------------------------------------------------------
// Request validation
// ---------------------------------------------------------------------------

/// Buffers the request body and rejects it unless it matches the schema.
///
/// On success the downstream layers see a fresh body holding exactly the
/// bytes that were validated.
#[derive(Debug, Clone)]
pub struct ValidateRequest {
    schema: Schema,
}

impl ValidateRequest {
    pub fn new(schema: Schema) -> Self {
        Self { schema }
    }

    async fn check(schema: Schema, mut call: Call, next: Next) -> Result<Reply, RpcError> {
        let bytes = call.body.collect().await?;
        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Err(RpcError::invalid_json().with_meta("description", "request body is empty"));
        }
        let instance: Value = serde_json::from_slice(&bytes).map_err(RpcError::from)?;

        let violations = schema.violations(&instance);
        if !violations.is_empty() {
            tracing::debug!(
                "[Schema] {}@{} request rejected with {} violation(s)",
                call.context.method(),
                call.context.version(),
                violations.len()
            );
            return Err(RpcError::bad_request()
                .with_reasons(violations.into_iter().map(Violation::into_reason)));
        }

        call.body = Body::from(bytes);
        next.run(call).await
    }
}

impl Middleware for ValidateRequest {
    fn call(&self, call: Call, next: Next) -> BoxFuture<Result<Reply, RpcError>> {
        Box::pin(Self::check(self.schema.clone(), call, next))
    }
}

// ---------------------------------------------------------------------------
// Response validation
// ---------------------------------------------------------------------------

/// Checks successful replies against the schema. Mismatches are logged and
/// the reply is returned untouched.
#[derive(Debug, Clone)]
pub struct ValidateResponse {
    schema: Schema,
}

impl ValidateResponse {
    pub fn new(schema: Schema) -> Self {
        Self { schema }
    }

    async fn check(schema: Schema, call: Call, next: Next) -> Result<Reply, RpcError> {
        let method = call.context.method().clone();
        let version = call.context.version();
        let reply = next.run(call).await?;
        if reply.status() != StatusCode::OK {
            return Ok(reply);
        }

        match serde_json::from_slice::<Value>(reply.body()) {
            Ok(instance) => {
                for violation in schema.violations(&instance) {
                    tracing::warn!(
                        field = %violation.field,
                        violation = %violation.kind,
                        "[Schema] {}@{} response does not match its schema: {}",
                        method,
                        version,
                        violation.description
                    );
                }
            }
            Err(e) => {
                tracing::warn!("[Schema] {}@{} response is not valid JSON: {}", method, version, e);
            }
        }
        Ok(reply)
    }
}

impl Middleware for ValidateResponse {
    fn call(&self, call: Call, next: Next) -> BoxFuture<Result<Reply, RpcError>> {
        Box::pin(Self::check(self.schema.clone(), call, next))
    }
}
