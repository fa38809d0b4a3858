//! Authentication middleware.
//!
//! Every registry needs exactly one authentication step. [`ApiKeyAuth`]
//! checks a shared key; [`AllowAnonymous`] is the explicit opt-out for
//! public services. Both record the caller as a [`Principal`] extension on
//! the call context.

use http::header::AUTHORIZATION;
use http::HeaderMap;
use subtle::ConstantTimeEq;

use crate::context::{Call, Reply};
use crate::error::RpcError;
use crate::handler::BoxFuture;

use super::{Middleware, Next};

pub const API_KEY_HEADER: &str = "x-api-key";

/// Identity of the authenticated caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Principal {
    Anonymous,
    /// Name the matching API key was registered under.
    Key(String),
}

/// Lets every call through as [`Principal::Anonymous`].
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAnonymous;

impl Middleware for AllowAnonymous {
    fn call(&self, mut call: Call, next: Next) -> BoxFuture<Result<Reply, RpcError>> {
        call.context.extensions_mut().insert(Principal::Anonymous);
        Box::pin(next.run(call))
    }
}

/// Shared-key authentication via `X-API-Key` or `Authorization: Bearer`.
#[derive(Debug, Clone, Default)]
pub struct ApiKeyAuth {
    /// (key, principal name)
    keys: Vec<(String, String)>,
}

impl ApiKeyAuth {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_key(mut self, name: impl Into<String>, key: impl Into<String>) -> Self {
        let key = key.into();
        self.keys.retain(|(existing, _)| *existing != key);
        self.keys.push((key, name.into()));
        self
    }

    /// Build from bare keys; each principal is named `key-<n>`.
    pub fn from_keys<I, K>(keys: I) -> Self
    where
        I: IntoIterator<Item = K>,
        K: Into<String>,
    {
        keys.into_iter()
            .enumerate()
            .fold(Self::new(), |auth, (i, key)| auth.with_key(format!("key-{}", i + 1), key))
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    fn authenticate(&self, headers: &HeaderMap) -> Result<Principal, RpcError> {
        let Some(provided) = presented_key(headers) else {
            tracing::debug!("[Auth] No API key presented");
            return Err(RpcError::unauthorized());
        };
        match self.matching(provided) {
            Some(name) => Ok(Principal::Key(name.to_string())),
            None => {
                tracing::warn!("[Auth] Invalid API key presented");
                Err(RpcError::access_denied())
            }
        }
    }
}

impl ApiKeyAuth {
    /// Compares against every configured key in constant time, without
    /// stopping at the first match.
    fn matching(&self, provided: &str) -> Option<&str> {
        let provided = provided.as_bytes();
        let mut found = None;
        for (key, name) in &self.keys {
            let equal: bool = key.as_bytes().ct_eq(provided).into();
            if equal && found.is_none() {
                found = Some(name.as_str());
            }
        }
        found
    }
}

fn presented_key(headers: &HeaderMap) -> Option<&str> {
    if let Some(key) = headers.get(API_KEY_HEADER).and_then(|v| v.to_str().ok()) {
        return Some(key.trim());
    }
    headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
}

impl Middleware for ApiKeyAuth {
    fn call(&self, mut call: Call, next: Next) -> BoxFuture<Result<Reply, RpcError>> {
        match self.authenticate(call.context.headers()) {
            Ok(principal) => {
                call.context.extensions_mut().insert(principal);
                Box::pin(next.run(call))
            }
            Err(err) => Box::pin(async move { Err(err) }),
        }
    }
}
