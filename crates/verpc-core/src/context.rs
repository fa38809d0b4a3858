//! Per-call state: the [`Context`] handed to procedures, the [`Call`] that
//! flows through the middleware chain, and the [`Reply`] that comes back.

use std::net::SocketAddr;

use bytes::Bytes;
use http::header::{HeaderValue, CONTENT_TYPE};
use http::{Extensions, HeaderMap, StatusCode};
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::body::Body;
use crate::error::RpcError;
use crate::ident::{MethodName, Version};

/// Call-scoped information visible to middleware and procedures.
#[derive(Debug, Clone)]
pub struct Context {
    version: Version,
    resolved_version: Version,
    method: MethodName,
    headers: HeaderMap,
    remote_addr: Option<SocketAddr>,
    cancellation: CancellationToken,
    extensions: Extensions,
}

impl Context {
    pub fn new(version: Version, method: MethodName) -> Self {
        Self {
            version,
            resolved_version: version,
            method,
            headers: HeaderMap::new(),
            remote_addr: None,
            cancellation: CancellationToken::new(),
            extensions: Extensions::new(),
        }
    }

    /// Record the concrete version a `latest` request resolved to.
    pub fn resolved_as(mut self, version: Version) -> Self {
        self.resolved_version = version;
        self
    }

    pub fn with_headers(mut self, headers: HeaderMap) -> Self {
        self.headers = headers;
        self
    }

    pub fn with_remote_addr(mut self, addr: Option<SocketAddr>) -> Self {
        self.remote_addr = addr;
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = token;
        self
    }

    /// The version as requested by the caller (possibly `latest`).
    pub fn version(&self) -> Version {
        self.version
    }

    pub fn resolved_version(&self) -> Version {
        self.resolved_version
    }

    pub fn method(&self) -> &MethodName {
        &self.method
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    pub fn remote_addr(&self) -> Option<SocketAddr> {
        self.remote_addr
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancellation
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    pub fn extensions(&self) -> &Extensions {
        &self.extensions
    }

    pub fn extensions_mut(&mut self) -> &mut Extensions {
        &mut self.extensions
    }
}

/// One in-flight call: its context plus the unread request body.
#[derive(Debug)]
pub struct Call {
    pub context: Context,
    pub body: Body,
}

impl Call {
    pub fn new(context: Context, body: impl Into<Body>) -> Self {
        Self {
            context,
            body: body.into(),
        }
    }
}

/// What a handler wrote back.
#[derive(Debug, Clone)]
pub struct Reply {
    status: StatusCode,
    headers: HeaderMap,
    body: Bytes,
}

impl Reply {
    /// 200 with the JSON encoding of `value`.
    pub fn json<T: Serialize + ?Sized>(value: &T) -> Result<Self, RpcError> {
        let body = serde_json::to_vec(value).map_err(RpcError::from)?;
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        Ok(Self {
            status: StatusCode::OK,
            headers,
            body: Bytes::from(body),
        })
    }

    /// 204 with an empty body.
    pub fn no_content() -> Self {
        Self {
            status: StatusCode::NO_CONTENT,
            headers: HeaderMap::new(),
            body: Bytes::new(),
        }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }
}

#[cfg(feature = "axum")]
impl axum::response::IntoResponse for Reply {
    fn into_response(self) -> axum::response::Response {
        (self.status, self.headers, self.body).into_response()
    }
}
