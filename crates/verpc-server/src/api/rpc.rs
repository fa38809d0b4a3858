//! Versioned procedure endpoint.
//!
//! Every request that no other route claims lands here as
//! `POST /<version>/<method>`. Non-POST requests are refused with 405 and
//! query strings with `bad_request`, both before any dispatch work. Paths
//! outside the grammar are `not_found` without touching the route table.

use std::io;
use std::net::SocketAddr;

use axum::extract::{ConnectInfo, Request, State};
use axum::http::header::ALLOW;
use axum::http::{HeaderName, HeaderValue, Method};
use axum::response::{IntoResponse, Response};
use tokio_stream::StreamExt;
use tokio_util::sync::CancellationToken;
use verpc_core::{Body, Call, Context, MethodName, RpcError, Version};

use crate::state::AppState;

pub const ENDPOINT_STATUS: HeaderName = HeaderName::from_static("x-endpoint-status");

/// Fallback handler: the whole RPC surface.
pub async fn dispatch(State(state): State<AppState>, request: Request) -> Response {
    if request.method() != Method::POST {
        let mut response = RpcError::method_not_allowed()
            .with_meta("method", request.method())
            .into_response();
        response
            .headers_mut()
            .insert(ALLOW, HeaderValue::from_static("POST"));
        return response;
    }
    if request.uri().query().is_some_and(|q| !q.is_empty()) {
        return RpcError::bad_request()
            .with_meta("description", "query strings are not accepted")
            .into_response();
    }
    let Some((version, method)) = parse_path(request.uri().path()) else {
        tracing::debug!("[RPC] No procedure path: {}", request.uri().path());
        return RpcError::not_found()
            .with_meta("path", request.uri().path())
            .into_response();
    };

    let route = match state.routes.lookup(version, &method) {
        Ok(route) => route,
        Err(err) => return err.into_response(),
    };
    let endpoint_status = endpoint_status(version, route.version());

    // Cancelled if the connection goes away and hyper drops this future.
    let cancellation = CancellationToken::new();
    let _guard = cancellation.clone().drop_guard();

    let remote_addr = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|info| info.0);
    let (parts, body) = request.into_parts();
    let context = Context::new(version, method)
        .resolved_as(route.version())
        .with_headers(parts.headers)
        .with_remote_addr(remote_addr)
        .with_cancellation(cancellation);

    let stream = body.into_data_stream().map(|chunk| {
        chunk.map_err(|e| io::Error::new(io::ErrorKind::UnexpectedEof, e))
    });
    let body = Body::from_stream(stream).with_limit(state.body_limit);

    let mut response = match route.call(Call::new(context, body)).await {
        Ok(reply) => reply.into_response(),
        Err(err) => err.into_response(),
    };
    if let Ok(value) = HeaderValue::from_str(&endpoint_status) {
        response.headers_mut().insert(ENDPOINT_STATUS, value);
    }
    response
}

/// `/<version>/<method>`, nothing more.
pub fn parse_path(path: &str) -> Option<(Version, MethodName)> {
    let (version, method) = path.strip_prefix('/')?.split_once('/')?;
    let version = Version::parse(version).ok()?;
    let method = MethodName::parse(method).ok()?;
    Some((version, method))
}

fn endpoint_status(requested: Version, resolved: Version) -> String {
    match requested {
        Version::Preview => {
            "experimental; preview methods may change or be withdrawn without notice".to_string()
        }
        Version::Latest => format!(
            "latest; currently {}, pin a dated version for stable behaviour",
            resolved
        ),
        Version::Dated(_) => "stable".to_string(),
    }
}
