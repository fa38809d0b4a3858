//! Per-call structured logging.
//!
//! Each call runs inside an `rpc` span carrying its method and version.
//! Transport anomalies surfacing as `unknown` are normalized here so a
//! client hanging up is distinguishable from a server fault.

use std::io;
use std::time::Instant;

use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::context::{Call, Reply};
use crate::error::{codes, RpcError};
use crate::handler::BoxFuture;

use super::{Middleware, Next};

#[derive(Debug, Clone, Copy, Default)]
pub struct Logging;

impl Logging {
    pub fn new() -> Self {
        Self
    }
}

impl Middleware for Logging {
    fn call(&self, call: Call, next: Next) -> BoxFuture<Result<Reply, RpcError>> {
        let span = tracing::info_span!(
            "rpc",
            method = %call.context.method(),
            version = %call.context.version(),
            resolved = %call.context.resolved_version(),
        );
        let cancellation = call.context.cancellation().clone();

        Box::pin(
            async move {
                let mut in_flight = InFlight::start();
                let result = next.run(call).await.map_err(|e| normalize(e, &cancellation));
                let elapsed_ms = in_flight.finish();

                match &result {
                    Ok(reply) => {
                        tracing::info!(status = reply.status().as_u16(), elapsed_ms, "[RPC] ok");
                    }
                    Err(err) if err.status().is_server_error() => {
                        tracing::error!(code = err.code(), elapsed_ms, "[RPC] failed: {}", err);
                    }
                    Err(err) => {
                        tracing::warn!(code = err.code(), elapsed_ms, "[RPC] rejected: {}", err);
                    }
                }
                result
            }
            .instrument(span),
        )
    }
}

/// Tracks one call; if the future is dropped before `finish`, the caller
/// went away and the call is logged as `context_canceled`.
struct InFlight {
    started: Instant,
    span: tracing::Span,
    done: bool,
}

impl InFlight {
    fn start() -> Self {
        Self {
            started: Instant::now(),
            span: tracing::Span::current(),
            done: false,
        }
    }

    fn finish(&mut self) -> f64 {
        self.done = true;
        self.started.elapsed().as_secs_f64() * 1000.0
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        if self.done {
            return;
        }
        let elapsed_ms = self.started.elapsed().as_secs_f64() * 1000.0;
        let _entered = self.span.enter();
        tracing::warn!(code = codes::CONTEXT_CANCELED, elapsed_ms, "[RPC] abandoned by caller");
    }
}

/// Give transport-level failures a stable code.
///
/// Only `unknown` errors are touched; anything already structured keeps
/// its code.
pub fn normalize(err: RpcError, cancellation: &CancellationToken) -> RpcError {
    match transport_code(&err, cancellation) {
        Some(code) => err.recode(code),
        None => err,
    }
}

/// The code [`normalize`] would give `err`, without consuming it.
pub fn normalized_code<'a>(err: &'a RpcError, cancellation: &CancellationToken) -> &'a str {
    transport_code(err, cancellation).unwrap_or_else(|| err.code())
}

fn transport_code(err: &RpcError, cancellation: &CancellationToken) -> Option<&'static str> {
    if !err.is(codes::UNKNOWN) {
        return None;
    }
    if cancellation.is_cancelled() {
        return Some(codes::CONTEXT_CANCELED);
    }
    let kind = err
        .cause()
        .and_then(|c| c.downcast_ref::<io::Error>())
        .map(io::Error::kind);
    match kind {
        Some(io::ErrorKind::UnexpectedEof) => Some(codes::UNEXPECTED_EOF),
        Some(
            io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::BrokenPipe,
        ) => Some(codes::EOF),
        _ => None,
    }
}
