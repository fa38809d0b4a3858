//! Call metrics.
//!
//! Records through the `metrics` facade, so whatever recorder the process
//! installed (Prometheus in `verpc-server`) receives the data. Without a
//! recorder the macros are no-ops.

use std::time::Instant;

use metrics::{counter, histogram};

use crate::context::{Call, Reply};
use crate::error::{codes, RpcError};
use crate::handler::BoxFuture;

use super::logging::normalized_code;
use super::{Middleware, Next};

pub const CALLS: &str = "verpc.calls";
pub const ERRORS: &str = "verpc.errors";
pub const DURATION: &str = "verpc.call.duration";

/// Counts calls and errors and observes call duration, labelled by method
/// and version. Never alters the outcome.
///
/// Error codes are labelled after transport normalization, so a client
/// hanging up shows as `unexpected_eof`/`eof`/`context_canceled` rather than
/// `unknown` regardless of where `Logging` sits in the chain. A call whose
/// future is dropped before completing counts as `context_canceled`.
#[derive(Debug, Clone, Copy, Default)]
pub struct Metrics;

impl Metrics {
    pub fn new() -> Self {
        Self
    }
}

impl Middleware for Metrics {
    fn call(&self, call: Call, next: Next) -> BoxFuture<Result<Reply, RpcError>> {
        let cancellation = call.context.cancellation().clone();
        let mut in_flight = InFlight {
            method: call.context.method().to_string(),
            version: call.context.version().to_string(),
            started: Instant::now(),
            done: false,
        };

        Box::pin(async move {
            let result = next.run(call).await;
            let code = result.as_ref().err().map(|err| normalized_code(err, &cancellation));
            in_flight.record(code);
            result
        })
    }
}

struct InFlight {
    method: String,
    version: String,
    started: Instant,
    done: bool,
}

impl InFlight {
    fn record(&mut self, code: Option<&str>) {
        self.done = true;
        counter!(CALLS, "method" => self.method.clone(), "version" => self.version.clone())
            .increment(1);
        histogram!(DURATION, "method" => self.method.clone(), "version" => self.version.clone())
            .record(self.started.elapsed().as_secs_f64());
        if let Some(code) = code {
            counter!(
                ERRORS,
                "method" => self.method.clone(),
                "version" => self.version.clone(),
                "code" => code.to_string()
            )
            .increment(1);
        }
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        if !self.done {
            self.record(Some(codes::CONTEXT_CANCELED));
        }
    }
}
