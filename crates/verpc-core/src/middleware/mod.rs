//! Middleware pipeline.
//!
//! A [`Middleware`] receives the [`Call`] and a [`Next`] for the rest of the
//! chain. It may inspect or rewrite the call, short-circuit with an error,
//! or run `next` and post-process the outcome.
//!
//! [`compose`] nests one registration's layers in a fixed order, outermost
//! first:
//!
//! ```text
//! global middleware        (earliest registered with the server outermost)
//!   per-registration list  (earliest supplied outermost)
//!     response schema validation
//!       request schema validation
//!         authentication
//!           adapted handler
//! ```

pub mod auth;
pub mod logging;
pub mod metrics;
pub mod schema;

use std::future::Future;
use std::sync::Arc;

use crate::context::{Call, Reply};
use crate::error::RpcError;
use crate::handler::{BoxFuture, Handler};

pub use auth::{AllowAnonymous, ApiKeyAuth, Principal};
pub use logging::Logging;
pub use metrics::Metrics;
pub use schema::{Schema, ValidateRequest, ValidateResponse, Violation};

/// A cross-cutting layer around a [`Handler`].
pub trait Middleware: Send + Sync + 'static {
    fn call(&self, call: Call, next: Next) -> BoxFuture<Result<Reply, RpcError>>;
}

impl<M: Middleware + ?Sized> Middleware for Arc<M> {
    fn call(&self, call: Call, next: Next) -> BoxFuture<Result<Reply, RpcError>> {
        (**self).call(call, next)
    }
}

/// The remainder of the chain below a middleware.
#[derive(Debug, Clone)]
pub struct Next {
    handler: Handler,
}

impl Next {
    pub fn new(handler: Handler) -> Self {
        Self { handler }
    }

    pub async fn run(self, call: Call) -> Result<Reply, RpcError> {
        self.handler.call(call).await
    }
}

/// Middleware built from an async closure, see [`from_fn`].
#[derive(Clone)]
pub struct FromFn<F> {
    f: F,
}

/// Turn `async fn(Call, Next) -> Result<Reply, RpcError>` into a middleware.
///
/// ```ignore
/// let tag = from_fn(|mut call: Call, next: Next| async move {
///     call.context.headers_mut().insert("x-tagged", "1".parse().unwrap());
///     next.run(call).await
/// });
/// ```
pub fn from_fn<F, Fut>(f: F) -> FromFn<F>
where
    F: Fn(Call, Next) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Reply, RpcError>> + Send + 'static,
{
    FromFn { f }
}

impl<F, Fut> Middleware for FromFn<F>
where
    F: Fn(Call, Next) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Reply, RpcError>> + Send + 'static,
{
    fn call(&self, call: Call, next: Next) -> BoxFuture<Result<Reply, RpcError>> {
        Box::pin((self.f)(call, next))
    }
}

/// Wrap `inner` in a single middleware layer.
pub fn layer(middleware: Arc<dyn Middleware>, inner: Handler) -> Handler {
    Handler::from_boxed(move |call| middleware.call(call, Next::new(inner.clone())))
}

/// The layers that make up one registration's chain.
#[derive(Clone, Default)]
pub struct Layers {
    pub global: Vec<Arc<dyn Middleware>>,
    pub per_registration: Vec<Arc<dyn Middleware>>,
    pub response_schema: Option<Arc<dyn Middleware>>,
    pub request_schema: Option<Arc<dyn Middleware>>,
    pub authentication: Option<Arc<dyn Middleware>>,
}

/// Nest `handler` inside `layers`, innermost first.
pub fn compose(handler: Handler, layers: &Layers) -> Handler {
    let mut handler = handler;

    let fixed = [
        &layers.authentication,
        &layers.request_schema,
        &layers.response_schema,
    ];
    for middleware in fixed.into_iter().flatten() {
        handler = layer(middleware.clone(), handler);
    }
    for middleware in layers.per_registration.iter().rev() {
        handler = layer(middleware.clone(), handler);
    }
    for middleware in layers.global.iter().rev() {
        handler = layer(middleware.clone(), handler);
    }
    handler
}
