//! Handler adapter.
//!
//! Business procedures come in four shapes (with or without a request value,
//! with or without a response value). [`Procedure`] has one constructor per
//! shape, and each produces the same uniform [`Handler`]:
//! `Call -> Future<Result<Reply, RpcError>>`.
//!
//! | constructor                          | procedure signature              |
//! |--------------------------------------|----------------------------------|
//! | [`Procedure::unit`]                  | `(Context) -> Result<(), E>`     |
//! | [`Procedure::returning`]             | `(Context) -> Result<S, E>`      |
//! | [`Procedure::accepting`]             | `(Context, R) -> Result<(), E>`  |
//! | [`Procedure::accepting_returning`]   | `(Context, R) -> Result<S, E>`   |
//!
//! Any other shape is rejected by the compiler, so shape errors never reach
//! production traffic.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::body::Body;
use crate::context::{Call, Context, Reply};
use crate::error::{codes, RpcError};

pub type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send + 'static>>;

type HandlerFn = dyn Fn(Call) -> BoxFuture<Result<Reply, RpcError>> + Send + Sync;

/// The uniform callable every registered method is reduced to.
#[derive(Clone)]
pub struct Handler {
    inner: Arc<HandlerFn>,
}

impl Handler {
    pub fn new<F, Fut>(f: F) -> Self
    where
        F: Fn(Call) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Reply, RpcError>> + Send + 'static,
    {
        Self {
            inner: Arc::new(move |call| -> BoxFuture<Result<Reply, RpcError>> {
                Box::pin(f(call))
            }),
        }
    }

    /// Wrap a closure that already returns a boxed future.
    pub fn from_boxed<F>(f: F) -> Self
    where
        F: Fn(Call) -> BoxFuture<Result<Reply, RpcError>> + Send + Sync + 'static,
    {
        Self { inner: Arc::new(f) }
    }

    pub fn call(&self, call: Call) -> BoxFuture<Result<Reply, RpcError>> {
        (self.inner)(call)
    }
}

impl std::fmt::Debug for Handler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Handler").finish_non_exhaustive()
    }
}

/// An adapted business procedure plus the shape it was built from.
#[derive(Debug, Clone)]
pub struct Procedure {
    handler: Handler,
    accepts_request: bool,
    produces_response: bool,
}

impl Procedure {
    /// `(Context) -> Result<(), E>`: no request body, 204 on success.
    pub fn unit<F, Fut, E>(f: F) -> Self
    where
        F: Fn(Context) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), E>> + Send + 'static,
        E: Into<RpcError> + 'static,
    {
        let f = Arc::new(f);
        let handler = Handler::new(move |mut call: Call| {
            let f = f.clone();
            async move {
                reject_body(&mut call.body).await?;
                f(call.context).await.map_err(Into::<RpcError>::into)?;
                Ok(Reply::no_content())
            }
        });
        Self {
            handler,
            accepts_request: false,
            produces_response: false,
        }
    }

    /// `(Context) -> Result<S, E>`: no request body, JSON response.
    pub fn returning<F, Fut, S, E>(f: F) -> Self
    where
        F: Fn(Context) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<S, E>> + Send + 'static,
        S: Serialize + Send + 'static,
        E: Into<RpcError> + 'static,
    {
        let f = Arc::new(f);
        let handler = Handler::new(move |mut call: Call| {
            let f = f.clone();
            async move {
                reject_body(&mut call.body).await?;
                let response = f(call.context).await.map_err(Into::<RpcError>::into)?;
                Reply::json(&response)
            }
        });
        Self {
            handler,
            accepts_request: false,
            produces_response: true,
        }
    }

    /// `(Context, R) -> Result<(), E>`: JSON request body, 204 on success.
    pub fn accepting<F, Fut, R, E>(f: F) -> Self
    where
        F: Fn(Context, R) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), E>> + Send + 'static,
        R: DeserializeOwned + Send + 'static,
        E: Into<RpcError> + 'static,
    {
        let f = Arc::new(f);
        let handler = Handler::new(move |mut call: Call| {
            let f = f.clone();
            async move {
                let request: R = decode_body(&mut call.body).await?;
                f(call.context, request).await.map_err(Into::<RpcError>::into)?;
                Ok(Reply::no_content())
            }
        });
        Self {
            handler,
            accepts_request: true,
            produces_response: false,
        }
    }

    /// `(Context, R) -> Result<S, E>`: JSON request body, JSON response.
    pub fn accepting_returning<F, Fut, R, S, E>(f: F) -> Self
    where
        F: Fn(Context, R) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<S, E>> + Send + 'static,
        R: DeserializeOwned + Send + 'static,
        S: Serialize + Send + 'static,
        E: Into<RpcError> + 'static,
    {
        let f = Arc::new(f);
        let handler = Handler::new(move |mut call: Call| {
            let f = f.clone();
            async move {
                let request: R = decode_body(&mut call.body).await?;
                let response = f(call.context, request).await.map_err(Into::<RpcError>::into)?;
                Reply::json(&response)
            }
        });
        Self {
            handler,
            accepts_request: true,
            produces_response: true,
        }
    }

    pub fn handler(&self) -> &Handler {
        &self.handler
    }

    pub fn accepts_request(&self) -> bool {
        self.accepts_request
    }

    pub fn produces_response(&self) -> bool {
        self.produces_response
    }
}

/// Procedures without a request value still refuse stray bytes.
async fn reject_body(body: &mut Body) -> Result<(), RpcError> {
    if body.has_content().await? {
        return Err(RpcError::bad_request().with_reason(RpcError::new(codes::UNEXPECTED_REQUEST_BODY)));
    }
    Ok(())
}

async fn decode_body<R: DeserializeOwned>(body: &mut Body) -> Result<R, RpcError> {
    let missing =
        || RpcError::bad_request().with_reason(RpcError::new(codes::MISSING_REQUEST_BODY));

    if !body.has_content().await? {
        return Err(missing());
    }
    let bytes = body.collect().await?;
    // Whitespace only: the decoder sees end-of-stream before any value.
    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Err(missing());
    }
    serde_json::from_slice(&bytes).map_err(RpcError::from)
}
