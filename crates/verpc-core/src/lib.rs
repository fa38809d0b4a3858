//! verpc Core: transport-agnostic, date-versioned procedure dispatch.
//!
//! Business code registers typed procedures against a method name and a
//! version (`YYYY-MM-DD` or `preview`). The [`Registry`] adapts each one into
//! a uniform [`Handler`], wraps it in its middleware chain, and resolves the
//! sparse registrations into a dense [`RouteTable`] where every method
//! carries forward into later versions until withdrawn. `latest` aliases the
//! most recent dated version.
//!
//! Nothing here depends on an HTTP server, which keeps the crate usable from:
//!
//! - HTTP servers (via `verpc-server`)
//! - CLI tools and tests, which can call handlers directly
//!
//! # Feature Flags
//!
//! - `axum`: Enables `IntoResponse` impls on [`RpcError`] and [`Reply`].

pub mod body;
pub mod context;
pub mod error;
pub mod handler;
pub mod ident;
pub mod middleware;
pub mod registry;

// Convenience re-exports
pub use body::Body;
pub use context::{Call, Context, Reply};
pub use error::{codes, status_for, ConfigError, RpcError};
pub use handler::{BoxFuture, Handler, Procedure};
pub use ident::{MethodName, Version};
pub use middleware::{from_fn, Middleware, Next};
pub use registry::{Registration, Registry, Route, RouteTable};
