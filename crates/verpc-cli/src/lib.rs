//! verpc CLI library: command implementations and the demo registry, shared
//! by the `verpc` binary and its integration tests.

pub mod commands;
pub mod demo;
