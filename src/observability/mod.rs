//! Observability module: structured logging via `tracing`.
//!
//! Every inbound request and every provisioning decision is logged. Logging
//! is advisory only and never influences a response.

mod tracing_init;

pub use tracing_init::*;
