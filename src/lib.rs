//! APIWatch — multi-tenant API probing, classification and cost tracking.
//!
//! Connections hold vault-sealed provider credentials; checks describe one
//! endpoint each. The poller runs due checks through the probe executor
//! and persists every outcome. Cost tracking asks each provider's billing
//! API what the current month has cost so far.

pub mod adapters;
pub mod config;
pub mod error;
pub mod model;
pub mod orchestrator;
pub mod probe;
pub mod scheduler;
pub mod server;
pub mod store;
pub mod vault;

#[cfg(test)]
mod testutil;
