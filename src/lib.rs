//! Agent-to-agent delegation over A2A JSON-RPC.
//!
//! A coordinator hands a natural-language problem to a remote capability
//! provider and gets back a [`DelegationOutcome`](a2a::dispatch::DelegationOutcome).

pub mod a2a;
pub mod config;
pub mod error;
pub mod logging;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests;
