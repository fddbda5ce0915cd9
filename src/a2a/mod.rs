//! A2A (Agent-to-Agent) delegation.
//!
//! - Agent Card discovery (`/.well-known/agent-card.json`)
//! - JSON-RPC 2.0 (`message/send`, `message/stream`, `tasks/get`, `tasks/cancel`)
//! - Delegation dispatch: resolve, send, await, normalize
//! - HTTP servers for the provider and coordinator roles (axum)

pub mod types;
pub mod codec;
pub mod resolver;
pub mod normalizer;
pub mod stream;
pub mod dispatch;
pub mod auth;
pub mod calculator;
pub mod agent_card;
pub mod handler;
pub mod coordinator;
pub mod server;
