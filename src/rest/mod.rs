//! Stateless HTTP fallback.
//!
//! Mirrors the socket semantics for one-shot use: `stats`, `get`, `publish`,
//! and `unpublish` each perform a single request/response and work regardless
//! of the WebSocket state — including while the socket is reconnecting.

pub mod client;
pub mod types;

pub use client::Client;
