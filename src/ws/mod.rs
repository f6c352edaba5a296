//! Reconnecting WebSocket transport.
//!
//! # Architecture
//!
//! - [`ConnectionManager`]: owns the single live socket, the timeout-guarded
//!   open, and the constant-backoff retry loop
//! - [`config::Config`]: timeouts, retry interval, encryption, sub-protocols
//!
//! The manager surfaces lifecycle events over a broadcast channel and its
//! [`ReadyState`](connection::ReadyState) over a watch channel; the lifecycle
//! monitor drives suspend/resume through the same command surface consumers
//! use for `close`/`reload`.

pub mod config;
pub mod connection;
pub mod error;

pub use connection::{CloseReason, ConnectionManager, ReadyState};
#[expect(
    clippy::module_name_repetitions,
    reason = "WsError includes module name for clarity when used outside this module"
)]
pub use error::WsError;
