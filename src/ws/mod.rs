//! Core WebSocket infrastructure.
//!
//! This module holds the transport-level pieces of the realtime client: connection
//! configuration, connection state, the per-socket receive loop and the heartbeat-based
//! liveness monitor. Protocol semantics (what to subscribe to, what counts as a heartbeat)
//! live in [`crate::realtime`].
//!
//! # Architecture
//!
//! - `connection::run`: drives one open socket until it closes, errors or goes silent
//! - [`MessageParser`]: Trait for parsing incoming WebSocket frames
//! - [`config::Config`]: heartbeat and reconnection settings

pub mod config;
pub mod connection;
pub mod error;
pub mod traits;

pub use connection::{ConnectionState, Termination};
#[expect(
    clippy::module_name_repetitions,
    reason = "WsError includes module name for clarity when used outside this module"
)]
pub use error::WsError;
pub use traits::*;
