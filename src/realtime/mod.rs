//! Realtime team events.
//!
//! A [`Client`] keeps one authenticated WebSocket subscription alive for a team and forwards
//! every event the server publishes to a single callback.
//!
//! **Lifecycle:**
//! - **Exchange**: the team API key is traded for a short-lived access token and the `team_id`
//! - **Open**: the socket is opened with `?access_token=<token>` and subscribes to `team_id`
//! - **Liveness**: server heartbeats are tracked; a silent socket is closed and replaced
//! - **Reconnect**: any lost socket (closed, errored, timed out, failed exchange) is retried
//!   after [`ReconnectConfig::delay`](crate::ws::config::ReconnectConfig::delay)
//!
//! # Example
//!
//! ```rust, no_run
//! use kadoa_sdk::realtime::Client;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     // Reads KADOA_TEAM_API_KEY
//!     let client = Client::from_env()?;
//!
//!     client.listen(|event| {
//!         println!("{}", event.as_value());
//!     });
//!
//!     tokio::signal::ctrl_c().await?;
//!     Ok(())
//! }
//! ```

pub mod client;
pub mod types;

pub use client::{Client, Config, Dispatch};
pub use types::request::SubscribeRequest;
pub use types::response::{Event, EventParser, RealtimeMessage};
