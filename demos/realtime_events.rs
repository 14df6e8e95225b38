//! Streams realtime events for a team and logs them until Ctrl-C.
//!
//! Run with tracing enabled:
//! ```sh
//! KADOA_TEAM_API_KEY=... RUST_LOG=info,kadoa_sdk=debug cargo run --example realtime_events
//! ```
//!
//! `PUBLIC_KADOA_API_URI` and `WSS_KADOA_API_URI` point the client at other environments.

use kadoa_sdk::realtime::Client;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let client = Client::from_env()?;
    info!(?client, "Starting realtime client");

    client.listen(|event| {
        info!(
            event_type = event.event_type().unwrap_or("unknown"),
            id = event.id().unwrap_or_default(),
            payload = %event.as_value(),
            "Received event"
        );
    });

    let mut states = client.state_receiver();
    loop {
        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                result?;
                break;
            }
            changed = states.changed() => {
                changed?;
                let state = *states.borrow_and_update();
                info!(?state, generation = client.generation(), "Connection state changed");
            }
        }
    }

    info!("Shutting down");
    Ok(())
}
