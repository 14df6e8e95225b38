#![expect(
    clippy::module_name_repetitions,
    reason = "Connection types expose their domain in the name for clarity"
)]

use std::time::Duration;

use futures::{SinkExt as _, StreamExt as _};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::watch;
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tokio_tungstenite::{WebSocketStream, tungstenite::Message};
use tokio_util::sync::CancellationToken;

use super::config::Config;
use super::error::WsError;
use crate::error::Error;

/// Connection state tracking.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Nothing in flight. Either never started, or the last token exchange failed
    Idle,
    /// A token exchange or socket handshake is in flight
    Connecting,
    /// Socket is open and subscribed
    Open {
        /// When the connection was established
        since: std::time::Instant,
    },
    /// The socket was torn down and a reconnect is pending
    Disconnected,
}

impl ConnectionState {
    /// Check if the connection is currently active.
    #[must_use]
    pub const fn is_connected(self) -> bool {
        matches!(self, Self::Open { .. })
    }

    /// Whether a new connection attempt must be refused.
    #[must_use]
    pub const fn is_busy(self) -> bool {
        matches!(self, Self::Connecting | Self::Open { .. })
    }
}

/// Why a connection generation ended.
#[non_exhaustive]
#[derive(Debug)]
pub enum Termination {
    /// The owning client went away
    Shutdown,
    /// The token exchange failed before any socket was opened
    Unauthenticated(Error),
    /// The socket handshake failed
    ConnectFailed(Error),
    /// The server closed the socket
    Closed,
    /// Reading from the socket failed
    Failed(Error),
    /// The liveness monitor closed the socket
    HeartbeatTimeout,
}

impl Termination {
    /// Converts the termination into the error it represents, if any.
    #[must_use]
    pub fn into_error(self, config: &Config) -> Option<Error> {
        match self {
            Self::Shutdown => None,
            Self::Unauthenticated(e) | Self::ConnectFailed(e) | Self::Failed(e) => Some(e),
            Self::Closed => Some(WsError::ConnectionClosed.into()),
            Self::HeartbeatTimeout => Some(
                WsError::HeartbeatTimeout {
                    limit: config.missed_heartbeats_limit,
                }
                .into(),
            ),
        }
    }
}

/// Drive an open WebSocket until it terminates.
///
/// Every text or binary frame is handed to `on_frame` in arrival order, on this task. A
/// liveness monitor runs alongside the receive loop for exactly as long as this call; it is
/// joined before returning. Cancelling `cancel` closes the socket and yields
/// [`Termination::Shutdown`].
pub(crate) async fn run<S, F>(
    ws_stream: WebSocketStream<S>,
    config: &Config,
    heartbeats: watch::Receiver<Instant>,
    cancel: &CancellationToken,
    mut on_frame: F,
) -> Termination
where
    S: AsyncRead + AsyncWrite + Unpin,
    F: FnMut(&[u8]),
{
    let (mut write, mut read) = ws_stream.split();

    // Cancelled by the monitor on timeout, by shutdown through `cancel`, or by unwinding
    // out of `on_frame`.
    let monitor_token = cancel.child_token();
    let _monitor_guard = monitor_token.clone().drop_guard();
    let monitor = tokio::spawn(liveness_monitor(
        heartbeats,
        config.heartbeat_interval,
        config.missed_heartbeats_limit,
        monitor_token.clone(),
    ));

    let termination = loop {
        tokio::select! {
            biased;

            () = monitor_token.cancelled() => {
                if let Err(e) = write.send(Message::Close(None)).await {
                    #[cfg(feature = "tracing")]
                    tracing::debug!(error = %e, "Unable to send close frame");
                    #[cfg(not(feature = "tracing"))]
                    let _ = &e;
                }

                break if cancel.is_cancelled() {
                    Termination::Shutdown
                } else {
                    Termination::HeartbeatTimeout
                };
            }

            msg = read.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        #[cfg(feature = "tracing")]
                        tracing::trace!(%text, "Received WebSocket text message");

                        on_frame(text.as_bytes());
                    }
                    Some(Ok(Message::Binary(bytes))) => on_frame(bytes.as_ref()),
                    Some(Ok(Message::Close(frame))) => {
                        #[cfg(feature = "tracing")]
                        tracing::debug!(?frame, "Server closed WebSocket");
                        #[cfg(not(feature = "tracing"))]
                        let _ = &frame;

                        break Termination::Closed;
                    }
                    Some(Err(e)) => break Termination::Failed(e.into()),
                    None => break Termination::Closed,
                    Some(Ok(_)) => {
                        // Ping/pong are answered by tungstenite itself.
                    }
                }
            }
        }
    };

    monitor_token.cancel();
    match monitor.await {
        Ok(timed_out) => {
            #[cfg(feature = "tracing")]
            tracing::trace!(timed_out, "Liveness monitor stopped");
            #[cfg(not(feature = "tracing"))]
            let _ = timed_out;
        }
        Err(e) => {
            #[cfg(feature = "tracing")]
            tracing::error!("Liveness monitor failed: {e}");
            #[cfg(not(feature = "tracing"))]
            let _ = &e;
        }
    }

    termination
}

/// Periodically compares the heartbeat clock against `limit`.
///
/// Returns `true` when it gave up on the connection (and cancelled `token` to close it), or
/// `false` when it was cancelled from the outside.
pub(crate) async fn liveness_monitor(
    heartbeats: watch::Receiver<Instant>,
    interval: Duration,
    limit: Duration,
    token: CancellationToken,
) -> bool {
    let mut ticks = interval_at(Instant::now() + interval, interval);
    ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            () = token.cancelled() => return false,
            _ = ticks.tick() => {
                let silent_for = heartbeats.borrow().elapsed();
                if silent_for > limit {
                    #[cfg(feature = "tracing")]
                    tracing::warn!(
                        ?silent_for,
                        "No heartbeat received within {limit:?}! Closing connection"
                    );
                    token.cancel();
                    return true;
                }
            }
        }
    }
}
