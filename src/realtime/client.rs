use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;

use bon::Builder;
use futures::SinkExt as _;
use reqwest::Client as ReqwestClient;
use reqwest::header::{HeaderMap, HeaderValue};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::watch;
use tokio::time::{Instant, sleep};
use tokio_tungstenite::{WebSocketStream, connect_async};
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::{CancellationToken, DropGuard};

use super::types::request::SubscribeRequest;
use super::types::response::{Event, EventParser, RealtimeMessage};
use crate::auth::{self, Credentials, Session};
use crate::error::{Error, Kind};
use crate::ws::MessageParser as _;
use crate::ws::config::{Config as ConnectionConfig, ReconnectSchedule};
use crate::ws::connection::{self, ConnectionState, Termination};
use crate::{Endpoints, Result};

const DEFAULT_EXCHANGE_TIMEOUT: Duration = Duration::from_secs(30);

type EventHandler = Arc<dyn Fn(Event) + Send + Sync>;

/// Where the event callback runs.
#[non_exhaustive]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Dispatch {
    /// On the socket's receive loop, one event at a time, in arrival order. A slow callback
    /// delays every later frame, heartbeats included.
    #[default]
    Inline,
    /// On a freshly spawned task per event. The receive loop never waits on the callback, but
    /// events may be handled out of order.
    Spawn,
}

/// Configuration for [`Client`]
#[derive(Clone, Debug, Builder)]
pub struct Config {
    /// HTTP and WebSocket base endpoints. Defaults to the production hosts.
    #[builder(default)]
    endpoints: Endpoints,
    /// Heartbeat and reconnection behaviour of the socket.
    #[builder(default)]
    connection: ConnectionConfig,
    /// Timeout applied to the token exchange request. The default is thirty (30) seconds.
    #[builder(default = DEFAULT_EXCHANGE_TIMEOUT)]
    exchange_timeout: Duration,
    #[builder(default)]
    dispatch: Dispatch,
}

impl Default for Config {
    fn default() -> Self {
        Self::builder().build()
    }
}

/// Realtime events client.
///
/// Owns one supervised WebSocket subscription: it exchanges the team credential for an access
/// token, opens the socket, subscribes to the team channel, watches server heartbeats and
/// reconnects whenever the socket is lost. Every non-heartbeat frame is handed to the callback
/// registered with [`Client::listen`].
///
/// Cloning is cheap and every clone drives the same connection. When the last clone is
/// dropped, the connection and any pending reconnect are torn down.
///
/// # Examples
///
/// ```rust, no_run
/// use kadoa_sdk::auth::Credentials;
/// use kadoa_sdk::realtime::{Client, Config};
///
/// #[tokio::main]
/// async fn main() -> anyhow::Result<()> {
///     let credentials = Credentials::team("my-team-api-key")?;
///     let client = Client::new(credentials, Config::default())?;
///
///     client.listen(|event| {
///         println!("Received event: {:?}, type: {:?}", event.id(), event.event_type());
///     });
///
///     tokio::signal::ctrl_c().await?;
///     Ok(())
/// }
/// ```
#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
    _shutdown: Arc<DropGuard>,
}

struct ClientInner {
    credentials: Credentials,
    config: Config,
    /// The inner [`ReqwestClient`] used for the token exchange.
    http: ReqwestClient,
    parser: EventParser,
    state_tx: watch::Sender<ConnectionState>,
    /// When the last heartbeat (or the last successful open) was observed.
    heartbeat_tx: watch::Sender<Instant>,
    handler: RwLock<Option<EventHandler>>,
    /// Incremented on every connection attempt.
    generation: AtomicU64,
    reconnect: Mutex<ReconnectSchedule>,
    /// Cancelled when the last [`Client`] is dropped.
    shutdown: CancellationToken,
}

impl Client {
    /// Creates an idle client. Nothing touches the network until [`Client::listen`] or
    /// [`Client::connect`] is called.
    pub fn new(credentials: Credentials, config: Config) -> Result<Self> {
        if config.connection.heartbeat_interval.is_zero() {
            return Err(Error::validation(
                "heartbeat_interval must be greater than zero",
            ));
        }
        if config.connection.missed_heartbeats_limit.is_zero() {
            return Err(Error::validation(
                "missed_heartbeats_limit must be greater than zero",
            ));
        }

        let mut headers = HeaderMap::new();

        headers.insert("User-Agent", HeaderValue::from_static("kadoa_rs_sdk"));
        headers.insert("Accept", HeaderValue::from_static("*/*"));

        let http = ReqwestClient::builder().default_headers(headers).build()?;

        let (state_tx, _) = watch::channel(ConnectionState::Idle);
        let (heartbeat_tx, _) = watch::channel(Instant::now());
        let shutdown = CancellationToken::new();
        let reconnect = ReconnectSchedule::new(config.connection.reconnect.clone());

        Ok(Self {
            inner: Arc::new(ClientInner {
                credentials,
                config,
                http,
                parser: EventParser,
                state_tx,
                heartbeat_tx,
                handler: RwLock::new(None),
                generation: AtomicU64::new(0),
                reconnect: Mutex::new(reconnect),
                shutdown: shutdown.clone(),
            }),
            _shutdown: Arc::new(shutdown.drop_guard()),
        })
    }

    /// Creates a client from `KADOA_TEAM_API_KEY`, `PUBLIC_KADOA_API_URI` and
    /// `WSS_KADOA_API_URI`.
    pub fn from_env() -> Result<Self> {
        let config = Config::builder().endpoints(Endpoints::from_env()?).build();
        Self::new(Credentials::from_env()?, config)
    }

    /// Registers `callback` as the sole event handler and starts the connection.
    ///
    /// Returns immediately; all network work happens on background tasks, so this must be
    /// called from within a Tokio runtime. Calling it again replaces the previous callback
    /// without opening a second connection.
    ///
    /// Failures of the token exchange or the socket are logged and retried forever; they are
    /// never reported to the caller. A panic inside `callback` is not caught: it unwinds the
    /// task that invoked it (the connection task under [`Dispatch::Inline`]), after which the
    /// connection is re-established like any other lost socket.
    pub fn listen<F>(&self, callback: F)
    where
        F: Fn(Event) + Send + Sync + 'static,
    {
        *self
            .inner
            .handler
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(Arc::new(callback));

        self.inner.connect();
    }

    /// Starts a connection attempt unless one is already in flight or open.
    pub fn connect(&self) {
        self.inner.connect();
    }

    /// Get the current connection state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        *self.inner.state_tx.borrow()
    }

    /// Subscribe to connection state changes.
    #[must_use]
    pub fn state_receiver(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state_tx.subscribe()
    }

    /// When the last server heartbeat (or the last successful open) was observed.
    #[must_use]
    pub fn last_heartbeat(&self) -> Instant {
        *self.inner.heartbeat_tx.borrow()
    }

    /// Number of connection attempts started so far.
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.inner.generation.load(Ordering::SeqCst)
    }

    /// Reconnections scheduled since the last successful open.
    #[must_use]
    pub fn reconnect_attempts(&self) -> u32 {
        self.inner
            .reconnect
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .attempt()
    }
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("endpoints", &self.inner.config.endpoints)
            .field("state", &self.state())
            .field("generation", &self.generation())
            .finish_non_exhaustive()
    }
}

impl ClientInner {
    fn connect(self: &Arc<Self>) {
        if self.shutdown.is_cancelled() {
            return;
        }

        // Check-and-set under the watch lock, so concurrent callers cannot both get past it
        let started = self.state_tx.send_if_modified(|state| {
            if state.is_busy() {
                return false;
            }
            *state = ConnectionState::Connecting;
            true
        });
        if !started {
            #[cfg(feature = "tracing")]
            tracing::debug!("Connection attempt already in flight, ignoring connect");
            return;
        }

        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let this = Arc::clone(self);

        tokio::spawn(async move {
            let attempt = tokio::spawn(Arc::clone(&this).run_generation(generation));
            let termination = match attempt.await {
                Ok(termination) => termination,
                Err(e) => {
                    #[cfg(feature = "tracing")]
                    tracing::error!(generation, "Connection task aborted: {e}");
                    Termination::Failed(Error::with_source(Kind::Internal, e))
                }
            };

            this.on_terminated(generation, termination);
        });
    }

    /// One full connect-to-disconnect cycle.
    async fn run_generation(self: Arc<Self>, generation: u64) -> Termination {
        let cancel = self.shutdown.child_token();

        let exchange = auth::exchange_token(
            &self.http,
            &self.config.endpoints.public_api,
            &self.credentials,
            self.config.exchange_timeout,
        );
        let session = tokio::select! {
            () = cancel.cancelled() => return Termination::Shutdown,
            result = exchange => match result {
                Ok(session) => session,
                Err(e) => return Termination::Unauthenticated(e),
            },
        };

        let url = session.socket_url(&self.config.endpoints.websocket);
        let ws_stream = tokio::select! {
            () = cancel.cancelled() => return Termination::Shutdown,
            result = connect_async(url.as_str()) => match result {
                Ok((ws_stream, _)) => ws_stream,
                Err(e) => return Termination::ConnectFailed(e.into()),
            },
        };

        self.on_open(generation, ws_stream, &session, &cancel).await
    }

    async fn on_open<S>(
        &self,
        generation: u64,
        mut ws_stream: WebSocketStream<S>,
        session: &Session,
        cancel: &CancellationToken,
    ) -> Termination
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        self.state_tx.send_replace(ConnectionState::Open {
            since: std::time::Instant::now(),
        });
        self.record_heartbeat();

        let request = SubscribeRequest::subscribe(session.team_id.as_str());
        let subscribe = match serde_json::to_string(&request) {
            Ok(json) => json,
            Err(e) => return Termination::Failed(e.into()),
        };
        if let Err(e) = ws_stream.send(Message::Text(subscribe.into())).await {
            return Termination::Failed(e.into());
        }

        // Only a subscribed socket counts as a successful attempt
        self.reconnect
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .reset();

        #[cfg(feature = "tracing")]
        tracing::info!(generation, channel = %session.team_id, "Connected");
        #[cfg(not(feature = "tracing"))]
        let _ = generation;

        connection::run(
            ws_stream,
            &self.config.connection,
            self.heartbeat_tx.subscribe(),
            cancel,
            |bytes| self.on_message(bytes),
        )
        .await
    }

    fn on_message(&self, bytes: &[u8]) {
        match self.parser.parse(bytes) {
            Ok(RealtimeMessage::Heartbeat) => {
                #[cfg(feature = "tracing")]
                tracing::trace!("Heartbeat received");
                self.record_heartbeat();
            }
            Ok(RealtimeMessage::Event(event)) => self.dispatch(event),
            Err(e) => {
                #[cfg(feature = "tracing")]
                tracing::warn!(error = %e, "Failed to parse incoming message");
                #[cfg(not(feature = "tracing"))]
                let _ = &e;
            }
        }
    }

    fn record_heartbeat(&self) {
        let now = Instant::now();
        self.heartbeat_tx.send_if_modified(|last| {
            if now > *last {
                *last = now;
                true
            } else {
                false
            }
        });
    }

    fn dispatch(&self, event: Event) {
        // Clone out of the lock so a callback may call `listen` again
        let handler = self
            .handler
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        let Some(handler) = handler else {
            #[cfg(feature = "tracing")]
            tracing::debug!("No event handler registered, dropping event");
            return;
        };

        match self.config.dispatch {
            Dispatch::Inline => handler(event),
            Dispatch::Spawn => {
                tokio::spawn(async move { handler(event) });
            }
        }
    }

    fn on_terminated(self: &Arc<Self>, generation: u64, termination: Termination) {
        let next = match &termination {
            Termination::Shutdown => {
                #[cfg(feature = "tracing")]
                tracing::debug!(generation, "Client dropped, connection stopped");
                self.state_tx.send_replace(ConnectionState::Idle);
                return;
            }
            Termination::Unauthenticated(_) => ConnectionState::Idle,
            _ => ConnectionState::Disconnected,
        };

        if let Some(error) = termination.into_error(&self.config.connection) {
            #[cfg(feature = "tracing")]
            tracing::warn!(generation, %error, "Disconnected. Attempting to reconnect...");
            #[cfg(not(feature = "tracing"))]
            let _ = (&error, generation);
        }

        self.state_tx.send_replace(next);
        self.schedule_reconnect();
    }

    fn schedule_reconnect(self: &Arc<Self>) {
        let delay = self
            .reconnect
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .next_delay();
        let Some(delay) = delay else {
            #[cfg(feature = "tracing")]
            tracing::error!("Reconnect attempts exhausted, giving up");
            self.state_tx.send_replace(ConnectionState::Idle);
            return;
        };

        #[cfg(feature = "tracing")]
        tracing::info!(?delay, "Scheduling reconnect");

        let this = Arc::clone(self);
        tokio::spawn(async move {
            tokio::select! {
                () = this.shutdown.cancelled() => {}
                () = sleep(delay) => this.connect(),
            }
        });
    }
}
