#![allow(
    clippy::unwrap_used,
    clippy::missing_panics_doc,
    reason = "Do not need additional syntax for setting up tests"
)]

use std::net::SocketAddr;
use std::time::Duration;

use futures_util::{SinkExt as _, StreamExt as _};
use httpmock::Method::POST;
use httpmock::{Mock, MockServer};
use kadoa_sdk::Endpoints;
use kadoa_sdk::auth::{Credentials, TOKEN_PATH};
use kadoa_sdk::error::Kind;
use kadoa_sdk::realtime::{Client, Config, Dispatch, Event};
use kadoa_sdk::ws::ConnectionState;
use kadoa_sdk::ws::config::Config as ConnectionConfig;
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc};
use tokio::time::{sleep, timeout};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};

const TEAM_API_KEY: &str = "k1";
const ACCESS_TOKEN: &str = "t1";
const TEAM_ID: &str = "team1";

#[derive(Clone, Debug)]
enum Outgoing {
    Text(String),
    Close,
}

/// Mock realtime WebSocket server.
struct MockWsServer {
    addr: SocketAddr,
    /// Broadcast frames to ALL connected clients
    message_tx: broadcast::Sender<Outgoing>,
    /// Request URI of every accepted handshake
    connection_rx: mpsc::UnboundedReceiver<String>,
    /// Text frames sent by clients
    subscription_rx: mpsc::UnboundedReceiver<String>,
}

impl MockWsServer {
    /// Start a mock WebSocket server on a random port.
    async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let (message_tx, _) = broadcast::channel::<Outgoing>(100);
        let (connection_tx, connection_rx) = mpsc::unbounded_channel::<String>();
        let (subscription_tx, subscription_rx) = mpsc::unbounded_channel::<String>();

        let broadcast_tx = message_tx.clone();

        tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    break;
                };

                let uri_tx = connection_tx.clone();
                let callback = move |request: &Request, response: Response| {
                    drop(uri_tx.send(request.uri().to_string()));
                    Ok::<_, ErrorResponse>(response)
                };
                let Ok(ws_stream) = tokio_tungstenite::accept_hdr_async(stream, callback).await
                else {
                    continue;
                };

                let (mut write, mut read) = ws_stream.split();
                let sub_tx = subscription_tx.clone();
                let mut msg_rx = broadcast_tx.subscribe();

                tokio::spawn(async move {
                    loop {
                        tokio::select! {
                            msg = read.next() => {
                                match msg {
                                    Some(Ok(Message::Text(text))) => {
                                        drop(sub_tx.send(text.to_string()));
                                    }
                                    Some(Ok(Message::Close(_)) | Err(_)) | None => break,
                                    Some(Ok(_)) => {}
                                }
                            }
                            msg = msg_rx.recv() => {
                                match msg {
                                    Ok(Outgoing::Text(text)) => {
                                        if write.send(Message::Text(text.into())).await.is_err() {
                                            break;
                                        }
                                    }
                                    Ok(Outgoing::Close) => {
                                        drop(write.send(Message::Close(None)).await);
                                        break;
                                    }
                                    Err(_) => break,
                                }
                            }
                        }
                    }
                });
            }
        });

        Self {
            addr,
            message_tx,
            connection_rx,
            subscription_rx,
        }
    }

    fn url(&self) -> String {
        format!("ws://{}", self.addr)
    }

    /// Send a text frame to all connected clients.
    fn send(&self, message: &str) {
        drop(self.message_tx.send(Outgoing::Text(message.to_owned())));
    }

    /// Close every open connection from the server side.
    fn close_all(&self) {
        drop(self.message_tx.send(Outgoing::Close));
    }

    /// Receive the request URI of the next accepted connection.
    async fn recv_connection(&mut self) -> Option<String> {
        timeout(Duration::from_secs(2), self.connection_rx.recv())
            .await
            .ok()
            .flatten()
    }

    /// Receive the next subscription request.
    async fn recv_subscription(&mut self) -> Option<Value> {
        let text = timeout(Duration::from_secs(2), self.subscription_rx.recv())
            .await
            .ok()
            .flatten()?;
        serde_json::from_str(&text).ok()
    }
}

async fn token_mock(server: &MockServer) -> Mock<'_> {
    server
        .mock_async(|when, then| {
            when.method(POST)
                .path(format!("/{TOKEN_PATH}"))
                .header("authorization", format!("Bearer {TEAM_API_KEY}"))
                .header("content-type", "application/json");
            then.status(200)
                .json_body(json!({ "access_token": ACCESS_TOKEN, "team_id": TEAM_ID }));
        })
        .await
}

fn config(http: &MockServer, ws: &MockWsServer, connection: ConnectionConfig) -> Config {
    Config::builder()
        .endpoints(Endpoints::new(&http.base_url(), &ws.url()).unwrap())
        .connection(connection)
        .build()
}

fn reconnect_after(delay: Duration) -> ConnectionConfig {
    let mut connection = ConnectionConfig::default();
    connection.reconnect.delay = delay;
    connection
}

fn client(config: Config) -> Client {
    Client::new(Credentials::team(TEAM_API_KEY).unwrap(), config).unwrap()
}

/// Registers a callback that forwards every event into a channel.
fn listen(client: &Client) -> mpsc::UnboundedReceiver<Event> {
    let (tx, rx) = mpsc::unbounded_channel();
    client.listen(move |event| drop(tx.send(event)));
    rx
}

async fn recv_event(rx: &mut mpsc::UnboundedReceiver<Event>) -> Option<Event> {
    timeout(Duration::from_secs(2), rx.recv()).await.ok().flatten()
}

fn subscribe_frame() -> Value {
    json!({ "action": "subscribe", "channel": TEAM_ID })
}

#[test]
fn missing_credentials_are_rejected() {
    let err = Credentials::new(None, None).unwrap_err();
    assert_eq!(err.kind(), Kind::Configuration);

    let err = Credentials::new(Some("  ".to_owned()), Some(String::new())).unwrap_err();
    assert_eq!(err.kind(), Kind::Configuration);
}

mod connection {
    use super::*;

    #[tokio::test]
    async fn listen_exchanges_token_and_subscribes_to_team_channel() {
        let http = MockServer::start_async().await;
        let mut ws = MockWsServer::start().await;
        let token = token_mock(&http).await;

        let client = client(config(&http, &ws, ConnectionConfig::default()));
        assert_eq!(client.state(), ConnectionState::Idle);
        let _events = listen(&client);

        let uri = ws.recv_connection().await.unwrap();
        assert!(uri.contains(&format!("access_token={ACCESS_TOKEN}")), "{uri}");
        assert_eq!(ws.recv_subscription().await.unwrap(), subscribe_frame());

        assert!(client.state().is_connected());
        assert_eq!(client.generation(), 1);
        token.assert_async().await;
    }

    #[tokio::test]
    async fn public_api_path_prefix_is_kept() {
        let http = MockServer::start_async().await;
        let mut ws = MockWsServer::start().await;
        let token = http
            .mock_async(|when, then| {
                when.method(POST).path(format!("/gateway/{TOKEN_PATH}"));
                then.status(200)
                    .json_body(json!({ "access_token": ACCESS_TOKEN, "team_id": TEAM_ID }));
            })
            .await;

        let config = Config::builder()
            .endpoints(Endpoints::new(&http.url("/gateway"), &ws.url()).unwrap())
            .build();
        let client = client(config);
        let _events = listen(&client);

        assert_eq!(ws.recv_subscription().await.unwrap(), subscribe_frame());
        assert_eq!(token.calls_async().await, 1);
        assert!(client.state().is_connected());
    }

    #[tokio::test]
    async fn duplicate_connect_is_a_no_op() {
        let http = MockServer::start_async().await;
        let mut ws = MockWsServer::start().await;
        let token = http
            .mock_async(|when, then| {
                when.method(POST).path(format!("/{TOKEN_PATH}"));
                then.status(200)
                    .delay(Duration::from_millis(300))
                    .json_body(json!({ "access_token": ACCESS_TOKEN, "team_id": TEAM_ID }));
            })
            .await;

        let client = client(config(&http, &ws, ConnectionConfig::default()));
        let _events = listen(&client);
        assert_eq!(client.state(), ConnectionState::Connecting);

        client.connect();
        client.clone().connect();
        let _replaced = listen(&client);

        assert!(ws.recv_subscription().await.is_some());
        client.connect();
        sleep(Duration::from_millis(200)).await;

        assert_eq!(token.calls_async().await, 1);
        assert_eq!(client.generation(), 1);
        assert!(ws.connection_rx.try_recv().is_ok());
        assert!(ws.connection_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn failed_exchange_schedules_exactly_one_retry() {
        let http = MockServer::start_async().await;
        let mut ws = MockWsServer::start().await;
        let token = http
            .mock_async(|when, then| {
                when.method(POST).path(format!("/{TOKEN_PATH}"));
                then.status(401).body("invalid api key");
            })
            .await;

        let client = client(config(
            &http,
            &ws,
            reconnect_after(Duration::from_millis(300)),
        ));
        let mut states = client.state_receiver();
        let _events = listen(&client);

        timeout(
            Duration::from_secs(2),
            states.wait_for(|state| *state == ConnectionState::Idle),
        )
        .await
        .unwrap()
        .unwrap();
        assert_eq!(token.calls_async().await, 1);

        sleep(Duration::from_millis(450)).await;
        assert_eq!(token.calls_async().await, 2);
        assert_eq!(client.reconnect_attempts(), 2);

        // The socket is never opened without a session
        assert!(ws.connection_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn server_close_reconnects_and_resubscribes() {
        let http = MockServer::start_async().await;
        let mut ws = MockWsServer::start().await;
        let token = token_mock(&http).await;

        let client = client(config(
            &http,
            &ws,
            reconnect_after(Duration::from_millis(100)),
        ));
        let mut events = listen(&client);

        assert_eq!(ws.recv_subscription().await.unwrap(), subscribe_frame());
        ws.close_all();

        assert!(ws.recv_connection().await.is_some());
        assert!(ws.recv_connection().await.is_some());
        assert_eq!(ws.recv_subscription().await.unwrap(), subscribe_frame());
        assert_eq!(token.calls_async().await, 2);
        assert_eq!(client.generation(), 2);
        assert_eq!(client.reconnect_attempts(), 0);

        ws.send(r#"{"type":"event","id":"after-reconnect"}"#);
        let event = recv_event(&mut events).await.unwrap();
        assert_eq!(event.id(), Some("after-reconnect"));
    }

    #[tokio::test]
    async fn unreachable_socket_leaves_client_disconnected() {
        let http = MockServer::start_async().await;
        let token = token_mock(&http).await;

        // Bind then drop a listener to get a port nobody listens on
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let config = Config::builder()
            .endpoints(Endpoints::new(&http.base_url(), &format!("ws://{addr}")).unwrap())
            .connection(reconnect_after(Duration::from_secs(60)))
            .build();
        let client = client(config);
        let mut states = client.state_receiver();
        let _events = listen(&client);

        timeout(
            Duration::from_secs(2),
            states.wait_for(|state| *state == ConnectionState::Disconnected),
        )
        .await
        .unwrap()
        .unwrap();
        assert_eq!(token.calls_async().await, 1);
    }

    #[tokio::test]
    async fn dropping_client_stops_reconnects() {
        let http = MockServer::start_async().await;
        let mut ws = MockWsServer::start().await;
        let token = token_mock(&http).await;

        let client = client(config(
            &http,
            &ws,
            reconnect_after(Duration::from_millis(100)),
        ));
        let mut events = listen(&client);
        assert!(ws.recv_subscription().await.is_some());
        assert!(ws.recv_connection().await.is_some());

        drop(client);
        sleep(Duration::from_millis(100)).await;

        ws.send(r#"{"type":"event","id":"late"}"#);
        ws.close_all();
        sleep(Duration::from_millis(400)).await;

        assert!(events.try_recv().is_err());
        assert!(ws.connection_rx.try_recv().is_err());
        assert_eq!(token.calls_async().await, 1);
    }
}

mod messages {
    use super::*;

    #[tokio::test]
    async fn events_are_forwarded_once_and_heartbeats_are_consumed() {
        let http = MockServer::start_async().await;
        let mut ws = MockWsServer::start().await;
        let _token = token_mock(&http).await;

        let client = client(config(&http, &ws, ConnectionConfig::default()));
        let mut events = listen(&client);
        assert!(ws.recv_subscription().await.is_some());

        let opened_at = client.last_heartbeat();
        sleep(Duration::from_millis(10)).await;

        ws.send(r#"{"type":"heartbeat"}"#);
        ws.send("not json");
        ws.send(r#"{"type":"event","id":"e1"}"#);

        let event = recv_event(&mut events).await.unwrap();
        assert_eq!(event.into_value(), json!({ "type": "event", "id": "e1" }));
        assert!(client.last_heartbeat() > opened_at);

        sleep(Duration::from_millis(100)).await;
        assert!(events.try_recv().is_err());

        // Invalid frames do not tear down the connection
        assert!(client.state().is_connected());
        assert_eq!(client.generation(), 1);
    }

    #[tokio::test]
    async fn events_arrive_in_order() {
        let http = MockServer::start_async().await;
        let mut ws = MockWsServer::start().await;
        let _token = token_mock(&http).await;

        let client = client(config(&http, &ws, ConnectionConfig::default()));
        let mut events = listen(&client);
        assert!(ws.recv_subscription().await.is_some());

        for id in 0..5 {
            ws.send(&json!({ "type": "event", "id": id.to_string() }).to_string());
        }

        for id in 0..5 {
            let event = recv_event(&mut events).await.unwrap();
            assert_eq!(event.id(), Some(id.to_string().as_str()));
        }
    }

    #[tokio::test]
    async fn spawned_dispatch_delivers_events() {
        let http = MockServer::start_async().await;
        let mut ws = MockWsServer::start().await;
        let _token = token_mock(&http).await;

        let config = Config::builder()
            .endpoints(Endpoints::new(&http.base_url(), &ws.url()).unwrap())
            .dispatch(Dispatch::Spawn)
            .build();
        let client = client(config);
        let mut events = listen(&client);
        assert!(ws.recv_subscription().await.is_some());

        ws.send(r#"{"event":"update","data":{"id":1}}"#);

        let event = recv_event(&mut events).await.unwrap();
        assert_eq!(event.get("event"), Some(&json!("update")));
    }

    #[tokio::test]
    async fn callback_panic_reconnects() {
        let http = MockServer::start_async().await;
        let mut ws = MockWsServer::start().await;
        let token = token_mock(&http).await;

        let client = client(config(
            &http,
            &ws,
            reconnect_after(Duration::from_millis(100)),
        ));
        client.listen(|event| {
            assert_ne!(event.id(), Some("boom"), "callback failure");
        });
        assert!(ws.recv_subscription().await.is_some());

        ws.send(r#"{"type":"event","id":"boom"}"#);

        assert_eq!(ws.recv_subscription().await.unwrap(), subscribe_frame());
        assert_eq!(token.calls_async().await, 2);
    }
}

mod heartbeat {
    use super::*;

    fn fast_liveness() -> ConnectionConfig {
        let mut connection = reconnect_after(Duration::from_millis(100));
        connection.heartbeat_interval = Duration::from_millis(50);
        connection.missed_heartbeats_limit = Duration::from_millis(200);
        connection
    }

    #[tokio::test]
    async fn silent_socket_is_closed_and_replaced() {
        let http = MockServer::start_async().await;
        let mut ws = MockWsServer::start().await;
        let token = token_mock(&http).await;

        let client = client(config(&http, &ws, fast_liveness()));
        let _events = listen(&client);

        assert!(ws.recv_subscription().await.is_some());
        assert!(ws.recv_subscription().await.is_some());
        assert!(token.calls_async().await >= 2);
        assert!(client.generation() >= 2);
    }

    #[tokio::test]
    async fn heartbeats_keep_socket_open() {
        let http = MockServer::start_async().await;
        let mut ws = MockWsServer::start().await;
        let token = token_mock(&http).await;

        let client = client(config(&http, &ws, fast_liveness()));
        let _events = listen(&client);
        assert!(ws.recv_subscription().await.is_some());

        for _ in 0..12 {
            ws.send(r#"{"type":"heartbeat"}"#);
            sleep(Duration::from_millis(50)).await;
        }

        assert!(client.state().is_connected());
        assert_eq!(client.generation(), 1);
        assert_eq!(token.calls_async().await, 1);
    }
}
