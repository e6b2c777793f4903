#![cfg(feature = "websocket")]
#![allow(
    clippy::unwrap_used,
    clippy::missing_panics_doc,
    reason = "Do not need additional syntax for setting up tests"
)]

mod common;

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use broadcast_client::{Category, Client, ClientConfig, Endpoints, Phase, TransportKind};
use futures_util::{SinkExt as _, StreamExt as _};
use serde_json::json;
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc};
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;

use crate::common::{Recorded, recording_handler};

#[derive(Clone, Debug)]
enum Outbound {
    Text(String),
    Binary(Vec<u8>),
    Close,
}

/// Mock broadcast server.
struct MockWsServer {
    addr: SocketAddr,
    /// Sent to ALL connected clients
    outbound_tx: broadcast::Sender<Outbound>,
    /// Text messages received from clients
    inbound_rx: mpsc::UnboundedReceiver<String>,
    /// Request paths of every handshake, accepted or not
    paths: Arc<Mutex<Vec<String>>>,
}

impl MockWsServer {
    /// Start a server on a random port, refusing handshakes whose path ends in `.gz` when
    /// `reject_compressed` is set.
    async fn start(reject_compressed: bool) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let (outbound_tx, _) = broadcast::channel::<Outbound>(100);
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel::<String>();
        let paths = Arc::new(Mutex::new(Vec::new()));

        let broadcast_tx = outbound_tx.clone();
        let seen_paths = Arc::clone(&paths);

        tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    break;
                };

                let seen_paths = Arc::clone(&seen_paths);
                let check = move |request: &Request, response: Response| {
                    let path = request.uri().path().to_owned();
                    seen_paths.lock().unwrap().push(path.clone());

                    if reject_compressed && path.ends_with(".gz") {
                        let mut rejection = ErrorResponse::new(Some("compression unsupported".to_owned()));
                        *rejection.status_mut() = StatusCode::NOT_FOUND;
                        return Err(rejection);
                    }
                    Ok(response)
                };

                let Ok(ws_stream) = tokio_tungstenite::accept_hdr_async(stream, check).await else {
                    continue;
                };

                let (mut write, mut read) = ws_stream.split();
                let inbound_tx = inbound_tx.clone();
                let mut outbound_rx = broadcast_tx.subscribe();

                tokio::spawn(async move {
                    loop {
                        tokio::select! {
                            msg = read.next() => {
                                match msg {
                                    Some(Ok(Message::Text(text))) => {
                                        drop(inbound_tx.send(text.to_string()));
                                    }
                                    Some(Ok(_)) => {}
                                    _ => break,
                                }
                            }
                            msg = outbound_rx.recv() => {
                                let message = match msg {
                                    Ok(Outbound::Text(text)) => Message::Text(text.into()),
                                    Ok(Outbound::Binary(data)) => Message::Binary(data.into()),
                                    Ok(Outbound::Close) => {
                                        drop(write.send(Message::Close(None)).await);
                                        break;
                                    }
                                    Err(_) => break,
                                };
                                if write.send(message).await.is_err() {
                                    break;
                                }
                            }
                        }
                    }
                });
            }
        });

        Self {
            addr,
            outbound_tx,
            inbound_rx,
            paths,
        }
    }

    fn endpoints(&self) -> Endpoints {
        Endpoints::new(&format!("http://{}/data/now", self.addr)).unwrap()
    }

    fn send(&self, message: Outbound) {
        drop(self.outbound_tx.send(message));
    }

    /// Receive the next message a client sent.
    async fn recv(&mut self) -> Option<String> {
        timeout(Duration::from_secs(5), self.inbound_rx.recv())
            .await
            .ok()
            .flatten()
    }

    fn paths(&self) -> Vec<String> {
        self.paths.lock().unwrap().clone()
    }
}

async fn wait_until_live(client: &Client) {
    let mut state = client.state_receiver();
    timeout(
        Duration::from_secs(5),
        state.wait_for(|state| state.phase == Phase::Live),
    )
    .await
    .unwrap()
    .unwrap();
}

#[tokio::test]
async fn filters_are_sent_once_connected_and_updates_delivered() {
    let mut server = MockWsServer::start(false).await;
    let (handler, mut recorded) = recording_handler();
    let config = ClientConfig::builder()
        .endpoints(server.endpoints())
        .build();

    let client = Client::new(config, handler).unwrap();
    client.set_filters(["topicA"]).unwrap();
    client.connect().await.unwrap();

    assert_eq!(
        server.recv().await.unwrap(),
        r#"{"wsb":{"filters":["topicA"]}}"#
    );
    assert_eq!(client.state().transport, Some(TransportKind::WebSocket));

    server.send(Outbound::Text(r#"{"temp":21.5}"#.to_owned()));

    assert_eq!(recorded.next_update().await, json!({"temp": 21.5}));
    assert_eq!(client.bytes_received(), 13);

    client.disconnect().await;
}

#[tokio::test]
async fn derived_locator_requests_compression() {
    let server = MockWsServer::start(false).await;
    let (handler, _recorded) = recording_handler();
    let config = ClientConfig::builder()
        .endpoints(server.endpoints())
        .build();

    let client = Client::start(config, handler).await.unwrap();
    wait_until_live(&client).await;

    assert_eq!(server.paths(), vec!["/data/now.json.gz"]);

    client.disconnect().await;
}

#[cfg(feature = "compression")]
#[tokio::test]
async fn compressed_binary_payloads_are_inflated() {
    use std::io::Write as _;

    use flate2::Compression;
    use flate2::write::GzEncoder;

    let server = MockWsServer::start(false).await;
    let (handler, mut recorded) = recording_handler();
    let config = ClientConfig::builder()
        .endpoints(server.endpoints())
        .build();

    let client = Client::start(config, handler).await.unwrap();
    wait_until_live(&client).await;

    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder
        .write_all(br#"{"lights":{"porch":"on"}}"#)
        .unwrap();
    server.send(Outbound::Binary(encoder.finish().unwrap()));

    assert_eq!(
        recorded.next_update().await,
        json!({"lights": {"porch": "on"}})
    );

    client.disconnect().await;
}

#[tokio::test]
async fn falls_back_to_legacy_when_compressed_locator_is_refused() {
    let server = MockWsServer::start(true).await;
    let (handler, mut recorded) = recording_handler();
    let config = ClientConfig::builder()
        .endpoints(server.endpoints())
        .build();

    let client = Client::start(config, handler).await.unwrap();
    wait_until_live(&client).await;

    assert_eq!(
        client.state().transport,
        Some(TransportKind::WebSocketLegacy)
    );
    assert_eq!(server.paths(), vec!["/data/now.json.gz", "/data/now.json"]);

    // A successful fallback is not an error for the caller
    assert!(recorded.try_next().is_none());

    client.disconnect().await;
}

#[tokio::test]
async fn server_close_reconnects_and_replays_filters() {
    let mut server = MockWsServer::start(false).await;
    let (handler, mut recorded) = recording_handler();
    let config = ClientConfig::builder()
        .endpoints(server.endpoints())
        .build();

    let client = Client::new(config, handler).unwrap();
    client.set_filters(["a", "b"]).unwrap();
    client.connect().await.unwrap();

    let expected = r#"{"wsb":{"filters":["a","b"]}}"#;
    assert_eq!(server.recv().await.unwrap(), expected);

    server.send(Outbound::Close);

    let event = recorded.next_error().await;
    assert_eq!(event.category, Category::Disconnected);
    assert_eq!(event.retry_delay, Some(Duration::ZERO));

    assert_eq!(server.recv().await.unwrap(), expected);
    assert_eq!(server.paths().len(), 2);

    client.disconnect().await;
    assert_eq!(client.state().phase, Phase::Stopped);
}

#[tokio::test]
async fn unreachable_server_reports_connection_failed() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let (handler, mut recorded) = recording_handler();
    let config = ClientConfig::builder()
        .endpoints(Endpoints::new(&format!("http://{addr}")).unwrap())
        .build();

    let client = Client::start(config, handler).await.unwrap();

    let Recorded::Error(event) = recorded.next().await else {
        panic!("expected an error event");
    };
    assert_eq!(event.category, Category::ConnectionFailed);
    assert_eq!(event.details.len(), 3);
    assert_eq!(event.retry_delay, Some(Duration::from_secs(1)));
    assert_eq!(client.state().phase, Phase::Backoff);

    client.disconnect().await;
}
