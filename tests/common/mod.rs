#![allow(
    clippy::unwrap_used,
    clippy::missing_panics_doc,
    reason = "Do not need additional syntax for setting up tests"
)]
#![allow(
    unused,
    reason = "Each integration test binary uses a different subset of these helpers"
)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use futures_util::{SinkExt as _, StreamExt as _};
use keymirror_client_sdk::Client;
use keymirror_client_sdk::types::{CacheDocument, Event};
use keymirror_client_sdk::ws::ReadyState;
use keymirror_client_sdk::ws::config::Config;
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc};
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;

/// Mock keymirror WebSocket server.
///
/// Accepts any number of connections, fans server-pushed frames out to all of
/// them, and can drop every live connection to simulate a network failure.
pub struct MockWsServer {
    addr: SocketAddr,
    /// Frames pushed to ALL connected clients
    frame_tx: broadcast::Sender<Message>,
    /// Signal that tears down every live connection without a close handshake
    drop_tx: broadcast::Sender<()>,
    /// Messages received FROM clients
    incoming_rx: mpsc::UnboundedReceiver<String>,
    connections: Arc<AtomicUsize>,
}

impl MockWsServer {
    /// Start a mock server on a random port.
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let (frame_tx, _) = broadcast::channel::<Message>(64);
        let (drop_tx, _) = broadcast::channel::<()>(8);
        let (incoming_tx, incoming_rx) = mpsc::unbounded_channel::<String>();
        let connections = Arc::new(AtomicUsize::new(0));

        let accept_frames = frame_tx.clone();
        let accept_drops = drop_tx.clone();
        let accept_count = Arc::clone(&connections);

        tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    break;
                };

                // Subscribe before the handshake completes so frames sent
                // right after the client observes Open are never lost.
                let mut frame_rx = accept_frames.subscribe();
                let mut drop_rx = accept_drops.subscribe();
                let incoming = incoming_tx.clone();

                let Ok(ws_stream) = tokio_tungstenite::accept_async(stream).await else {
                    continue;
                };
                accept_count.fetch_add(1, Ordering::SeqCst);

                tokio::spawn(async move {
                    let (mut write, mut read) = ws_stream.split();
                    loop {
                        tokio::select! {
                            msg = read.next() => match msg {
                                Some(Ok(Message::Text(text))) => {
                                    drop(incoming.send(text.to_string()));
                                }
                                Some(Ok(_)) => {}
                                _ => break,
                            },
                            frame = frame_rx.recv() => match frame {
                                Ok(message) => {
                                    if write.send(message).await.is_err() {
                                        break;
                                    }
                                }
                                Err(_) => break,
                            },
                            sig = drop_rx.recv() => {
                                // Drop the socket without a close handshake.
                                let _ = sig;
                                break;
                            }
                        }
                    }
                });
            }
        });

        Self {
            addr,
            frame_tx,
            drop_tx,
            incoming_rx,
            connections,
        }
    }

    /// The authority (`host:port`) clients connect to.
    pub fn host(&self) -> String {
        self.addr.to_string()
    }

    /// Push a binary frame to all connected clients.
    pub fn send(&self, frame: Vec<u8>) {
        drop(self.frame_tx.send(Message::Binary(frame.into())));
    }

    /// Push a text frame to all connected clients.
    pub fn send_text(&self, text: &str) {
        drop(self.frame_tx.send(Message::Text(text.to_owned().into())));
    }

    /// Tear down every live connection.
    pub fn drop_connections(&self) {
        drop(self.drop_tx.send(()));
    }

    /// How many WebSocket handshakes have completed so far.
    pub fn connection_count(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }

    /// Receive the next message a client sent to the server.
    pub async fn recv_client_message(&mut self) -> Option<String> {
        timeout(Duration::from_secs(2), self.incoming_rx.recv())
            .await
            .ok()
            .flatten()
    }
}

/// Transport config with intervals short enough for tests.
pub fn test_config() -> Config {
    let mut config = Config::default();
    config.connect_timeout = Duration::from_millis(500);
    config.reconnect_interval = Duration::from_millis(50);
    config
}

/// A server-side entry with its `data` payload Base64-wrapped, as it travels
/// inside snapshots and `add` patch values.
pub fn wire_entry(index: &str, created: i64, updated: i64, data: &Value) -> Value {
    json!({
        "created": created,
        "updated": updated,
        "index": index,
        "data": STANDARD.encode(data.to_string()),
    })
}

pub fn snapshot_frame(doc: &Value) -> Vec<u8> {
    json!({"snapshot": true, "data": STANDARD.encode(doc.to_string())})
        .to_string()
        .into_bytes()
}

pub fn empty_snapshot_frame() -> Vec<u8> {
    json!({"snapshot": true, "data": ""}).to_string().into_bytes()
}

pub fn patch_frame(ops: &Value) -> Vec<u8> {
    json!({"snapshot": false, "data": STANDARD.encode(ops.to_string())})
        .to_string()
        .into_bytes()
}

pub fn b64(value: &Value) -> String {
    STANDARD.encode(value.to_string())
}

/// Receive the next event, failing the test after two seconds.
pub async fn next_event(rx: &mut broadcast::Receiver<Event>) -> Event {
    timeout(Duration::from_secs(2), rx.recv())
        .await
        .expect("timed out waiting for event")
        .expect("event channel closed")
}

/// Skip events until the predicate matches.
pub async fn wait_for_event<F: Fn(&Event) -> bool>(
    rx: &mut broadcast::Receiver<Event>,
    pred: F,
) -> Event {
    loop {
        let event = next_event(rx).await;
        if pred(&event) {
            return event;
        }
    }
}

/// Skip events until the next cache update.
pub async fn next_document(rx: &mut broadcast::Receiver<Event>) -> CacheDocument {
    match wait_for_event(rx, |e| matches!(e, Event::Message(_))).await {
        Event::Message(doc) => doc,
        _ => unreachable!(),
    }
}

/// Wait until the socket reaches `target`.
pub async fn wait_for_state(client: &Client, target: ReadyState) {
    let mut rx = client.state_changes();
    timeout(Duration::from_secs(2), rx.wait_for(|state| *state == target))
        .await
        .expect("timed out waiting for ready state")
        .expect("state channel closed");
}

/// Drain events for a fixed window, returning everything observed.
pub async fn collect_events(rx: &mut broadcast::Receiver<Event>, window: Duration) -> Vec<Event> {
    let mut events = Vec::new();
    let deadline = tokio::time::Instant::now() + window;
    loop {
        let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
        if remaining.is_zero() {
            return events;
        }
        match timeout(remaining, rx.recv()).await {
            Ok(Ok(event)) => events.push(event),
            Ok(Err(_)) | Err(_) => return events,
        }
    }
}
