#![expect(
    clippy::module_name_repetitions,
    reason = "Connection types expose their domain in the name for clarity"
)]

use std::sync::Arc;

use backoff::backoff::Backoff as _;
use futures::{SinkExt as _, StreamExt as _};
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::time::{sleep, timeout};
use tokio_tungstenite::tungstenite::client::IntoClientRequest as _;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async, tungstenite::Message};

use super::config::Config;
use super::error::WsError;
use crate::Result;
use crate::error::Error;
use crate::sync::SyncEngine;
use crate::types::Event;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Socket lifecycle state.
///
/// Transitions only run `Connecting→Open→Closing→Closed` (normal),
/// `Connecting→Closing→Closed` (failed or timed-out open), and
/// `Closed→Connecting` (reconnect); `Closing` is never skipped.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadyState {
    /// A connection attempt is in flight (or scheduled)
    Connecting,
    /// The socket is open
    Open,
    /// The socket is shutting down
    Closing,
    /// No socket; either parked (suspended) or terminally closed
    Closed,
}

impl ReadyState {
    /// Check if the socket is currently open.
    #[must_use]
    pub const fn is_open(self) -> bool {
        matches!(self, Self::Open)
    }
}

/// Why a close was requested.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// Caller-requested terminal close; no further reconnection ever
    Forced,
    /// Caller-requested graceful drop; the normal retry path reconnects
    Reload,
    /// Lifecycle-driven close; the transport parks until a resume-driven
    /// connect (or a forced close) arrives
    Suspend,
}

enum Command {
    Connect { reconnect_attempt: bool },
    Close { reason: CloseReason },
}

enum SessionEnd {
    /// Remote drop, read error, or undecodable frame; retried automatically
    Dropped(Option<Error>),
    Forced,
    Suspended,
}

enum Parked {
    Connect { reconnect_attempt: bool },
    Terminate,
}

/// Manages the single WebSocket connection: timeout-guarded opens, constant
/// backoff retries, forced/suspend close semantics, and frame dispatch into
/// the sync engine.
///
/// Exactly one socket is live at any time; it is owned by a background task
/// and superseded whenever a new connect command arrives. Events fan out over
/// a broadcast channel, the [`ReadyState`] over a watch channel.
#[derive(Clone)]
pub struct ConnectionManager {
    /// Commands into the connection loop (connect, close)
    cmd_tx: mpsc::UnboundedSender<Command>,
    /// Sender channel for outgoing messages
    sender_tx: mpsc::UnboundedSender<String>,
    /// Watch channel sender for state changes (enables cooperative waits)
    state_tx: watch::Sender<ReadyState>,
    /// Watch channel receiver for checking the current state
    state_rx: watch::Receiver<ReadyState>,
    /// Broadcast sender for consumer events
    event_tx: broadcast::Sender<Event>,
}

impl ConnectionManager {
    /// Create a new connection manager and start dialing immediately.
    ///
    /// The `engine` is owned by the connection loop and fed every incoming
    /// frame in arrival order. Must be called within a Tokio runtime.
    #[must_use]
    pub fn new(
        endpoint: String,
        config: Config,
        engine: SyncEngine,
        event_tx: broadcast::Sender<Event>,
    ) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (sender_tx, sender_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(ReadyState::Connecting);

        let loop_state_tx = state_tx.clone();
        let loop_event_tx = event_tx.clone();
        tokio::spawn(async move {
            Self::connection_loop(
                endpoint,
                config,
                engine,
                cmd_rx,
                sender_rx,
                loop_state_tx,
                loop_event_tx,
            )
            .await;
        });

        Self {
            cmd_tx,
            sender_tx,
            state_tx,
            state_rx,
            event_tx,
        }
    }

    /// Main connection loop: dial, run the session, retry or park.
    async fn connection_loop(
        endpoint: String,
        config: Config,
        mut engine: SyncEngine,
        mut cmd_rx: mpsc::UnboundedReceiver<Command>,
        mut sender_rx: mpsc::UnboundedReceiver<String>,
        state_tx: watch::Sender<ReadyState>,
        event_tx: broadcast::Sender<Event>,
    ) {
        let mut backoff = config.reconnect_backoff();
        let mut reconnect_attempt = false;

        Self::announce_connecting(&state_tx, &event_tx);

        loop {
            let mut timed_out = false;
            let mut stream = None;

            tokio::select! {
                res = timeout(config.connect_timeout, Self::dial(&endpoint, &config)) => match res {
                    Ok(Ok(ws)) => stream = Some(ws),
                    Ok(Err(e)) => {
                        tracing::warn!(%endpoint, error = %e, "unable to connect");
                        _ = event_tx.send(Event::Error(Arc::new(e)));
                    }
                    Err(_elapsed) => {
                        // Abort the attempt; a timeout-triggered close must not
                        // be reported to the consumer as a second close.
                        tracing::debug!(%endpoint, "connection attempt timed out");
                        timed_out = true;
                    }
                },
                cmd = cmd_rx.recv() => match cmd {
                    Some(Command::Close { reason: CloseReason::Forced }) | None => {
                        Self::terminal_close(&state_tx, &event_tx);
                        return;
                    }
                    Some(Command::Close { reason: CloseReason::Suspend }) => {
                        _ = state_tx.send(ReadyState::Closing);
                        _ = state_tx.send(ReadyState::Closed);
                        _ = event_tx.send(Event::Closed { terminal: false });
                        match Self::park(&mut cmd_rx).await {
                            Parked::Connect { reconnect_attempt: again } => {
                                reconnect_attempt = again;
                                Self::announce_connecting(&state_tx, &event_tx);
                                continue;
                            }
                            Parked::Terminate => {
                                _ = event_tx.send(Event::Closed { terminal: true });
                                return;
                            }
                        }
                    }
                    // A fresh connect (or reload) supersedes the in-flight attempt.
                    Some(Command::Close { reason: CloseReason::Reload })
                    | Some(Command::Connect { .. }) => continue,
                },
            }

            if let Some(ws) = stream {
                _ = state_tx.send(ReadyState::Open);
                _ = event_tx.send(Event::Open);
                reconnect_attempt = false;
                backoff.reset();
                // The next snapshot is the resynchronization baseline.
                engine.reset();
                tracing::debug!(%endpoint, "connection open");

                let end =
                    Self::session(ws, &mut engine, &mut cmd_rx, &mut sender_rx, &event_tx).await;
                _ = state_tx.send(ReadyState::Closing);
                _ = state_tx.send(ReadyState::Closed);

                match end {
                    SessionEnd::Forced => {
                        _ = event_tx.send(Event::Closed { terminal: true });
                        return;
                    }
                    SessionEnd::Suspended => {
                        _ = event_tx.send(Event::Closed { terminal: false });
                        match Self::park(&mut cmd_rx).await {
                            Parked::Connect { reconnect_attempt: again } => {
                                reconnect_attempt = again;
                                Self::announce_connecting(&state_tx, &event_tx);
                                continue;
                            }
                            Parked::Terminate => {
                                _ = event_tx.send(Event::Closed { terminal: true });
                                return;
                            }
                        }
                    }
                    SessionEnd::Dropped(error) => {
                        if let Some(e) = error {
                            tracing::warn!(%endpoint, error = %e, "connection dropped");
                            _ = event_tx.send(Event::Error(Arc::new(e)));
                        }
                    }
                }
            } else {
                // The aborted attempt still walks Closing→Closed.
                _ = state_tx.send(ReadyState::Closing);
                _ = state_tx.send(ReadyState::Closed);
            }

            // Transient close: back to Connecting, surface the gap to the
            // consumer exactly once, then retry after the fixed interval.
            Self::announce_connecting(&state_tx, &event_tx);
            if !reconnect_attempt && !timed_out {
                _ = event_tx.send(Event::Closed { terminal: false });
            }

            let delay = backoff
                .next_backoff()
                .unwrap_or(config.reconnect_interval);
            tokio::select! {
                () = sleep(delay) => {}
                cmd = cmd_rx.recv() => match cmd {
                    Some(Command::Close { reason: CloseReason::Forced }) | None => {
                        Self::terminal_close(&state_tx, &event_tx);
                        return;
                    }
                    Some(Command::Close { reason: CloseReason::Suspend }) => {
                        _ = state_tx.send(ReadyState::Closing);
                        _ = state_tx.send(ReadyState::Closed);
                        match Self::park(&mut cmd_rx).await {
                            Parked::Connect { reconnect_attempt: again } => {
                                reconnect_attempt = again;
                                Self::announce_connecting(&state_tx, &event_tx);
                                continue;
                            }
                            Parked::Terminate => {
                                _ = event_tx.send(Event::Closed { terminal: true });
                                return;
                            }
                        }
                    }
                    // Retry immediately; the sleeping timer is superseded.
                    Some(Command::Connect { reconnect_attempt: again }) => {
                        reconnect_attempt = again;
                        continue;
                    }
                    Some(Command::Close { reason: CloseReason::Reload }) => {}
                },
            }

            reconnect_attempt = true;
        }
    }

    /// Open a socket to the endpoint, offering the configured sub-protocols.
    async fn dial(endpoint: &str, config: &Config) -> Result<WsStream> {
        let mut request = endpoint.into_client_request()?;
        if !config.protocols.is_empty() {
            let offered = config.protocols.join(", ");
            let value = HeaderValue::from_str(&offered)
                .map_err(|_| Error::validation(format!("invalid sub-protocol list: {offered:?}")))?;
            request
                .headers_mut()
                .insert("Sec-WebSocket-Protocol", value);
        }

        let (stream, _response) = connect_async(request).await?;
        Ok(stream)
    }

    /// Run one open socket until it drops or a close command arrives.
    async fn session(
        ws: WsStream,
        engine: &mut SyncEngine,
        cmd_rx: &mut mpsc::UnboundedReceiver<Command>,
        sender_rx: &mut mpsc::UnboundedReceiver<String>,
        event_tx: &broadcast::Sender<Event>,
    ) -> SessionEnd {
        let (mut write, mut read) = ws.split();

        // Messages queued against a superseded socket are not replayed.
        while sender_rx.try_recv().is_ok() {}

        loop {
            tokio::select! {
                msg = read.next() => match msg {
                    Some(Ok(Message::Binary(bytes))) => {
                        if !Self::dispatch(engine, &bytes, event_tx) {
                            return SessionEnd::Dropped(None);
                        }
                    }
                    Some(Ok(Message::Text(text))) => {
                        if !Self::dispatch(engine, text.as_bytes(), event_tx) {
                            return SessionEnd::Dropped(None);
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => return SessionEnd::Dropped(None),
                    Some(Ok(_)) => {
                        // Ping/pong is answered by the protocol layer.
                    }
                    Some(Err(e)) => {
                        return SessionEnd::Dropped(Some(WsError::Connection(e).into()));
                    }
                },
                cmd = cmd_rx.recv() => match cmd {
                    Some(Command::Close { reason }) => {
                        _ = write.send(Message::Close(None)).await;
                        return match reason {
                            CloseReason::Forced => SessionEnd::Forced,
                            CloseReason::Suspend => SessionEnd::Suspended,
                            CloseReason::Reload => SessionEnd::Dropped(None),
                        };
                    }
                    // A new connect supersedes the live socket.
                    Some(Command::Connect { .. }) => return SessionEnd::Dropped(None),
                    None => return SessionEnd::Forced,
                },
                Some(text) = sender_rx.recv() => {
                    if write.send(Message::Text(text.into())).await.is_err() {
                        return SessionEnd::Dropped(None);
                    }
                },
            }
        }
    }

    /// Feed one frame to the sync engine and broadcast the result.
    ///
    /// Returns `false` when the frame could not be applied: the session ends
    /// so the retry path forces a snapshot resync.
    fn dispatch(
        engine: &mut SyncEngine,
        bytes: &[u8],
        event_tx: &broadcast::Sender<Event>,
    ) -> bool {
        match engine.handle(bytes) {
            Ok(doc) => {
                _ = event_tx.send(Event::Message(doc));
                true
            }
            Err(e) => {
                tracing::warn!(error = %e, "dropping connection after inapplicable frame");
                _ = event_tx.send(Event::Error(Arc::new(e)));
                false
            }
        }
    }

    /// Wait, fully closed, for a resume-driven connect or a forced close.
    async fn park(cmd_rx: &mut mpsc::UnboundedReceiver<Command>) -> Parked {
        loop {
            match cmd_rx.recv().await {
                Some(Command::Connect { reconnect_attempt }) => {
                    return Parked::Connect { reconnect_attempt };
                }
                Some(Command::Close {
                    reason: CloseReason::Forced,
                })
                | None => return Parked::Terminate,
                Some(Command::Close { .. }) => {
                    // Already closed.
                }
            }
        }
    }

    fn announce_connecting(
        state_tx: &watch::Sender<ReadyState>,
        event_tx: &broadcast::Sender<Event>,
    ) {
        _ = state_tx.send(ReadyState::Connecting);
        _ = event_tx.send(Event::Connecting);
    }

    fn terminal_close(state_tx: &watch::Sender<ReadyState>, event_tx: &broadcast::Sender<Event>) {
        _ = state_tx.send(ReadyState::Closing);
        _ = state_tx.send(ReadyState::Closed);
        _ = event_tx.send(Event::Closed { terminal: true });
    }

    /// Ask the loop to (re)connect, superseding any prior socket.
    pub fn connect(&self, reconnect_attempt: bool) -> Result<()> {
        self.cmd_tx
            .send(Command::Connect { reconnect_attempt })
            .map_err(|_e| WsError::ConnectionClosed)?;
        Ok(())
    }

    /// Close the current socket with the given semantics.
    pub fn close(&self, reason: CloseReason) -> Result<()> {
        self.cmd_tx
            .send(Command::Close { reason })
            .map_err(|_e| WsError::ConnectionClosed)?;
        Ok(())
    }

    /// Send a text message over the open socket.
    ///
    /// Fails synchronously with an invalid-state error while no socket is
    /// open; callers should check [`ready_state`](Self::ready_state) or handle
    /// the error.
    pub fn send(&self, text: String) -> Result<()> {
        if !self.state_rx.borrow().is_open() {
            return Err(WsError::NotConnected.into());
        }
        self.sender_tx
            .send(text)
            .map_err(|_e| WsError::ConnectionClosed)?;
        Ok(())
    }

    /// Get the current socket state.
    #[must_use]
    pub fn ready_state(&self) -> ReadyState {
        *self.state_rx.borrow()
    }

    /// Subscribe to state changes.
    ///
    /// Useful for cooperative waits such as "reconnect once fully closed".
    #[must_use]
    pub fn state_receiver(&self) -> watch::Receiver<ReadyState> {
        self.state_tx.subscribe()
    }

    /// Subscribe to consumer events.
    ///
    /// Each call returns a new independent receiver.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.event_tx.subscribe()
    }
}
