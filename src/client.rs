//! Top-level client: one fully independent instance per mirrored subject.

use async_stream::try_stream;
use futures::Stream;
use serde_json::Value;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, watch};

use crate::lifecycle::{self, LifecycleHandle};
use crate::rest;
use crate::sync::SyncEngine;
use crate::types::{CacheDocument, Entry, Event, Mode, Subject};
use crate::ws::config::Config;
use crate::Result;
use crate::ws::{CloseReason, ConnectionManager, ReadyState, WsError};

/// Broadcast channel capacity for consumer events.
const EVENT_CAPACITY: usize = 1024;

/// A resilient mirror of one server-held subject.
///
/// Construction dials immediately; the server answers every (re)connect with a
/// full snapshot, after which incremental patches keep the local cache
/// current. All state lives behind this handle — dropping the last clone of
/// the client (and of its [`LifecycleHandle`]) tears the connection down.
///
/// # Example
///
/// ```no_run
/// use futures::StreamExt;
/// use keymirror_client_sdk::Client;
/// use keymirror_client_sdk::types::Subject;
/// use keymirror_client_sdk::ws::config::Config;
///
/// #[tokio::main]
/// async fn main() -> anyhow::Result<()> {
///     let client = Client::new("localhost:8880", Subject::single("box"), Config::default())?;
///
///     let mut updates = Box::pin(client.updates());
///     while let Some(document) = updates.next().await {
///         println!("mirror updated: {:?}", document?);
///     }
///     Ok(())
/// }
/// ```
#[derive(Clone)]
pub struct Client {
    subject: Subject,
    connection: ConnectionManager,
    rest: rest::Client,
    lifecycle: LifecycleHandle,
    cache_rx: watch::Receiver<Option<CacheDocument>>,
}

impl Client {
    /// Create a client mirroring `subject` from `host` (an authority such as
    /// `localhost:8880`) and start connecting.
    ///
    /// Must be called within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns an error if the derived HTTP endpoint is not a valid URL.
    pub fn new(host: &str, subject: Subject, config: Config) -> Result<Self> {
        let ws_scheme = if config.secure { "wss" } else { "ws" };
        let http_scheme = if config.secure { "https" } else { "http" };

        let endpoint = format!("{ws_scheme}://{host}{}", subject.ws_path());
        let rest = rest::Client::new(&format!("{http_scheme}://{host}"))?;

        let (event_tx, _) = broadcast::channel(EVENT_CAPACITY);
        let (cache_tx, cache_rx) = watch::channel(None);
        let engine = SyncEngine::new(subject.clone(), cache_tx);

        let connection = ConnectionManager::new(endpoint, config, engine, event_tx.clone());
        let lifecycle = lifecycle::spawn(connection.clone(), event_tx);

        Ok(Self {
            subject,
            connection,
            rest,
            lifecycle,
            cache_rx,
        })
    }

    /// Mirror the single document stored under `key`, with default config.
    pub fn single(host: &str, key: impl Into<String>) -> Result<Self> {
        Self::new(host, Subject::single(key), Config::default())
    }

    /// Mirror every document matching `pattern`, with default config.
    pub fn multi(host: &str, pattern: impl Into<String>) -> Result<Self> {
        Self::new(host, Subject::multi(pattern), Config::default())
    }

    /// Subscribe to the server time stream, with default config.
    pub fn time(host: &str) -> Result<Self> {
        Self::new(host, Subject::Time, Config::default())
    }

    /// The subject this client mirrors.
    #[must_use]
    pub fn subject(&self) -> &Subject {
        &self.subject
    }

    /// Subscribe to lifecycle and data events.
    ///
    /// Each call returns a new independent receiver; with no receiver alive,
    /// events are dropped.
    #[must_use]
    pub fn events(&self) -> broadcast::Receiver<Event> {
        self.connection.subscribe()
    }

    /// Stream of cache updates, one owned [`CacheDocument`] per applied
    /// snapshot or patch frame.
    ///
    /// Lifecycle events are filtered out; a lagging consumer receives a
    /// [`WsError::Lagged`] error and the stream continues.
    pub fn updates(&self) -> impl Stream<Item = Result<CacheDocument>> {
        let mut rx = self.connection.subscribe();

        try_stream! {
            loop {
                match rx.recv().await {
                    Ok(Event::Message(doc)) => yield doc,
                    Ok(_) => {}
                    Err(RecvError::Lagged(count)) => {
                        Err(WsError::Lagged { count })?;
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        }
    }

    /// The current mirrored document, `None` until the first snapshot after a
    /// (re)connect.
    ///
    /// Returns an owned copy; mutating it cannot affect the internal cache.
    #[must_use]
    pub fn cache(&self) -> Option<CacheDocument> {
        self.cache_rx.borrow().clone()
    }

    /// Current socket state.
    #[must_use]
    pub fn ready_state(&self) -> ReadyState {
        self.connection.ready_state()
    }

    /// Subscribe to socket state changes.
    #[must_use]
    pub fn state_changes(&self) -> watch::Receiver<ReadyState> {
        self.connection.state_receiver()
    }

    /// Send a text message over the open socket.
    ///
    /// # Errors
    ///
    /// Fails with an invalid-state error while no socket is open.
    pub fn send(&self, text: impl Into<String>) -> Result<()> {
        self.connection.send(text.into())
    }

    /// Close the connection for good. No further reconnection occurs.
    pub fn close(&self) -> Result<()> {
        self.connection.close(CloseReason::Forced)
    }

    /// Drop the current socket and let the transport reconnect.
    pub fn reload(&self) -> Result<()> {
        self.connection.close(CloseReason::Reload)
    }

    /// Report that the host application is suspending; the socket is released
    /// until [`resume`](Self::resume).
    pub fn suspend(&self) {
        self.lifecycle.suspend();
    }

    /// Report that the host application resumed; reconnects if suspended.
    pub fn resume(&self) {
        self.lifecycle.resume();
    }

    /// Handle for feeding lifecycle signals from host plumbing.
    #[must_use]
    pub fn lifecycle(&self) -> LifecycleHandle {
        self.lifecycle.clone()
    }

    /// The HTTP fallback client, usable while the socket is down.
    #[must_use]
    pub fn rest(&self) -> &rest::Client {
        &self.rest
    }

    /// List the keys currently stored on the server.
    pub async fn stats(&self) -> Result<rest::types::Stats> {
        self.rest.stats().await
    }

    /// Read the single document stored under `key` over HTTP.
    pub async fn get_single(&self, key: &str) -> Result<Entry> {
        self.rest.get_single(key).await
    }

    /// Read every document matching `pattern` over HTTP.
    pub async fn get_multi(&self, pattern: &str) -> Result<Vec<Entry>> {
        self.rest.get_multi(pattern).await
    }

    /// Write `data` under `key` over HTTP, returning the index.
    pub async fn publish(
        &self,
        mode: Mode,
        key: &str,
        data: &Value,
        index: Option<&str>,
    ) -> Result<String> {
        self.rest.publish(mode, key, data, index).await
    }

    /// Delete the document(s) stored under `key` over HTTP.
    pub async fn unpublish(&self, key: &str) -> Result<()> {
        self.rest.unpublish(key).await
    }
}
