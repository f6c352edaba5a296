//! Suspend/resume coordination.
//!
//! The host application is the source of truth for suspension: it feeds
//! `Suspend`/`Resume` signals through a [`LifecycleHandle`] (wired to whatever
//! platform primitive applies — page freeze events, mobile pause callbacks, a
//! power-management daemon). One monitor task per client consumes them for the
//! lifetime of the connection, so signal handling is subscribed exactly once
//! and never duplicated across reconnects.
//!
//! A suspend closes the socket non-terminally; a resume waits for the
//! transport to be fully [`Closed`](ReadyState::Closed) before issuing exactly
//! one connect, which is what makes a racing suspend/resume pair unable to
//! trigger two simultaneous connection attempts.

use tokio::sync::{broadcast, mpsc};

use crate::types::Event;
use crate::ws::{CloseReason, ConnectionManager, ReadyState};

/// Host-level lifecycle signals.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleSignal {
    /// The host application is being suspended (frozen, paused)
    Suspend,
    /// The host application resumed
    Resume,
}

/// Cloneable handle the host uses to feed lifecycle signals in.
///
/// Signals sent after a terminal close are ignored.
#[derive(Debug, Clone)]
pub struct LifecycleHandle {
    signal_tx: mpsc::UnboundedSender<LifecycleSignal>,
}

impl LifecycleHandle {
    /// Report that the host application is suspending.
    pub fn suspend(&self) {
        _ = self.signal_tx.send(LifecycleSignal::Suspend);
    }

    /// Report that the host application resumed.
    pub fn resume(&self) {
        _ = self.signal_tx.send(LifecycleSignal::Resume);
    }
}

/// Spawn the monitor task for one connection.
pub(crate) fn spawn(
    connection: ConnectionManager,
    event_tx: broadcast::Sender<Event>,
) -> LifecycleHandle {
    let (signal_tx, mut signal_rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        let mut state_rx = connection.state_receiver();
        let mut frozen = false;

        while let Some(signal) = signal_rx.recv().await {
            match signal {
                LifecycleSignal::Suspend => {
                    _ = event_tx.send(Event::Frozen);
                    if frozen {
                        continue;
                    }
                    frozen = true;
                    if connection.ready_state() != ReadyState::Closed
                        && connection.close(CloseReason::Suspend).is_err()
                    {
                        // Transport already terminated; nothing left to watch.
                        break;
                    }
                    tracing::debug!("suspended, socket released");
                }
                LifecycleSignal::Resume => {
                    _ = event_tx.send(Event::Resumed);
                    if !frozen {
                        continue;
                    }
                    // The close issued on suspend may still be in flight; a
                    // connect before the transport is fully closed could race
                    // into a second live socket.
                    if state_rx
                        .wait_for(|state| *state == ReadyState::Closed)
                        .await
                        .is_err()
                    {
                        break;
                    }
                    if connection.connect(false).is_err() {
                        // A forced close won while we were frozen; stop
                        // listening for further resume signals.
                        break;
                    }
                    frozen = false;
                    tracing::debug!("resumed, reconnecting");
                }
            }
        }
    });

    LifecycleHandle { signal_tx }
}
