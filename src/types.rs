//! Domain types shared across the transport, sync engine, and REST client.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Error;

/// Wire tag for keyed subscriptions.
///
/// `Single` mirrors exactly one document (`"sa"` on the wire), `Multi` mirrors
/// the ordered collection of documents matching a key pattern (`"mo"`).
/// Unknown tags are rejected at decode time rather than falling through to an
/// empty default.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Mode {
    /// One key, one [`Entry`]
    Single,
    /// A key pattern, an ordered sequence of [`Entry`]
    Multi,
}

impl Mode {
    /// The tag used in WebSocket and HTTP paths.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Single => "sa",
            Self::Multi => "mo",
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Mode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sa" => Ok(Self::Single),
            "mo" => Ok(Self::Multi),
            other => Err(Error::validation(format!(
                "unknown subscription mode tag: {other:?}"
            ))),
        }
    }
}

/// What one client mirrors: a single key, a key pattern, or the server time
/// stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Subject {
    /// Mirror the document stored under one exact key.
    Single {
        /// The document key, e.g. `box` or `box/1/things/0`
        key: String,
    },
    /// Mirror every document whose key matches a pattern; `*` matches one
    /// segment, e.g. `box/*/things/*`.
    Multi {
        /// The key pattern
        pattern: String,
    },
    /// The reserved time stream: bare integer timestamps, no snapshots or
    /// patches.
    Time,
}

impl Subject {
    /// Subscription to the document stored under `key`.
    pub fn single(key: impl Into<String>) -> Self {
        Self::Single { key: key.into() }
    }

    /// Subscription to every document matching `pattern`.
    pub fn multi(pattern: impl Into<String>) -> Self {
        Self::Multi {
            pattern: pattern.into(),
        }
    }

    /// The keyed mode, or `None` for the time stream.
    #[must_use]
    pub fn mode(&self) -> Option<Mode> {
        match self {
            Self::Single { .. } => Some(Mode::Single),
            Self::Multi { .. } => Some(Mode::Multi),
            Self::Time => None,
        }
    }

    /// The WebSocket path this subject connects to.
    #[must_use]
    pub fn ws_path(&self) -> String {
        match self {
            Self::Single { key } => format!("/{}/{key}", Mode::Single),
            Self::Multi { pattern } => format!("/{}/{pattern}", Mode::Multi),
            Self::Time => "/time".to_owned(),
        }
    }
}

/// One logical document version.
///
/// `created` and `updated` are server-side timestamps; `0` means absent. On
/// the wire `data` is a Base64-wrapped JSON string; the codec decodes it into
/// the structured value held here.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entry {
    #[serde(default)]
    pub created: i64,
    #[serde(default)]
    pub updated: i64,
    #[serde(default)]
    pub index: String,
    #[serde(default)]
    pub data: Value,
}

impl Entry {
    /// The server's placeholder for a key that holds no value yet.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            created: 0,
            updated: 0,
            index: String::new(),
            data: Value::Object(serde_json::Map::new()),
        }
    }
}

/// The mirrored document as handed to consumers.
///
/// Every value of this type is an owned copy, structurally independent of the
/// sync engine's internal cache.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq)]
pub enum CacheDocument {
    /// One entry ([`Mode::Single`])
    Single(Entry),
    /// An ordered sequence of entries ([`Mode::Multi`])
    Multi(Vec<Entry>),
    /// A bare server timestamp ([`Subject::Time`])
    Time(i64),
}

impl CacheDocument {
    #[must_use]
    pub fn as_single(&self) -> Option<&Entry> {
        match self {
            Self::Single(entry) => Some(entry),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_multi(&self) -> Option<&[Entry]> {
        match self {
            Self::Multi(entries) => Some(entries),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_time(&self) -> Option<i64> {
        match self {
            Self::Time(stamp) => Some(*stamp),
            _ => None,
        }
    }
}

/// Wire envelope for keyed subscriptions.
///
/// `data` is a Base64 string: a full document when `snapshot` is set, an RFC
/// 6902 operation sequence otherwise.
#[non_exhaustive]
#[derive(Debug, Clone, Deserialize)]
pub struct Frame {
    #[serde(default)]
    pub snapshot: bool,
    #[serde(default)]
    pub data: String,
}

/// Consumer-facing lifecycle and data events.
///
/// Events are fanned out over a broadcast channel; with no subscriber they are
/// simply dropped, which preserves the "default no-op handler" semantics.
#[non_exhaustive]
#[derive(Debug, Clone)]
pub enum Event {
    /// A connection attempt has started.
    Connecting,
    /// The socket is open; a fresh snapshot will follow.
    Open,
    /// The socket closed. `terminal` closes are caller-requested and suppress
    /// any further reconnection; non-terminal closes are followed by an
    /// automatic retry (or, when frozen, by a resume-driven reconnect).
    Closed {
        /// Whether this close ends the connection for good
        terminal: bool,
    },
    /// The mirrored document changed; the payload is an owned copy.
    Message(CacheDocument),
    /// A transport or protocol error. Transport errors are followed by a
    /// retry; protocol errors force a resync via reconnect.
    Error(Arc<Error>),
    /// The host application suspended; the socket is being released.
    Frozen,
    /// The host application resumed.
    Resumed,
}
