#![expect(
    clippy::module_name_repetitions,
    reason = "Configuration types intentionally mirror the module name for clarity"
)]

use std::time::Duration;

use backoff::backoff::Constant;

const DEFAULT_CONNECT_TIMEOUT_DURATION: Duration = Duration::from_millis(2000);
const DEFAULT_RECONNECT_INTERVAL_DURATION: Duration = Duration::from_millis(1000);

/// Configuration for the WebSocket transport.
#[non_exhaustive]
#[derive(Debug, Clone)]
pub struct Config {
    /// Maximum time to wait for a connection attempt to open before aborting
    /// it and retrying
    pub connect_timeout: Duration,
    /// Fixed delay between reconnection attempts. Retries are unbounded until
    /// a forced close; the interval is constant, not exponential.
    pub reconnect_interval: Duration,
    /// Use `wss://`/`https://` instead of `ws://`/`http://`
    pub secure: bool,
    /// WebSocket sub-protocols, offered in order of preference
    pub protocols: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            connect_timeout: DEFAULT_CONNECT_TIMEOUT_DURATION,
            reconnect_interval: DEFAULT_RECONNECT_INTERVAL_DURATION,
            secure: false,
            protocols: Vec::new(),
        }
    }
}

impl Config {
    /// The retry policy: a constant interval, forever.
    #[must_use]
    pub fn reconnect_backoff(&self) -> Constant {
        Constant::new(self.reconnect_interval)
    }
}
