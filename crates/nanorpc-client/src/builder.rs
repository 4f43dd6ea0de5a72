//! Builder pattern for constructing a [`Client`].

use std::sync::Arc;
use std::time::Duration;

use nanorpc_protocol::HashCache;
use tokio_util::sync::CancellationToken;

use crate::client::Client;
use crate::config::Config;
use crate::reconnect::Backoff;
use crate::transport::ConnInfo;
use crate::types::{Error, Result};

/// Fluent builder for [`Client`].
///
/// Anything left unset takes its default from [`Config::set_defaults`].
///
/// # Example
///
/// ```rust,no_run
/// # use nanorpc_client::{ClientBuilder, ExponentialBackoff};
/// let client = ClientBuilder::new()
///     .remote("10.0.0.7:7000")
///     .always_hash_paths(true)
///     .idle_read_timeout(std::time::Duration::from_secs(30))
///     .backoff(ExponentialBackoff::default())
///     .build()
///     .unwrap();
/// ```
#[derive(Debug, Default)]
pub struct ClientBuilder {
    config: Config,
}

impl ClientBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from an existing configuration.
    pub fn from_config(config: Config) -> Self {
        Self { config }
    }

    // ── Required ─────────────────────────────────────────────────────

    /// Server address: `host:port`, `[v6]:port`, `unix:/path` or a path.
    pub fn remote(mut self, remote: impl Into<String>) -> Self {
        self.config.remote = remote.into();
        self
    }

    // ── Timeouts ─────────────────────────────────────────────────────

    /// Dial deadline (default 2s).
    pub fn dial_timeout(mut self, d: Duration) -> Self {
        self.config.dial_timeout = d;
        self
    }

    pub fn read_timeout(mut self, d: Duration) -> Self {
        self.config.read_timeout = d;
        self
    }

    /// Per-frame write deadline (default 2s).
    pub fn write_timeout(mut self, d: Duration) -> Self {
        self.config.write_timeout = d;
        self
    }

    /// Read deadline while nothing is outstanding (default 10s).
    pub fn idle_read_timeout(mut self, d: Duration) -> Self {
        self.config.idle_read_timeout = d;
        self
    }

    /// Heartbeat interval (default 5s).
    pub fn keep_alive(mut self, d: Duration) -> Self {
        self.config.keep_alive = d;
        self
    }

    // ── Reconnect ────────────────────────────────────────────────────

    /// Constant delay between reconnect attempts (default 5s).
    pub fn reconnect_delay(mut self, d: Duration) -> Self {
        self.config.reconnect_delay = d;
        self
    }

    /// Replace the constant reconnect delay with a custom waiter.
    pub fn backoff(mut self, backoff: impl Backoff) -> Self {
        self.config.wait_reconnect = Some(Arc::new(backoff));
        self
    }

    // ── Wire ─────────────────────────────────────────────────────────

    /// Send every path as its FNV-1a hash.
    pub fn always_hash_paths(mut self, on: bool) -> Self {
        self.config.always_hash_paths = on;
        self
    }

    /// Use a private hash cache instead of the process-global one.
    pub fn hash_cache(mut self, cache: Arc<HashCache>) -> Self {
        self.config.hash_cache = Some(cache);
        self
    }

    /// Outbound queue depth in frames (default 64).
    pub fn queue_size(mut self, n: usize) -> Self {
        self.config.queue_size = n;
        self
    }

    /// Largest frame accepted or sent (default 4 MiB).
    pub fn max_frame_len(mut self, n: usize) -> Self {
        self.config.max_frame_len = n;
        self
    }

    // ── Ambient ──────────────────────────────────────────────────────

    /// Span the client's tasks run in.
    pub fn span(mut self, span: tracing::Span) -> Self {
        self.config.span = Some(span);
        self
    }

    /// Parent cancellation token.
    pub fn context(mut self, token: CancellationToken) -> Self {
        self.config.context = Some(token);
        self
    }

    // ── Hooks ────────────────────────────────────────────────────────

    pub fn on_connect<F>(mut self, f: F) -> Self
    where
        F: Fn(&Client) -> Result<()> + Send + Sync + 'static,
    {
        self.config.on_connect = Some(Arc::new(f));
        self
    }

    pub fn on_disconnect<F>(mut self, f: F) -> Self
    where
        F: Fn(&Client) -> Result<()> + Send + Sync + 'static,
    {
        self.config.on_disconnect = Some(Arc::new(f));
        self
    }

    pub fn on_error<F>(mut self, f: F) -> Self
    where
        F: Fn(Option<&ConnInfo>, &Error) -> Result<()> + Send + Sync + 'static,
    {
        self.config.on_error = Some(Arc::new(f));
        self
    }

    /// Build the [`Client`].  Fails if the remote address is invalid.
    pub fn build(self) -> Result<Client> {
        Client::new(self.config)
    }
}
