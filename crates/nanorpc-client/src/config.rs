//! Client configuration, defaults, and remote-address validation.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use nanorpc_protocol::{HashCache, DEFAULT_MAX_FRAME_LEN};
use tokio_util::sync::CancellationToken;

use crate::client::Client;
use crate::reconnect::{Backoff, ConstantBackoff};
use crate::transport::ConnInfo;
use crate::types::{Error, Result};

pub const DEFAULT_DIAL_TIMEOUT: Duration = Duration::from_secs(2);
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(2);
pub const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(2);
pub const DEFAULT_IDLE_READ_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_KEEP_ALIVE: Duration = Duration::from_secs(5);
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(5);
pub const DEFAULT_QUEUE_SIZE: usize = 64;

/// Invoked once per session, before requests are served.  An error ends
/// the session.
pub type ConnectHook = Arc<dyn Fn(&Client) -> Result<()> + Send + Sync>;

/// Invoked after a session ended and its callbacks were drained.  An error
/// stops the client (no further reconnect).
pub type DisconnectHook = Arc<dyn Fn(&Client) -> Result<()> + Send + Sync>;

/// Invoked for dial failures (`conn == None`) and session errors.
/// `Ok(())` keeps the client reconnecting; `Err(e)` makes `e` terminal.
pub type ErrorHook = Arc<dyn Fn(Option<&ConnInfo>, &Error) -> Result<()> + Send + Sync>;

/// Client configuration.
///
/// Zero durations and sizes mean "unset"; [`Config::set_defaults`] fills
/// them in.  Most callers go through [`ClientBuilder`](crate::ClientBuilder).
#[derive(Clone, Default)]
pub struct Config {
    /// `host:port`, `[v6]:port`, `unix:/path` or a filesystem path.
    pub remote: String,

    // ── Timeouts ─────────────────────────────────────────────────────
    pub dial_timeout: Duration,
    pub read_timeout: Duration,
    pub write_timeout: Duration,
    /// Read deadline while no callbacks are outstanding.
    pub idle_read_timeout: Duration,
    /// Heartbeat interval.
    pub keep_alive: Duration,

    // ── Reconnect ────────────────────────────────────────────────────
    pub reconnect_delay: Duration,
    /// Reconnect waiter; defaults to `ConstantBackoff(reconnect_delay)`.
    pub wait_reconnect: Option<Arc<dyn Backoff>>,

    // ── Wire ─────────────────────────────────────────────────────────
    /// Outbound frame-queue depth.
    pub queue_size: usize,
    pub max_frame_len: usize,
    pub always_hash_paths: bool,
    pub hash_cache: Option<Arc<HashCache>>,

    // ── Ambient ──────────────────────────────────────────────────────
    /// Span every client task runs in.
    pub span: Option<tracing::Span>,
    /// Parent cancellation; cancelling it closes the client.
    pub context: Option<CancellationToken>,

    // ── Lifecycle hooks ──────────────────────────────────────────────
    pub on_connect: Option<ConnectHook>,
    pub on_disconnect: Option<DisconnectHook>,
    pub on_error: Option<ErrorHook>,
}

impl Config {
    /// Fill every unset field.  Explicit values are left untouched.
    pub fn set_defaults(&mut self) {
        fill(&mut self.dial_timeout, DEFAULT_DIAL_TIMEOUT);
        fill(&mut self.read_timeout, DEFAULT_READ_TIMEOUT);
        fill(&mut self.write_timeout, DEFAULT_WRITE_TIMEOUT);
        fill(&mut self.idle_read_timeout, DEFAULT_IDLE_READ_TIMEOUT);
        fill(&mut self.keep_alive, DEFAULT_KEEP_ALIVE);
        fill(&mut self.reconnect_delay, DEFAULT_RECONNECT_DELAY);

        if self.queue_size == 0 {
            self.queue_size = DEFAULT_QUEUE_SIZE;
        }
        if self.max_frame_len == 0 {
            self.max_frame_len = DEFAULT_MAX_FRAME_LEN;
        }
        if self.span.is_none() {
            self.span = Some(tracing::Span::none());
        }
        if self.context.is_none() {
            self.context = Some(CancellationToken::new());
        }
        if self.hash_cache.is_none() {
            self.hash_cache = Some(HashCache::global());
        }
        if self.wait_reconnect.is_none() {
            self.wait_reconnect = Some(Arc::new(ConstantBackoff(self.reconnect_delay)));
        }
    }

    /// Validate and derive the transport-level settings.
    pub fn export(&self) -> Result<TransportConfig> {
        let remote: Remote = self.remote.parse()?;
        let reconnect_delay = or_default(self.reconnect_delay, DEFAULT_RECONNECT_DELAY);

        Ok(TransportConfig {
            remote,
            dial_timeout: or_default(self.dial_timeout, DEFAULT_DIAL_TIMEOUT),
            read_timeout: or_default(self.read_timeout, DEFAULT_READ_TIMEOUT),
            write_timeout: or_default(self.write_timeout, DEFAULT_WRITE_TIMEOUT),
            idle_read_timeout: or_default(self.idle_read_timeout, DEFAULT_IDLE_READ_TIMEOUT),
            keep_alive: or_default(self.keep_alive, DEFAULT_KEEP_ALIVE),
            queue_size: if self.queue_size == 0 {
                DEFAULT_QUEUE_SIZE
            } else {
                self.queue_size
            },
            max_frame_len: if self.max_frame_len == 0 {
                DEFAULT_MAX_FRAME_LEN
            } else {
                self.max_frame_len
            },
            backoff: self
                .wait_reconnect
                .clone()
                .unwrap_or_else(|| Arc::new(ConstantBackoff(reconnect_delay))),
        })
    }
}

fn fill(slot: &mut Duration, default: Duration) {
    if slot.is_zero() {
        *slot = default;
    }
}

fn or_default(value: Duration, default: Duration) -> Duration {
    if value.is_zero() {
        default
    } else {
        value
    }
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("remote", &self.remote)
            .field("dial_timeout", &self.dial_timeout)
            .field("read_timeout", &self.read_timeout)
            .field("write_timeout", &self.write_timeout)
            .field("idle_read_timeout", &self.idle_read_timeout)
            .field("keep_alive", &self.keep_alive)
            .field("reconnect_delay", &self.reconnect_delay)
            .field("wait_reconnect", &self.wait_reconnect)
            .field("queue_size", &self.queue_size)
            .field("max_frame_len", &self.max_frame_len)
            .field("always_hash_paths", &self.always_hash_paths)
            .field("on_connect", &self.on_connect.is_some())
            .field("on_disconnect", &self.on_disconnect.is_some())
            .field("on_error", &self.on_error.is_some())
            .finish_non_exhaustive()
    }
}

/// Validated settings handed to the supervisor and sessions.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    pub remote: Remote,
    pub dial_timeout: Duration,
    pub read_timeout: Duration,
    pub write_timeout: Duration,
    pub idle_read_timeout: Duration,
    pub keep_alive: Duration,
    pub queue_size: usize,
    pub max_frame_len: usize,
    pub backoff: Arc<dyn Backoff>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Remote address
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Where the server lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Remote {
    /// `host` is unbracketed, even for IPv6 literals.
    Tcp { host: String, port: u16 },
    Unix(PathBuf),
}

impl FromStr for Remote {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.is_empty() {
            return Err(invalid("remote address is empty"));
        }

        if let Some(path) = s.strip_prefix("unix:") {
            if path.is_empty() {
                return Err(invalid("unix socket path is empty"));
            }
            return Ok(Remote::Unix(PathBuf::from(path)));
        }
        if s.contains('/') {
            return Ok(Remote::Unix(PathBuf::from(s)));
        }

        let (host, port) = match s.strip_prefix('[') {
            Some(rest) => {
                let (host, tail) = rest
                    .split_once(']')
                    .ok_or_else(|| invalid("unterminated IPv6 bracket"))?;
                let port = tail
                    .strip_prefix(':')
                    .ok_or_else(|| invalid("missing port"))?;
                (host, port)
            }
            None => {
                let (host, port) = s.rsplit_once(':').ok_or_else(|| invalid("missing port"))?;
                if host.contains(':') {
                    return Err(invalid("IPv6 addresses must be bracketed"));
                }
                (host, port)
            }
        };

        if port.is_empty() {
            return Err(invalid("missing port"));
        }
        let port: u16 = port
            .parse()
            .map_err(|_| Error::InvalidArgument(format!("invalid port {port:?}")))?;
        if port == 0 {
            return Err(invalid("port must be non-zero"));
        }

        let host = if host.is_empty() { "localhost" } else { host };
        Ok(Remote::Tcp {
            host: host.to_string(),
            port,
        })
    }
}

impl fmt::Display for Remote {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Remote::Tcp { host, port } if host.contains(':') => write!(f, "[{host}]:{port}"),
            Remote::Tcp { host, port } => write!(f, "{host}:{port}"),
            Remote::Unix(path) => write!(f, "unix:{}", path.display()),
        }
    }
}

fn invalid(msg: &str) -> Error {
    Error::InvalidArgument(msg.to_string())
}
