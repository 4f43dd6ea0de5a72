//! Core types for response handling: callbacks, results, and errors.

use std::sync::Arc;

use nanorpc_protocol::{CodecError, HashCollision, NanoRpcResponse, ResponseError};

/// Implement this trait to receive the responses to a request.
///
/// # Lifecycle
///
/// A handler receives `Some(response)` for every frame the server sends
/// back for its request ID, and `None` exactly once when the request is
/// terminated because its session is gone.  `None` is always the last
/// invocation; treat it as end-of-life.
///
/// - PING / REQUEST: at most one `Some`, or a single `None`.
/// - SUBSCRIBE: any number of `Some` updates, then one `None`.
///
/// Each invocation runs on a fresh task, so invocations for different
/// requests are unordered.  Returning an error ends the session.
///
/// Plain closures implement this trait:
///
/// ```rust,no_run
/// # use nanorpc_client::{callback, NanoRpcResponse};
/// let cb = callback(|resp: Option<NanoRpcResponse>| {
///     if let Some(resp) = resp {
///         resp.error()?;
///     }
///     Ok(())
/// });
/// ```
#[async_trait::async_trait]
pub trait ResponseHandler: Send + Sync + 'static {
    async fn on_response(&self, response: Option<NanoRpcResponse>) -> Result<()>;
}

#[async_trait::async_trait]
impl<F> ResponseHandler for F
where
    F: Fn(Option<NanoRpcResponse>) -> Result<()> + Send + Sync + 'static,
{
    async fn on_response(&self, response: Option<NanoRpcResponse>) -> Result<()> {
        self(response)
    }
}

/// Shared handle to a response handler.
pub type Callback = Arc<dyn ResponseHandler>;

/// Wrap a closure as a [`Callback`].
pub fn callback<F>(f: F) -> Callback
where
    F: Fn(Option<NanoRpcResponse>) -> Result<()> + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Extract the status error of a response, then decode its payload.
///
/// Fails with [`Error::NoResponse`] when the request was terminated
/// (`None`) or the server sent no data.
pub fn decode_response<T>(response: Option<&NanoRpcResponse>) -> Result<T>
where
    T: prost::Message + Default,
{
    let resp = response.ok_or(Error::NoResponse)?;
    resp.error()?;
    if resp.data.is_empty() {
        return Err(Error::NoResponse);
    }
    T::decode(resp.data.as_slice()).map_err(|e| Error::Codec(CodecError::Decode(e)))
}

/// Top-level client error.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("not connected")]
    NotConnected,
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("a session is already attached")]
    AlreadyAttached,
    #[error("hash collision: {0}")]
    HashCollision(#[from] HashCollision),
    #[error("transport: {0}")]
    Transport(#[from] std::io::Error),
    #[error("timeout: {0}")]
    Timeout(&'static str),
    #[error("ping timeout")]
    PingTimeout,
    #[error("response: {0}")]
    Response(#[from] ResponseError),
    #[error("no response")]
    NoResponse,
    #[error("codec: {0}")]
    Codec(#[from] CodecError),
    #[error("reconnect exhausted after {0} attempts")]
    ReconnectExhausted(u32),
    #[error("shutdown")]
    Shutdown,
    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

impl Error {
    /// Dial, I/O, deadline and framing failures.
    pub fn is_transport(&self) -> bool {
        matches!(self, Error::Transport(_) | Error::Timeout(_) | Error::Codec(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
