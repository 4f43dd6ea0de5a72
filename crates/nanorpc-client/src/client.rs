//! Client façade: owns the supervisor task and the current-session slot,
//! and exposes the request API.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use nanorpc_protocol::{HashCache, NanoRpcRequest, NanoRpcResponse, PathOneof};
use parking_lot::Mutex;
use tokio::sync::{oneshot, watch};
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::builder::ClientBuilder;
use crate::config::{Config, Remote, TransportConfig};
use crate::paths::PathPolicy;
use crate::request_id::RequestCounter;
use crate::session::Session;
use crate::supervisor::{SessionHooks, State, Supervisor};
use crate::transport::{ConnInfo, Connection};
use crate::types::{callback, Callback, Error, Result};

/// A reconnecting NanoRPC client.
///
/// Cheap to clone; every clone drives the same connection.  The client
/// stops when the last clone is dropped, when [`close`](Self::close) is
/// called, or when the parent [`Config::context`] is cancelled.
///
/// ```rust,no_run
/// # async fn demo() -> nanorpc_client::Result<()> {
/// use nanorpc_client::{callback, Client};
///
/// let client = Client::builder().remote("127.0.0.1:7000").build()?;
/// client.connect()?;
/// client.connected().await?;
///
/// client
///     .request("/sys/info", &(), callback(|resp| {
///         if let Some(resp) = resp {
///             resp.error()?;
///         }
///         Ok(())
///     }))
///     .await?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

struct ClientInner {
    config: Config,
    transport: TransportConfig,
    paths: PathPolicy,
    counter: Arc<RequestCounter>,
    shared: Arc<Shared>,
    state: Arc<watch::Sender<State>>,
    shutdown: CancellationToken,
    started: AtomicBool,
    span: tracing::Span,
}

/// State the supervisor task keeps using after the last `Client` is gone.
struct Shared {
    session: Mutex<Option<Arc<Session>>>,
    connected: watch::Sender<bool>,
    done: watch::Sender<bool>,
    outcome: Mutex<Option<Error>>,
}

impl Shared {
    fn attach(&self, session: Arc<Session>) -> Result<()> {
        let mut slot = self.session.lock();
        if slot.is_some() {
            return Err(Error::AlreadyAttached);
        }
        *slot = Some(session);
        Ok(())
    }

    fn detach(&self) -> Option<Arc<Session>> {
        self.session.lock().take()
    }

    fn current(&self) -> Option<Arc<Session>> {
        self.session.lock().clone()
    }

    fn finish(&self, result: Result<()>) {
        self.connected.send_replace(false);
        if let Err(e) = result {
            *self.outcome.lock() = Some(e);
        }
        self.done.send_replace(true);
    }
}

impl Client {
    /// Start a new builder.
    pub fn builder() -> ClientBuilder {
        ClientBuilder::new()
    }

    /// Validate `config` and create an unconnected client.
    pub fn new(mut config: Config) -> Result<Self> {
        config.set_defaults();
        let transport = config.export()?;

        let cache = config.hash_cache.clone().unwrap_or_else(HashCache::global);
        let shutdown = config.context.clone().unwrap_or_default().child_token();
        let span = config.span.clone().unwrap_or_else(tracing::Span::none);

        Ok(Self {
            inner: Arc::new(ClientInner {
                paths: PathPolicy::new(config.always_hash_paths, cache),
                config,
                transport,
                counter: Arc::new(RequestCounter::new()),
                shared: Arc::new(Shared {
                    session: Mutex::new(None),
                    connected: watch::Sender::new(false),
                    done: watch::Sender::new(false),
                    outcome: Mutex::new(None),
                }),
                state: Arc::new(watch::Sender::new(State::Idle)),
                shutdown,
                started: AtomicBool::new(false),
                span,
            }),
        })
    }

    // ── Lifecycle ────────────────────────────────────────────────────

    /// Start the supervisor.  Returns immediately; the first dial happens in
    /// the background.  Calling it again is a no-op.
    pub fn connect(&self) -> Result<()> {
        if self.inner.shutdown.is_cancelled() {
            return Err(Error::Shutdown);
        }
        if self.inner.started.swap(true, Ordering::AcqRel) {
            tracing::debug!(remote = %self.inner.transport.remote, "already started");
            return Ok(());
        }

        let hooks = Hooks {
            client: Arc::downgrade(&self.inner),
            shared: self.inner.shared.clone(),
        };
        let supervisor = Supervisor::new(
            hooks,
            self.inner.transport.clone(),
            self.inner.state.clone(),
            self.inner.shutdown.clone(),
        );
        let shared = self.inner.shared.clone();
        tokio::spawn(
            async move {
                let result = supervisor.run().await;
                shared.finish(result);
            }
            .instrument(self.inner.span.clone()),
        );
        Ok(())
    }

    /// Stop the client.  Returns once the current session has been torn
    /// down and every pending callback has been dispatched its `None`.
    /// Safe to call from inside a callback.
    pub async fn close(&self) {
        self.inner.shutdown.cancel();
        if self.inner.started.load(Ordering::Acquire) {
            let mut done = self.inner.shared.done.subscribe();
            let _ = done.wait_for(|d| *d).await;
        }
    }

    /// Wait for the supervisor to stop and return its final result.
    ///
    /// `Ok(())` after an orderly close.  A terminal error is handed to the
    /// first caller only; later callers see `Ok(())`.
    pub async fn wait(&self) -> Result<()> {
        if !self.inner.started.load(Ordering::Acquire) {
            return Ok(());
        }
        let mut done = self.inner.shared.done.subscribe();
        let _ = done.wait_for(|d| *d).await;
        match self.inner.shared.outcome.lock().take() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Resolve once a session is current.  Fails with `NotConnected` if the
    /// client stops first.
    pub async fn connected(&self) -> Result<()> {
        let mut up = self.inner.shared.connected.subscribe();
        let mut done = self.inner.shared.done.subscribe();
        tokio::select! {
            biased;
            r = up.wait_for(|c| *c) => r.map(|_| ()).map_err(|_| Error::NotConnected),
            _ = done.wait_for(|d| *d) => Err(Error::NotConnected),
        }
    }

    pub fn is_connected(&self) -> bool {
        *self.inner.shared.connected.borrow()
    }

    pub fn state(&self) -> State {
        *self.inner.state.borrow()
    }

    /// Watch supervisor state transitions.
    pub fn subscribe_state(&self) -> watch::Receiver<State> {
        self.inner.state.subscribe()
    }

    pub fn remote(&self) -> &Remote {
        &self.inner.transport.remote
    }

    pub fn hash_cache(&self) -> &Arc<HashCache> {
        self.inner.paths.cache()
    }

    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    // ── Request API ──────────────────────────────────────────────────

    /// Encode `path` the way this client's requests carry it.
    pub fn encode_path(&self, path: &str) -> PathOneof {
        self.inner.paths.encode(path)
    }

    /// Send a raw request on the current session.
    pub async fn send(&self, req: NanoRpcRequest, cb: Option<Callback>) -> Result<i32> {
        let session = self.inner.shared.current().ok_or(Error::NotConnected)?;
        session.send(req, cb).await
    }

    /// Fire a PING.  `false` when there is no session to send it on.
    pub async fn ping(&self) -> bool {
        self.send(NanoRpcRequest::ping(0), None).await.is_ok()
    }

    /// Send a PING and report the outcome on the returned channel: `Ok(())`
    /// for an OK PONG, the status error otherwise, or
    /// [`Error::PingTimeout`] when the session ends first.
    pub async fn pong(&self) -> oneshot::Receiver<Result<()>> {
        let (tx, rx) = oneshot::channel();
        let tx = Arc::new(Mutex::new(Some(tx)));
        let slot = tx.clone();
        let cb = callback(move |resp: Option<NanoRpcResponse>| {
            let outcome = match resp {
                Some(resp) => resp.error().map_err(Error::from),
                None => Err(Error::PingTimeout),
            };
            if let Some(tx) = slot.lock().take() {
                let _ = tx.send(outcome);
            }
            Ok(())
        });

        if let Err(e) = self.send(NanoRpcRequest::ping(0), Some(cb)).await {
            if let Some(tx) = tx.lock().take() {
                let _ = tx.send(Err(e));
            }
        }
        rx
    }

    /// REQUEST `path` with `msg` as payload (`&()` for none).  Returns the
    /// request ID on the wire.
    pub async fn request<M>(&self, path: &str, msg: &M, cb: Callback) -> Result<i32>
    where
        M: prost::Message,
    {
        let path = self.encode_path(path);
        self.send(NanoRpcRequest::request(0, path, msg.encode_to_vec()), Some(cb))
            .await
    }

    pub async fn request_by_hash<M>(&self, hash: u32, msg: &M, cb: Callback) -> Result<i32>
    where
        M: prost::Message,
    {
        self.send(
            NanoRpcRequest::request(0, PathOneof::PathHash(hash), msg.encode_to_vec()),
            Some(cb),
        )
        .await
    }

    /// REQUEST by the hash of `path`, falling back to the literal path if
    /// the hash collides.
    pub async fn request_with_hash<M>(&self, path: &str, msg: &M, cb: Callback) -> Result<i32>
    where
        M: prost::Message,
    {
        match self.hash_cache().hash(path) {
            Ok(hash) => self.request_by_hash(hash, msg, cb).await,
            Err(e) => {
                tracing::warn!(path, error = %e, "hash collision, requesting by path");
                self.request(path, msg, cb).await
            }
        }
    }

    /// SUBSCRIBE to `path`.  `cb` sees every update, then a final `None`.
    pub async fn subscribe<M>(&self, path: &str, msg: &M, cb: Callback) -> Result<i32>
    where
        M: prost::Message,
    {
        let path = self.encode_path(path);
        self.send(NanoRpcRequest::subscribe(0, path, msg.encode_to_vec()), Some(cb))
            .await
    }

    pub async fn subscribe_by_hash<M>(&self, hash: u32, msg: &M, cb: Callback) -> Result<i32>
    where
        M: prost::Message,
    {
        self.send(
            NanoRpcRequest::subscribe(0, PathOneof::PathHash(hash), msg.encode_to_vec()),
            Some(cb),
        )
        .await
    }

    pub async fn subscribe_with_hash<M>(&self, path: &str, msg: &M, cb: Callback) -> Result<i32>
    where
        M: prost::Message,
    {
        match self.hash_cache().hash(path) {
            Ok(hash) => self.subscribe_by_hash(hash, msg, cb).await,
            Err(e) => {
                tracing::warn!(path, error = %e, "hash collision, subscribing by path");
                self.subscribe(path, msg, cb).await
            }
        }
    }

    /// Cancel subscription `request_id`: an empty REQUEST under the same ID.
    /// The subscription callback gets its final `None`; `cb` (if any)
    /// receives the server's answer.
    pub async fn unsubscribe(
        &self,
        path: &str,
        request_id: i32,
        cb: Option<Callback>,
    ) -> Result<i32> {
        let path = self.encode_path(path);
        self.send_unsubscribe(path, request_id, cb).await
    }

    pub async fn unsubscribe_by_hash(
        &self,
        hash: u32,
        request_id: i32,
        cb: Option<Callback>,
    ) -> Result<i32> {
        self.send_unsubscribe(PathOneof::PathHash(hash), request_id, cb)
            .await
    }

    pub async fn unsubscribe_with_hash(
        &self,
        path: &str,
        request_id: i32,
        cb: Option<Callback>,
    ) -> Result<i32> {
        match self.hash_cache().hash(path) {
            Ok(hash) => self.unsubscribe_by_hash(hash, request_id, cb).await,
            Err(e) => {
                tracing::warn!(path, error = %e, "hash collision, unsubscribing by path");
                self.unsubscribe(path, request_id, cb).await
            }
        }
    }

    async fn send_unsubscribe(
        &self,
        path: PathOneof,
        request_id: i32,
        cb: Option<Callback>,
    ) -> Result<i32> {
        if request_id <= 0 {
            return Err(Error::InvalidArgument(format!(
                "unsubscribe needs the subscription's request id, got {request_id}"
            )));
        }
        let cb = cb.unwrap_or_else(|| callback(|_| Ok(())));
        self.send(NanoRpcRequest::request(request_id, path, Vec::new()), Some(cb))
            .await
    }

    /// REQUEST `path` and wait for the answer.
    ///
    /// Fails with the response's status error on a non-OK status, and with
    /// [`Error::NoResponse`] if the session ends first.
    pub async fn call<M>(&self, path: &str, msg: &M) -> Result<NanoRpcResponse>
    where
        M: prost::Message,
    {
        let (tx, rx) = oneshot::channel();
        let tx = Mutex::new(Some(tx));
        let cb = callback(move |resp: Option<NanoRpcResponse>| {
            if let Some(tx) = tx.lock().take() {
                let _ = tx.send(resp);
            }
            Ok(())
        });
        self.request(path, msg, cb).await?;

        match rx.await {
            Ok(Some(resp)) => {
                resp.error()?;
                Ok(resp)
            }
            Ok(None) | Err(_) => Err(Error::NoResponse),
        }
    }
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("remote", &self.inner.transport.remote)
            .field("state", &self.state())
            .field("connected", &self.is_connected())
            .finish()
    }
}

impl Drop for ClientInner {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Supervisor hooks
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Glue between the supervisor and the client.  Holds the client weakly so
/// that dropping the last `Client` stops the supervisor.
struct Hooks {
    client: Weak<ClientInner>,
    shared: Arc<Shared>,
}

impl Hooks {
    fn client(&self) -> Option<Client> {
        self.client.upgrade().map(|inner| Client { inner })
    }
}

#[async_trait::async_trait]
impl SessionHooks for Hooks {
    async fn on_transport_connected(&self, ctx: CancellationToken, conn: Connection) -> Result<()> {
        let client = self.client().ok_or(Error::Shutdown)?;
        let inner = &client.inner;
        tracing::info!(
            remote = %conn.info.remote,
            peer = conn.info.peer.as_deref().unwrap_or("-"),
            "connected"
        );

        let session = Session::start(conn, &inner.transport, inner.counter.clone(), ctx);
        if let Err(e) = self.shared.attach(session.clone()) {
            session.close().await;
            return Err(e);
        }
        Ok(())
    }

    async fn on_session_run(&self, _ctx: CancellationToken) -> Result<()> {
        let session = self.shared.current().ok_or(Error::NotConnected)?;

        // The strong handle must not outlive this block, or the client could
        // never be dropped while a session runs.
        {
            let client = self.client().ok_or(Error::Shutdown)?;
            if let Some(hook) = &client.inner.config.on_connect {
                hook(&client)?;
            }
        }
        self.shared.connected.send_replace(true);

        session.run().await
    }

    async fn on_transport_disconnected(&self, conn: &ConnInfo) -> Result<()> {
        self.shared.connected.send_replace(false);
        if let Some(session) = self.shared.detach() {
            session.close().await;
        }
        tracing::info!(remote = %conn.remote, "disconnected");

        if let Some(client) = self.client() {
            if let Some(hook) = &client.inner.config.on_disconnect {
                hook(&client)?;
            }
        }
        Ok(())
    }

    async fn on_transport_error(&self, conn: Option<&ConnInfo>, err: Error) -> Result<()> {
        let Some(client) = self.client() else {
            return Err(err);
        };
        if let Some(hook) = &client.inner.config.on_error {
            return hook(conn, &err);
        }
        match conn {
            None => tracing::warn!(
                remote = %client.inner.transport.remote,
                error = %err,
                "dial failed"
            ),
            Some(info) => tracing::warn!(remote = %info.remote, error = %err, "session failed"),
        }
        Ok(())
    }
}
