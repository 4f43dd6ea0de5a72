//! Per-connection session: framing workers, callback registry, request-ID
//! assignment, and idle-read deadline gating.
//!
//! A session lives exactly as long as one transport connection.  It runs
//! three workers that all observe the session's cancellation token:
//!
//! - **writer**: drains the bounded outbound queue into the socket, each
//!   write bounded by `write_timeout`
//! - **reader**: decodes responses and dispatches callbacks.  While no
//!   callbacks are outstanding it gives up after `idle_read_timeout`;
//!   otherwise after `keep_alive + read_timeout`, the latest a live peer
//!   can answer the next heartbeat
//! - **heartbeat**: enqueues a PING every `keep_alive`
//!
//! Callbacks always run on a fresh task so a slow handler never stalls the
//! reader or the session teardown.  The first worker or callback error is recorded and ends the
//! session; [`Session::run`] resolves with it.

use std::sync::Arc;
use std::time::Duration;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use nanorpc_protocol::{
    ClientCodec, CodecError, NanoRpcRequest, NanoRpcResponse, RequestType, ResponseType,
};
use parking_lot::Mutex;
use prost::Message;
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::codec::Framed;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::callbacks::{CallbackEntry, CallbackTable};
use crate::config::TransportConfig;
use crate::request_id::RequestCounter;
use crate::transport::{BoxedStream, ConnInfo, Connection};
use crate::types::{Callback, Error, Result};

type FrameSink = SplitSink<Framed<BoxedStream, ClientCodec>, NanoRpcRequest>;
type FrameStream = SplitStream<Framed<BoxedStream, ClientCodec>>;

pub struct Session {
    info: ConnInfo,
    callbacks: Mutex<CallbackTable>,
    outbound: mpsc::Sender<NanoRpcRequest>,
    counter: Arc<RequestCounter>,
    cancel: CancellationToken,
    max_frame_len: usize,
    /// Signalled when the table goes from empty to non-empty, so the reader
    /// drops its idle deadline.
    activity: Notify,
    failure: Mutex<Option<Error>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl Session {
    /// Take ownership of `conn` and spawn the session workers.
    ///
    /// `cancel` is the session's scope; cancelling it stops every worker.
    pub fn start(
        conn: Connection,
        transport: &TransportConfig,
        counter: Arc<RequestCounter>,
        cancel: CancellationToken,
    ) -> Arc<Self> {
        let codec = ClientCodec::with_max_frame_len(transport.max_frame_len);
        let (sink, stream) = Framed::new(conn.stream, codec).split();
        let (outbound, queue) = mpsc::channel(transport.queue_size.max(1));

        let session = Arc::new(Self {
            info: conn.info,
            callbacks: Mutex::new(CallbackTable::new()),
            outbound,
            counter,
            cancel,
            max_frame_len: transport.max_frame_len,
            activity: Notify::new(),
            failure: Mutex::new(None),
            workers: Mutex::new(Vec::new()),
        });

        let deadlines = ReadDeadlines {
            idle: transport.idle_read_timeout,
            active: transport.keep_alive + transport.read_timeout,
        };
        let span = tracing::Span::current();
        let workers = vec![
            tokio::spawn(
                session
                    .clone()
                    .write_loop(sink, queue, transport.write_timeout)
                    .instrument(span.clone()),
            ),
            tokio::spawn(
                session
                    .clone()
                    .read_loop(stream, deadlines)
                    .instrument(span.clone()),
            ),
            tokio::spawn(
                session
                    .clone()
                    .heartbeat_loop(transport.keep_alive)
                    .instrument(span),
            ),
        ];
        *session.workers.lock() = workers;
        session
    }

    /// Whether any callbacks are outstanding.
    pub fn is_active(&self) -> bool {
        !self.callbacks.lock().is_empty()
    }

    pub fn pending(&self) -> usize {
        self.callbacks.lock().len()
    }

    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled()
    }

    // ── Writer path ──────────────────────────────────────────────────

    /// Register `cb` (if any) and enqueue `req`.  Returns the request ID
    /// used on the wire.
    ///
    /// - PING: callback optional.  A negative ID without a callback is sent
    ///   as `0` (fire-and-forget, the server's PONG is dropped).
    /// - REQUEST / SUBSCRIBE: callback required.
    /// - An ID `<= 0` is replaced by the next free ID from the client-wide
    ///   counter; an explicit positive ID is kept.
    /// - An explicit ID that names a live subscription, sent as a REQUEST,
    ///   is an unsubscribe: the subscription's callback gets its final
    ///   `None` and the new callback takes over the ID.
    ///
    /// A frame over `max_frame_len` is rejected before anything is
    /// registered.  If enqueueing fails the callback stays registered and is
    /// drained with `None` when the session closes.
    pub async fn send(self: &Arc<Self>, mut req: NanoRpcRequest, cb: Option<Callback>) -> Result<i32> {
        let request_type = req.request_type();
        match request_type {
            RequestType::Ping => {}
            RequestType::Request | RequestType::Subscribe => {
                if cb.is_none() {
                    return Err(Error::InvalidArgument(format!(
                        "{request_type:?} requires a callback"
                    )));
                }
            }
            RequestType::Unspecified => {
                return Err(Error::InvalidArgument(format!(
                    "invalid request type {}",
                    req.request_type
                )));
            }
        }
        let len = req.encoded_len();
        if len > self.max_frame_len {
            return Err(Error::Codec(CodecError::FrameTooLarge {
                len,
                max: self.max_frame_len,
            }));
        }

        let mut unsubscribed = None;
        let became_active = {
            let mut table = self.callbacks.lock();
            // Checked under the lock: `close` cancels before it drains, so a
            // callback inserted here is always seen by the drain.
            if self.is_closed() {
                return Err(Error::NotConnected);
            }
            let was_idle = table.is_empty();

            if req.request_id < 0 && request_type == RequestType::Ping && cb.is_none() {
                req.request_id = 0;
            } else if req.request_id <= 0 {
                req.request_id = self.next_free_id(&table);
            } else if let Some(existing) = table.peek(req.request_id).map(|e| e.request_type) {
                if existing == RequestType::Subscribe && request_type == RequestType::Request {
                    unsubscribed = table.pop(req.request_id);
                } else {
                    return Err(Error::InvalidArgument(format!(
                        "request id {} is already in use",
                        req.request_id
                    )));
                }
            }

            if let Some(callback) = cb {
                table.insert(CallbackEntry {
                    request_id: req.request_id,
                    request_type,
                    callback,
                });
            }
            was_idle && !table.is_empty()
        };

        if became_active {
            self.activity.notify_one();
        }
        if let Some(entry) = unsubscribed {
            tracing::debug!(request_id = entry.request_id, "subscription cancelled");
            self.invoke(entry.callback, None);
        }

        let request_id = req.request_id;
        tracing::trace!(request_id, ?request_type, "enqueueing request");
        tokio::select! {
            sent = self.outbound.send(req) => sent.map_err(|_| Error::NotConnected)?,
            _ = self.cancel.cancelled() => return Err(Error::NotConnected),
        }
        Ok(request_id)
    }

    fn next_free_id(&self, table: &CallbackTable) -> i32 {
        loop {
            let id = self.counter.next();
            if !table.contains(id) {
                return id;
            }
        }
    }

    async fn write_loop(
        self: Arc<Self>,
        mut sink: FrameSink,
        mut queue: mpsc::Receiver<NanoRpcRequest>,
        write_timeout: Duration,
    ) {
        loop {
            let req = tokio::select! {
                _ = self.cancel.cancelled() => break,
                req = queue.recv() => match req {
                    Some(req) => req,
                    None => break,
                },
            };

            let request_id = req.request_id;
            match tokio::time::timeout(write_timeout, sink.send(req)).await {
                Ok(Ok(())) => tracing::trace!(request_id, "frame written"),
                Ok(Err(CodecError::Io(e))) => {
                    self.fail(Error::Transport(e));
                    break;
                }
                // Nothing reached the socket; only this request is lost.
                Ok(Err(e)) => {
                    tracing::warn!(request_id, error = %e, "dropping unencodable request");
                    let entry = self.callbacks.lock().pop(request_id);
                    if let Some(entry) = entry {
                        self.invoke(entry.callback, None);
                    }
                }
                Err(_) => {
                    self.fail(Error::Timeout("write"));
                    break;
                }
            }
        }
    }

    // ── Reader path ──────────────────────────────────────────────────

    async fn read_loop(self: Arc<Self>, mut stream: FrameStream, deadlines: ReadDeadlines) {
        loop {
            let idle = !self.is_active();
            let deadline = if idle { deadlines.idle } else { deadlines.active };
            let frame = tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = self.activity.notified(), if idle => continue,
                _ = tokio::time::sleep(deadline) => {
                    self.fail(Error::Timeout(if idle { "idle read" } else { "read" }));
                    break;
                }
                frame = stream.next() => frame,
            };

            match frame {
                Some(Ok(resp)) => self.dispatch(resp),
                Some(Err(e)) => {
                    self.fail(codec_error(e));
                    break;
                }
                None => {
                    self.fail(Error::Transport(std::io::Error::new(
                        std::io::ErrorKind::UnexpectedEof,
                        "connection closed by peer",
                    )));
                    break;
                }
            }
        }
    }

    /// Route one response to its callback.
    fn dispatch(self: &Arc<Self>, resp: NanoRpcResponse) {
        let request_id = resp.request_id;
        if request_id <= 0 {
            tracing::debug!(request_id, "dropping unsolicited response");
            return;
        }

        let callback = {
            let mut table = self.callbacks.lock();
            match table.peek(request_id).map(|e| e.request_type) {
                None => None,
                Some(RequestType::Subscribe) => table.peek(request_id).map(|e| e.callback.clone()),
                // Late update for a subscription that has been cancelled.
                Some(_) if resp.response_type() == ResponseType::Update => {
                    tracing::trace!(request_id, "dropping update for cancelled subscription");
                    return;
                }
                Some(_) => table.pop(request_id).map(|e| e.callback),
            }
        };

        match callback {
            Some(cb) => {
                self.invoke(cb, Some(resp));
            }
            None => tracing::debug!(request_id, "no callback for response"),
        }
    }

    /// Run `cb` on a fresh task.  A callback error ends the session.
    fn invoke(self: &Arc<Self>, cb: Callback, resp: Option<NanoRpcResponse>) {
        let session = self.clone();
        tokio::spawn(
            async move {
                if let Err(e) = cb.on_response(resp).await {
                    tracing::warn!(error = %e, "response callback failed");
                    session.fail(e);
                }
            }
            .instrument(tracing::Span::current()),
        );
    }

    // ── Keep-alive ───────────────────────────────────────────────────

    async fn heartbeat_loop(self: Arc<Self>, every: Duration) {
        let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + every, every);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = interval.tick() => {}
            }
            if let Err(e) = self.send(NanoRpcRequest::ping(0), None).await {
                tracing::trace!(error = %e, "heartbeat stopped");
                break;
            }
        }
    }

    // ── Lifecycle ────────────────────────────────────────────────────

    /// Record the first error and end the session.  Errors raised after the
    /// session was cancelled are ignored.
    fn fail(&self, err: Error) {
        {
            let mut slot = self.failure.lock();
            if slot.is_none() && !self.cancel.is_cancelled() {
                tracing::debug!(remote = %self.info.remote, error = %err, "session failed");
                *slot = Some(err);
            }
        }
        self.cancel.cancel();
    }

    /// Block until the session ends.  `Ok(())` means it was cancelled from
    /// outside; otherwise the error that ended it.
    pub async fn run(&self) -> Result<()> {
        self.cancel.cancelled().await;
        match self.failure.lock().take() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Stop the workers and drain the callback table: every outstanding
    /// callback is dispatched once with `None`.  Returns once the workers
    /// have stopped; the drained callbacks run on their own tasks and are
    /// not awaited, so a callback may itself close the client.
    pub async fn close(self: &Arc<Self>) {
        self.cancel.cancel();

        let drained = {
            let mut table = self.callbacks.lock();
            let entries = table.drain();
            let count = entries.len();
            for entry in entries {
                self.invoke(entry.callback, None);
            }
            count
        };
        if drained > 0 {
            tracing::debug!(count = drained, "drained pending callbacks");
        }

        let workers = std::mem::take(&mut *self.workers.lock());
        for handle in workers {
            let _ = handle.await;
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

#[derive(Debug, Clone, Copy)]
struct ReadDeadlines {
    idle: Duration,
    active: Duration,
}

fn codec_error(e: CodecError) -> Error {
    match e {
        CodecError::Io(io) => Error::Transport(io),
        other => Error::Codec(other),
    }
}
