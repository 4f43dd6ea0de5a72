//! Integration test: boots an in-process NanoRPC peer on an ephemeral port,
//! connects a real [`Client`], and drives the request/subscribe/reconnect
//! cycle from the server side of the wire.

use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use nanorpc_client::{
    callback, fnv1a, Callback, Client, ClientBuilder, Error, HashCache, NanoRpcRequest,
    NanoRpcResponse, PathOneof, RequestType, ResponseHandler, ResponseType, State, Status,
};
use nanorpc_protocol::ServerCodec;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_util::codec::Framed;
use tracing::instrument::WithSubscriber;
use tracing_subscriber::layer::SubscriberExt;

const WAIT: Duration = Duration::from_secs(5);

type Peer = Framed<TcpStream, ServerCodec>;

// ── Mini server ─────────────────────────────────────────────────────────

/// Accepts connections on an ephemeral port and hands each one to the test
/// as a framed peer.
async fn start_server() -> (SocketAddr, mpsc::Receiver<Peer>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (tx, rx) = mpsc::channel(8);

    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            if tx.send(Framed::new(stream, ServerCodec::new())).await.is_err() {
                break;
            }
        }
    });
    (addr, rx)
}

async fn accept(conns: &mut mpsc::Receiver<Peer>) -> Peer {
    timeout(WAIT, conns.recv())
        .await
        .expect("no connection within deadline")
        .expect("server stopped")
}

async fn next_frame(peer: &mut Peer) -> NanoRpcRequest {
    timeout(WAIT, peer.next())
        .await
        .expect("no frame within deadline")
        .expect("client closed the connection")
        .expect("undecodable frame")
}

/// Builder with test-friendly timings: quick redial, no heartbeat noise,
/// and a private hash cache.
fn builder(addr: SocketAddr) -> ClientBuilder {
    ClientBuilder::new()
        .remote(addr.to_string())
        .reconnect_delay(Duration::from_millis(50))
        .keep_alive(Duration::from_secs(3600))
        .idle_read_timeout(Duration::from_secs(60))
        .hash_cache(Arc::new(HashCache::new()))
}

async fn connected(client: &Client) {
    timeout(WAIT, client.connected())
        .await
        .expect("client did not connect")
        .unwrap();
}

fn recorder() -> (Callback, mpsc::UnboundedReceiver<Option<NanoRpcResponse>>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let cb = callback(move |resp| {
        let _ = tx.send(resp);
        Ok(())
    });
    (cb, rx)
}

async fn recv(rx: &mut mpsc::UnboundedReceiver<Option<NanoRpcResponse>>) -> Option<NanoRpcResponse> {
    timeout(WAIT, rx.recv())
        .await
        .expect("callback not invoked")
        .expect("callback dropped")
}

// ── Scenarios ───────────────────────────────────────────────────────────

#[tokio::test]
async fn ping_without_session() {
    let (addr, _conns) = start_server().await;
    let client = builder(addr).build().unwrap();
    assert!(!client.ping().await);
}

#[tokio::test]
async fn pong_round_trip() {
    let (addr, mut conns) = start_server().await;
    let client = builder(addr).build().unwrap();
    client.connect().unwrap();
    let mut peer = accept(&mut conns).await;
    connected(&client).await;

    let rx = client.pong().await;
    let ping = next_frame(&mut peer).await;
    assert_eq!(ping.request_type(), RequestType::Ping);
    assert!(ping.request_id > 0);

    peer.send(NanoRpcResponse::ok(ping.request_id, ResponseType::Pong, vec![]))
        .await
        .unwrap();
    let outcome = timeout(WAIT, rx).await.unwrap().unwrap();
    assert!(outcome.is_ok());

    assert!(client.ping().await);
    assert_eq!(next_frame(&mut peer).await.request_type(), RequestType::Ping);
    client.close().await;
}

#[tokio::test]
async fn pong_fails_when_session_dies() {
    let (addr, mut conns) = start_server().await;
    let client = builder(addr).build().unwrap();
    client.connect().unwrap();
    let mut peer = accept(&mut conns).await;
    connected(&client).await;

    let rx = client.pong().await;
    next_frame(&mut peer).await;
    drop(peer);

    let outcome = timeout(WAIT, rx).await.unwrap().unwrap();
    assert!(matches!(outcome, Err(Error::PingTimeout)));
    client.close().await;
}

#[tokio::test]
async fn subscribe_then_unsubscribe() {
    let (addr, mut conns) = start_server().await;
    let client = builder(addr).build().unwrap();
    client.connect().unwrap();
    let mut peer = accept(&mut conns).await;
    connected(&client).await;

    let (cb, mut updates) = recorder();
    let id = client.subscribe("/evt", &(), cb).await.unwrap();
    assert!(id > 0);

    let sub = next_frame(&mut peer).await;
    assert_eq!(sub.request_type(), RequestType::Subscribe);
    assert_eq!(sub.request_id, id);
    assert_eq!(sub.path_oneof, Some(PathOneof::Path("/evt".into())));

    for n in 1..=2u8 {
        peer.send(NanoRpcResponse::ok(id, ResponseType::Update, vec![n]))
            .await
            .unwrap();
    }
    let mut seen = vec![
        recv(&mut updates).await.unwrap().data,
        recv(&mut updates).await.unwrap().data,
    ];
    seen.sort();
    assert_eq!(seen, vec![vec![1], vec![2]]);

    let (done_cb, mut done) = recorder();
    let again = client.unsubscribe("/evt", id, Some(done_cb)).await.unwrap();
    assert_eq!(again, id);

    let unsub = next_frame(&mut peer).await;
    assert_eq!(unsub.request_type(), RequestType::Request);
    assert_eq!(unsub.request_id, id);
    assert!(unsub.data.is_empty());

    // The subscription's final invocation.
    assert!(recv(&mut updates).await.is_none());

    peer.send(NanoRpcResponse::ok(id, ResponseType::Response, vec![]))
        .await
        .unwrap();
    let ack = recv(&mut done).await.unwrap();
    assert!(ack.error().is_ok());

    client.close().await;
    assert!(updates.try_recv().is_err());
}

#[tokio::test]
async fn session_dies_mid_flight() {
    let connects = Arc::new(AtomicUsize::new(0));
    let counter = connects.clone();

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let client = builder(addr)
        .on_connect(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
        .build()
        .unwrap();
    client.connect().unwrap();
    let (stream, _) = timeout(WAIT, listener.accept()).await.unwrap().unwrap();
    let mut peer = Framed::new(stream, ServerCodec::new());
    connected(&client).await;
    assert_eq!(client.state(), State::Running);

    let (cb, mut rx) = recorder();
    client.request("/a", &(), cb.clone()).await.unwrap();
    client.request("/b", &(), cb).await.unwrap();
    next_frame(&mut peer).await;
    next_frame(&mut peer).await;

    // With the listener gone every redial fails, so the supervisor sits in
    // Dialing between attempts.
    let mut states = client.subscribe_state();
    drop(listener);
    drop(peer);

    assert!(recv(&mut rx).await.is_none());
    assert!(recv(&mut rx).await.is_none());
    timeout(WAIT, states.wait_for(|s| *s == State::Dialing))
        .await
        .unwrap()
        .unwrap();
    assert!(!client.is_connected());

    let listener = TcpListener::bind(addr).await.unwrap();
    let _peer = timeout(WAIT, listener.accept()).await.unwrap().unwrap();
    connected(&client).await;
    assert_eq!(connects.load(Ordering::SeqCst), 2);

    // Nothing else was pending.
    assert!(rx.try_recv().is_err());
    client.close().await;
}

#[tokio::test]
async fn hash_collision_falls_back_to_path() {
    #[derive(Clone, Default)]
    struct LevelRecorder(Arc<parking_lot::Mutex<Vec<tracing::Level>>>);

    impl<S: tracing::Subscriber> tracing_subscriber::Layer<S> for LevelRecorder {
        fn on_event(
            &self,
            event: &tracing::Event<'_>,
            _ctx: tracing_subscriber::layer::Context<'_, S>,
        ) {
            self.0.lock().push(*event.metadata().level());
        }
    }

    let cache = Arc::new(HashCache::new());
    cache.register("/squatter", fnv1a("/evt")).unwrap();

    let (addr, mut conns) = start_server().await;
    let client = builder(addr)
        .always_hash_paths(true)
        .hash_cache(cache)
        .build()
        .unwrap();
    client.connect().unwrap();
    let mut peer = accept(&mut conns).await;
    connected(&client).await;

    let levels = LevelRecorder::default();
    let subscriber = tracing_subscriber::registry().with(levels.clone());
    let (cb, _rx) = recorder();
    client
        .request("/evt", &(), cb.clone())
        .with_subscriber(subscriber)
        .await
        .unwrap();

    let frame = next_frame(&mut peer).await;
    assert_eq!(frame.path_oneof, Some(PathOneof::Path("/evt".into())));
    assert!(levels.0.lock().contains(&tracing::Level::ERROR));

    // A path without a collision still goes out hashed.
    client.request("/other", &(), cb).await.unwrap();
    let frame = next_frame(&mut peer).await;
    assert_eq!(frame.path_oneof, Some(PathOneof::PathHash(fnv1a("/other"))));
    client.close().await;
}

#[tokio::test]
async fn request_ids_unique_under_concurrency() {
    let (addr, mut conns) = start_server().await;
    let client = builder(addr).build().unwrap();
    client.connect().unwrap();
    let _peer = accept(&mut conns).await;
    connected(&client).await;

    let tasks: Vec<_> = (0..100)
        .map(|_| {
            let client = client.clone();
            tokio::spawn(async move {
                client
                    .request("/a", &(), callback(|_| Ok(())))
                    .await
                    .unwrap()
            })
        })
        .collect();

    let mut ids = HashSet::new();
    for task in tasks {
        let id = task.await.unwrap();
        assert!(id > 0);
        assert!(ids.insert(id), "duplicate id {id}");
    }
    assert_eq!(ids.len(), 100);
    client.close().await;
}

#[tokio::test]
async fn call_returns_response_or_status_error() {
    let (addr, mut conns) = start_server().await;
    let client = builder(addr).build().unwrap();
    client.connect().unwrap();
    let mut peer = accept(&mut conns).await;
    connected(&client).await;

    tokio::spawn(async move {
        while let Some(Ok(req)) = peer.next().await {
            let resp = match req.path_oneof.as_ref().and_then(|p| p.path()) {
                Some("/sys/info") => {
                    NanoRpcResponse::ok(req.request_id, ResponseType::Response, b"v1".to_vec())
                }
                _ => NanoRpcResponse::failed(req.request_id, Status::NotFound, "no such path"),
            };
            if peer.send(resp).await.is_err() {
                break;
            }
        }
    });

    let resp = client.call("/sys/info", &()).await.unwrap();
    assert_eq!(resp.data, b"v1");

    match client.call("/missing", &()).await {
        Err(Error::Response(e)) => assert_eq!(e.status, Status::NotFound),
        other => panic!("unexpected result: {other:?}"),
    }
    client.close().await;
}

#[tokio::test]
async fn close_drains_pending_callbacks() {
    let (addr, mut conns) = start_server().await;
    let client = builder(addr).build().unwrap();
    client.connect().unwrap();
    let mut peer = accept(&mut conns).await;
    connected(&client).await;

    let (cb, mut rx) = recorder();
    client.subscribe("/evt", &(), cb.clone()).await.unwrap();
    client.request("/slow", &(), cb).await.unwrap();
    next_frame(&mut peer).await;
    next_frame(&mut peer).await;

    timeout(WAIT, client.close()).await.unwrap();
    assert!(recv(&mut rx).await.is_none());
    assert!(recv(&mut rx).await.is_none());
    assert!(rx.try_recv().is_err());

    assert_eq!(client.state(), State::Idle);
    assert!(!client.is_connected());
    assert!(client.wait().await.is_ok());
    assert!(matches!(
        client.request("/a", &(), callback(|_| Ok(()))).await,
        Err(Error::NotConnected)
    ));
}

/// Closes its own client once the subscription is terminated.
struct CloseOnEnd {
    client: Client,
    closed: mpsc::UnboundedSender<()>,
}

#[async_trait::async_trait]
impl ResponseHandler for CloseOnEnd {
    async fn on_response(&self, resp: Option<NanoRpcResponse>) -> nanorpc_client::Result<()> {
        if resp.is_none() {
            self.client.close().await;
            let _ = self.closed.send(());
        }
        Ok(())
    }
}

#[tokio::test]
async fn terminal_callback_can_close_client() {
    let (addr, mut conns) = start_server().await;
    let client = builder(addr).build().unwrap();
    client.connect().unwrap();
    let mut peer = accept(&mut conns).await;
    connected(&client).await;

    let (closed, mut on_closed) = mpsc::unbounded_channel();
    let handler = CloseOnEnd {
        client: client.clone(),
        closed,
    };
    client.subscribe("/evt", &(), Arc::new(handler)).await.unwrap();
    next_frame(&mut peer).await;
    drop(peer);

    timeout(WAIT, client.wait())
        .await
        .expect("supervisor stuck tearing down the session")
        .unwrap();
    timeout(WAIT, on_closed.recv())
        .await
        .expect("close() never returned inside the callback")
        .unwrap();
    assert_eq!(client.state(), State::Idle);
}

#[tokio::test]
async fn idle_timeout_reaches_error_hook() {
    let (tx, mut errors) = mpsc::unbounded_channel();
    let (addr, mut conns) = start_server().await;
    let client = builder(addr)
        .idle_read_timeout(Duration::from_millis(150))
        .on_error(move |conn, err| {
            let _ = tx.send((conn.is_some(), matches!(err, Error::Timeout("idle read"))));
            Ok(())
        })
        .build()
        .unwrap();
    client.connect().unwrap();
    let _peer = accept(&mut conns).await;

    let (had_conn, was_idle) = timeout(WAIT, errors.recv()).await.unwrap().unwrap();
    assert!(had_conn);
    assert!(was_idle);

    // The hook returned Ok, so the client redials.
    let _again = accept(&mut conns).await;
    client.close().await;
}

#[tokio::test]
async fn error_hook_can_make_dial_failures_terminal() {
    let port = std::net::TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port();
    let client = ClientBuilder::new()
        .remote(format!("127.0.0.1:{port}"))
        .reconnect_delay(Duration::from_millis(20))
        .on_error(|conn, err| match conn {
            None => Err(Error::InvalidArgument(format!("giving up: {err}"))),
            Some(_) => Ok(()),
        })
        .build()
        .unwrap();
    client.connect().unwrap();

    let result = timeout(WAIT, client.wait()).await.unwrap();
    assert!(matches!(result, Err(Error::InvalidArgument(_))));
    assert_eq!(client.state(), State::Idle);
    // The terminal error goes to the first waiter only.
    assert!(client.wait().await.is_ok());
}

#[tokio::test]
async fn disconnect_hook_error_is_terminal() {
    let (addr, mut conns) = start_server().await;
    let client = builder(addr)
        .on_disconnect(|_| Err(Error::Other(anyhow::anyhow!("stop reconnecting"))))
        .build()
        .unwrap();
    client.connect().unwrap();
    let peer = accept(&mut conns).await;
    connected(&client).await;

    drop(peer);
    let result = timeout(WAIT, client.wait()).await.unwrap();
    assert!(matches!(result, Err(Error::Other(_))));

    // No redial after a terminal error.
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(conns.try_recv().is_err());
}

#[cfg(unix)]
#[tokio::test]
async fn unix_socket_round_trip() {
    let path = std::env::temp_dir().join(format!("nanorpc-test-{}.sock", std::process::id()));
    let _ = std::fs::remove_file(&path);
    let listener = tokio::net::UnixListener::bind(&path).unwrap();

    let server = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut peer = Framed::new(stream, ServerCodec::new());
        let req = peer.next().await.unwrap().unwrap();
        peer.send(NanoRpcResponse::ok(req.request_id, ResponseType::Response, b"unix".to_vec()))
            .await
            .unwrap();
        // Hold the connection until the client hangs up.
        while peer.next().await.is_some() {}
    });

    let client = ClientBuilder::new()
        .remote(format!("unix:{}", path.display()))
        .keep_alive(Duration::from_secs(3600))
        .build()
        .unwrap();
    client.connect().unwrap();
    connected(&client).await;

    let resp = client.call("/sys/info", &()).await.unwrap();
    assert_eq!(resp.data, b"unix");

    client.close().await;
    timeout(WAIT, server).await.unwrap().unwrap();
    let _ = std::fs::remove_file(&path);
}
