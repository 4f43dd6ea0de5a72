//! `nanorpc-client`: reconnecting client for the NanoRPC protocol.
//!
//! NanoRPC multiplexes ping, one-shot request and subscription traffic
//! over a single stream connection (TCP or Unix socket) using
//! length-delimited protobuf frames.  This crate owns everything between
//! the caller and the wire: request-ID assignment, the callback table,
//! path hashing, the per-connection session, and the supervisor that
//! redials after failures.
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────┐
//! │  Client (façade, cheap to clone)                          │
//! │    request / subscribe / unsubscribe / ping / pong / call │
//! │        │                                                  │
//! │        ▼                                                  │
//! │  Session (one per connection)                             │
//! │    callback table ── writer ── reader ── heartbeat        │
//! │        ▲                                                  │
//! │        │ on_transport_connected / on_session_run / ...    │
//! │  Supervisor: Idle → Dialing → Connected → Running →       │
//! │              Closing → Idle (→ Dialing after back-off)    │
//! └───────────────────────────────────────────────────────────┘
//! ```
//!
//! # Callback lifecycle
//!
//! Every callback sees `Some(response)` for each frame addressed to its
//! request, and exactly one `None` when its session goes away.  `None` is
//! always the last invocation.  See [`ResponseHandler`].

pub mod builder;
pub mod callbacks;
pub mod client;
pub mod config;
pub mod paths;
pub mod reconnect;
pub mod request_id;
pub mod session;
pub mod supervisor;
pub mod transport;
pub mod types;

// ── Re-exports for ergonomic imports ─────────────────────────────────

pub use builder::ClientBuilder;
pub use client::Client;
pub use config::{Config, Remote, TransportConfig};
pub use reconnect::{Backoff, ConstantBackoff, ExponentialBackoff};
pub use supervisor::State;
pub use transport::ConnInfo;
pub use types::{callback, decode_response, Callback, Error, ResponseHandler, Result};

// Re-export the wire types so callers never need to depend on the protocol crate.
pub use nanorpc_protocol::{
    fnv1a, HashCache, NanoRpcRequest, NanoRpcResponse, PathOneof, RequestType, ResponseError,
    ResponseType, Status,
};
