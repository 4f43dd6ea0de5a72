//! NanoRPC wire protocol: protobuf message types, the length-prefixed frame
//! codec, and FNV-1a path hashing.
//!
//! NanoRPC is a compact request/response + subscription protocol for
//! embedded devices reachable over TCP or Unix-domain stream sockets.
//!
//! # Frames
//!
//! ```text
//! ┌──────────────────────┬──────────────────────────────────┐
//! │ varint length (1-10) │ protobuf NanoRpcRequest/Response │
//! └──────────────────────┴──────────────────────────────────┘
//! ```
//!
//! # Paths
//!
//! A request addresses its endpoint either by the literal path string or by
//! the 32-bit FNV-1a hash of that path.  Servers accept both forms.

pub mod codec;
pub mod hashcache;
pub mod types;

pub use codec::{
    decode_response, encode_request, ClientCodec, CodecError, FrameCodec, ServerCodec,
    DEFAULT_MAX_FRAME_LEN,
};
pub use hashcache::{fnv1a, HashCache, HashCollision};
pub use types::{
    NanoRpcRequest, NanoRpcResponse, PathOneof, RequestType, ResponseError, ResponseType, Status,
};
