//! Protobuf messages exchanged between a NanoRPC client and server.
//!
//! Declared with `prost` derives so no build-time code generation is needed.
//! Field tags match the `nanorpc.proto` schema shipped with the server
//! firmware.

use std::fmt;

/// Client → server frame.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct NanoRpcRequest {
    /// Correlation ID.  `0` only for fire-and-forget pings.
    #[prost(int32, tag = "1")]
    pub request_id: i32,
    #[prost(enumeration = "RequestType", tag = "2")]
    pub request_type: i32,
    #[prost(oneof = "PathOneof", tags = "3, 4")]
    pub path_oneof: Option<PathOneof>,
    /// Encoded request message; empty for pings and unsubscribes.
    #[prost(bytes = "vec", tag = "5")]
    pub data: Vec<u8>,
}

/// How a request addresses its endpoint.
#[derive(Clone, PartialEq, Eq, ::prost::Oneof)]
pub enum PathOneof {
    #[prost(uint32, tag = "3")]
    PathHash(u32),
    #[prost(string, tag = "4")]
    Path(String),
}

/// Server → client frame.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct NanoRpcResponse {
    /// Echo of the request ID.  `0` marks an unsolicited frame.
    #[prost(int32, tag = "1")]
    pub request_id: i32,
    #[prost(enumeration = "ResponseType", tag = "2")]
    pub response_type: i32,
    #[prost(enumeration = "Status", tag = "3")]
    pub response_status: i32,
    #[prost(string, tag = "4")]
    pub response_msg: String,
    #[prost(bytes = "vec", tag = "5")]
    pub data: Vec<u8>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum RequestType {
    Unspecified = 0,
    Ping = 1,
    Request = 2,
    Subscribe = 3,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum ResponseType {
    Unspecified = 0,
    Pong = 1,
    Response = 2,
    Update = 3,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum Status {
    Unspecified = 0,
    Ok = 1,
    NotFound = 2,
    NotAuthorized = 3,
    InternalError = 4,
}

impl ResponseType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResponseType::Unspecified => "unspecified",
            ResponseType::Pong => "pong",
            ResponseType::Response => "response",
            ResponseType::Update => "update",
        }
    }
}

impl Status {
    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Unspecified => "unspecified",
            Status::Ok => "ok",
            Status::NotFound => "not_found",
            Status::NotAuthorized => "not_authorized",
            Status::InternalError => "internal_error",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A response carried a non-OK status.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("{status}: {message}")]
pub struct ResponseError {
    pub status: Status,
    pub message: String,
}

// ── Constructors / accessors ─────────────────────────────────────────

impl NanoRpcRequest {
    pub fn ping(request_id: i32) -> Self {
        Self {
            request_id,
            request_type: RequestType::Ping as i32,
            path_oneof: None,
            data: Vec::new(),
        }
    }

    pub fn request(request_id: i32, path: PathOneof, data: Vec<u8>) -> Self {
        Self {
            request_id,
            request_type: RequestType::Request as i32,
            path_oneof: Some(path),
            data,
        }
    }

    pub fn subscribe(request_id: i32, path: PathOneof, data: Vec<u8>) -> Self {
        Self {
            request_id,
            request_type: RequestType::Subscribe as i32,
            path_oneof: Some(path),
            data,
        }
    }
}

impl PathOneof {
    /// The literal path, if this is the string form.
    pub fn path(&self) -> Option<&str> {
        match self {
            PathOneof::Path(p) => Some(p),
            PathOneof::PathHash(_) => None,
        }
    }

    /// The path hash, if this is the hashed form.
    pub fn hash(&self) -> Option<u32> {
        match self {
            PathOneof::PathHash(h) => Some(*h),
            PathOneof::Path(_) => None,
        }
    }
}

impl fmt::Display for PathOneof {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PathOneof::Path(p) => f.write_str(p),
            PathOneof::PathHash(h) => write!(f, "#{h:08x}"),
        }
    }
}

impl NanoRpcResponse {
    /// Build a response with `Status::Ok`.
    pub fn ok(request_id: i32, response_type: ResponseType, data: Vec<u8>) -> Self {
        Self {
            request_id,
            response_type: response_type as i32,
            response_status: Status::Ok as i32,
            response_msg: String::new(),
            data,
        }
    }

    /// Build a failed response.
    pub fn failed(request_id: i32, status: Status, message: impl Into<String>) -> Self {
        Self {
            request_id,
            response_type: ResponseType::Response as i32,
            response_status: status as i32,
            response_msg: message.into(),
            data: Vec::new(),
        }
    }

    /// `Ok(())` for `Status::Ok`, otherwise the status and message as an
    /// error.  Unknown status values are reported as `Unspecified`.
    pub fn error(&self) -> Result<(), ResponseError> {
        match self.response_status() {
            Status::Ok => Ok(()),
            status => Err(ResponseError {
                status,
                message: self.response_msg.clone(),
            }),
        }
    }
}
