//! Length-prefixed frame codec.
//!
//! Every frame is a protobuf varint length followed by that many bytes of
//! encoded message.  [`FrameCodec`] plugs into `tokio_util::codec::Framed`;
//! the client side decodes responses and encodes requests, the server side
//! does the reverse.

use std::marker::PhantomData;

use bytes::{Buf, BytesMut};
use prost::Message;
use tokio_util::codec::{Decoder, Encoder};

use crate::types::{NanoRpcRequest, NanoRpcResponse};

/// Largest frame accepted unless overridden.
pub const DEFAULT_MAX_FRAME_LEN: usize = 4 * 1024 * 1024;

/// A varint never needs more than ten bytes for a `u64`.
const MAX_VARINT_LEN: usize = 10;

#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("frame I/O: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed frame: {0}")]
    Decode(#[from] prost::DecodeError),

    #[error("frame of {len} bytes exceeds limit of {max}")]
    FrameTooLarge { len: usize, max: usize },

    #[error("invalid frame length prefix")]
    InvalidLength,
}

/// Frame codec decoding `D` and encoding `E`.
pub struct FrameCodec<D, E> {
    max_frame_len: usize,
    _marker: PhantomData<fn() -> (D, E)>,
}

/// Decodes responses, encodes requests.
pub type ClientCodec = FrameCodec<NanoRpcResponse, NanoRpcRequest>;

/// Decodes requests, encodes responses.
pub type ServerCodec = FrameCodec<NanoRpcRequest, NanoRpcResponse>;

impl<D, E> FrameCodec<D, E> {
    pub fn new() -> Self {
        Self::with_max_frame_len(DEFAULT_MAX_FRAME_LEN)
    }

    pub fn with_max_frame_len(max_frame_len: usize) -> Self {
        Self {
            max_frame_len,
            _marker: PhantomData,
        }
    }
}

impl<D, E> Default for FrameCodec<D, E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<D, E> std::fmt::Debug for FrameCodec<D, E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameCodec")
            .field("max_frame_len", &self.max_frame_len)
            .finish()
    }
}

impl<D, E> Decoder for FrameCodec<D, E>
where
    D: Message + Default,
{
    type Item = D;
    type Error = CodecError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<D>, CodecError> {
        let Some((header, len)) = frame_header(src)? else {
            return Ok(None);
        };
        if len > self.max_frame_len {
            return Err(CodecError::FrameTooLarge {
                len,
                max: self.max_frame_len,
            });
        }

        let total = header + len;
        if src.len() < total {
            src.reserve(total - src.len());
            return Ok(None);
        }

        src.advance(header);
        let frame = src.split_to(len).freeze();
        Ok(Some(D::decode(frame)?))
    }
}

impl<D, E> Encoder<E> for FrameCodec<D, E>
where
    E: Message,
{
    type Error = CodecError;

    fn encode(&mut self, item: E, dst: &mut BytesMut) -> Result<(), CodecError> {
        let len = item.encoded_len();
        if len > self.max_frame_len {
            return Err(CodecError::FrameTooLarge {
                len,
                max: self.max_frame_len,
            });
        }
        dst.reserve(prost::length_delimiter_len(len) + len);
        prost::encode_length_delimiter(len, dst).map_err(|_| CodecError::InvalidLength)?;
        item.encode_raw(dst);
        Ok(())
    }
}

/// Parse the varint prefix.  Returns `(prefix_len, body_len)`, or `None`
/// when the prefix itself is still incomplete.
fn frame_header(src: &[u8]) -> Result<Option<(usize, usize)>, CodecError> {
    let mut len: u64 = 0;
    for (i, b) in src.iter().take(MAX_VARINT_LEN).enumerate() {
        len |= u64::from(b & 0x7f) << (7 * i);
        if b & 0x80 == 0 {
            let len = usize::try_from(len).map_err(|_| CodecError::InvalidLength)?;
            return Ok(Some((i + 1, len)));
        }
    }
    if src.len() >= MAX_VARINT_LEN {
        Err(CodecError::InvalidLength)
    } else {
        Ok(None)
    }
}

/// Encode a single request as a complete frame.
pub fn encode_request(req: &NanoRpcRequest) -> Vec<u8> {
    req.encode_length_delimited_to_vec()
}

/// Decode a single complete response frame.  Trailing bytes are an error.
pub fn decode_response(frame: &[u8]) -> Result<NanoRpcResponse, CodecError> {
    let mut buf = BytesMut::from(frame);
    let mut codec = ClientCodec::new();
    match codec.decode(&mut buf)? {
        Some(resp) if buf.is_empty() => Ok(resp),
        _ => Err(CodecError::InvalidLength),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{PathOneof, ResponseType};
    use bytes::BufMut;

    #[test]
    fn splits_frames_across_partial_reads() {
        let first = NanoRpcResponse::ok(1, ResponseType::Pong, vec![]);
        let second = NanoRpcResponse::ok(2, ResponseType::Response, b"payload".to_vec());

        let mut wire = BytesMut::new();
        let mut server = ServerCodec::new();
        server.encode(first.clone(), &mut wire).unwrap();
        server.encode(second.clone(), &mut wire).unwrap();

        let mut client = ClientCodec::new();
        let mut buf = BytesMut::new();
        let mut out = Vec::new();
        for byte in wire.iter() {
            buf.put_u8(*byte);
            while let Some(resp) = client.decode(&mut buf).unwrap() {
                out.push(resp);
            }
        }
        assert_eq!(out, vec![first, second]);
        assert!(buf.is_empty());
    }

    #[test]
    fn incomplete_prefix_waits_for_more() {
        let mut codec = ClientCodec::new();
        let mut buf = BytesMut::from(&[0x80u8, 0x80][..]);
        assert!(codec.decode(&mut buf).unwrap().is_none());
        assert_eq!(buf.len(), 2);
    }

    #[test]
    fn overlong_prefix_is_rejected() {
        let mut codec = ClientCodec::new();
        let mut buf = BytesMut::from(&[0xffu8; 11][..]);
        assert!(matches!(codec.decode(&mut buf), Err(CodecError::InvalidLength)));
    }

    #[test]
    fn oversized_frame_is_rejected_before_buffering() {
        let mut codec = ClientCodec::with_max_frame_len(8);
        let mut buf = BytesMut::new();
        prost::encode_length_delimiter(1024, &mut buf).unwrap();
        assert!(matches!(
            codec.decode(&mut buf),
            Err(CodecError::FrameTooLarge { len: 1024, max: 8 })
        ));
    }

    #[test]
    fn encoder_refuses_oversized_request() {
        let mut codec = ClientCodec::with_max_frame_len(4);
        let req = NanoRpcRequest::request(1, PathOneof::Path("/long/path".into()), vec![0; 16]);
        let mut dst = BytesMut::new();
        assert!(matches!(
            codec.encode(req, &mut dst),
            Err(CodecError::FrameTooLarge { .. })
        ));
        assert!(dst.is_empty());
    }

    #[test]
    fn explicit_request_id_preserved_on_wire() {
        let req = NanoRpcRequest::request(1234, PathOneof::Path("/x".into()), vec![]);
        let frame = encode_request(&req);

        let mut server = ServerCodec::new();
        let mut buf = BytesMut::from(frame.as_slice());
        let back = server.decode(&mut buf).unwrap().unwrap();
        assert_eq!(back.request_id, 1234);
    }

    #[test]
    fn decode_response_rejects_trailing_bytes() {
        let resp = NanoRpcResponse::ok(5, ResponseType::Update, vec![1, 2, 3]);
        let mut frame = BytesMut::new();
        ServerCodec::new().encode(resp.clone(), &mut frame).unwrap();
        assert_eq!(decode_response(&frame).unwrap(), resp);

        frame.put_u8(0);
        assert!(decode_response(&frame).is_err());
    }
}
