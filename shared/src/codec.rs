//! Length-prefixed codec for TCP framing
//!
//! All messages are framed as:
//! ```text
//! [ 4 bytes: length (u32, big-endian) ][ N bytes: JSON envelope ]
//! ```
//!
//! This ensures message boundaries are preserved over TCP streams.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

/// Maximum message size (64 KB); envelopes are a command name and an id
pub const MAX_MESSAGE_SIZE: u32 = 64 * 1024;

/// Errors that can occur during encoding/decoding
#[derive(Error, Debug)]
pub enum CodecError {
    #[error("Message too large: {0} bytes (max: {MAX_MESSAGE_SIZE})")]
    MessageTooLarge(usize),

    #[error("Invalid message length prefix: {0}")]
    InvalidLength(u32),

    #[error("Malformed JSON envelope: {0}")]
    Json(#[from] serde_json::Error),
}

impl CodecError {
    /// Whether the stream is still aligned on a frame boundary after this error
    pub fn is_recoverable(&self) -> bool {
        matches!(self, CodecError::Json(_))
    }
}

/// Encode a message into a length-prefixed byte buffer
pub fn encode<T: Serialize>(message: &T) -> Result<Bytes, CodecError> {
    let body = serde_json::to_vec(message)?;

    if body.len() > MAX_MESSAGE_SIZE as usize {
        return Err(CodecError::MessageTooLarge(body.len()));
    }

    let mut buf = BytesMut::with_capacity(4 + body.len());
    buf.put_u32(body.len() as u32);
    buf.put_slice(&body);

    Ok(buf.freeze())
}

/// Try to decode a length-prefixed message from a buffer
///
/// Returns:
/// - `Ok(Some(message))` if a complete message was decoded
/// - `Ok(None)` if more data is needed
/// - `Err(...)` if the data is invalid
///
/// A frame whose body is not valid JSON is still consumed, so decoding can
/// continue with the next frame.
pub fn decode<T: DeserializeOwned>(buf: &mut BytesMut) -> Result<Option<T>, CodecError> {
    // Need at least 4 bytes for the length prefix
    if buf.len() < 4 {
        return Ok(None);
    }

    // Peek at the length prefix without consuming
    let msg_len = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]);

    if msg_len > MAX_MESSAGE_SIZE {
        return Err(CodecError::InvalidLength(msg_len));
    }

    let total_len = 4 + msg_len as usize;
    if buf.len() < total_len {
        return Ok(None);
    }

    buf.advance(4);
    let body = buf.split_to(msg_len as usize);

    Ok(Some(serde_json::from_slice(&body)?))
}

/// Decoder state machine for streaming decoding
#[derive(Debug, Default)]
pub struct FrameDecoder {
    /// Partial frame data being accumulated
    buffer: BytesMut,
}

impl FrameDecoder {
    /// Create a new frame decoder
    pub fn new() -> Self {
        Self {
            buffer: BytesMut::with_capacity(4096),
        }
    }

    /// Add data to the decoder buffer
    pub fn extend(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Try to decode the next frame from the buffer
    ///
    /// Call this repeatedly until it returns `Ok(None)` to drain all complete frames
    pub fn decode_next<T: DeserializeOwned>(&mut self) -> Result<Option<T>, CodecError> {
        decode(&mut self.buffer)
    }

    /// Discard everything buffered so far
    ///
    /// Used after an unrecoverable framing error: there is no way to find the
    /// next frame boundary, so the pending bytes are dropped.
    pub fn reset(&mut self) {
        self.buffer.clear();
    }

    /// Get the current buffer length (for debugging)
    pub fn buffer_len(&self) -> usize {
        self.buffer.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Request, Response};

    #[test]
    fn test_length_prefix() {
        let encoded = encode(&Request::new("call", "100")).expect("encode failed");

        let len_prefix = u32::from_be_bytes([encoded[0], encoded[1], encoded[2], encoded[3]]);
        assert_eq!(len_prefix as usize, encoded.len() - 4);
        assert_eq!(&encoded[4..], br#"{"command":"call","id":"100"}"#);
    }

    #[test]
    fn test_partial_decode() {
        let encoded = encode(&Response::new("Call 1 missed")).expect("encode failed");

        // Try decoding with only partial data
        let mut buf = BytesMut::from(&encoded[..5]);
        let result: Option<Response> = decode(&mut buf).expect("decode should not fail on partial data");
        assert!(result.is_none(), "should return None for partial data");

        // Buffer should be unchanged (data not consumed)
        assert_eq!(buf.len(), 5);
    }

    #[test]
    fn test_frame_decoder_chunks() {
        let encoded = encode(&Request::new("answer", "A")).expect("encode failed");

        let mut decoder = FrameDecoder::new();

        decoder.extend(&encoded[..3]);
        assert!(decoder.decode_next::<Request>().expect("decode error").is_none());

        decoder.extend(&encoded[3..]);
        let decoded: Request = decoder
            .decode_next()
            .expect("decode error")
            .expect("should have message");

        assert_eq!(decoded, Request::new("answer", "A"));
        assert_eq!(decoder.buffer_len(), 0);
    }

    #[test]
    fn test_multiple_frames_in_one_read() {
        let mut decoder = FrameDecoder::new();
        decoder.extend(&encode(&Request::new("call", "1")).unwrap());
        decoder.extend(&encode(&Request::new("call", "2")).unwrap());

        let first: Request = decoder.decode_next().unwrap().unwrap();
        let second: Request = decoder.decode_next().unwrap().unwrap();
        assert_eq!(first.id, "1");
        assert_eq!(second.id, "2");
        assert!(decoder.decode_next::<Request>().unwrap().is_none());
    }

    #[test]
    fn test_malformed_body_is_skipped() {
        let mut decoder = FrameDecoder::new();

        let garbage = b"{not json";
        let mut frame = BytesMut::new();
        frame.put_u32(garbage.len() as u32);
        frame.put_slice(garbage);
        decoder.extend(&frame);

        // Missing "id" field
        let partial = br#"{"command":"call"}"#;
        let mut frame = BytesMut::new();
        frame.put_u32(partial.len() as u32);
        frame.put_slice(partial);
        decoder.extend(&frame);

        decoder.extend(&encode(&Request::new("hangup", "7")).unwrap());

        let err = decoder.decode_next::<Request>().unwrap_err();
        assert!(err.is_recoverable());
        let err = decoder.decode_next::<Request>().unwrap_err();
        assert!(err.is_recoverable());

        let next: Request = decoder.decode_next().unwrap().unwrap();
        assert_eq!(next, Request::new("hangup", "7"));
    }

    #[test]
    fn test_message_too_large() {
        let mut buf = BytesMut::new();
        buf.put_u32(MAX_MESSAGE_SIZE + 1);
        buf.put_bytes(0, 100);

        let result = decode::<Request>(&mut buf);
        match result {
            Err(e) => {
                assert!(matches!(e, CodecError::InvalidLength(_)));
                assert!(!e.is_recoverable());
            }
            Ok(_) => panic!("oversized prefix must be rejected"),
        }
    }

    #[test]
    fn test_reset_discards_buffer() {
        let mut decoder = FrameDecoder::new();
        decoder.extend(&[0xff, 0xff, 0xff, 0xff, 1, 2, 3]);
        decoder.reset();
        assert_eq!(decoder.buffer_len(), 0);

        decoder.extend(&encode(&Request::new("call", "9")).unwrap());
        let req: Request = decoder.decode_next().unwrap().unwrap();
        assert_eq!(req.id, "9");
    }
}
