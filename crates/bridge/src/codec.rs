//! Native-messaging framing: `[u32 little-endian length][UTF-8 JSON]`.
//!
//! The length prefix is the only source of frame boundaries, so a payload that
//! fails to parse is reported as [`Frame::Malformed`] and decoding carries on
//! with the next prefix.

use browsermux_core::{Error, Message, Result};
use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};
use tracing::warn;

pub const LENGTH_PREFIX_LEN: usize = 4;

/// Upper bound on how much buffer space is reserved ahead of the bytes that
/// actually arrive, so a bogus length cannot trigger a huge allocation.
const MAX_RESERVE: usize = 64 * 1024;

#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    Message(Message),
    Malformed { len: usize, error: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DecodeState {
    AwaitingLength,
    AwaitingPayload { len: usize },
}

#[derive(Debug)]
pub struct NativeMessageCodec {
    state: DecodeState,
}

impl NativeMessageCodec {
    pub fn new() -> Self {
        Self {
            state: DecodeState::AwaitingLength,
        }
    }
}

impl Default for NativeMessageCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for NativeMessageCodec {
    type Item = Frame;
    type Error = std::io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> std::result::Result<Option<Frame>, Self::Error> {
        loop {
            match self.state {
                DecodeState::AwaitingLength => {
                    if src.len() < LENGTH_PREFIX_LEN {
                        src.reserve(LENGTH_PREFIX_LEN - src.len());
                        return Ok(None);
                    }
                    let len = src.get_u32_le() as usize;
                    self.state = DecodeState::AwaitingPayload { len };
                }
                DecodeState::AwaitingPayload { len } => {
                    if src.len() < len {
                        src.reserve((len - src.len()).min(MAX_RESERVE));
                        return Ok(None);
                    }
                    let payload = src.split_to(len);
                    self.state = DecodeState::AwaitingLength;
                    let frame = match serde_json::from_slice::<Message>(&payload) {
                        Ok(message) => Frame::Message(message),
                        Err(e) => Frame::Malformed {
                            len,
                            error: e.to_string(),
                        },
                    };
                    return Ok(Some(frame));
                }
            }
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> std::result::Result<Option<Frame>, Self::Error> {
        if let Some(frame) = self.decode(src)? {
            return Ok(Some(frame));
        }
        if !src.is_empty() || self.state != DecodeState::AwaitingLength {
            warn!(
                buffered = src.len(),
                state = ?self.state,
                "Stream ended inside a frame, discarding partial data"
            );
            src.clear();
            self.state = DecodeState::AwaitingLength;
        }
        Ok(None)
    }
}

impl Encoder<Message> for NativeMessageCodec {
    type Error = std::io::Error;

    fn encode(&mut self, item: Message, dst: &mut BytesMut) -> std::result::Result<(), Self::Error> {
        let payload = serde_json::to_vec(&item)?;
        let len = u32::try_from(payload.len()).map_err(|_| {
            std::io::Error::new(std::io::ErrorKind::InvalidData, "message exceeds u32 length prefix")
        })?;
        dst.reserve(LENGTH_PREFIX_LEN + payload.len());
        dst.put_u32_le(len);
        dst.extend_from_slice(&payload);
        Ok(())
    }
}

/// Encode one message into a standalone frame.
pub fn encode(message: &Message) -> Result<Vec<u8>> {
    let mut buf = BytesMut::new();
    NativeMessageCodec::new()
        .encode(message.clone(), &mut buf)
        .map_err(|e| Error::Codec(e.to_string()))?;
    Ok(buf.to_vec())
}

/// Decode every complete frame in `bytes`. Trailing partial data is ignored.
pub fn decode_all(bytes: &[u8]) -> Vec<Frame> {
    let mut codec = NativeMessageCodec::new();
    let mut buf = BytesMut::from(bytes);
    let mut frames = Vec::new();
    while let Ok(Some(frame)) = codec.decode(&mut buf) {
        frames.push(frame);
    }
    frames
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Map};

    fn sample_messages() -> Vec<Message> {
        let mut nested = Map::new();
        nested.insert("selector".into(), json!("#main > a"));
        nested.insert("opts".into(), json!({"deep": {"list": [1, 2, {"x": null}]}}));
        vec![
            Message::request("1", "click", nested),
            Message::request("2", "type", {
                let mut m = Map::new();
                m.insert("text".into(), json!("héllo wörld ✓ 日本語 🚀"));
                m
            }),
            Message::request("3", "noop", Map::new()),
            Message::success("4", json!({})),
            Message::failure("5", "Element not found"),
            Message::default(),
        ]
    }

    #[test]
    fn test_roundtrip() {
        for msg in sample_messages() {
            let bytes = encode(&msg).unwrap();
            let frames = decode_all(&bytes);
            assert_eq!(frames, vec![Frame::Message(msg)]);
        }
    }

    #[test]
    fn test_length_prefix_is_little_endian_utf8_bytes() {
        let msg = Message::success("é", json!("ü"));
        let bytes = encode(&msg).unwrap();
        let payload = serde_json::to_vec(&msg).unwrap();
        assert_eq!(&bytes[..4], &(payload.len() as u32).to_le_bytes());
        assert_eq!(&bytes[4..], payload.as_slice());
    }

    #[test]
    fn test_corrupt_frame_does_not_break_alignment() {
        let garbage = b"{\"id\": oops";
        let mut bytes = (garbage.len() as u32).to_le_bytes().to_vec();
        bytes.extend_from_slice(garbage);
        let good = Message::success("42", json!({"status": "ok"}));
        bytes.extend(encode(&good).unwrap());

        let frames = decode_all(&bytes);
        assert_eq!(frames.len(), 2);
        assert!(matches!(frames[0], Frame::Malformed { len, .. } if len == garbage.len()));
        assert_eq!(frames[1], Frame::Message(good));
    }

    #[test]
    fn test_byte_at_a_time_delivery() {
        let msgs = sample_messages();
        let mut stream = Vec::new();
        for m in &msgs {
            stream.extend(encode(m).unwrap());
        }
        let mut codec = NativeMessageCodec::new();
        let mut buf = BytesMut::new();
        let mut out = Vec::new();
        for byte in stream {
            buf.put_u8(byte);
            while let Some(frame) = codec.decode(&mut buf).unwrap() {
                out.push(frame);
            }
        }
        let expected: Vec<Frame> = msgs.into_iter().map(Frame::Message).collect();
        assert_eq!(out, expected);
    }

    #[test]
    fn test_non_object_payload_is_malformed() {
        let mut bytes = 4u32.to_le_bytes().to_vec();
        bytes.extend_from_slice(b"null");
        let frames = decode_all(&bytes);
        assert!(matches!(frames[0], Frame::Malformed { .. }));
    }

    #[test]
    fn test_zero_length_frame_is_malformed_and_skipped() {
        let mut bytes = 0u32.to_le_bytes().to_vec();
        let good = Message::success("1", json!(true));
        bytes.extend(encode(&good).unwrap());
        let frames = decode_all(&bytes);
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[1], Frame::Message(good));
    }

    #[test]
    fn test_partial_frame_at_eof_is_discarded() {
        let bytes = encode(&Message::success("1", json!(1))).unwrap();
        let mut codec = NativeMessageCodec::new();
        let mut buf = BytesMut::from(&bytes[..bytes.len() - 2]);
        assert!(codec.decode_eof(&mut buf).unwrap().is_none());
        assert!(buf.is_empty());
    }
}
