//! Streaming codec for the terminal's framed JSON wire protocol.
//!
//! Each frame on the wire is `STX, LF, <ascii JSON>, LF, ETX, LF`. This module
//! adapts that shape to [`tokio_util::codec`] so callers can drive a socket
//! through [`tokio_util::codec::Framed`] the same way the teacher's
//! `HotlineCodec` drives the Hotline binary framing
//! (`src/wireframe/codec/framed.rs` in the prior generation of this server).
//! Unlike that fixed-length binary header, frames here are delimited by
//! control bytes and the payload is a single JSON document.

use bytes::{Buf, BufMut, BytesMut};
use serde_json::Value;
use tokio_util::codec::{Decoder, Encoder};

const STX: u8 = 0x02;
const ETX: u8 = 0x03;
const LF: u8 = 0x0A;

/// Bytes scrubbed from an extracted payload before JSON parsing.
///
/// The wire format forbids embedding these control bytes inside the JSON
/// payload; some terminals nonetheless emit a stray `LF`, so the decoder
/// tolerates and strips them rather than failing the whole frame.
fn is_scrubbed(byte: u8) -> bool { matches!(byte, STX | ETX | LF | 0x0D | 0x00) }

/// A single decoded frame: either a parsed JSON envelope, or a frame whose
/// payload failed to parse as JSON.
///
/// An [`Frame::Invalid`] frame does not desynchronize the stream: the decoder
/// has already advanced past the offending `ETX`, and the caller is expected
/// to log the failure and keep reading.
#[derive(Debug, Clone)]
pub enum Frame {
    /// Successfully parsed JSON payload.
    Value(Value),
    /// A complete `STX..ETX` frame whose payload did not parse as JSON.
    Invalid {
        /// Raw bytes between `STX` and `ETX`, before scrubbing.
        raw: Vec<u8>,
        /// Description of the parse failure.
        reason: String,
    },
}

/// Tokio codec for the `STX LF json LF ETX LF` wire frames.
#[derive(Debug, Default)]
pub struct FrameCodec;

impl FrameCodec {
    /// Create a new codec instance.
    #[must_use]
    pub const fn new() -> Self { Self }
}

impl Decoder for FrameCodec {
    type Error = std::io::Error;
    type Item = Frame;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Frame>, Self::Error> {
        let Some(stx_pos) = src.iter().position(|&b| b == STX) else {
            // No frame start buffered yet; none of these bytes can ever begin
            // a frame, so there is nothing worth retaining.
            src.clear();
            return Ok(None);
        };
        if stx_pos > 0 {
            src.advance(stx_pos);
        }

        let Some(etx_offset) = src.iter().skip(1).position(|&b| b == ETX) else {
            // Incomplete frame: wait for more bytes before doing anything else.
            return Ok(None);
        };
        let etx_pos = etx_offset + 1;

        let raw: Vec<u8> = src.get(1..etx_pos).unwrap_or_default().to_vec();
        // Consume the whole frame, including ETX; a trailing filler LF (if
        // already buffered) is harmless to leave for the next scan since it
        // is discarded as pre-STX garbage.
        src.advance(etx_pos + 1);

        let scrubbed: Vec<u8> = raw.iter().copied().filter(|&b| !is_scrubbed(b)).collect();
        match serde_json::from_slice::<Value>(&scrubbed) {
            Ok(value) => Ok(Some(Frame::Value(value))),
            Err(err) => Ok(Some(Frame::Invalid {
                raw,
                reason: err.to_string(),
            })),
        }
    }
}

impl Encoder<Value> for FrameCodec {
    type Error = std::io::Error;

    fn encode(&mut self, item: Value, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let json = serde_json::to_vec(&item)
            .map_err(|err| std::io::Error::new(std::io::ErrorKind::InvalidInput, err))?;
        dst.reserve(json.len() + 6);
        dst.put_u8(STX);
        dst.put_u8(LF);
        dst.put_slice(&json);
        dst.put_u8(LF);
        dst.put_u8(ETX);
        dst.put_u8(LF);
        Ok(())
    }
}

/// Render raw frame bytes as a lowercase hex string for session logging.
#[must_use]
pub fn to_hex(bytes: &[u8]) -> String {
    bytes.iter().fold(String::with_capacity(bytes.len() * 2), |mut acc, b| {
        acc.push_str(&format!("{b:02x}"));
        acc
    })
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn framed_bytes(value: &Value) -> BytesMut {
        let mut codec = FrameCodec::new();
        let mut buf = BytesMut::new();
        codec.encode(value.clone(), &mut buf).expect("encode");
        buf
    }

    #[test]
    fn round_trips_a_single_frame() {
        let value = json!({"message": "ACK", "data": {"requestId": "000001"}});
        let mut buf = framed_bytes(&value);
        let mut codec = FrameCodec::new();
        let decoded = codec.decode(&mut buf).expect("decode").expect("frame present");
        match decoded {
            Frame::Value(v) => assert_eq!(v, value),
            Frame::Invalid { reason, .. } => panic!("unexpected invalid frame: {reason}"),
        }
        assert!(buf.is_empty());
    }

    #[test]
    fn discards_garbage_before_first_stx() {
        let value = json!({"message": "ACK"});
        let mut buf = BytesMut::from(&b"garbage-prefix"[..]);
        buf.extend_from_slice(&framed_bytes(&value));
        let mut codec = FrameCodec::new();
        let decoded = codec.decode(&mut buf).expect("decode").expect("frame present");
        assert!(matches!(decoded, Frame::Value(v) if v == value));
    }

    #[test]
    fn waits_for_more_bytes_when_etx_missing() {
        let mut buf = BytesMut::new();
        buf.put_u8(STX);
        buf.put_u8(LF);
        buf.put_slice(b"{\"message\":");
        let mut codec = FrameCodec::new();
        assert!(codec.decode(&mut buf).expect("decode").is_none());
        assert!(!buf.is_empty(), "partial frame must be retained");
    }

    #[test]
    fn tolerates_a_stray_embedded_linefeed() {
        let mut buf = BytesMut::new();
        buf.put_u8(STX);
        buf.put_u8(LF);
        buf.put_slice(b"{\"message\":\n\"ACK\"}");
        buf.put_u8(LF);
        buf.put_u8(ETX);
        buf.put_u8(LF);
        let mut codec = FrameCodec::new();
        let decoded = codec.decode(&mut buf).expect("decode").expect("frame present");
        assert!(matches!(decoded, Frame::Value(v) if v == json!({"message": "ACK"})));
    }

    #[test]
    fn malformed_json_yields_invalid_frame_and_resumes() {
        let mut buf = BytesMut::new();
        buf.put_u8(STX);
        buf.put_u8(LF);
        buf.put_slice(b"{not json");
        buf.put_u8(LF);
        buf.put_u8(ETX);
        buf.put_u8(LF);
        let good = json!({"message": "ACK"});
        buf.extend_from_slice(&framed_bytes(&good));

        let mut codec = FrameCodec::new();
        let first = codec.decode(&mut buf).expect("decode").expect("frame present");
        assert!(matches!(first, Frame::Invalid { .. }));
        let second = codec.decode(&mut buf).expect("decode").expect("frame present");
        assert!(matches!(second, Frame::Value(v) if v == good));
    }

    #[test]
    fn decodes_two_buffered_frames_one_at_a_time() {
        let a = json!({"message": "ACK"});
        let b = json!({"message": "MSG"});
        let mut buf = framed_bytes(&a);
        buf.extend_from_slice(&framed_bytes(&b));

        let mut codec = FrameCodec::new();
        let first = codec.decode(&mut buf).expect("decode").expect("frame present");
        assert!(matches!(first, Frame::Value(v) if v == a));
        let second = codec.decode(&mut buf).expect("decode").expect("frame present");
        assert!(matches!(second, Frame::Value(v) if v == b));
        assert!(buf.is_empty());
    }
}
