//! Length-prefixed TCP frame codec.
//!
//! Wire layout: 1-byte message type, 4-byte big-endian session-id length,
//! session-id bytes; for data-bearing types (Data, AdHoc) a 4-byte
//! big-endian payload length and the payload bytes follow.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use super::MessageType;

const HEADER_LEN: usize = 1 + 4;

/// One decoded TCP frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub session_id: String,
    pub message_type: MessageType,
    pub payload: Option<Bytes>,
}

impl Frame {
    pub fn new(session_id: impl Into<String>, message_type: MessageType, payload: Option<Bytes>) -> Self {
        Self {
            session_id: session_id.into(),
            message_type,
            payload,
        }
    }

    fn carries_payload(message_type: MessageType) -> bool {
        matches!(message_type, MessageType::Data | MessageType::AdHoc)
    }
}

pub struct FrameCodec;

impl Decoder for FrameCodec {
    type Item = Frame;
    type Error = std::io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Frame>, Self::Error> {
        if src.len() < HEADER_LEN {
            return Ok(None);
        }
        let message_type = MessageType::from_u8(src[0]).ok_or_else(|| {
            std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!("unknown message type tag {}", src[0]),
            )
        })?;
        let session_len = u32::from_be_bytes([src[1], src[2], src[3], src[4]]) as usize;
        if src.len() < HEADER_LEN + session_len {
            return Ok(None);
        }

        let payload_len = if Frame::carries_payload(message_type) {
            let offset = HEADER_LEN + session_len;
            if src.len() < offset + 4 {
                return Ok(None);
            }
            let len = u32::from_be_bytes([
                src[offset],
                src[offset + 1],
                src[offset + 2],
                src[offset + 3],
            ]) as usize;
            if src.len() < offset + 4 + len {
                return Ok(None);
            }
            Some(len)
        } else {
            None
        };

        src.advance(HEADER_LEN);
        let session_bytes = src.split_to(session_len);
        let session_id = String::from_utf8(session_bytes.to_vec()).map_err(|_| {
            std::io::Error::new(std::io::ErrorKind::InvalidData, "session id is not utf-8")
        })?;
        let payload = payload_len.map(|len| {
            src.advance(4);
            src.split_to(len).freeze()
        });

        Ok(Some(Frame {
            session_id,
            message_type,
            payload,
        }))
    }
}

impl Encoder<Frame> for FrameCodec {
    type Error = std::io::Error;

    fn encode(&mut self, frame: Frame, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let session = frame.session_id.as_bytes();
        dst.put_u8(frame.message_type.as_u8());
        dst.put_u32(session.len() as u32);
        dst.put_slice(session);
        if Frame::carries_payload(frame.message_type) {
            let payload = frame.payload.unwrap_or_default();
            dst.put_u32(payload.len() as u32);
            dst.put_slice(&payload);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip(frame: Frame) -> Frame {
        let mut codec = FrameCodec;
        let mut buffer = BytesMut::new();
        codec.encode(frame, &mut buffer).unwrap();
        codec.decode(&mut buffer).unwrap().unwrap()
    }

    #[test]
    fn adhoc_frame_round_trips() {
        let frame = Frame::new(
            "session-1",
            MessageType::AdHoc,
            Some(Bytes::from_static(b"{\"ping\":true}")),
        );
        assert_eq!(round_trip(frame.clone()), frame);
    }

    #[test]
    fn disconnect_frame_has_no_payload_section() {
        let mut codec = FrameCodec;
        let mut buffer = BytesMut::new();
        codec
            .encode(Frame::new("s", MessageType::Disconnect, None), &mut buffer)
            .unwrap();
        assert_eq!(buffer.len(), HEADER_LEN + 1);
        let decoded = codec.decode(&mut buffer).unwrap().unwrap();
        assert_eq!(decoded.message_type, MessageType::Disconnect);
        assert_eq!(decoded.payload, None);
        assert!(buffer.is_empty());
    }

    #[test]
    fn partial_input_waits_for_more() {
        let mut codec = FrameCodec;
        let mut buffer = BytesMut::new();
        codec
            .encode(
                Frame::new("abc", MessageType::Data, Some(Bytes::from_static(b"xyz"))),
                &mut buffer,
            )
            .unwrap();
        let full = buffer.clone();

        let mut partial = BytesMut::from(&full[..full.len() - 2]);
        assert!(codec.decode(&mut partial).unwrap().is_none());
        partial.extend_from_slice(&full[full.len() - 2..]);
        assert!(codec.decode(&mut partial).unwrap().is_some());
    }

    #[test]
    fn unknown_type_tag_is_an_error() {
        let mut codec = FrameCodec;
        let mut buffer = BytesMut::new();
        buffer.put_u8(9);
        buffer.put_u32(1);
        buffer.put_u8(b'x');
        assert!(codec.decode(&mut buffer).is_err());
    }

    #[test]
    fn message_type_tags_match_wire_values() {
        assert_eq!(MessageType::Connect.as_u8(), 1);
        assert_eq!(MessageType::Data.as_u8(), 2);
        assert_eq!(MessageType::Disconnect.as_u8(), 3);
        assert_eq!(MessageType::AdHoc.as_u8(), 4);
        assert_eq!(MessageType::NotExist.as_u8(), 5);
    }
}
