//! Per-connection frame parsing: `u32` big-endian length prefix,
//! followed by a MessagePack-serialized [`Message`].
//!
//! A malformed frame *body* yields a synthesized `ko` message routed to
//! the application like any other message — the connection stays open.
//! A framing violation (bad length prefix, oversized frame) is fatal
//! and closes the connection; callers distinguish the two via
//! [`Decoded`].

use crate::error::{Error, Result};
use crate::message::Message;
use bytes::{Buf, BytesMut};

const LENGTH_PREFIX_BYTES: usize = 4;

pub struct ProtocolConfig {
    pub max_message_size: u32,
    pub max_buffer_size: usize,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            max_message_size: 16 * 1024 * 1024,
            max_buffer_size: 64 * 1024 * 1024,
        }
    }
}

/// Outcome of attempting to decode the next frame from the buffer.
pub enum Decoded {
    /// A well-formed frame decoded successfully.
    Message(Message),
    /// The frame body failed to deserialize; non-fatal.
    Invalid,
    /// Not enough bytes buffered yet.
    NeedMore,
}

/// Rolling byte buffer that incrementally frames incoming bytes into
/// `Message`s. One `Protocol` per connection.
pub struct Protocol {
    config: ProtocolConfig,
    buffer: BytesMut,
}

impl Protocol {
    pub fn new(config: ProtocolConfig) -> Self {
        Self {
            config,
            buffer: BytesMut::new(),
        }
    }

    /// Appends freshly-read bytes. Returns `Err` (fatal) if doing so
    /// would exceed `max_buffer_size`.
    pub fn feed(&mut self, bytes: &[u8]) -> Result<()> {
        if self.buffer.len() + bytes.len() > self.config.max_buffer_size {
            return Err(Error::BufferOverflow(
                self.buffer.len() + bytes.len(),
                self.config.max_buffer_size,
            ));
        }
        self.buffer.extend_from_slice(bytes);
        Ok(())
    }

    /// Attempts to decode the next complete frame, consuming it from
    /// the buffer on success (both valid and invalid frame bodies).
    /// Returns `Err` (fatal, connection should close) only for a
    /// framing-level violation.
    pub fn decode_next(&mut self) -> Result<Decoded> {
        if self.buffer.len() < LENGTH_PREFIX_BYTES {
            return Ok(Decoded::NeedMore);
        }
        let len = u32::from_be_bytes(self.buffer[..LENGTH_PREFIX_BYTES].try_into().unwrap());
        if len > self.config.max_message_size {
            return Err(Error::FrameTooLarge(len, self.config.max_message_size));
        }
        let total = LENGTH_PREFIX_BYTES + len as usize;
        if self.buffer.len() < total {
            return Ok(Decoded::NeedMore);
        }

        self.buffer.advance(LENGTH_PREFIX_BYTES);
        let body = self.buffer.split_to(len as usize);

        match Message::decode(&body) {
            Ok(msg) => Ok(Decoded::Message(msg)),
            Err(_) => Ok(Decoded::Invalid),
        }
    }

    pub fn encode_frame(msg: &Message) -> Result<Vec<u8>> {
        let body = msg.encode()?;
        let mut framed = Vec::with_capacity(LENGTH_PREFIX_BYTES + body.len());
        framed.extend_from_slice(&(body.len() as u32).to_be_bytes());
        framed.extend_from_slice(&body);
        Ok(framed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn feeds_and_decodes_a_full_frame() {
        let msg = Message::new("ping", json!({}));
        let framed = Protocol::encode_frame(&msg).unwrap();

        let mut p = Protocol::new(ProtocolConfig::default());
        p.feed(&framed).unwrap();
        match p.decode_next().unwrap() {
            Decoded::Message(decoded) => assert_eq!(decoded, msg),
            _ => panic!("expected a decoded message"),
        }
    }

    #[test]
    fn partial_frame_yields_need_more() {
        let msg = Message::new("ping", json!({}));
        let framed = Protocol::encode_frame(&msg).unwrap();

        let mut p = Protocol::new(ProtocolConfig::default());
        p.feed(&framed[..framed.len() - 1]).unwrap();
        assert!(matches!(p.decode_next().unwrap(), Decoded::NeedMore));
    }

    #[test]
    fn malformed_body_is_non_fatal() {
        let mut p = Protocol::new(ProtocolConfig::default());
        let garbage = b"not-msgpack-at-all";
        let mut framed = (garbage.len() as u32).to_be_bytes().to_vec();
        framed.extend_from_slice(garbage);
        p.feed(&framed).unwrap();
        assert!(matches!(p.decode_next().unwrap(), Decoded::Invalid));
    }

    #[test]
    fn oversized_frame_is_fatal() {
        let mut config = ProtocolConfig::default();
        config.max_message_size = 4;
        let mut p = Protocol::new(config);
        p.feed(&100u32.to_be_bytes()).unwrap();
        assert!(matches!(p.decode_next(), Err(Error::FrameTooLarge(100, 4))));
    }

    #[test]
    fn buffer_overflow_is_fatal() {
        let mut config = ProtocolConfig::default();
        config.max_buffer_size = 2;
        let mut p = Protocol::new(config);
        assert!(p.feed(&[1, 2, 3]).is_err());
    }
}
