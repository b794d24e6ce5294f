//! Envelope codec
//!
//! Envelope layout:
//! ```text
//! Byte 0:    Magic (0x4D = 'M')
//! Byte 1:    Protocol version
//! Byte 2..:  MessagePack payload (named fields)
//! ```
//!
//! Message boundaries are the transport's business (the TCP transport uses a
//! length prefix).

use bytes::{BufMut, Bytes, BytesMut};

use crate::{Error, Message, Result, MAGIC_BYTE, PROTOCOL_VERSION};

/// Envelope header size
pub const HEADER_SIZE: usize = 2;

/// Encode a message into an envelope
pub fn encode(message: &Message) -> Result<Bytes> {
    let payload = rmp_serde::to_vec_named(message)?;
    let mut buf = BytesMut::with_capacity(HEADER_SIZE + payload.len());
    buf.put_u8(MAGIC_BYTE);
    buf.put_u8(PROTOCOL_VERSION);
    buf.extend_from_slice(&payload);
    Ok(buf.freeze())
}

/// Decode an envelope into a message
pub fn decode(bytes: &[u8]) -> Result<Message> {
    if bytes.len() < HEADER_SIZE {
        return Err(Error::BufferTooSmall {
            needed: HEADER_SIZE,
            have: bytes.len(),
        });
    }

    if bytes[0] != MAGIC_BYTE {
        return Err(Error::InvalidMagic(bytes[0]));
    }

    if bytes[1] != PROTOCOL_VERSION {
        return Err(Error::Protocol(format!(
            "unsupported protocol version {}",
            bytes[1]
        )));
    }

    Ok(rmp_serde::from_slice(&bytes[HEADER_SIZE..])?)
}
