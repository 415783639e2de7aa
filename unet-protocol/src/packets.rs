//! Built-in packets registered in every [`PacketRegistry`](crate::PacketRegistry).
//!
//! | Identifier | Packet            | Payload                                   |
//! |------------|-------------------|-------------------------------------------|
//! | `0x0001`   | [`HandshakePacket`] | empty                                   |
//! | `0x0002`   | [`ErrorPacket`]     | `u16` error code, `u16`-prefixed message |
//!
//! Applications should register their own packets outside this range.

use crate::error::{ErrorCode, ProtocolError};
use crate::packet::{read_string, read_u16, write_string, Packet, PacketId};
use bytes::{BufMut, Bytes, BytesMut};

/// Identifier of the built-in handshake packet.
pub const HANDSHAKE_ID: PacketId = 0x0001;

/// Identifier of the built-in error packet.
pub const ERROR_ID: PacketId = 0x0002;

/// Opens a session. Carries no payload of its own.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HandshakePacket;

impl Packet for HandshakePacket {
    fn serialize(&self, _buf: &mut BytesMut) -> Result<(), ProtocolError> {
        Ok(())
    }

    fn deserialize(&mut self, _payload: &mut Bytes) -> Result<(), ProtocolError> {
        Ok(())
    }
}

/// Reports a failure to the peer, usually right before closing the connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorPacket {
    pub code: ErrorCode,
    pub message: String,
}

impl ErrorPacket {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    /// Builds the packet a peer should see for a local protocol failure.
    pub fn from_error(err: &ProtocolError) -> Self {
        Self::new(err.error_code(), err.to_string())
    }
}

impl Default for ErrorPacket {
    fn default() -> Self {
        Self::new(ErrorCode::InternalError, String::new())
    }
}

impl Packet for ErrorPacket {
    fn serialize(&self, buf: &mut BytesMut) -> Result<(), ProtocolError> {
        buf.put_u16(self.code.as_u16());
        write_string(buf, &self.message)
    }

    fn deserialize(&mut self, payload: &mut Bytes) -> Result<(), ProtocolError> {
        let raw = read_u16(payload)?;
        self.code = ErrorCode::from_u16(raw)
            .ok_or_else(|| ProtocolError::InvalidPayload(format!("unknown error code {raw}")))?;
        self.message = read_string(payload)?;
        Ok(())
    }
}
