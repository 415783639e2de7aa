//! Packet capability trait and payload helpers.
//!
//! A packet type opts into its wire behaviour through two capabilities:
//!
//! - [`Serialization`]: whether the packet writes only its payload (the codec
//!   prepends the identifier) or writes its own identifier followed by the
//!   payload.
//! - encryptable: whether the packet is eligible for encryption when the
//!   connection has a crypto scheme configured.
//!
//! On receive the codec always consumes the identifier before handing the
//! remaining bytes to [`Packet::deserialize`], regardless of the capability.

use crate::error::ProtocolError;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::any::Any;
use std::fmt::Debug;

/// 16-bit packet identifier.
pub type PacketId = u16;

/// Size of the identifier on the wire.
pub const PACKET_ID_SIZE: usize = 2;

/// How a packet type lays out its body on send.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Serialization {
    /// The codec writes the identifier, the packet writes only its payload.
    #[default]
    PayloadOnly,
    /// The packet writes its own identifier followed by its payload.
    SelfDescribing,
}

/// Object-safe access to [`Any`] for downcasting received packets.
pub trait AsAny {
    fn as_any(&self) -> &dyn Any;
    fn into_any(self: Box<Self>) -> Box<dyn Any>;
}

impl<T: Any> AsAny for T {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn into_any(self: Box<Self>) -> Box<dyn Any> {
        self
    }
}

/// An application packet.
pub trait Packet: AsAny + Debug + Send + Sync + 'static {
    /// Writes the body of this packet.
    ///
    /// For [`Serialization::SelfDescribing`] packets this includes the
    /// big-endian identifier.
    fn serialize(&self, buf: &mut BytesMut) -> Result<(), ProtocolError>;

    /// Populates this packet from the payload that followed its identifier.
    fn deserialize(&mut self, payload: &mut Bytes) -> Result<(), ProtocolError>;

    fn serialization(&self) -> Serialization {
        Serialization::PayloadOnly
    }

    fn is_encryptable(&self) -> bool {
        false
    }

    /// Human-readable type name used in logs and errors.
    fn type_name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }
}

impl dyn Packet {
    /// Returns whether the concrete type of this packet is `T`.
    pub fn is<T: Packet>(&self) -> bool {
        self.as_any().is::<T>()
    }

    pub fn downcast_ref<T: Packet>(&self) -> Option<&T> {
        self.as_any().downcast_ref::<T>()
    }

    /// Converts a boxed packet into its concrete type.
    pub fn downcast<T: Packet>(self: Box<Self>) -> Option<Box<T>> {
        self.into_any().downcast::<T>().ok()
    }
}

/// Reads a big-endian `u16`, failing instead of panicking on short input.
pub fn read_u16(buf: &mut Bytes) -> Result<u16, ProtocolError> {
    ensure_remaining(buf, 2)?;
    Ok(buf.get_u16())
}

pub fn read_u32(buf: &mut Bytes) -> Result<u32, ProtocolError> {
    ensure_remaining(buf, 4)?;
    Ok(buf.get_u32())
}

/// Reads a `u16`-length-prefixed UTF-8 string.
pub fn read_string(buf: &mut Bytes) -> Result<String, ProtocolError> {
    let len = read_u16(buf)? as usize;
    ensure_remaining(buf, len)?;
    let raw = buf.split_to(len);
    String::from_utf8(raw.to_vec())
        .map_err(|_| ProtocolError::InvalidPayload("invalid UTF-8 in string field".to_string()))
}

/// Writes a `u16`-length-prefixed UTF-8 string.
pub fn write_string(buf: &mut BytesMut, value: &str) -> Result<(), ProtocolError> {
    let len = u16::try_from(value.len()).map_err(|_| {
        ProtocolError::InvalidPayload(format!("string field too long: {} bytes", value.len()))
    })?;
    buf.put_u16(len);
    buf.put_slice(value.as_bytes());
    Ok(())
}

fn ensure_remaining(buf: &Bytes, needed: usize) -> Result<(), ProtocolError> {
    if buf.remaining() < needed {
        return Err(ProtocolError::InvalidPayload(format!(
            "payload truncated: need {} bytes, have {}",
            needed,
            buf.remaining()
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packets::{ErrorPacket, HandshakePacket};

    #[test]
    fn test_downcast_boxed_packet() {
        let packet: Box<dyn Packet> = Box::new(HandshakePacket);
        assert!(packet.is::<HandshakePacket>());
        assert!(!packet.is::<ErrorPacket>());
        assert!(packet.downcast_ref::<ErrorPacket>().is_none());

        let concrete = packet.downcast::<HandshakePacket>();
        assert!(concrete.is_some());
    }

    #[test]
    fn test_downcast_wrong_type() {
        let packet: Box<dyn Packet> = Box::new(HandshakePacket);
        assert!(packet.downcast::<ErrorPacket>().is_none());
    }

    #[test]
    fn test_type_name_is_concrete() {
        let packet: Box<dyn Packet> = Box::new(HandshakePacket);
        assert!(packet.type_name().ends_with("HandshakePacket"));
    }

    #[test]
    fn test_string_helpers() {
        let mut buf = BytesMut::new();
        write_string(&mut buf, "hello").unwrap();
        assert_eq!(&buf[..], b"\x00\x05hello");

        let mut bytes = buf.freeze();
        assert_eq!(read_string(&mut bytes).unwrap(), "hello");
        assert!(bytes.is_empty());
    }

    #[test]
    fn test_truncated_reads_fail() {
        let mut bytes = Bytes::from_static(b"\x00");
        assert!(matches!(
            read_u16(&mut bytes),
            Err(ProtocolError::InvalidPayload(_))
        ));

        // Length prefix claims more than is present
        let mut bytes = Bytes::from_static(b"\x00\x09abc");
        assert!(matches!(
            read_string(&mut bytes),
            Err(ProtocolError::InvalidPayload(_))
        ));

        let mut bytes = Bytes::from_static(b"\x00\x00\x01");
        assert!(read_u32(&mut bytes).is_err());
    }

    #[test]
    fn test_invalid_utf8() {
        let mut bytes = Bytes::from_static(b"\x00\x02\xff\xfe");
        assert!(read_string(&mut bytes).is_err());
    }
}
