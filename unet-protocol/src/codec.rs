//! Packet-level encoder and decoder.
//!
//! [`PacketCodec`] joins the frame envelope with the packet registry: it turns
//! a packet into a complete frame and a frame body back into a packet.
//! [`Decoder`] wraps it with a buffer for callers that read the transport in
//! arbitrary chunks.

use crate::config::ProtocolConfig;
use crate::error::ProtocolError;
use crate::frame::{Frame, Opened, LENGTH_PREFIX_SIZE};
use crate::packet::{Packet, PacketId, Serialization, PACKET_ID_SIZE};
use crate::registry::PacketRegistry;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::sync::Arc;

/// Result of decoding one frame.
#[derive(Debug)]
pub enum Received {
    /// A packet whose integrity hash matched, or that was not hashed.
    Packet(Box<dyn Packet>),
    /// The integrity hash did not match; the body was not dispatched.
    VerificationFailed,
}

impl Received {
    pub fn is_verified(&self) -> bool {
        matches!(self, Received::Packet(_))
    }

    pub fn packet(&self) -> Option<&dyn Packet> {
        match self {
            Received::Packet(packet) => Some(&**packet),
            Received::VerificationFailed => None,
        }
    }

    pub fn into_packet(self) -> Option<Box<dyn Packet>> {
        match self {
            Received::Packet(packet) => Some(packet),
            Received::VerificationFailed => None,
        }
    }
}

/// A packet encoded into a complete frame.
#[derive(Debug, Clone)]
pub struct EncodedPacket {
    pub id: PacketId,
    pub encrypted: bool,
    /// Frame bytes, length prefix included.
    pub bytes: BytesMut,
}

/// Encodes packets into frames and decodes frame bodies into packets.
#[derive(Debug, Clone)]
pub struct PacketCodec {
    registry: Arc<PacketRegistry>,
    config: ProtocolConfig,
}

impl PacketCodec {
    pub fn new(registry: Arc<PacketRegistry>, config: ProtocolConfig) -> Self {
        Self { registry, config }
    }

    pub fn registry(&self) -> &PacketRegistry {
        &self.registry
    }

    pub fn config(&self) -> &ProtocolConfig {
        &self.config
    }

    /// Serializes identifier and payload, routing on the packet's serialization
    /// capability.
    pub fn serialize_body(&self, packet: &dyn Packet) -> Result<(PacketId, Bytes), ProtocolError> {
        let id = self.registry.identifier_of(packet)?;
        let mut buf = BytesMut::new();

        match packet.serialization() {
            Serialization::PayloadOnly => {
                buf.put_u16(id);
                packet.serialize(&mut buf)?;
            }
            Serialization::SelfDescribing => {
                packet.serialize(&mut buf)?;
                let written =
                    (buf.len() >= PACKET_ID_SIZE).then(|| u16::from_be_bytes([buf[0], buf[1]]));
                if written != Some(id) {
                    return Err(ProtocolError::InvalidPayload(format!(
                        "{} wrote identifier {:?}, registered as {:#06x}",
                        packet.type_name(),
                        written,
                        id
                    )));
                }
            }
        }

        Ok((id, buf.freeze()))
    }

    /// Encodes a packet into a complete frame.
    pub fn encode(&self, packet: &dyn Packet) -> Result<EncodedPacket, ProtocolError> {
        let (id, body) = self.serialize_body(packet)?;
        let frame = Frame::seal(body, packet.is_encryptable(), &self.config)?;
        let bytes = frame.encode(self.config.max_frame_size())?;

        Ok(EncodedPacket {
            id,
            encrypted: frame.encrypted,
            bytes,
        })
    }

    /// Validates a length prefix before any body bytes are read.
    pub fn check_length(&self, length: u32) -> Result<usize, ProtocolError> {
        if (length as usize) < self.config.header_size() {
            return Err(ProtocolError::MalformedFrame(
                "length prefix smaller than frame header",
            ));
        }
        if length > self.config.max_frame_size() {
            return Err(ProtocolError::FrameTooLarge {
                size: length,
                max: self.config.max_frame_size(),
            });
        }
        Ok(length as usize)
    }

    /// Decodes everything that followed the length prefix into a packet.
    pub fn decode_body(&self, raw: Bytes) -> Result<Received, ProtocolError> {
        let frame = Frame::parse(raw, &self.config)?;

        let mut body = match frame.open(&self.config)? {
            Opened::Body(body) => body,
            Opened::VerificationFailed => {
                tracing::warn!("frame failed integrity verification");
                return Ok(Received::VerificationFailed);
            }
        };

        let id = body.get_u16();
        let mut packet = self.registry.instantiate(id).inspect_err(|_| {
            tracing::warn!(id, "received unknown packet identifier");
        })?;
        packet.deserialize(&mut body)?;

        tracing::trace!(id, packet = packet.type_name(), "decoded packet");
        Ok(Received::Packet(packet))
    }
}

/// Buffered decoder for callers that feed bytes as they arrive.
#[derive(Debug)]
pub struct Decoder {
    codec: PacketCodec,
    buffer: BytesMut,
}

impl Decoder {
    pub fn new(codec: PacketCodec) -> Self {
        Self {
            codec,
            buffer: BytesMut::with_capacity(8192),
        }
    }

    /// Appends data to the internal buffer.
    pub fn extend(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Attempts to decode the next packet from the buffer.
    ///
    /// Returns `Ok(None)` if more data is needed. A length prefix is validated
    /// as soon as its four bytes are buffered.
    pub fn decode_packet(&mut self) -> Result<Option<Received>, ProtocolError> {
        if self.buffer.len() < LENGTH_PREFIX_SIZE {
            return Ok(None);
        }

        let length = u32::from_be_bytes([
            self.buffer[0],
            self.buffer[1],
            self.buffer[2],
            self.buffer[3],
        ]);
        let length = self.codec.check_length(length)?;

        if self.buffer.len() < LENGTH_PREFIX_SIZE + length {
            return Ok(None);
        }

        self.buffer.advance(LENGTH_PREFIX_SIZE);
        let raw = self.buffer.split_to(length).freeze();
        self.codec.decode_body(raw).map(Some)
    }

    /// Returns the number of bytes currently buffered.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Clears the internal buffer.
    pub fn clear(&mut self) {
        self.buffer.clear();
    }
}
