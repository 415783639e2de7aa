//! Packet processor: moves one packet at a time over an async byte stream.
//!
//! Each call is independent. A receive goes through
//! `AwaitingLength -> AwaitingBody -> Decoding` and ends delivered, failed
//! verification, or with an error. The processor keeps no state between
//! calls beyond the transport's own read position, so callers must not run
//! two receives (or two sends) on the same transport at once; see
//! [`PacketChannel`](crate::channel::PacketChannel) for a wrapper that
//! enforces this.

use crate::codec::{Decoder, PacketCodec, Received};
use crate::config::ProtocolConfig;
use crate::error::ProtocolError;
use crate::frame::LENGTH_PREFIX_SIZE;
use crate::packet::{Packet, PacketId};
use crate::registry::PacketRegistry;
use bytes::BytesMut;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Record of a completed send.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketSent {
    pub id: PacketId,
    /// Bytes written to the transport, length prefix included.
    pub bytes: usize,
    pub encrypted: bool,
}

/// Serializes packets onto a transport and reads them back.
#[derive(Debug, Clone)]
pub struct PacketProcessor {
    codec: PacketCodec,
}

impl PacketProcessor {
    pub fn new(registry: PacketRegistry, config: ProtocolConfig) -> Self {
        Self::with_shared_registry(Arc::new(registry), config)
    }

    /// Builds a processor over a registry shared with other processors.
    pub fn with_shared_registry(registry: Arc<PacketRegistry>, config: ProtocolConfig) -> Self {
        tracing::debug!(
            packets = registry.len(),
            verify_integrity = config.verify_integrity(),
            encryption = config.crypto().is_some(),
            "packet processor created"
        );
        Self {
            codec: PacketCodec::new(registry, config),
        }
    }

    pub fn codec(&self) -> &PacketCodec {
        &self.codec
    }

    pub fn config(&self) -> &ProtocolConfig {
        self.codec.config()
    }

    /// Creates a buffered decoder sharing this processor's registry and config.
    pub fn decoder(&self) -> Decoder {
        Decoder::new(self.codec.clone())
    }

    /// Writes `packet` as a single frame.
    pub async fn send<W>(
        &self,
        packet: &dyn Packet,
        writer: &mut W,
    ) -> Result<PacketSent, ProtocolError>
    where
        W: AsyncWrite + Unpin + ?Sized,
    {
        let encoded = self.codec.encode(packet)?;

        writer.write_all(&encoded.bytes).await?;
        writer.flush().await?;

        let sent = PacketSent {
            id: encoded.id,
            bytes: encoded.bytes.len(),
            encrypted: encoded.encrypted,
        };
        tracing::debug!(
            id = sent.id,
            bytes = sent.bytes,
            encrypted = sent.encrypted,
            "packet sent"
        );
        Ok(sent)
    }

    /// Like [`send`](Self::send), invoking `on_sent` once the frame is written.
    pub async fn send_with<W, F>(
        &self,
        packet: &dyn Packet,
        writer: &mut W,
        on_sent: F,
    ) -> Result<PacketSent, ProtocolError>
    where
        W: AsyncWrite + Unpin + ?Sized,
        F: FnOnce(&PacketSent),
    {
        let sent = self.send(packet, writer).await?;
        on_sent(&sent);
        Ok(sent)
    }

    /// Reads exactly one frame and decodes it.
    ///
    /// End of stream at any point before the frame is complete is reported as
    /// [`ProtocolError::ConnectionClosed`].
    pub async fn receive<R>(&self, reader: &mut R) -> Result<Received, ProtocolError>
    where
        R: AsyncRead + Unpin + ?Sized,
    {
        let mut prefix = [0u8; LENGTH_PREFIX_SIZE];
        reader.read_exact(&mut prefix).await?;

        let length = u32::from_be_bytes(prefix);
        tracing::trace!(length, "read length prefix");
        let length = self.codec.check_length(length).inspect_err(|e| {
            tracing::warn!(length, error = %e, "rejected length prefix");
        })?;

        let mut body = BytesMut::zeroed(length);
        reader.read_exact(&mut body).await?;

        let received = self.codec.decode_body(body.freeze())?;
        if let Received::Packet(packet) = &received {
            tracing::debug!(
                bytes = LENGTH_PREFIX_SIZE + length,
                packet = packet.type_name(),
                "packet received"
            );
        }
        Ok(received)
    }
}
