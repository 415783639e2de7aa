//! # unet-protocol
//!
//! Framed packet protocol for unet.
//!
//! This crate provides:
//! - Length-prefixed binary framing over any ordered byte stream
//! - Optional 128-bit integrity hashes and pluggable body encryption
//! - A registry mapping 16-bit packet identifiers to packet factories
//! - An async packet processor and a single-writer/single-reader channel

pub mod channel;
pub mod codec;
pub mod config;
pub mod crypto;
pub mod error;
pub mod frame;
pub mod packet;
pub mod packets;
pub mod processor;
pub mod registry;

pub use channel::PacketChannel;
pub use codec::{Decoder, EncodedPacket, PacketCodec, Received};
pub use config::{ConfigError, ProtocolConfig, ProtocolSettings};
pub use crypto::{CryptoScheme, XChaChaScheme};
pub use error::{ErrorCode, ProtocolError};
pub use frame::{digest128, Frame, HASH_SIZE, LENGTH_PREFIX_SIZE};
pub use packet::{Packet, PacketId, Serialization};
pub use packets::{ErrorPacket, HandshakePacket, ERROR_ID, HANDSHAKE_ID};
pub use processor::{PacketProcessor, PacketSent};
pub use registry::{PacketFactory, PacketRegistry};

/// Default maximum value of the length prefix (16 MiB).
pub const DEFAULT_MAX_FRAME_SIZE: u32 = 16 * 1024 * 1024;

/// Upper bound accepted for a configured maximum frame size (256 MiB).
pub const MAX_FRAME_SIZE_LIMIT: u32 = 256 * 1024 * 1024;
