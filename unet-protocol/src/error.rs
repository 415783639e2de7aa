//! Protocol error types and error codes.

use crate::packet::PacketId;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io;
use thiserror::Error;

/// Errors raised while building a registry or moving frames over a transport.
///
/// A failed integrity check is not an error: it is reported as
/// [`Received::VerificationFailed`](crate::codec::Received) so the caller can
/// decide what to do with the connection.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("duplicate packet identifier: {0:#06x}")]
    DuplicateIdentifier(PacketId),

    #[error("packet type {type_name} already registered as {existing:#06x}")]
    DuplicateType {
        type_name: &'static str,
        existing: PacketId,
    },

    #[error("packet type not registered: {0}")]
    UnregisteredType(&'static str),

    #[error("unknown packet identifier: {0:#06x}")]
    UnknownIdentifier(PacketId),

    #[error("malformed frame: {0}")]
    MalformedFrame(&'static str),

    #[error("frame too large: {size} bytes (max {max})")]
    FrameTooLarge { size: u32, max: u32 },

    #[error("invalid packet payload: {0}")]
    InvalidPayload(String),

    #[error("crypto error: {0}")]
    Crypto(String),

    #[error("connection closed")]
    ConnectionClosed,

    #[error("I/O error: {0}")]
    Io(io::Error),
}

impl ProtocolError {
    /// Returns whether the connection that produced this error must be dropped.
    ///
    /// Every wire-level failure is fatal by policy: a peer that sends an
    /// unknown identifier, a bad payload or an undecryptable body is not
    /// trusted further. Framing errors (`MalformedFrame`, `FrameTooLarge`) and
    /// transport errors additionally leave the stream position unknown.
    /// Errors found after a whole frame was read leave the stream aligned.
    /// Only setup errors leave the transport usable.
    pub fn is_connection_fatal(&self) -> bool {
        !matches!(
            self,
            ProtocolError::DuplicateIdentifier(_)
                | ProtocolError::DuplicateType { .. }
                | ProtocolError::UnregisteredType(_)
        )
    }

    /// Maps this error to the code reported to a peer in an error packet.
    pub fn error_code(&self) -> ErrorCode {
        match self {
            ProtocolError::UnknownIdentifier(_) => ErrorCode::UnknownPacket,
            ProtocolError::MalformedFrame(_) | ProtocolError::InvalidPayload(_) => {
                ErrorCode::MalformedFrame
            }
            ProtocolError::FrameTooLarge { .. } => ErrorCode::FrameTooLarge,
            ProtocolError::Crypto(_) => ErrorCode::DecryptionFailed,
            _ => ErrorCode::InternalError,
        }
    }
}

impl From<io::Error> for ProtocolError {
    fn from(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::UnexpectedEof
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::BrokenPipe
            | io::ErrorKind::NotConnected => ProtocolError::ConnectionClosed,
            _ => ProtocolError::Io(err),
        }
    }
}

/// Stable error codes carried by the built-in error packet.
///
/// The numeric values are part of the wire contract and must not change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // Protocol errors
    UnknownPacket,
    MalformedFrame,
    FrameTooLarge,
    VerificationFailed,
    DecryptionFailed,

    // Session errors
    HandshakeFailed,
    Unauthorized,

    // System errors
    InternalError,
    RateLimited,
}

impl ErrorCode {
    /// Returns whether the peer may retry after receiving this error.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ErrorCode::VerificationFailed | ErrorCode::RateLimited | ErrorCode::InternalError
        )
    }

    /// Wire value of this code.
    pub fn as_u16(&self) -> u16 {
        match self {
            ErrorCode::UnknownPacket => 1,
            ErrorCode::MalformedFrame => 2,
            ErrorCode::FrameTooLarge => 3,
            ErrorCode::VerificationFailed => 4,
            ErrorCode::DecryptionFailed => 5,
            ErrorCode::HandshakeFailed => 16,
            ErrorCode::Unauthorized => 17,
            ErrorCode::InternalError => 32,
            ErrorCode::RateLimited => 33,
        }
    }

    /// Parses a wire value, returning `None` for codes this build does not know.
    pub fn from_u16(value: u16) -> Option<Self> {
        let code = match value {
            1 => ErrorCode::UnknownPacket,
            2 => ErrorCode::MalformedFrame,
            3 => ErrorCode::FrameTooLarge,
            4 => ErrorCode::VerificationFailed,
            5 => ErrorCode::DecryptionFailed,
            16 => ErrorCode::HandshakeFailed,
            17 => ErrorCode::Unauthorized,
            32 => ErrorCode::InternalError,
            33 => ErrorCode::RateLimited,
            _ => return None,
        };
        Some(code)
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorCode::UnknownPacket => write!(f, "UNKNOWN_PACKET"),
            ErrorCode::MalformedFrame => write!(f, "MALFORMED_FRAME"),
            ErrorCode::FrameTooLarge => write!(f, "FRAME_TOO_LARGE"),
            ErrorCode::VerificationFailed => write!(f, "VERIFICATION_FAILED"),
            ErrorCode::DecryptionFailed => write!(f, "DECRYPTION_FAILED"),
            ErrorCode::HandshakeFailed => write!(f, "HANDSHAKE_FAILED"),
            ErrorCode::Unauthorized => write!(f, "UNAUTHORIZED"),
            ErrorCode::InternalError => write!(f, "INTERNAL_ERROR"),
            ErrorCode::RateLimited => write!(f, "RATE_LIMITED"),
        }
    }
}
