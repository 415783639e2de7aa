//! Binary frame envelope.
//!
//! Frame layout (all integers big-endian):
//!
//! ```text
//! +-----------+--------------+------------------+----------------------+
//! | length    | encrypt_flag | integrity_hash   | body                 |
//! | 4 bytes   | 1 byte       | 16 bytes, only   | [id: u16][payload]   |
//! |           |              | when verifying   | possibly encrypted   |
//! +-----------+--------------+------------------+----------------------+
//! ```
//!
//! `length` counts every byte after itself. The hash covers the plaintext
//! body and is never encrypted.

use crate::config::ProtocolConfig;
use crate::error::ProtocolError;
use crate::packet::PACKET_ID_SIZE;
use bytes::{BufMut, Bytes, BytesMut};
use sha2::{Digest, Sha256};

/// Size of the length prefix.
pub const LENGTH_PREFIX_SIZE: usize = 4;

/// Size of the encrypt flag.
pub const HEADER_FLAG_SIZE: usize = 1;

/// Size of the integrity hash.
pub const HASH_SIZE: usize = 16;

/// Flag value for a plaintext body.
pub const FLAG_PLAINTEXT: u8 = 0;

/// Flag value for an encrypted body.
pub const FLAG_ENCRYPTED: u8 = 1;

/// 128-bit content digest: SHA-256 truncated to its first 16 bytes.
pub fn digest128(body: &[u8]) -> [u8; HASH_SIZE] {
    let full = Sha256::digest(body);
    let mut out = [0u8; HASH_SIZE];
    out.copy_from_slice(&full[..HASH_SIZE]);
    out
}

/// A frame as it travels on the wire, minus the length prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Whether `body` is ciphertext.
    pub encrypted: bool,
    /// Digest of the plaintext body, present when verification is on.
    pub hash: Option<[u8; HASH_SIZE]>,
    /// Body bytes as transmitted.
    pub body: Bytes,
}

/// Outcome of opening a frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Opened {
    /// Plaintext body whose digest matched (or was not checked).
    Body(Bytes),
    /// The digest did not match the decrypted body.
    VerificationFailed,
}

impl Frame {
    /// Wraps a plaintext body according to `config`.
    ///
    /// The body is encrypted only when the packet is encryptable and a crypto
    /// scheme is configured.
    pub fn seal(
        body: Bytes,
        encryptable: bool,
        config: &ProtocolConfig,
    ) -> Result<Self, ProtocolError> {
        let hash = config.verify_integrity().then(|| digest128(&body));

        let (encrypted, body) = match config.crypto() {
            Some(scheme) if encryptable => (true, Bytes::from(scheme.encrypt(&body)?)),
            _ => (false, body),
        };

        Ok(Self {
            encrypted,
            hash,
            body,
        })
    }

    /// Value of the length prefix for this frame.
    pub fn length(&self) -> usize {
        let hash_len = if self.hash.is_some() { HASH_SIZE } else { 0 };
        HEADER_FLAG_SIZE + hash_len + self.body.len()
    }

    /// Encodes the frame, length prefix included.
    pub fn encode(&self, max_frame_size: u32) -> Result<BytesMut, ProtocolError> {
        let length = self.length();
        let length = u32::try_from(length)
            .ok()
            .filter(|&len| len <= max_frame_size)
            .ok_or(ProtocolError::FrameTooLarge {
                size: length.min(u32::MAX as usize) as u32,
                max: max_frame_size,
            })?;

        let mut buf = BytesMut::with_capacity(LENGTH_PREFIX_SIZE + length as usize);

        // Length (4 bytes)
        buf.put_u32(length);

        // Encrypt flag (1 byte)
        buf.put_u8(if self.encrypted {
            FLAG_ENCRYPTED
        } else {
            FLAG_PLAINTEXT
        });

        // Integrity hash (16 bytes, optional)
        if let Some(hash) = &self.hash {
            buf.put_slice(hash);
        }

        // Body
        buf.put_slice(&self.body);

        Ok(buf)
    }

    /// Parses everything that followed the length prefix.
    ///
    /// Whether a hash is present is decided by `config`, not by the frame.
    pub fn parse(mut raw: Bytes, config: &ProtocolConfig) -> Result<Self, ProtocolError> {
        if raw.len() < config.header_size() {
            return Err(ProtocolError::MalformedFrame("frame shorter than its header"));
        }

        let encrypted = match raw[0] {
            FLAG_PLAINTEXT => false,
            FLAG_ENCRYPTED => true,
            _ => return Err(ProtocolError::MalformedFrame("invalid encrypt flag")),
        };

        let hash = if config.verify_integrity() {
            let mut hash = [0u8; HASH_SIZE];
            hash.copy_from_slice(&raw[HEADER_FLAG_SIZE..HEADER_FLAG_SIZE + HASH_SIZE]);
            Some(hash)
        } else {
            None
        };

        let body = raw.split_off(config.header_size());
        Ok(Self {
            encrypted,
            hash,
            body,
        })
    }

    /// Decrypts and verifies the body.
    ///
    /// An encrypted flag on a connection without a crypto scheme leaves the
    /// body as-is, matching what the sender could have produced. When the
    /// frame carries a hash, a body the scheme refuses to decrypt is reported
    /// as a verification failure; the full frame was consumed, so the stream
    /// stays aligned.
    pub fn open(self, config: &ProtocolConfig) -> Result<Opened, ProtocolError> {
        let body = match (self.encrypted, config.crypto()) {
            (true, Some(scheme)) => match scheme.decrypt(&self.body) {
                Ok(plaintext) => Bytes::from(plaintext),
                Err(e) if self.hash.is_some() => {
                    tracing::warn!(error = %e, "encrypted frame failed to decrypt");
                    return Ok(Opened::VerificationFailed);
                }
                Err(e) => return Err(e),
            },
            (true, None) => {
                tracing::warn!("encrypted frame received without a crypto scheme");
                self.body
            }
            (false, _) => self.body,
        };

        if let Some(expected) = self.hash {
            if digest128(&body) != expected {
                return Ok(Opened::VerificationFailed);
            }
        }

        if body.len() < PACKET_ID_SIZE {
            return Err(ProtocolError::MalformedFrame(
                "body shorter than packet identifier",
            ));
        }

        Ok(Opened::Body(body))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::{CryptoScheme, XChaChaScheme};
    use std::sync::Arc;

    /// Reversible XOR "cipher" so tests can inspect ciphertext deterministically.
    struct XorScheme(u8);

    impl CryptoScheme for XorScheme {
        fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>, ProtocolError> {
            Ok(plaintext.iter().map(|b| b ^ self.0).collect())
        }

        fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>, ProtocolError> {
            self.encrypt(ciphertext)
        }
    }

    fn raw_after_prefix(encoded: &BytesMut) -> Bytes {
        Bytes::copy_from_slice(&encoded[LENGTH_PREFIX_SIZE..])
    }

    #[test]
    fn test_plain_layout() {
        let config = ProtocolConfig::new();
        let frame = Frame::seal(Bytes::from_static(&[0x00, 0x01]), false, &config).unwrap();
        let encoded = frame.encode(config.max_frame_size()).unwrap();

        assert_eq!(&encoded[..], &[0, 0, 0, 3, 0, 0, 1]);
    }

    #[test]
    fn test_verified_layout() {
        let config = ProtocolConfig::new().with_verification(true);
        let body = Bytes::from_static(&[0x00, 0x05, 0xAA]);
        let frame = Frame::seal(body.clone(), false, &config).unwrap();
        let encoded = frame.encode(config.max_frame_size()).unwrap();

        assert_eq!(encoded.len(), 4 + 1 + 16 + 3);
        assert_eq!(&encoded[..4], &(1u32 + 16 + 3).to_be_bytes());
        assert_eq!(encoded[4], FLAG_PLAINTEXT);
        assert_eq!(&encoded[5..21], &digest128(&body));
        assert_eq!(&encoded[21..], &body[..]);
    }

    #[test]
    fn test_hash_covers_plaintext_and_is_not_encrypted() {
        let config = ProtocolConfig::new()
            .with_verification(true)
            .with_crypto(Arc::new(XorScheme(0x5A)));
        let body = Bytes::from_static(&[0x00, 0x07, 1, 2, 3]);
        let frame = Frame::seal(body.clone(), true, &config).unwrap();
        let encoded = frame.encode(config.max_frame_size()).unwrap();

        assert_eq!(encoded[4], FLAG_ENCRYPTED);
        assert_eq!(&encoded[5..21], &digest128(&body));
        let expected: Vec<u8> = body.iter().map(|b| b ^ 0x5A).collect();
        assert_eq!(&encoded[21..], &expected[..]);
    }

    #[test]
    fn test_encryption_gating() {
        let body = Bytes::from_static(&[0x00, 0x09]);

        // Encryptable but no scheme
        let config = ProtocolConfig::new();
        assert!(!Frame::seal(body.clone(), true, &config).unwrap().encrypted);

        // Scheme but not encryptable
        let config = ProtocolConfig::new().with_crypto(Arc::new(XorScheme(1)));
        assert!(!Frame::seal(body.clone(), false, &config).unwrap().encrypted);

        // Both
        assert!(Frame::seal(body, true, &config).unwrap().encrypted);
    }

    #[test]
    fn test_parse_open_roundtrip_all_modes() {
        let (scheme, _) = XChaChaScheme::generate();
        let scheme: Arc<dyn CryptoScheme> = Arc::new(scheme);
        let body = Bytes::from_static(b"\x00\x10payload");

        for verify in [false, true] {
            for crypto in [None, Some(scheme.clone())] {
                let mut config = ProtocolConfig::new().with_verification(verify);
                if let Some(scheme) = crypto {
                    config = config.with_crypto(scheme);
                }

                let frame = Frame::seal(body.clone(), true, &config).unwrap();
                let encoded = frame.encode(config.max_frame_size()).unwrap();
                let parsed = Frame::parse(raw_after_prefix(&encoded), &config).unwrap();
                assert_eq!(parsed, frame);
                assert_eq!(parsed.open(&config).unwrap(), Opened::Body(body.clone()));
            }
        }
    }

    #[test]
    fn test_decrypt_offset_without_verification() {
        // Regression: the body must start right after the flag when no hash is sent
        let config = ProtocolConfig::new().with_crypto(Arc::new(XorScheme(0xFF)));
        let body = Bytes::from_static(&[0x00, 0x03, 0x42]);
        let encoded = Frame::seal(body.clone(), true, &config)
            .unwrap()
            .encode(config.max_frame_size())
            .unwrap();

        assert_eq!(encoded.len(), 4 + 1 + 3);
        let opened = Frame::parse(raw_after_prefix(&encoded), &config)
            .unwrap()
            .open(&config)
            .unwrap();
        assert_eq!(opened, Opened::Body(body));
    }

    #[test]
    fn test_tampered_body_fails_verification() {
        let config = ProtocolConfig::new().with_verification(true);
        let frame = Frame::seal(Bytes::from_static(b"\x00\x01abc"), false, &config).unwrap();
        let mut encoded = frame.encode(config.max_frame_size()).unwrap();
        let last = encoded.len() - 1;
        encoded[last] ^= 0x01;

        let opened = Frame::parse(raw_after_prefix(&encoded), &config)
            .unwrap()
            .open(&config)
            .unwrap();
        assert_eq!(opened, Opened::VerificationFailed);
    }

    #[test]
    fn test_tampered_hash_fails_verification() {
        let config = ProtocolConfig::new().with_verification(true);
        let frame = Frame::seal(Bytes::from_static(b"\x00\x01"), false, &config).unwrap();
        let mut encoded = frame.encode(config.max_frame_size()).unwrap();
        encoded[10] ^= 0x80;

        let opened = Frame::parse(raw_after_prefix(&encoded), &config)
            .unwrap()
            .open(&config)
            .unwrap();
        assert_eq!(opened, Opened::VerificationFailed);
    }

    #[test]
    fn test_parse_too_short() {
        let config = ProtocolConfig::new().with_verification(true);
        let result = Frame::parse(Bytes::from_static(&[0u8; 5]), &config);
        assert!(matches!(result, Err(ProtocolError::MalformedFrame(_))));

        let result = Frame::parse(Bytes::new(), &ProtocolConfig::new());
        assert!(matches!(result, Err(ProtocolError::MalformedFrame(_))));
    }

    #[test]
    fn test_parse_invalid_flag() {
        let result = Frame::parse(Bytes::from_static(&[7, 0, 1]), &ProtocolConfig::new());
        assert!(matches!(result, Err(ProtocolError::MalformedFrame(_))));
    }

    #[test]
    fn test_body_without_identifier() {
        let config = ProtocolConfig::new();
        let frame = Frame::parse(Bytes::from_static(&[0, 0x01]), &config).unwrap();
        assert!(matches!(
            frame.open(&config),
            Err(ProtocolError::MalformedFrame(_))
        ));
    }

    #[test]
    fn test_encrypted_flag_without_scheme_is_plaintext() {
        let config = ProtocolConfig::new();
        let frame = Frame::parse(Bytes::from_static(&[1, 0x00, 0x02]), &config).unwrap();
        assert!(frame.encrypted);
        assert_eq!(
            frame.open(&config).unwrap(),
            Opened::Body(Bytes::from_static(&[0x00, 0x02]))
        );
    }

    #[test]
    fn test_frame_too_large() {
        let config = ProtocolConfig::new().with_max_frame_size(64);
        let frame = Frame::seal(Bytes::from(vec![0u8; 64]), false, &config).unwrap();
        let result = frame.encode(config.max_frame_size());
        assert!(matches!(
            result,
            Err(ProtocolError::FrameTooLarge { size: 65, max: 64 })
        ));
    }

    #[test]
    fn test_tampered_ciphertext_fails_verification() {
        let (scheme, _) = XChaChaScheme::generate();
        let config = ProtocolConfig::new()
            .with_verification(true)
            .with_crypto(Arc::new(scheme));

        let mut encoded = Frame::seal(Bytes::from_static(b"\x00\x01abc"), true, &config)
            .unwrap()
            .encode(config.max_frame_size())
            .unwrap();
        let last = encoded.len() - 1;
        encoded[last] ^= 0x01;

        let opened = Frame::parse(raw_after_prefix(&encoded), &config)
            .unwrap()
            .open(&config)
            .unwrap();
        assert_eq!(opened, Opened::VerificationFailed);
    }

    #[test]
    fn test_decrypt_failure_without_verification_propagates() {
        let (sender, _) = XChaChaScheme::generate();
        let (receiver, _) = XChaChaScheme::generate();
        let send_config = ProtocolConfig::new().with_crypto(Arc::new(sender));
        let recv_config = ProtocolConfig::new().with_crypto(Arc::new(receiver));

        let encoded = Frame::seal(Bytes::from_static(b"\x00\x01"), true, &send_config)
            .unwrap()
            .encode(send_config.max_frame_size())
            .unwrap();
        let frame = Frame::parse(raw_after_prefix(&encoded), &recv_config).unwrap();
        assert!(matches!(
            frame.open(&recv_config),
            Err(ProtocolError::Crypto(_))
        ));
    }

    #[test]
    fn test_digest_is_stable() {
        assert_eq!(digest128(b"abc"), digest128(b"abc"));
        assert_ne!(digest128(b"abc"), digest128(b"abd"));
        // First 16 bytes of SHA-256("")
        assert_eq!(
            digest128(b""),
            [
                0xe3, 0xb0, 0xc4, 0x42, 0x98, 0xfc, 0x1c, 0x14, 0x9a, 0xfb, 0xf4, 0xc8, 0x99, 0x6f,
                0xb9, 0x24
            ]
        );
    }
}
