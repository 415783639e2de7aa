//! Encryption capability consumed by the frame codec.
//!
//! The codec only needs `encrypt(bytes) -> bytes` and `decrypt(bytes) -> bytes`;
//! any scheme can be plugged in through [`CryptoScheme`]. [`XChaChaScheme`] is
//! provided as a ready-to-use authenticated scheme.

use crate::error::ProtocolError;
use chacha20poly1305::{
    aead::{Aead, KeyInit},
    Key, XChaCha20Poly1305, XNonce,
};
use rand::RngCore;
use std::fmt;

/// Symmetric encryption applied to frame bodies of encryptable packets.
pub trait CryptoScheme: Send + Sync {
    fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>, ProtocolError>;
    fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>, ProtocolError>;
}

/// Nonce size for XChaCha20-Poly1305.
pub const NONCE_SIZE: usize = 24;

/// Authentication tag size.
pub const TAG_SIZE: usize = 16;

/// Key size.
pub const KEY_SIZE: usize = 32;

/// XChaCha20-Poly1305 with a random nonce per message.
///
/// Output layout is `nonce (24) || ciphertext || tag (16)`.
pub struct XChaChaScheme {
    cipher: XChaCha20Poly1305,
}

impl XChaChaScheme {
    pub fn new(key: &[u8; KEY_SIZE]) -> Self {
        Self {
            cipher: XChaCha20Poly1305::new(Key::from_slice(key)),
        }
    }

    /// Creates a scheme with a freshly generated key, returning the key so it
    /// can be shared with the peer.
    pub fn generate() -> (Self, [u8; KEY_SIZE]) {
        let mut key = [0u8; KEY_SIZE];
        rand::thread_rng().fill_bytes(&mut key);
        (Self::new(&key), key)
    }
}

impl fmt::Debug for XChaChaScheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("XChaChaScheme").finish_non_exhaustive()
    }
}

impl CryptoScheme for XChaChaScheme {
    fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>, ProtocolError> {
        let mut nonce = [0u8; NONCE_SIZE];
        rand::thread_rng().fill_bytes(&mut nonce);

        let ciphertext = self
            .cipher
            .encrypt(XNonce::from_slice(&nonce), plaintext)
            .map_err(|e| ProtocolError::Crypto(format!("encrypt: {e}")))?;

        let mut out = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
        out.extend_from_slice(&nonce);
        out.extend_from_slice(&ciphertext);
        Ok(out)
    }

    fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>, ProtocolError> {
        if ciphertext.len() < NONCE_SIZE + TAG_SIZE {
            return Err(ProtocolError::Crypto(format!(
                "ciphertext too short: {} bytes",
                ciphertext.len()
            )));
        }

        let (nonce, sealed) = ciphertext.split_at(NONCE_SIZE);
        self.cipher
            .decrypt(XNonce::from_slice(nonce), sealed)
            .map_err(|_| ProtocolError::Crypto("authentication failed".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encrypt_decrypt() {
        let (scheme, _) = XChaChaScheme::generate();
        let sealed = scheme.encrypt(b"hello world").unwrap();
        assert_eq!(sealed.len(), NONCE_SIZE + 11 + TAG_SIZE);

        let opened = scheme.decrypt(&sealed).unwrap();
        assert_eq!(opened, b"hello world");
    }

    #[test]
    fn test_nonce_differs_per_message() {
        let scheme = XChaChaScheme::new(&[7u8; KEY_SIZE]);
        let a = scheme.encrypt(b"same").unwrap();
        let b = scheme.encrypt(b"same").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_wrong_key_fails() {
        let sender = XChaChaScheme::new(&[1u8; KEY_SIZE]);
        let receiver = XChaChaScheme::new(&[2u8; KEY_SIZE]);
        let sealed = sender.encrypt(b"secret").unwrap();
        assert!(matches!(
            receiver.decrypt(&sealed),
            Err(ProtocolError::Crypto(_))
        ));
    }

    #[test]
    fn test_tampered_ciphertext_fails() {
        let scheme = XChaChaScheme::new(&[3u8; KEY_SIZE]);
        let mut sealed = scheme.encrypt(b"payload").unwrap();
        let last = sealed.len() - 1;
        sealed[last] ^= 0x01;
        assert!(scheme.decrypt(&sealed).is_err());
    }

    #[test]
    fn test_short_ciphertext_rejected() {
        let scheme = XChaChaScheme::new(&[4u8; KEY_SIZE]);
        assert!(scheme.decrypt(&[0u8; NONCE_SIZE]).is_err());
    }

    #[test]
    fn test_empty_plaintext() {
        let scheme = XChaChaScheme::new(&[5u8; KEY_SIZE]);
        let sealed = scheme.encrypt(&[]).unwrap();
        assert!(scheme.decrypt(&sealed).unwrap().is_empty());
    }
}
