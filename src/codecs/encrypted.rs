//! AES-256-GCM Codec using `aes-gcm`
//!
//! Versioned at-rest encryption for cache payloads.

use crate::traits::PayloadCodec;
use aes_gcm::aead::{Aead, AeadCore, KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use anyhow::{Result, anyhow, bail};

/// Format version written as the first byte of every payload
const FORMAT_V1: u8 = 0x01;
/// GCM nonce length in bytes
const NONCE_LEN: usize = 12;

/// Encrypts payloads with AES-256-GCM
///
/// # Format
///
/// ```text
/// [version: 1 byte = 0x01][nonce: 12 bytes][ciphertext + tag]
/// ```
///
/// Payloads with an unknown version byte are rejected on decode, so a future
/// scheme can be introduced by bumping the version.
#[cfg_attr(docsrs, doc(cfg(feature = "encryption")))]
#[derive(Clone)]
pub struct AesGcmCodec {
    cipher: Aes256Gcm,
}

impl AesGcmCodec {
    /// Create a codec from a 32-byte key
    #[must_use]
    pub fn new(key: &[u8; 32]) -> Self {
        Self {
            cipher: Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key)),
        }
    }

    /// Create a codec from a hex-encoded 32-byte key
    ///
    /// # Errors
    ///
    /// Returns an error if the string is not 64 hex characters.
    pub fn from_hex(key_hex: &str) -> Result<Self> {
        let bytes = hex::decode(key_hex.trim())?;
        let key: [u8; 32] = bytes
            .try_into()
            .map_err(|_| anyhow!("encryption key must be exactly 32 bytes"))?;
        Ok(Self::new(&key))
    }
}

impl std::fmt::Debug for AesGcmCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AesGcmCodec").finish_non_exhaustive()
    }
}

impl PayloadCodec for AesGcmCodec {
    fn encode(&self, plain: &[u8]) -> Result<Vec<u8>> {
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ciphertext = self
            .cipher
            .encrypt(&nonce, plain)
            .map_err(|_| anyhow!("payload encryption failed"))?;

        let mut out = Vec::with_capacity(1 + NONCE_LEN + ciphertext.len());
        out.push(FORMAT_V1);
        out.extend_from_slice(&nonce);
        out.extend_from_slice(&ciphertext);
        Ok(out)
    }

    fn decode(&self, stored: &[u8]) -> Result<Vec<u8>> {
        let Some((&version, rest)) = stored.split_first() else {
            bail!("empty encrypted payload");
        };
        if version != FORMAT_V1 {
            bail!("unsupported payload format version {version:#04x}");
        }
        if rest.len() < NONCE_LEN {
            bail!("encrypted payload truncated");
        }
        let (nonce, ciphertext) = rest.split_at(NONCE_LEN);
        self.cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| anyhow!("payload decryption failed (wrong key or corrupted data)"))
    }

    fn name(&self) -> &'static str {
        "aes-256-gcm"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encrypted_payload_is_versioned_and_opaque() {
        let codec = AesGcmCodec::new(&[7u8; 32]);
        let stored = codec.encode(br#"{"data":"secret"}"#).unwrap();

        assert_eq!(stored.first(), Some(&FORMAT_V1));
        assert!(!stored.windows(6).any(|w| w == b"secret"));
        assert_eq!(codec.decode(&stored).unwrap(), br#"{"data":"secret"}"#.to_vec());
    }

    #[test]
    fn test_wrong_key_and_unknown_version_fail() {
        let stored = AesGcmCodec::new(&[1u8; 32]).encode(b"payload").unwrap();
        assert!(AesGcmCodec::new(&[2u8; 32]).decode(&stored).is_err());

        let mut bumped = stored;
        if let Some(v) = bumped.first_mut() {
            *v = 0x02;
        }
        assert!(AesGcmCodec::new(&[1u8; 32]).decode(&bumped).is_err());
    }

    #[test]
    fn test_from_hex_rejects_short_keys() {
        assert!(AesGcmCodec::from_hex("abcd").is_err());
        assert!(AesGcmCodec::from_hex(&"ab".repeat(32)).is_ok());
    }
}
