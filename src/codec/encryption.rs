//! Authenticated encryption, checksums and device keys.
//!
//! Encryption is AES-256-GCM with a fresh 96-bit nonce per call. Nonce and
//! tag are stored base64-encoded next to the ciphertext. Any authentication
//! failure surfaces as `Error::Integrity`; a wrong key never yields garbage.

use aes_gcm::aead::{AeadCore, AeadInPlace, KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, Key, Nonce, Tag};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use hmac::{Hmac, Mac};
use rand::RngCore;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use tracing::warn;

use crate::error::{Error, Result};
use crate::model::EncryptionInfo;

pub const AES_256_GCM: &str = "aes-256-gcm";
pub const SHA256: &str = "sha256";

const KEY_LEN: usize = 32;
const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;

type HmacSha256 = Hmac<Sha256>;

/// Lowercase hex SHA-256 of `data`.
#[must_use]
pub fn checksum(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    format!("{:x}", hasher.finalize())
}

/// Constant-time comparison of `checksum(data)` against `expected`.
#[must_use]
pub fn verify_checksum(data: &[u8], expected: &str) -> bool {
    let actual = checksum(data);
    actual.as_bytes().ct_eq(expected.as_bytes()).into()
}

/// AES-256-GCM cipher bound to one master key.
pub struct EncryptionCodec {
    cipher: Aes256Gcm,
    master_key: [u8; KEY_LEN],
}

impl std::fmt::Debug for EncryptionCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EncryptionCodec")
            .field("algorithm", &AES_256_GCM)
            .finish_non_exhaustive()
    }
}

impl EncryptionCodec {
    /// Build a codec from raw key bytes.
    #[must_use]
    pub fn new(master_key: [u8; KEY_LEN]) -> Self {
        Self {
            cipher: Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&master_key)),
            master_key,
        }
    }

    /// Parse a 64-character hex key.
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` if the key is not exactly 32 bytes of hex.
    pub fn from_hex(hex: &str) -> Result<Self> {
        let hex = hex.trim();
        if !hex.is_ascii() || hex.len() != KEY_LEN * 2 {
            return Err(Error::Config(format!(
                "Encryption key must be {} hex characters (32 bytes), got {}",
                KEY_LEN * 2,
                hex.len()
            )));
        }

        let mut key = [0u8; KEY_LEN];
        for (i, byte) in key.iter_mut().enumerate() {
            let pair = &hex[i * 2..i * 2 + 2];
            *byte = u8::from_str_radix(pair, 16).map_err(|_| {
                Error::Config(format!("Encryption key contains non-hex characters: {pair:?}"))
            })?;
        }
        Ok(Self::new(key))
    }

    /// Use the configured key, or generate an ephemeral one.
    ///
    /// An ephemeral key makes every save unreadable after restart, so this
    /// only suits development.
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` if a configured key is malformed.
    pub fn from_config(hex: Option<&str>) -> Result<Self> {
        match hex {
            Some(hex) if !hex.trim().is_empty() => Self::from_hex(hex),
            _ => {
                warn!(
                    "No encryption key configured (GSAVE_ENCRYPTION_KEY); using a random key. \
                     Saves will not be readable after restart."
                );
                Ok(Self::random())
            }
        }
    }

    /// A codec with a freshly generated key.
    #[must_use]
    pub fn random() -> Self {
        let mut key = [0u8; KEY_LEN];
        rand::rng().fill_bytes(&mut key);
        Self::new(key)
    }

    /// Encrypt `plaintext` under a fresh nonce.
    ///
    /// # Errors
    ///
    /// Returns `Error::Other` if the cipher rejects the input (length overflow).
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<(Vec<u8>, EncryptionInfo)> {
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let mut buffer = plaintext.to_vec();
        let tag = self
            .cipher
            .encrypt_in_place_detached(&nonce, b"", &mut buffer)
            .map_err(|_| Error::Other("Encryption failed".to_string()))?;

        let info = EncryptionInfo {
            algorithm: AES_256_GCM.to_string(),
            nonce: BASE64.encode(nonce),
            tag: BASE64.encode(tag),
        };
        Ok((buffer, info))
    }

    /// Decrypt and authenticate `ciphertext`.
    ///
    /// # Errors
    ///
    /// Returns `UnsupportedFormat` for an unknown algorithm and `Integrity`
    /// for a malformed nonce/tag or failed authentication.
    pub fn decrypt(&self, ciphertext: &[u8], info: &EncryptionInfo) -> Result<Vec<u8>> {
        if info.algorithm != AES_256_GCM {
            return Err(Error::UnsupportedFormat {
                kind: "encryption",
                algorithm: info.algorithm.clone(),
            });
        }

        let nonce = decode_fixed(&info.nonce, NONCE_LEN, "nonce")?;
        let tag = decode_fixed(&info.tag, TAG_LEN, "tag")?;

        let mut buffer = ciphertext.to_vec();
        self.cipher
            .decrypt_in_place_detached(
                Nonce::from_slice(&nonce),
                b"",
                &mut buffer,
                Tag::from_slice(&tag),
            )
            .map_err(|_| Error::integrity("integrity check failed"))?;
        Ok(buffer)
    }

    /// Per-device key: hex HMAC-SHA256 over `"<owner>:<device>"`.
    ///
    /// # Errors
    ///
    /// Never fails in practice; HMAC accepts keys of any length.
    pub fn derive_device_key(&self, owner_id: &str, device_id: &str) -> Result<String> {
        let mut mac = <HmacSha256 as Mac>::new_from_slice(&self.master_key)
            .map_err(|e| Error::Config(format!("Invalid HMAC key: {e}")))?;
        mac.update(owner_id.as_bytes());
        mac.update(b":");
        mac.update(device_id.as_bytes());
        Ok(format!("{:x}", mac.finalize().into_bytes()))
    }
}

fn decode_fixed(encoded: &str, len: usize, what: &str) -> Result<Vec<u8>> {
    let bytes = BASE64
        .decode(encoded)
        .map_err(|_| Error::integrity(format!("malformed {what}")))?;
    if bytes.len() != len {
        return Err(Error::integrity(format!(
            "malformed {what}: expected {len} bytes, got {}",
            bytes.len()
        )));
    }
    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const KEY_HEX: &str = "000102030405060708090a0b0c0d0e0f101112131415161718191a1b1c1d1e1f";

    fn codec() -> EncryptionCodec {
        EncryptionCodec::from_hex(KEY_HEX).unwrap()
    }

    #[test]
    fn test_round_trip_edge_inputs() {
        let codec = codec();
        let large = vec![0xA5u8; 256 * 1024];
        let inputs: [&[u8]; 4] = [b"", b"x", "héros · 勇者 · 🗡".as_bytes(), &large];

        for input in inputs {
            let (ct, info) = codec.encrypt(input).unwrap();
            assert_eq!(codec.decrypt(&ct, &info).unwrap(), input);
        }
    }

    #[test]
    fn test_nonce_is_fresh_per_call() {
        let codec = codec();
        let (_, a) = codec.encrypt(b"same").unwrap();
        let (_, b) = codec.encrypt(b"same").unwrap();
        assert_ne!(a.nonce, b.nonce);
    }

    #[test]
    fn test_wrong_key_is_integrity_error() {
        let (ct, info) = codec().encrypt(b"secret").unwrap();
        let err = EncryptionCodec::random().decrypt(&ct, &info).unwrap_err();
        assert!(err.is_integrity());
        assert!(err.to_string().contains("integrity check failed"));
    }

    #[test]
    fn test_malformed_nonce_is_integrity_error() {
        let codec = codec();
        let (ct, mut info) = codec.encrypt(b"secret").unwrap();
        info.nonce = BASE64.encode([0u8; 4]);
        assert!(codec.decrypt(&ct, &info).unwrap_err().is_integrity());
    }

    #[test]
    fn test_unknown_algorithm_is_unsupported() {
        let codec = codec();
        let (ct, mut info) = codec.encrypt(b"secret").unwrap();
        info.algorithm = "chacha20".to_string();
        assert!(matches!(
            codec.decrypt(&ct, &info).unwrap_err(),
            Error::UnsupportedFormat { kind: "encryption", .. }
        ));
    }

    #[test]
    fn test_key_length_is_enforced() {
        let err = EncryptionCodec::from_hex("abcd").unwrap_err();
        assert!(matches!(err, Error::Config(_)));

        let bad_hex = "zz".repeat(32);
        assert!(EncryptionCodec::from_hex(&bad_hex).is_err());
    }

    #[test]
    fn test_missing_key_falls_back_to_random() {
        assert!(EncryptionCodec::from_config(None).is_ok());
        assert!(EncryptionCodec::from_config(Some("  ")).is_ok());
        assert!(EncryptionCodec::from_config(Some("short")).is_err());
    }

    #[test]
    fn test_checksum_is_lowercase_sha256() {
        assert_eq!(
            checksum(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_device_key_is_stable_and_scoped() {
        let codec = codec();
        let a = codec.derive_device_key("p1", "deck").unwrap();
        assert_eq!(a, codec.derive_device_key("p1", "deck").unwrap());
        assert_ne!(a, codec.derive_device_key("p1", "phone").unwrap());
        assert_eq!(a.len(), 64);
    }

    proptest! {
        #[test]
        fn prop_any_bit_flip_fails_authentication(
            data in proptest::collection::vec(any::<u8>(), 1..512),
            index in any::<prop::sample::Index>(),
            bit in 0u8..8,
        ) {
            let codec = codec();
            let (mut ct, info) = codec.encrypt(&data).unwrap();
            let i = index.index(ct.len());
            ct[i] ^= 1 << bit;
            prop_assert!(codec.decrypt(&ct, &info).unwrap_err().is_integrity());
        }

        #[test]
        fn prop_checksum_detects_single_byte_change(
            data in proptest::collection::vec(any::<u8>(), 1..512),
            index in any::<prop::sample::Index>(),
            delta in 1u8..=255,
        ) {
            let expected = checksum(&data);
            prop_assert!(verify_checksum(&data, &expected));

            let mut changed = data.clone();
            let i = index.index(changed.len());
            changed[i] = changed[i].wrapping_add(delta);
            prop_assert!(!verify_checksum(&changed, &expected));
        }
    }
}
