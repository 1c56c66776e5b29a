//! The save byte pipeline.
//!
//! Sealing runs compress → checksum → encrypt; opening runs
//! decrypt → verify checksum → decompress. The checksum always covers the
//! compressed, pre-encryption bytes.

pub mod compression;
pub mod encryption;

pub use encryption::{checksum, verify_checksum, EncryptionCodec};

use serde_json::Value;
use tracing::debug;

use crate::error::{Error, Result};
use crate::model::{BackupRecord, ChecksumInfo, CompressionInfo, EncryptionInfo, SaveRecord};

/// Output of [`PayloadCodec::seal`].
#[derive(Debug, Clone)]
pub struct SealedPayload {
    pub bytes: Vec<u8>,
    pub checksum: ChecksumInfo,
    pub compression: CompressionInfo,
    pub encryption: EncryptionInfo,
}

/// Descriptors needed to open a stored blob.
#[derive(Debug, Clone, Copy)]
pub struct SealedRef<'a> {
    pub bytes: &'a [u8],
    pub checksum: &'a ChecksumInfo,
    pub compression: &'a CompressionInfo,
    pub encryption: &'a EncryptionInfo,
}

/// Compression plus encryption under one key.
#[derive(Debug)]
pub struct PayloadCodec {
    encryption: EncryptionCodec,
}

impl PayloadCodec {
    #[must_use]
    pub fn new(encryption: EncryptionCodec) -> Self {
        Self { encryption }
    }

    /// Access the underlying cipher (device key derivation).
    #[must_use]
    pub fn encryption(&self) -> &EncryptionCodec {
        &self.encryption
    }

    /// Compress, checksum and encrypt a payload.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization, compression or encryption fails.
    pub fn seal(&self, payload: &Value) -> Result<SealedPayload> {
        let (compressed, compression) = compression::compress(payload)?;
        let checksum = ChecksumInfo {
            algorithm: encryption::SHA256.to_string(),
            value: encryption::checksum(&compressed),
        };
        let (bytes, encryption) = self.encryption.encrypt(&compressed)?;

        debug!(
            checksum = %checksum.value,
            stored_size = bytes.len(),
            "Sealed payload"
        );

        Ok(SealedPayload {
            bytes,
            checksum,
            compression,
            encryption,
        })
    }

    /// Decrypt, verify and decompress a stored blob.
    ///
    /// # Errors
    ///
    /// Returns `Integrity` when authentication or the checksum fails, and
    /// `UnsupportedFormat` for unknown algorithms.
    pub fn open(&self, sealed: SealedRef<'_>) -> Result<Value> {
        let compressed = self.encryption.decrypt(sealed.bytes, sealed.encryption)?;

        if sealed.checksum.algorithm != encryption::SHA256 {
            return Err(Error::UnsupportedFormat {
                kind: "checksum",
                algorithm: sealed.checksum.algorithm.clone(),
            });
        }
        if !encryption::verify_checksum(&compressed, &sealed.checksum.value) {
            return Err(Error::integrity("Checksum verification failed"));
        }

        compression::decompress(&compressed, sealed.compression)
    }
}

impl<'a> SealedRef<'a> {
    #[must_use]
    pub fn from_record(record: &'a SaveRecord) -> Self {
        Self {
            bytes: &record.payload,
            checksum: &record.checksum,
            compression: &record.compression,
            encryption: &record.encryption,
        }
    }

    #[must_use]
    pub fn from_backup(backup: &'a BackupRecord) -> Self {
        Self {
            bytes: &backup.payload,
            checksum: &backup.checksum,
            compression: &backup.compression,
            encryption: &backup.encryption,
        }
    }
}

impl SealedPayload {
    /// Borrow as a [`SealedRef`].
    #[must_use]
    pub fn borrowed(&self) -> SealedRef<'_> {
        SealedRef {
            bytes: &self.bytes,
            checksum: &self.checksum,
            compression: &self.compression,
            encryption: &self.encryption,
        }
    }
}
