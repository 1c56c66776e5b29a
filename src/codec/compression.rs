//! Payload serialization and compression.
//!
//! Payloads are serialized to canonical JSON (object keys sorted) and gzipped.
//! When gzip does not make the bytes strictly smaller the raw JSON is stored
//! with algorithm `none`, so `compressed_size <= original_size` always holds.

use std::io::{Read, Write};

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde_json::Value;
use tracing::debug;

use crate::error::{Error, Result};
use crate::model::CompressionInfo;

pub const GZIP: &str = "gzip";
pub const NONE: &str = "none";

/// Serialize `payload` canonically and compress it.
///
/// # Errors
///
/// Returns an error if serialization or the gzip writer fails.
pub fn compress(payload: &Value) -> Result<(Vec<u8>, CompressionInfo)> {
    let raw = canonical_json(payload)?;
    let original_size = raw.len();

    let mut encoder = GzEncoder::new(Vec::with_capacity(original_size / 2), Compression::default());
    encoder.write_all(&raw)?;
    let gzipped = encoder.finish()?;

    let (bytes, algorithm) = if gzipped.len() < original_size {
        (gzipped, GZIP)
    } else {
        (raw, NONE)
    };

    debug!(
        algorithm,
        original_size,
        compressed_size = bytes.len(),
        "Compressed payload"
    );

    let info = CompressionInfo {
        algorithm: algorithm.to_string(),
        original_size,
        compressed_size: bytes.len(),
    };
    Ok((bytes, info))
}

/// Reverse [`compress`], dispatching on the recorded algorithm.
///
/// # Errors
///
/// Returns `UnsupportedFormat` for an unknown algorithm and `Integrity` if
/// the stream is corrupt, does not match the recorded size, or does not
/// decode to JSON.
pub fn decompress(bytes: &[u8], info: &CompressionInfo) -> Result<Value> {
    let raw = match info.algorithm.as_str() {
        GZIP => {
            // The descriptor is outside the checksum, so its size is only a hint.
            let limit = u64::try_from(info.original_size)
                .unwrap_or(u64::MAX)
                .saturating_add(1);
            let mut out = Vec::with_capacity(info.original_size.min(bytes.len().saturating_mul(32)));
            GzDecoder::new(bytes)
                .take(limit)
                .read_to_end(&mut out)
                .map_err(|e| Error::integrity(format!("gzip stream is corrupt: {e}")))?;
            out
        }
        NONE => bytes.to_vec(),
        other => {
            return Err(Error::UnsupportedFormat {
                kind: "compression",
                algorithm: other.to_string(),
            });
        }
    };

    if raw.len() != info.original_size {
        return Err(Error::integrity(format!(
            "decompressed size {} does not match recorded size {}",
            raw.len(),
            info.original_size
        )));
    }

    serde_json::from_slice(&raw)
        .map_err(|e| Error::integrity(format!("decompressed payload is not valid JSON: {e}")))
}

/// Serialize with object keys in sorted order.
///
/// Relies on `serde_json` being built without `preserve_order`, which makes
/// `Map` a `BTreeMap` at every depth.
fn canonical_json(payload: &Value) -> Result<Vec<u8>> {
    Ok(serde_json::to_vec(payload)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn info(algorithm: &str) -> CompressionInfo {
        CompressionInfo {
            algorithm: algorithm.to_string(),
            original_size: 0,
            compressed_size: 0,
        }
    }

    #[test]
    fn test_repetitive_payload_is_gzipped() {
        let payload = json!({"world_state": {"tiles": vec!["grass"; 500]}});
        let (bytes, info) = compress(&payload).unwrap();

        assert_eq!(info.algorithm, GZIP);
        assert!(info.compressed_size < info.original_size);
        assert_eq!(decompress(&bytes, &info).unwrap(), payload);
    }

    #[test]
    fn test_tiny_payload_falls_back_to_none() {
        let payload = json!({"a": 1});
        let (bytes, info) = compress(&payload).unwrap();

        assert_eq!(info.algorithm, NONE);
        assert_eq!(info.compressed_size, info.original_size);
        assert_eq!(bytes, br#"{"a":1}"#);
    }

    #[test]
    fn test_keys_are_sorted() {
        let (a, _) = compress(&json!({"b": 1, "a": {"z": 1, "y": 2}})).unwrap();
        let (b, _) = compress(&json!({"a": {"y": 2, "z": 1}, "b": 1})).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_unknown_algorithm_is_rejected() {
        let err = decompress(b"{}", &info("lz4")).unwrap_err();
        assert!(matches!(
            err,
            Error::UnsupportedFormat { kind: "compression", .. }
        ));
    }

    #[test]
    fn test_corrupt_gzip_is_integrity_error() {
        let err = decompress(b"definitely not gzip", &info(GZIP)).unwrap_err();
        assert!(err.is_integrity());
    }

    #[test]
    fn test_tampered_original_size_is_integrity_error() {
        let payload = json!({"world_state": {"tiles": vec!["grass"; 500]}});
        let (bytes, mut info) = compress(&payload).unwrap();
        assert_eq!(info.algorithm, GZIP);

        info.original_size = usize::MAX;
        assert!(decompress(&bytes, &info).unwrap_err().is_integrity());

        info.original_size = 10;
        assert!(decompress(&bytes, &info).unwrap_err().is_integrity());
    }

    #[test]
    fn test_size_mismatch_on_raw_bytes() {
        let mut raw = info(NONE);
        raw.original_size = 3;
        assert!(decompress(br#"{"a":1}"#, &raw).unwrap_err().is_integrity());
    }
}
