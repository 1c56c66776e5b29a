//! Save record model.
//!
//! A `SaveRecord` is one occupied slot: the encrypted, compressed payload
//! plus every descriptor needed to decode and verify it.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Generate a new save id (`save_` + 12 hex chars).
#[must_use]
pub fn new_save_id() -> String {
    format!("save_{}", &uuid::Uuid::new_v4().simple().to_string()[..12])
}

/// How a save was produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SaveKind {
    Auto,
    Manual,
    Quicksave,
}

impl SaveKind {
    /// Get the string representation for storage.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Auto => "auto",
            Self::Manual => "manual",
            Self::Quicksave => "quicksave",
        }
    }

    /// Parse from a stored string, defaulting to `Manual`.
    #[must_use]
    pub fn from_db(s: &str) -> Self {
        match s {
            "auto" => Self::Auto,
            "quicksave" => Self::Quicksave,
            _ => Self::Manual,
        }
    }
}

impl Default for SaveKind {
    fn default() -> Self {
        Self::Manual
    }
}

impl std::fmt::Display for SaveKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Relationship between the local copy of a save and the cloud copy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SyncStatus {
    /// Exists only on this device.
    LocalOnly,
    /// Exists only in the cloud.
    CloudOnly,
    Synced,
    LocalNewer,
    CloudNewer,
    /// Both sides changed within the concurrency threshold.
    Conflict,
}

impl SyncStatus {
    /// Get the string representation for storage.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::LocalOnly => "LOCAL_ONLY",
            Self::CloudOnly => "CLOUD_ONLY",
            Self::Synced => "SYNCED",
            Self::LocalNewer => "LOCAL_NEWER",
            Self::CloudNewer => "CLOUD_NEWER",
            Self::Conflict => "CONFLICT",
        }
    }

    /// Parse from a stored string.
    #[must_use]
    pub fn from_db(s: &str) -> Self {
        match s {
            "CLOUD_ONLY" => Self::CloudOnly,
            "SYNCED" => Self::Synced,
            "LOCAL_NEWER" => Self::LocalNewer,
            "CLOUD_NEWER" => Self::CloudNewer,
            "CONFLICT" => Self::Conflict,
            _ => Self::LocalOnly,
        }
    }
}

impl std::fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Digest over the compressed, pre-encryption bytes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChecksumInfo {
    pub algorithm: String,
    /// Lowercase hex digest.
    pub value: String,
}

/// Compression descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompressionInfo {
    pub algorithm: String,
    pub original_size: usize,
    pub compressed_size: usize,
}

impl CompressionInfo {
    /// Whether the stored bytes went through a real compressor.
    #[must_use]
    pub fn is_compressed(&self) -> bool {
        self.algorithm != "none"
    }
}

/// Encryption descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptionInfo {
    pub algorithm: String,
    /// Base64 nonce.
    pub nonce: String,
    /// Base64 authentication tag.
    pub tag: String,
}

/// Display metadata attached to a save.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SaveMetadata {
    #[serde(default)]
    pub display_name: String,
    /// Total playtime in seconds.
    #[serde(default)]
    pub playtime_secs: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub level: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chapter: Option<String>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub custom: Map<String, Value>,
}

/// A persisted save slot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SaveRecord {
    pub id: String,
    pub owner_id: String,
    pub slot_id: u32,
    pub slot_name: String,
    pub save_kind: SaveKind,
    pub schema_version: u32,
    /// Monotonic write counter.
    pub revision: i64,
    pub metadata: SaveMetadata,
    /// Encrypted, compressed payload.
    #[serde(skip)]
    pub payload: Vec<u8>,
    pub checksum: ChecksumInfo,
    pub compression: CompressionInfo,
    pub encryption: EncryptionInfo,
    pub sync_status: SyncStatus,
    pub last_modified_at: i64,
    pub last_synced_at: Option<i64>,
    pub device_id: Option<String>,
    pub platform: Option<String>,
    pub is_corrupted: bool,
    pub corruption_reason: Option<String>,
    pub load_count: i64,
    pub save_count: i64,
    pub created_at: i64,
}

impl SaveRecord {
    /// Short listing view of this record.
    #[must_use]
    pub fn summary(&self) -> SaveSummary {
        SaveSummary {
            id: self.id.clone(),
            slot_id: self.slot_id,
            slot_name: self.slot_name.clone(),
            save_kind: self.save_kind,
            revision: self.revision,
            schema_version: self.schema_version,
            checksum: self.checksum.value.clone(),
            last_modified_at: self.last_modified_at,
            playtime_secs: self.metadata.playtime_secs,
            is_compressed: self.compression.is_compressed(),
            is_encrypted: !self.encryption.algorithm.is_empty(),
            sync_status: self.sync_status,
            is_corrupted: self.is_corrupted,
        }
    }
}

/// Listing view of a save.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SaveSummary {
    pub id: String,
    pub slot_id: u32,
    pub slot_name: String,
    pub save_kind: SaveKind,
    pub revision: i64,
    pub schema_version: u32,
    pub checksum: String,
    pub last_modified_at: i64,
    pub playtime_secs: u64,
    pub is_compressed: bool,
    pub is_encrypted: bool,
    pub sync_status: SyncStatus,
    pub is_corrupted: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sync_status_db_round_trip() {
        for status in [
            SyncStatus::LocalOnly,
            SyncStatus::CloudOnly,
            SyncStatus::Synced,
            SyncStatus::LocalNewer,
            SyncStatus::CloudNewer,
            SyncStatus::Conflict,
        ] {
            assert_eq!(SyncStatus::from_db(status.as_str()), status);
        }
    }

    #[test]
    fn test_save_kind_defaults_to_manual() {
        assert_eq!(SaveKind::from_db("garbage"), SaveKind::Manual);
        assert_eq!(SaveKind::from_db("quicksave"), SaveKind::Quicksave);
    }
}
