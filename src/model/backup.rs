//! Backup model.
//!
//! Backups are immutable snapshots of a save's encrypted blob. They carry
//! their own copy of every descriptor so a backup can be restored even after
//! the source record is gone.

use serde::{Deserialize, Serialize};

use super::record::{ChecksumInfo, CompressionInfo, EncryptionInfo, SaveMetadata};

/// Generate a new backup id (`bkp_` + 12 hex chars).
#[must_use]
pub fn new_backup_id() -> String {
    format!("bkp_{}", &uuid::Uuid::new_v4().simple().to_string()[..12])
}

/// Why a backup was taken. Drives the retention window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackupReason {
    Scheduled,
    PreUpdate,
    Manual,
    Conflict,
    CorruptionDetected,
}

impl BackupReason {
    /// Get the string representation for storage.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Scheduled => "scheduled",
            Self::PreUpdate => "pre_update",
            Self::Manual => "manual",
            Self::Conflict => "conflict",
            Self::CorruptionDetected => "corruption_detected",
        }
    }

    /// Parse from a stored string.
    #[must_use]
    pub fn from_db(s: &str) -> Self {
        match s {
            "pre_update" => Self::PreUpdate,
            "manual" => Self::Manual,
            "conflict" => Self::Conflict,
            "corruption_detected" => Self::CorruptionDetected,
            _ => Self::Scheduled,
        }
    }
}

impl std::fmt::Display for BackupReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A stored backup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupRecord {
    pub id: String,
    /// Save the snapshot was taken from (may no longer exist).
    pub save_id: String,
    pub owner_id: String,
    pub slot_id: u32,
    pub slot_name: String,
    pub revision: i64,
    pub reason: BackupReason,
    #[serde(skip)]
    pub payload: Vec<u8>,
    /// SHA-256 over `payload` as stored, verified before restore.
    pub backup_checksum: String,
    /// The source record's payload checksum (over compressed bytes).
    pub checksum: ChecksumInfo,
    pub compression: CompressionInfo,
    pub encryption: EncryptionInfo,
    pub schema_version: u32,
    pub metadata: SaveMetadata,
    pub data_size: usize,
    pub created_at: i64,
    pub expires_at: i64,
}

impl BackupRecord {
    /// Listing view without the blob.
    #[must_use]
    pub fn info(&self) -> BackupInfo {
        BackupInfo {
            id: self.id.clone(),
            save_id: self.save_id.clone(),
            slot_id: self.slot_id,
            revision: self.revision,
            reason: self.reason,
            data_size: self.data_size,
            created_at: self.created_at,
            expires_at: self.expires_at,
        }
    }
}

/// Listing view of a backup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupInfo {
    pub id: String,
    pub save_id: String,
    pub slot_id: u32,
    pub revision: i64,
    pub reason: BackupReason,
    pub data_size: usize,
    pub created_at: i64,
    pub expires_at: i64,
}
