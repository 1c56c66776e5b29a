//! Sync types.
//!
//! What a client reports about its local copy, what the coordinator answers,
//! and how a conflict may be resolved.

use serde::{Deserialize, Serialize};

use crate::model::{SaveKind, SaveMetadata, SaveSummary, SyncStatus};

/// What a client knows about its local copy of one slot.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalSaveInfo {
    pub slot_id: u32,
    /// Checksum of the client's copy (same algorithm as the stored one).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,
    /// Epoch millis of the client's last write.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_modified_at: Option<i64>,
}

/// How a conflict is settled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConflictResolution {
    /// Keep the stored copy.
    UseCloud,
    /// The client will upload its copy next.
    UseLocal,
    UseNewest,
    /// Replace the stored copy with caller-merged data.
    Merge,
    /// Copy the stored save into a free slot so the client can overwrite this one.
    KeepBoth,
}

impl ConflictResolution {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::UseCloud => "USE_CLOUD",
            Self::UseLocal => "USE_LOCAL",
            Self::UseNewest => "USE_NEWEST",
            Self::Merge => "MERGE",
            Self::KeepBoth => "KEEP_BOTH",
        }
    }
}

impl std::fmt::Display for ConflictResolution {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Both sides of a detected conflict.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConflictDetails {
    pub local_last_modified: i64,
    pub cloud_last_modified: i64,
    pub local_checksum: String,
    pub cloud_checksum: String,
    pub suggested_resolution: ConflictResolution,
}

/// Outcome of comparing a client's copy with the stored one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncResult {
    pub slot_id: u32,
    pub status: SyncStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cloud_save: Option<SaveSummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conflict: Option<ConflictDetails>,
}

impl SyncResult {
    /// False only for conflicts, which need a resolution call.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.status != SyncStatus::Conflict
    }
}

/// Optional parameters for an upload.
#[derive(Debug, Clone, Default)]
pub struct UploadOptions {
    pub slot_name: Option<String>,
    pub save_kind: Option<SaveKind>,
    pub metadata: Option<SaveMetadata>,
    pub device_id: Option<String>,
    pub platform: Option<String>,
    /// Reject the upload unless the stored revision matches (0 = empty slot).
    pub expected_revision: Option<i64>,
}

/// Result of an upload.
#[derive(Debug, Clone, Serialize)]
pub struct UploadResult {
    pub created: bool,
    pub save: SaveSummary,
}

/// Result of resolving a conflict.
#[derive(Debug, Clone, Serialize)]
pub struct ResolutionOutcome {
    pub resolution: ConflictResolution,
    pub save: SaveSummary,
    /// The cloud copy written by `KEEP_BOTH`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub copy: Option<SaveSummary>,
    pub backup_id: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_resolution_wire_names() {
        let parsed: ConflictResolution = serde_json::from_value(json!("KEEP_BOTH")).unwrap();
        assert_eq!(parsed, ConflictResolution::KeepBoth);
        assert_eq!(
            serde_json::to_value(ConflictResolution::UseNewest).unwrap(),
            json!("USE_NEWEST")
        );
    }

    #[test]
    fn test_local_info_accepts_partial_input() {
        let info: LocalSaveInfo = serde_json::from_value(json!({"slot_id": 4})).unwrap();
        assert_eq!(info.slot_id, 4);
        assert!(info.checksum.is_none());
        assert!(info.last_modified_at.is_none());
    }
}
