//! Error types for the game-save engine.
//!
//! Provides structured error handling with:
//! - Machine-readable error codes (`ErrorCode`)
//! - Category-based exit codes (3=not_found, 4=validation, 6=integrity, etc.)
//! - Retryability flags (validation and format errors are never retried)
//! - Context-aware recovery hints
//! - Structured JSON output for piped / non-TTY consumers

use thiserror::Error;

/// Result type alias for save engine operations.
pub type Result<T> = std::result::Result<T, Error>;

// ── Error Code ────────────────────────────────────────────────

/// Machine-readable error codes grouped by category.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    // Database (exit 2)
    NotInitialized,
    DatabaseError,

    // Not Found (exit 3)
    SaveNotFound,
    BackupNotFound,

    // Validation (exit 4)
    InvalidPayload,
    InvalidSlot,
    InvalidArgument,

    // Conflict (exit 5)
    SlotOccupied,
    RevisionConflict,

    // Integrity (exit 6)
    IntegrityFailed,
    SaveCorrupted,

    // Format (exit 7)
    UnsupportedFormat,

    // Capacity (exit 8)
    NoFreeSlot,

    // Config (exit 9)
    ConfigError,

    // I/O (exit 10)
    IoError,
    JsonError,

    // Internal (exit 1)
    InternalError,
}

impl ErrorCode {
    /// Machine-readable SCREAMING_SNAKE code string.
    #[must_use]
    pub const fn as_str(&self) -> &str {
        match self {
            Self::NotInitialized => "NOT_INITIALIZED",
            Self::DatabaseError => "DATABASE_ERROR",
            Self::SaveNotFound => "SAVE_NOT_FOUND",
            Self::BackupNotFound => "BACKUP_NOT_FOUND",
            Self::InvalidPayload => "INVALID_PAYLOAD",
            Self::InvalidSlot => "INVALID_SLOT",
            Self::InvalidArgument => "INVALID_ARGUMENT",
            Self::SlotOccupied => "SLOT_OCCUPIED",
            Self::RevisionConflict => "REVISION_CONFLICT",
            Self::IntegrityFailed => "INTEGRITY_FAILED",
            Self::SaveCorrupted => "SAVE_CORRUPTED",
            Self::UnsupportedFormat => "UNSUPPORTED_FORMAT",
            Self::NoFreeSlot => "NO_FREE_SLOT",
            Self::ConfigError => "CONFIG_ERROR",
            Self::IoError => "IO_ERROR",
            Self::JsonError => "JSON_ERROR",
            Self::InternalError => "INTERNAL_ERROR",
        }
    }

    /// Category-based exit code.
    #[must_use]
    pub const fn exit_code(&self) -> u8 {
        match self {
            Self::InternalError => 1,
            Self::NotInitialized | Self::DatabaseError => 2,
            Self::SaveNotFound | Self::BackupNotFound => 3,
            Self::InvalidPayload | Self::InvalidSlot | Self::InvalidArgument => 4,
            Self::SlotOccupied | Self::RevisionConflict => 5,
            Self::IntegrityFailed | Self::SaveCorrupted => 6,
            Self::UnsupportedFormat => 7,
            Self::NoFreeSlot => 8,
            Self::ConfigError => 9,
            Self::IoError | Self::JsonError => 10,
        }
    }

    /// Whether a caller may retry the same request unchanged.
    ///
    /// Only transient database failures (busy/locked) qualify. Validation,
    /// format and integrity errors will fail the same way again.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::DatabaseError)
    }
}

// ── Error Enum ────────────────────────────────────────────────

/// Errors that can occur in save engine operations.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Not initialized: run `gsave init` first")]
    NotInitialized,

    #[error("Invalid save data: {}", errors.join(", "))]
    InvalidPayload { errors: Vec<String> },

    #[error("Slot ID must be between 0 and {}, got {slot}", max_slots.saturating_sub(1))]
    InvalidSlot { slot: u32, max_slots: u32 },

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Save slot {slot} not found for owner {owner}")]
    SaveNotFound { owner: String, slot: u32 },

    #[error("Save not found: {id}")]
    SaveIdNotFound { id: String },

    #[error("Backup not found: {id}")]
    BackupNotFound { id: String },

    #[error("Save slot {slot} already exists for owner {owner}")]
    SlotOccupied { owner: String, slot: u32 },

    #[error("Save slot {slot} changed concurrently: expected revision {expected}, found {actual}")]
    RevisionConflict { slot: u32, expected: i64, actual: i64 },

    #[error("Integrity check failed: {reason}")]
    Integrity { reason: String },

    #[error("Save slot {slot} is corrupted: {reason}")]
    SaveCorrupted { slot: u32, reason: String },

    #[error("Unsupported {kind} format: {algorithm}")]
    UnsupportedFormat { kind: &'static str, algorithm: String },

    #[error("No empty save slots available for owner {owner}")]
    NoFreeSlot { owner: String },

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Shorthand for an integrity failure.
    pub fn integrity(reason: impl Into<String>) -> Self {
        Self::Integrity {
            reason: reason.into(),
        }
    }

    /// Map this error to its structured `ErrorCode`.
    #[must_use]
    pub const fn error_code(&self) -> ErrorCode {
        match self {
            Self::NotInitialized => ErrorCode::NotInitialized,
            Self::Database(_) => ErrorCode::DatabaseError,
            Self::SaveNotFound { .. } | Self::SaveIdNotFound { .. } => ErrorCode::SaveNotFound,
            Self::BackupNotFound { .. } => ErrorCode::BackupNotFound,
            Self::InvalidPayload { .. } => ErrorCode::InvalidPayload,
            Self::InvalidSlot { .. } => ErrorCode::InvalidSlot,
            Self::InvalidArgument(_) => ErrorCode::InvalidArgument,
            Self::SlotOccupied { .. } => ErrorCode::SlotOccupied,
            Self::RevisionConflict { .. } => ErrorCode::RevisionConflict,
            Self::Integrity { .. } => ErrorCode::IntegrityFailed,
            Self::SaveCorrupted { .. } => ErrorCode::SaveCorrupted,
            Self::UnsupportedFormat { .. } => ErrorCode::UnsupportedFormat,
            Self::NoFreeSlot { .. } => ErrorCode::NoFreeSlot,
            Self::Config(_) => ErrorCode::ConfigError,
            Self::Io(_) => ErrorCode::IoError,
            Self::Json(_) => ErrorCode::JsonError,
            Self::Other(_) => ErrorCode::InternalError,
        }
    }

    /// Category-based exit code, delegating to the `ErrorCode`.
    #[must_use]
    pub const fn exit_code(&self) -> u8 {
        self.error_code().exit_code()
    }

    /// True for checksum, authentication and corrupted-record failures.
    #[must_use]
    pub const fn is_integrity(&self) -> bool {
        matches!(self, Self::Integrity { .. } | Self::SaveCorrupted { .. })
    }

    /// Context-aware recovery hint.
    ///
    /// Returns `None` if no actionable suggestion exists.
    #[must_use]
    pub fn hint(&self) -> Option<String> {
        match self {
            Self::NotInitialized => Some("Run `gsave init` to create the save database".to_string()),

            Self::SlotOccupied { slot, .. } => Some(format!(
                "Slot {slot} is taken. Use `gsave save update --slot {slot}` or pick a free slot \
                 with `gsave save empty-slots`."
            )),

            Self::SaveNotFound { .. } => {
                Some("Use `gsave save list` to see occupied slots.".to_string())
            }

            Self::BackupNotFound { .. } => {
                Some("Use `gsave backup list` to see available backups.".to_string())
            }

            Self::SaveCorrupted { slot, .. } => Some(format!(
                "Restore slot {slot} from a backup: gsave backup list --slot {slot}, \
                 then gsave backup restore <backup-id>"
            )),

            Self::Integrity { .. } => Some(
                "The save was flagged as corrupted and a forensic backup was written. \
                 Restore from an earlier backup to recover."
                    .to_string(),
            ),

            Self::RevisionConflict { .. } => Some(
                "Another device wrote this slot. Run `gsave sync status` and resolve the conflict."
                    .to_string(),
            ),

            Self::NoFreeSlot { .. } => {
                Some("Delete an unused save to free a slot.".to_string())
            }

            Self::InvalidPayload { .. } => Some(
                "Save data needs `version`, `world_state`, `player_state` and `progress_state`."
                    .to_string(),
            ),

            Self::InvalidArgument(msg) => {
                if msg.contains("resolution") {
                    Some(
                        "Valid resolutions: use_local, use_cloud, use_newest, merge, keep_both. \
                         Synonyms: local→use_local, cloud→use_cloud, newest→use_newest, both→keep_both"
                            .to_string(),
                    )
                } else if msg.contains("kind") {
                    Some("Valid save kinds: auto, manual, quicksave".to_string())
                } else {
                    None
                }
            }

            Self::Config(msg) if msg.contains("key") => Some(
                "Set GSAVE_ENCRYPTION_KEY to 64 hex characters (32 bytes).".to_string(),
            ),

            Self::Database(_)
            | Self::Io(_)
            | Self::Json(_)
            | Self::Config(_)
            | Self::InvalidSlot { .. }
            | Self::SaveIdNotFound { .. }
            | Self::UnsupportedFormat { .. }
            | Self::Other(_) => None,
        }
    }

    /// Structured JSON representation for machine consumption.
    #[must_use]
    pub fn to_structured_json(&self) -> serde_json::Value {
        let code = self.error_code();
        let mut obj = serde_json::json!({
            "error": {
                "code": code.as_str(),
                "message": self.to_string(),
                "retryable": code.is_retryable(),
                "exit_code": code.exit_code(),
            }
        });

        if let Some(hint) = self.hint() {
            obj["error"]["hint"] = serde_json::Value::String(hint);
        }

        obj
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_codes_by_category() {
        let not_found = Error::SaveNotFound {
            owner: "p1".into(),
            slot: 3,
        };
        assert_eq!(not_found.exit_code(), 3);

        let occupied = Error::SlotOccupied {
            owner: "p1".into(),
            slot: 3,
        };
        assert_eq!(occupied.exit_code(), 5);

        assert_eq!(Error::integrity("checksum mismatch").exit_code(), 6);
        assert_eq!(
            Error::UnsupportedFormat {
                kind: "compression",
                algorithm: "lz4".into()
            }
            .exit_code(),
            7
        );
    }

    #[test]
    fn test_validation_and_format_errors_not_retryable() {
        assert!(!ErrorCode::InvalidPayload.is_retryable());
        assert!(!ErrorCode::UnsupportedFormat.is_retryable());
        assert!(!ErrorCode::IntegrityFailed.is_retryable());
        assert!(ErrorCode::DatabaseError.is_retryable());
    }

    #[test]
    fn test_invalid_payload_lists_every_error() {
        let err = Error::InvalidPayload {
            errors: vec!["a".into(), "b".into()],
        };
        assert_eq!(err.to_string(), "Invalid save data: a, b");
    }

    #[test]
    fn test_structured_json_includes_hint() {
        let err = Error::SaveCorrupted {
            slot: 4,
            reason: "Checksum verification failed".into(),
        };
        let json = err.to_structured_json();
        assert_eq!(json["error"]["code"], "SAVE_CORRUPTED");
        assert_eq!(json["error"]["exit_code"], 6);
        assert!(json["error"]["hint"].as_str().unwrap().contains("backup restore"));
    }
}
