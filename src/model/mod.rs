//! Data models for the save engine.
//!
//! This module contains all domain models:
//! - SavePayload (the game's data envelope)
//! - SaveRecord / SaveSummary
//! - BackupRecord / BackupInfo

pub mod backup;
pub mod payload;
pub mod record;

pub use backup::{new_backup_id, BackupInfo, BackupReason, BackupRecord};
pub use payload::{PlayerState, Position, ProgressState, SavePayload};
pub use record::{
    new_save_id, ChecksumInfo, CompressionInfo, EncryptionInfo, SaveKind, SaveMetadata, SaveRecord,
    SaveSummary, SyncStatus,
};
