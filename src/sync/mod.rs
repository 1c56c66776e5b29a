//! Cloud sync.
//!
//! The database this engine writes to is the cloud copy; clients keep their
//! own local copy and talk to the [`SyncCoordinator`]:
//!
//! - **Status**: checksum + timestamp comparison against the stored record
//! - **Resolve**: apply a chosen [`ConflictResolution`] after a conflict
//! - **Upload / Download**: move a payload through the full pipeline
//!
//! # Example
//!
//! ```ignore
//! use gamesave::sync::{LocalSaveInfo, SyncCoordinator};
//!
//! let mut sync = SyncCoordinator::new(&mut store);
//! let result = sync.sync_save("player-1", &LocalSaveInfo {
//!     slot_id: 3,
//!     checksum: Some(local_checksum),
//!     last_modified_at: Some(local_ts),
//! })?;
//! ```

mod coordinator;
mod types;

pub use coordinator::SyncCoordinator;
pub use types::{
    ConflictDetails, ConflictResolution, LocalSaveInfo, ResolutionOutcome, SyncResult,
    UploadOptions, UploadResult,
};
