//! Local/cloud reconciliation.
//!
//! The stored record is the cloud copy. Clients report checksum and
//! timestamp of their local copy; the coordinator classifies the pair and
//! never merges on its own.

use serde_json::Value;
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::model::{new_save_id, BackupReason, SaveRecord, SaveSummary, SyncStatus};
use crate::store::{LoadedSave, SaveOptions, SaveStore, SaveUpdate};

use super::types::{
    ConflictDetails, ConflictResolution, LocalSaveInfo, ResolutionOutcome, SyncResult,
    UploadOptions, UploadResult,
};

/// Sync operations over a [`SaveStore`].
pub struct SyncCoordinator<'a> {
    store: &'a mut SaveStore,
}

impl<'a> SyncCoordinator<'a> {
    #[must_use]
    pub fn new(store: &'a mut SaveStore) -> Self {
        Self { store }
    }

    /// Compare a client's copy of a slot with the stored one.
    ///
    /// A `CONFLICT` outcome is also written onto the stored record.
    ///
    /// # Errors
    ///
    /// Returns `InvalidSlot` or a database error.
    pub fn sync_save(&mut self, owner_id: &str, local: &LocalSaveInfo) -> Result<SyncResult> {
        self.store.validate_slot(local.slot_id)?;

        let Some(cloud) = self.store.storage().get_save(owner_id, local.slot_id)? else {
            debug!(owner_id, slot = local.slot_id, "No stored copy; client should upload");
            return Ok(SyncResult {
                slot_id: local.slot_id,
                status: SyncStatus::LocalOnly,
                cloud_save: None,
                conflict: None,
            });
        };

        let mut result = classify(&cloud, local, self.store.settings().conflict_threshold_ms);

        if result.status == SyncStatus::Conflict {
            let actor = self.store.actor().to_string();
            self.store
                .storage_mut()
                .set_sync_status(&cloud.id, SyncStatus::Conflict, None, &actor)?;
            if let Some(summary) = result.cloud_save.as_mut() {
                summary.sync_status = SyncStatus::Conflict;
            }
            info!(save_id = %cloud.id, slot = local.slot_id, "Sync conflict detected");
        }

        self.store
            .analytics()
            .record_sync(owner_id, result.status == SyncStatus::Conflict);
        Ok(result)
    }

    /// Run [`sync_save`](Self::sync_save) for each reported slot, in order.
    ///
    /// # Errors
    ///
    /// Stops at the first slot that fails.
    pub fn batch_sync(&mut self, owner_id: &str, locals: &[LocalSaveInfo]) -> Result<Vec<SyncResult>> {
        locals
            .iter()
            .map(|local| self.sync_save(owner_id, local))
            .collect()
    }

    /// Apply a resolution to a save in conflict.
    ///
    /// The stored copy is snapshotted as a `conflict` backup before anything
    /// changes.
    ///
    /// # Errors
    ///
    /// Returns `SaveIdNotFound`, `InvalidArgument` for `MERGE` without data,
    /// `NoFreeSlot` for `KEEP_BOTH` when only the quick-save and auto-save
    /// slots are free, or any write
    /// pipeline error for the merged payload.
    pub fn resolve_conflict(
        &mut self,
        owner_id: &str,
        save_id: &str,
        resolution: ConflictResolution,
        merged: Option<&Value>,
    ) -> Result<ResolutionOutcome> {
        let record = self.store.get_by_id(owner_id, save_id)?;

        if resolution == ConflictResolution::Merge && merged.is_none() {
            return Err(Error::InvalidArgument(
                "Merged data is required for MERGE resolution".to_string(),
            ));
        }
        let copy_slot = match resolution {
            ConflictResolution::KeepBoth => Some(self.store.next_free_user_slot(owner_id)?),
            _ => None,
        };

        let backup = self
            .store
            .backups()
            .create_backup(&record, BackupReason::Conflict)?;

        let now = chrono::Utc::now().timestamp_millis();
        let actor = self.store.actor().to_string();
        let mut copy = None;

        match resolution {
            ConflictResolution::UseCloud | ConflictResolution::UseNewest => {
                self.store
                    .storage_mut()
                    .set_sync_status(&record.id, SyncStatus::Synced, Some(now), &actor)?;
            }
            ConflictResolution::UseLocal => {
                self.store
                    .storage_mut()
                    .set_sync_status(&record.id, SyncStatus::LocalNewer, Some(now), &actor)?;
            }
            ConflictResolution::Merge => {
                let update = SaveUpdate {
                    payload: merged.cloned(),
                    ..SaveUpdate::default()
                };
                self.store
                    .update_record(record.clone(), update, SyncStatus::Synced)?;
            }
            ConflictResolution::KeepBoth => {
                if let Some(slot) = copy_slot {
                    let cloud_copy = cloud_copy_of(&record, slot, now);
                    self.store.storage_mut().insert_save(&cloud_copy, &actor)?;
                    copy = Some(cloud_copy.summary());
                }
                self.store
                    .storage_mut()
                    .set_sync_status(&record.id, SyncStatus::LocalNewer, Some(now), &actor)?;
            }
        }

        let saved = self.store.get_by_id(owner_id, save_id)?;
        self.store.analytics().record_conflict_resolved(owner_id);
        info!(save_id, %resolution, backup_id = %backup.id, "Resolved conflict");

        Ok(ResolutionOutcome {
            resolution,
            save: saved.summary(),
            copy,
            backup_id: backup.id,
        })
    }

    /// Write a payload as the authoritative cloud copy.
    ///
    /// Existing records are snapshotted and bumped; new ones start at
    /// revision 1. Either way the result is `SYNCED`.
    ///
    /// # Errors
    ///
    /// Returns `RevisionConflict` when `expected_revision` is stale, plus
    /// any write pipeline error.
    pub fn upload_to_cloud(
        &mut self,
        owner_id: &str,
        slot_id: u32,
        payload: &Value,
        options: UploadOptions,
    ) -> Result<UploadResult> {
        let expected_revision = options.expected_revision;
        let save_options = SaveOptions {
            slot_name: options.slot_name,
            save_kind: options.save_kind,
            metadata: options.metadata,
            device_id: options.device_id,
            platform: options.platform,
        };

        let (record, created) = self.store.upsert(
            owner_id,
            slot_id,
            payload,
            save_options,
            SyncStatus::Synced,
            expected_revision,
        )?;

        info!(save_id = %record.id, slot = slot_id, revision = record.revision, created, "Uploaded save");
        Ok(UploadResult {
            created,
            save: record.summary(),
        })
    }

    /// Read the cloud copy and mark the slot `SYNCED`.
    ///
    /// # Errors
    ///
    /// Same as [`SaveStore::load`].
    pub fn download_from_cloud(&mut self, owner_id: &str, slot_id: u32) -> Result<LoadedSave> {
        let mut record = self.store.get(owner_id, slot_id)?;
        let payload = self.store.open_record(&record)?;

        let now = chrono::Utc::now().timestamp_millis();
        let actor = self.store.actor().to_string();
        self.store
            .storage_mut()
            .set_sync_status(&record.id, SyncStatus::Synced, Some(now), &actor)?;
        record.sync_status = SyncStatus::Synced;
        record.last_synced_at = Some(now);

        debug!(save_id = %record.id, slot = slot_id, "Downloaded save");
        Ok(LoadedSave {
            summary: record.summary(),
            payload,
        })
    }

    /// Every stored save for an owner.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn list_cloud_saves(&self, owner_id: &str) -> Result<Vec<SaveSummary>> {
        self.store.list(owner_id)
    }
}

/// Classify a client's copy against the stored record.
fn classify(cloud: &SaveRecord, local: &LocalSaveInfo, threshold_ms: i64) -> SyncResult {
    let result = |status, conflict| SyncResult {
        slot_id: local.slot_id,
        status,
        cloud_save: Some(cloud.summary()),
        conflict,
    };

    if local.checksum.as_deref() == Some(cloud.checksum.value.as_str()) {
        return result(SyncStatus::Synced, None);
    }

    let Some(local_modified) = local.last_modified_at else {
        return result(SyncStatus::CloudOnly, None);
    };
    let cloud_modified = cloud.last_modified_at;

    if local_modified.abs_diff(cloud_modified) < threshold_ms.unsigned_abs() {
        let suggested_resolution = if cloud_modified > local_modified {
            ConflictResolution::UseCloud
        } else {
            ConflictResolution::UseLocal
        };
        return result(
            SyncStatus::Conflict,
            Some(ConflictDetails {
                local_last_modified: local_modified,
                cloud_last_modified: cloud_modified,
                local_checksum: local.checksum.clone().unwrap_or_default(),
                cloud_checksum: cloud.checksum.value.clone(),
                suggested_resolution,
            }),
        );
    }

    if local_modified > cloud_modified {
        result(SyncStatus::LocalNewer, None)
    } else {
        result(SyncStatus::CloudNewer, None)
    }
}

/// A fresh record holding the same encrypted bytes in another slot.
fn cloud_copy_of(record: &SaveRecord, slot_id: u32, now: i64) -> SaveRecord {
    SaveRecord {
        id: new_save_id(),
        slot_id,
        slot_name: format!("{} (Cloud Copy)", record.slot_name),
        sync_status: SyncStatus::Synced,
        last_modified_at: now,
        last_synced_at: Some(now),
        load_count: 0,
        save_count: 1,
        created_at: now,
        ..record.clone()
    }
}
