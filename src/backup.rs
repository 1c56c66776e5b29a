//! Backup lifecycle: snapshot, retention, restore, purge.
//!
//! A backup is an immutable copy of a save's encrypted blob plus every
//! descriptor needed to decode it. Backups are never re-encrypted or
//! decoded here; restore copies the bytes back verbatim.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tracing::{error, info, warn};

use crate::codec::{checksum, verify_checksum};
use crate::config::EngineSettings;
use crate::error::{Error, Result};
use crate::model::{
    new_backup_id, new_save_id, BackupInfo, BackupReason, BackupRecord, SaveKind, SaveRecord,
    SyncStatus,
};
use crate::storage::events::EventType;
use crate::storage::SqliteStorage;
use crate::store::SaveStore;

/// Backup operations over borrowed storage.
pub struct BackupManager<'a> {
    storage: &'a mut SqliteStorage,
    settings: &'a EngineSettings,
    actor: &'a str,
}

impl<'a> BackupManager<'a> {
    pub fn new(storage: &'a mut SqliteStorage, settings: &'a EngineSettings, actor: &'a str) -> Self {
        Self {
            storage,
            settings,
            actor,
        }
    }

    /// Snapshot `record` and enforce the per-slot cap.
    ///
    /// # Errors
    ///
    /// Returns an error if the backup cannot be written.
    pub fn create_backup(&mut self, record: &SaveRecord, reason: BackupReason) -> Result<BackupRecord> {
        let now = chrono::Utc::now().timestamp_millis();
        let backup = BackupRecord {
            id: new_backup_id(),
            save_id: record.id.clone(),
            owner_id: record.owner_id.clone(),
            slot_id: record.slot_id,
            slot_name: record.slot_name.clone(),
            revision: record.revision,
            reason,
            payload: record.payload.clone(),
            backup_checksum: checksum(&record.payload),
            checksum: record.checksum.clone(),
            compression: record.compression.clone(),
            encryption: record.encryption.clone(),
            schema_version: record.schema_version,
            metadata: record.metadata.clone(),
            data_size: record.payload.len(),
            created_at: now,
            expires_at: now + self.settings.retention_days.window_ms(reason),
        };

        self.storage.insert_backup(&backup, self.actor)?;

        let trimmed = self.storage.trim_backups(
            &record.owner_id,
            record.slot_id,
            self.settings.max_backups_per_slot,
            self.actor,
        )?;

        info!(
            backup_id = %backup.id,
            save_id = %record.id,
            slot = record.slot_id,
            revision = record.revision,
            %reason,
            trimmed,
            "Created backup"
        );

        Ok(backup)
    }

    /// Restore a backup into its slot.
    ///
    /// An active save in the slot is snapshotted first and then overwritten;
    /// its revision moves forward past both its own and the backup's. With
    /// no active save the record is recreated from the backup alone.
    ///
    /// # Errors
    ///
    /// Returns `BackupNotFound` if the backup does not exist and `Integrity`
    /// if its blob no longer matches the backup checksum.
    pub fn restore_from_backup(&mut self, owner_id: &str, backup_id: &str) -> Result<SaveRecord> {
        let backup = self.get_backup(owner_id, backup_id)?;

        if !verify_checksum(&backup.payload, &backup.backup_checksum) {
            warn!(backup_id, "Refusing to restore corrupted backup");
            return Err(Error::integrity("Backup checksum verification failed"));
        }

        let now = chrono::Utc::now().timestamp_millis();

        let restored = if let Some(current) = self.storage.get_save(owner_id, backup.slot_id)? {
            self.create_backup(&current, BackupReason::PreUpdate)?;

            let restored = SaveRecord {
                schema_version: backup.schema_version,
                revision: (current.revision + 1).max(backup.revision),
                metadata: backup.metadata.clone(),
                payload: backup.payload.clone(),
                checksum: backup.checksum.clone(),
                compression: backup.compression.clone(),
                encryption: backup.encryption.clone(),
                sync_status: SyncStatus::LocalNewer,
                last_modified_at: now,
                is_corrupted: false,
                corruption_reason: None,
                save_count: current.save_count + 1,
                ..current
            };
            self.storage.replace_save(
                &restored,
                EventType::SaveRestored,
                current.revision,
                self.actor,
            )?;
            restored
        } else {
            let restored = SaveRecord {
                id: new_save_id(),
                owner_id: owner_id.to_string(),
                slot_id: backup.slot_id,
                slot_name: format!("Restored Save (Slot {})", backup.slot_id),
                save_kind: SaveKind::Manual,
                schema_version: backup.schema_version,
                revision: backup.revision.max(1),
                metadata: backup.metadata.clone(),
                payload: backup.payload.clone(),
                checksum: backup.checksum.clone(),
                compression: backup.compression.clone(),
                encryption: backup.encryption.clone(),
                sync_status: SyncStatus::LocalOnly,
                last_modified_at: now,
                last_synced_at: None,
                device_id: None,
                platform: None,
                is_corrupted: false,
                corruption_reason: None,
                load_count: 0,
                save_count: 1,
                created_at: now,
            };
            self.storage.insert_save(&restored, self.actor)?;
            restored
        };

        info!(
            backup_id,
            save_id = %restored.id,
            slot = restored.slot_id,
            revision = restored.revision,
            "Restored backup"
        );

        Ok(restored)
    }

    /// Backups for an owner (optionally one slot), newest first, capped.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn list_backups(&self, owner_id: &str, slot_id: Option<u32>) -> Result<Vec<BackupInfo>> {
        let backups =
            self.storage
                .list_backups(owner_id, slot_id, self.settings.backup_list_limit)?;
        Ok(backups.iter().map(BackupRecord::info).collect())
    }

    /// Fetch one backup including its blob.
    ///
    /// # Errors
    ///
    /// Returns `BackupNotFound` if absent.
    pub fn get_backup(&self, owner_id: &str, backup_id: &str) -> Result<BackupRecord> {
        self.storage
            .get_backup(owner_id, backup_id)?
            .ok_or_else(|| Error::BackupNotFound {
                id: backup_id.to_string(),
            })
    }

    /// Delete one backup.
    ///
    /// # Errors
    ///
    /// Returns `BackupNotFound` if absent.
    pub fn delete_backup(&mut self, owner_id: &str, backup_id: &str) -> Result<()> {
        if self.storage.delete_backup(owner_id, backup_id, self.actor)? {
            info!(backup_id, "Deleted backup");
            Ok(())
        } else {
            Err(Error::BackupNotFound {
                id: backup_id.to_string(),
            })
        }
    }

    /// Sweep every backup past its retention window, across all owners.
    ///
    /// # Errors
    ///
    /// Returns an error if the delete fails.
    pub fn purge_expired(&mut self) -> Result<usize> {
        let now = chrono::Utc::now().timestamp_millis();
        let purged = self.storage.delete_expired_backups(now, self.actor)?;
        if purged > 0 {
            info!(purged, "Purged expired backups");
        }
        Ok(purged)
    }

    /// Number of backups held for one slot.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn count_for_slot(&self, owner_id: &str, slot_id: u32) -> Result<usize> {
        self.storage.count_backups(owner_id, slot_id)
    }
}

/// Run [`BackupManager::purge_expired`] every `cadence` until the task is
/// aborted.
///
/// The first sweep happens one full `cadence` after spawning.
pub fn spawn_purge_loop(
    store: Arc<Mutex<SaveStore>>,
    cadence: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(cadence);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        ticker.tick().await;

        loop {
            ticker.tick().await;
            let store = Arc::clone(&store);
            let swept = tokio::task::spawn_blocking(move || {
                let mut store = store.lock().unwrap_or_else(PoisonError::into_inner);
                store.backups().purge_expired()
            })
            .await;

            match swept {
                Ok(Ok(_)) => {}
                Ok(Err(e)) => error!(error = %e, "Backup purge failed"),
                Err(e) => error!(error = %e, "Backup purge task failed"),
            }
        }
    })
}
