//! Save record store.
//!
//! [`SaveStore`] owns the database connection and the codec and runs the
//! full write and read pipelines:
//!
//! - write: validate → migrate → merge defaults → compress → checksum → encrypt → persist
//! - read: reject flagged → decrypt → verify checksum → decompress → migrate
//!
//! Integrity failures on read flag the record and leave a forensic backup
//! before the error propagates.

use std::path::Path;
use std::sync::Arc;

use serde::Serialize;
use serde_json::{Map, Value};
use tracing::{debug, error, info, warn};

use crate::analytics::{NoopAnalytics, SaveAnalytics};
use crate::backup::BackupManager;
use crate::codec::{PayloadCodec, SealedPayload, SealedRef};
use crate::config::EngineSettings;
use crate::error::{Error, Result};
use crate::model::{
    new_save_id, BackupInfo, BackupReason, SaveKind, SaveMetadata, SavePayload, SaveRecord,
    SaveSummary, SyncStatus,
};
use crate::storage::events::EventType;
use crate::storage::SqliteStorage;
use crate::versioning;

/// Options for creating (or upserting) a save.
#[derive(Debug, Clone, Default)]
pub struct SaveOptions {
    pub slot_name: Option<String>,
    pub save_kind: Option<SaveKind>,
    pub metadata: Option<SaveMetadata>,
    pub device_id: Option<String>,
    pub platform: Option<String>,
}

/// Shallow metadata patch. `custom` merges key-wise; `null` values remove keys.
#[derive(Debug, Clone, Default)]
pub struct MetadataPatch {
    pub display_name: Option<String>,
    pub playtime_secs: Option<u64>,
    pub level: Option<u32>,
    pub chapter: Option<String>,
    pub custom: Map<String, Value>,
}

impl MetadataPatch {
    fn apply(self, metadata: &mut SaveMetadata) {
        if let Some(name) = self.display_name {
            metadata.display_name = name;
        }
        if let Some(playtime) = self.playtime_secs {
            metadata.playtime_secs = playtime;
        }
        if self.level.is_some() {
            metadata.level = self.level;
        }
        if self.chapter.is_some() {
            metadata.chapter = self.chapter;
        }
        for (key, value) in self.custom {
            if value.is_null() {
                metadata.custom.remove(&key);
            } else {
                metadata.custom.insert(key, value);
            }
        }
    }
}

impl From<SaveMetadata> for MetadataPatch {
    fn from(m: SaveMetadata) -> Self {
        Self {
            display_name: Some(m.display_name),
            playtime_secs: Some(m.playtime_secs),
            level: m.level,
            chapter: m.chapter,
            custom: m.custom,
        }
    }
}

/// Changes to apply to an existing save.
#[derive(Debug, Clone, Default)]
pub struct SaveUpdate {
    pub payload: Option<Value>,
    pub slot_name: Option<String>,
    pub save_kind: Option<SaveKind>,
    pub metadata: Option<MetadataPatch>,
    pub device_id: Option<String>,
    pub platform: Option<String>,
}

impl SaveUpdate {
    fn from_options(payload: Value, options: SaveOptions) -> Self {
        Self {
            payload: Some(payload),
            slot_name: options.slot_name,
            save_kind: options.save_kind,
            metadata: options.metadata.map(MetadataPatch::from),
            device_id: options.device_id,
            platform: options.platform,
        }
    }
}

/// A successfully loaded save.
///
/// `payload` is the decoded JSON exactly as stored (after migration), so
/// sections this engine does not know and saves from newer clients come
/// back untouched.
#[derive(Debug, Clone, Serialize)]
pub struct LoadedSave {
    pub summary: SaveSummary,
    pub payload: Value,
}

impl LoadedSave {
    /// The payload bound to the typed envelope.
    ///
    /// # Errors
    ///
    /// Returns `InvalidPayload` if a known field has a shape this engine
    /// does not understand (possible for saves from a newer client).
    pub fn typed(&self) -> Result<SavePayload> {
        bind_typed(self.payload.clone())
    }
}

fn bind_typed(value: Value) -> Result<SavePayload> {
    SavePayload::from_value(value).map_err(|e| Error::InvalidPayload {
        errors: vec![e.to_string()],
    })
}

/// Create/update/load/delete over SQLite with the codec pipeline.
pub struct SaveStore {
    storage: SqliteStorage,
    codec: PayloadCodec,
    settings: EngineSettings,
    analytics: Arc<dyn SaveAnalytics>,
    actor: String,
}

impl std::fmt::Debug for SaveStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SaveStore")
            .field("settings", &self.settings)
            .field("actor", &self.actor)
            .finish_non_exhaustive()
    }
}

impl SaveStore {
    #[must_use]
    pub fn new(storage: SqliteStorage, codec: PayloadCodec, settings: EngineSettings) -> Self {
        Self {
            storage,
            codec,
            settings,
            analytics: Arc::new(NoopAnalytics),
            actor: "gamesave".to_string(),
        }
    }

    /// Open a store on a database file.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened.
    pub fn open(path: &Path, codec: PayloadCodec, settings: EngineSettings) -> Result<Self> {
        let storage = SqliteStorage::open_with_timeout(path, Some(settings.busy_timeout_ms))?;
        Ok(Self::new(storage, codec, settings))
    }

    /// Attach an analytics sink.
    #[must_use]
    pub fn with_analytics(mut self, analytics: Arc<dyn SaveAnalytics>) -> Self {
        self.analytics = analytics;
        self
    }

    /// Set the actor recorded on audit events.
    #[must_use]
    pub fn with_actor(mut self, actor: impl Into<String>) -> Self {
        self.actor = actor.into();
        self
    }

    #[must_use]
    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    #[must_use]
    pub fn codec(&self) -> &PayloadCodec {
        &self.codec
    }

    #[must_use]
    pub fn storage(&self) -> &SqliteStorage {
        &self.storage
    }

    pub(crate) fn storage_mut(&mut self) -> &mut SqliteStorage {
        &mut self.storage
    }

    pub(crate) fn analytics(&self) -> &dyn SaveAnalytics {
        self.analytics.as_ref()
    }

    pub(crate) fn actor(&self) -> &str {
        &self.actor
    }

    /// Backup operations sharing this store's connection.
    pub fn backups(&mut self) -> BackupManager<'_> {
        BackupManager::new(&mut self.storage, &self.settings, &self.actor)
    }

    /// Reject slot ids outside `0..max_slots`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidSlot`.
    pub fn validate_slot(&self, slot_id: u32) -> Result<()> {
        if slot_id >= self.settings.max_slots {
            return Err(Error::InvalidSlot {
                slot: slot_id,
                max_slots: self.settings.max_slots,
            });
        }
        Ok(())
    }

    // ==========
    // Write path
    // ==========

    /// Validate, migrate, merge defaults and seal a raw payload.
    pub(crate) fn seal_payload(&self, raw: &Value) -> Result<(u32, SealedPayload)> {
        let prepared = versioning::prepare_for_write(raw)?;
        let version = versioning::payload_version(&prepared).unwrap_or(versioning::CURRENT_VERSION);

        // A mistyped known field is rejected before it is stored. Newer
        // clients own their shapes.
        if version <= versioning::CURRENT_VERSION {
            bind_typed(prepared.clone())?;
        }

        let sealed = self.codec.seal(&prepared)?;
        Ok((version, sealed))
    }

    /// Create a save in an empty slot.
    ///
    /// # Errors
    ///
    /// Returns `InvalidSlot`, `SlotOccupied`, or `InvalidPayload`.
    pub fn create(
        &mut self,
        owner_id: &str,
        slot_id: u32,
        payload: &Value,
        options: SaveOptions,
    ) -> Result<SaveRecord> {
        self.create_with_status(owner_id, slot_id, payload, options, SyncStatus::LocalOnly)
    }

    pub(crate) fn create_with_status(
        &mut self,
        owner_id: &str,
        slot_id: u32,
        payload: &Value,
        options: SaveOptions,
        sync_status: SyncStatus,
    ) -> Result<SaveRecord> {
        self.validate_slot(slot_id)?;

        if self.storage.get_save(owner_id, slot_id)?.is_some() {
            return Err(Error::SlotOccupied {
                owner: owner_id.to_string(),
                slot: slot_id,
            });
        }

        let (schema_version, sealed) = self.seal_payload(payload)?;
        let save_kind = options.save_kind.unwrap_or_default();
        let now = chrono::Utc::now().timestamp_millis();

        let record = SaveRecord {
            id: new_save_id(),
            owner_id: owner_id.to_string(),
            slot_id,
            slot_name: options
                .slot_name
                .unwrap_or_else(|| default_slot_name(save_kind, slot_id)),
            save_kind,
            schema_version,
            revision: 1,
            metadata: options.metadata.unwrap_or_default(),
            payload: sealed.bytes,
            checksum: sealed.checksum,
            compression: sealed.compression,
            encryption: sealed.encryption,
            sync_status,
            last_modified_at: now,
            last_synced_at: (sync_status == SyncStatus::Synced).then_some(now),
            device_id: options.device_id,
            platform: options.platform,
            is_corrupted: false,
            corruption_reason: None,
            load_count: 0,
            save_count: 1,
            created_at: now,
        };

        self.storage.insert_save(&record, &self.actor)?;
        self.analytics
            .record_save(owner_id, save_kind, record.payload.len());

        info!(
            save_id = %record.id,
            owner_id,
            slot = slot_id,
            kind = %save_kind,
            "Created save"
        );
        Ok(record)
    }

    /// Update an existing save, snapshotting it first.
    ///
    /// # Errors
    ///
    /// Returns `SaveNotFound` if the slot is empty, or `InvalidPayload` if a
    /// replacement payload fails validation.
    pub fn update(&mut self, owner_id: &str, slot_id: u32, update: SaveUpdate) -> Result<SaveRecord> {
        let existing = self.get(owner_id, slot_id)?;
        self.update_record(existing, update, SyncStatus::LocalNewer)
    }

    pub(crate) fn update_record(
        &mut self,
        existing: SaveRecord,
        update: SaveUpdate,
        sync_status: SyncStatus,
    ) -> Result<SaveRecord> {
        // Seal before snapshotting so a bad payload leaves no stray backup.
        let sealed = update
            .payload
            .as_ref()
            .map(|p| self.seal_payload(p))
            .transpose()?;

        self.backups()
            .create_backup(&existing, BackupReason::PreUpdate)?;

        let previous_revision = existing.revision;
        let now = chrono::Utc::now().timestamp_millis();
        let mut record = existing;

        if let Some(name) = update.slot_name {
            record.slot_name = name;
        }
        if let Some(kind) = update.save_kind {
            record.save_kind = kind;
        }
        if let Some(patch) = update.metadata {
            patch.apply(&mut record.metadata);
        }
        if update.device_id.is_some() {
            record.device_id = update.device_id;
        }
        if update.platform.is_some() {
            record.platform = update.platform;
        }
        if let Some((schema_version, sealed)) = sealed {
            record.schema_version = schema_version;
            record.payload = sealed.bytes;
            record.checksum = sealed.checksum;
            record.compression = sealed.compression;
            record.encryption = sealed.encryption;
            record.is_corrupted = false;
            record.corruption_reason = None;
        }

        record.revision = previous_revision + 1;
        record.save_count += 1;
        record.sync_status = sync_status;
        record.last_modified_at = now;
        if sync_status == SyncStatus::Synced {
            record.last_synced_at = Some(now);
        }

        self.storage
            .replace_save(&record, EventType::SaveUpdated, previous_revision, &self.actor)?;
        self.analytics
            .record_save(&record.owner_id, record.save_kind, record.payload.len());

        info!(
            save_id = %record.id,
            slot = record.slot_id,
            revision = record.revision,
            "Updated save"
        );
        Ok(record)
    }

    /// Create or overwrite a slot.
    ///
    /// With `expected_revision`, the write only lands if the stored revision
    /// still matches (an empty slot has revision 0).
    ///
    /// # Errors
    ///
    /// Returns `RevisionConflict` on a stale `expected_revision`, plus any
    /// create/update error.
    pub fn upsert(
        &mut self,
        owner_id: &str,
        slot_id: u32,
        payload: &Value,
        options: SaveOptions,
        sync_status: SyncStatus,
        expected_revision: Option<i64>,
    ) -> Result<(SaveRecord, bool)> {
        self.validate_slot(slot_id)?;
        let existing = self.storage.get_save(owner_id, slot_id)?;

        if let Some(expected) = expected_revision {
            let actual = existing.as_ref().map_or(0, |r| r.revision);
            if actual != expected {
                return Err(Error::RevisionConflict {
                    slot: slot_id,
                    expected,
                    actual,
                });
            }
        }

        match existing {
            Some(record) => {
                let update = SaveUpdate::from_options(payload.clone(), options);
                Ok((self.update_record(record, update, sync_status)?, false))
            }
            None => Ok((
                self.create_with_status(owner_id, slot_id, payload, options, sync_status)?,
                true,
            )),
        }
    }

    // =========
    // Read path
    // =========

    /// Load and decode a save.
    ///
    /// # Errors
    ///
    /// Returns `SaveNotFound` for an empty slot, `SaveCorrupted` for a
    /// flagged record, and `Integrity` when decoding fails (the record is
    /// flagged as a side effect).
    pub fn load(&mut self, owner_id: &str, slot_id: u32) -> Result<LoadedSave> {
        let mut record = self.get(owner_id, slot_id)?;
        let payload = self.open_record(&record)?;

        record.load_count = self.storage.increment_load_count(&record.id)?;
        self.analytics.record_load(owner_id);
        debug!(save_id = %record.id, slot = slot_id, "Loaded save");

        Ok(LoadedSave {
            summary: record.summary(),
            payload,
        })
    }

    /// Decode a record's blob, quarantining it on integrity failure.
    pub(crate) fn open_record(&mut self, record: &SaveRecord) -> Result<Value> {
        if record.is_corrupted {
            return Err(Error::SaveCorrupted {
                slot: record.slot_id,
                reason: record
                    .corruption_reason
                    .clone()
                    .unwrap_or_else(|| "flagged as corrupted".to_string()),
            });
        }

        let value = match self.codec.open(SealedRef::from_record(record)) {
            Ok(value) => value,
            Err(e) if e.is_integrity() => {
                self.quarantine(record, &e.to_string());
                return Err(e);
            }
            Err(e) => return Err(e),
        };

        let migrated = versioning::migrate_to_current(value)?;
        let newer = versioning::payload_version(&migrated)
            .is_some_and(|v| v > versioning::CURRENT_VERSION);
        if !newer {
            bind_typed(migrated.clone())?;
        }
        Ok(migrated)
    }

    /// Flag a record and keep a forensic copy. Both steps are best-effort:
    /// the caller's integrity error is what matters.
    fn quarantine(&mut self, record: &SaveRecord, reason: &str) {
        error!(save_id = %record.id, slot = record.slot_id, reason, "Save failed integrity check");

        if let Err(e) = self.storage.mark_corrupted(&record.id, reason, &self.actor) {
            warn!(save_id = %record.id, error = %e, "Could not flag corrupted save");
        }
        if let Err(e) = self
            .backups()
            .create_backup(record, BackupReason::CorruptionDetected)
        {
            warn!(save_id = %record.id, error = %e, "Could not write corruption backup");
        }
        self.analytics.record_corruption(&record.owner_id);
    }

    // ======
    // Lookup
    // ======

    /// The record in a slot.
    ///
    /// # Errors
    ///
    /// Returns `SaveNotFound` if the slot is empty.
    pub fn get(&self, owner_id: &str, slot_id: u32) -> Result<SaveRecord> {
        self.storage
            .get_save(owner_id, slot_id)?
            .ok_or_else(|| Error::SaveNotFound {
                owner: owner_id.to_string(),
                slot: slot_id,
            })
    }

    /// A record by id.
    ///
    /// # Errors
    ///
    /// Returns `SaveIdNotFound` if absent.
    pub fn get_by_id(&self, owner_id: &str, save_id: &str) -> Result<SaveRecord> {
        self.storage
            .get_save_by_id(owner_id, save_id)?
            .ok_or_else(|| Error::SaveIdNotFound {
                id: save_id.to_string(),
            })
    }

    /// Summaries of every save an owner has, by slot.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn list(&self, owner_id: &str) -> Result<Vec<SaveSummary>> {
        Ok(self
            .storage
            .list_saves(owner_id)?
            .iter()
            .map(SaveRecord::summary)
            .collect())
    }

    /// Up to `count` lowest free slot ids.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn list_empty_slots(&self, owner_id: &str, count: usize) -> Result<Vec<u32>> {
        let occupied = self.storage.occupied_slots(owner_id)?;
        Ok((0..self.settings.max_slots)
            .filter(|slot| occupied.binary_search(slot).is_err())
            .take(count)
            .collect())
    }

    /// The lowest free slot.
    ///
    /// # Errors
    ///
    /// Returns `NoFreeSlot` when every slot is taken.
    pub fn next_free_slot(&self, owner_id: &str) -> Result<u32> {
        self.list_empty_slots(owner_id, 1)?
            .first()
            .copied()
            .ok_or_else(|| Error::NoFreeSlot {
                owner: owner_id.to_string(),
            })
    }

    /// The lowest free slot outside the quick-save and auto-save slots.
    ///
    /// # Errors
    ///
    /// Returns `NoFreeSlot` when every other slot is taken.
    pub fn next_free_user_slot(&self, owner_id: &str) -> Result<u32> {
        let reserved = [self.settings.quick_save_slot, self.settings.auto_save_slot];
        self.list_empty_slots(owner_id, usize::MAX)?
            .into_iter()
            .find(|slot| !reserved.contains(slot))
            .ok_or_else(|| Error::NoFreeSlot {
                owner: owner_id.to_string(),
            })
    }

    /// Delete a save after snapshotting it as a manual backup.
    ///
    /// # Errors
    ///
    /// Returns `SaveNotFound` if the slot is empty.
    pub fn delete(&mut self, owner_id: &str, slot_id: u32) -> Result<BackupInfo> {
        let record = self.get(owner_id, slot_id)?;
        let backup = self.backups().create_backup(&record, BackupReason::Manual)?;
        self.storage.delete_save(owner_id, slot_id, &self.actor)?;

        info!(save_id = %record.id, slot = slot_id, backup_id = %backup.id, "Deleted save");
        Ok(backup.info())
    }
}

fn default_slot_name(kind: SaveKind, slot_id: u32) -> String {
    match kind {
        SaveKind::Auto => "Auto Save".to_string(),
        SaveKind::Quicksave => "Quick Save".to_string(),
        SaveKind::Manual => format!("Save Slot {slot_id}"),
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::analytics::InMemoryAnalytics;
    use crate::codec::EncryptionCodec;
    use serde_json::json;

    pub(crate) fn memory_store() -> SaveStore {
        SaveStore::new(
            SqliteStorage::open_memory().unwrap(),
            PayloadCodec::new(EncryptionCodec::random()),
            EngineSettings::default(),
        )
        .with_actor("test")
    }

    pub(crate) fn payload(level: &str) -> Value {
        json!({
            "version": 2,
            "world_state": {"level": level},
            "player_state": {"health": 80.0},
            "progress_state": {"completed_levels": [level]}
        })
    }

    #[test]
    fn test_create_then_load_returns_payload() {
        let mut store = memory_store();
        let record = store.create("p1", 3, &payload("A"), SaveOptions::default()).unwrap();

        assert_eq!(record.revision, 1);
        assert_eq!(record.slot_name, "Save Slot 3");
        assert_eq!(record.sync_status, SyncStatus::LocalOnly);

        let loaded = store.load("p1", 3).unwrap();
        assert_eq!(loaded.payload["world_state"]["level"], "A");
        let typed = loaded.typed().unwrap();
        assert_eq!(typed.player_state.health, Some(80.0));
        // Defaults were merged in.
        assert_eq!(typed.player_state.inventory, Some(vec![]));
        assert_eq!(store.get("p1", 3).unwrap().load_count, 1);
    }

    #[test]
    fn test_create_on_occupied_slot() {
        let mut store = memory_store();
        store.create("p1", 3, &payload("A"), SaveOptions::default()).unwrap();
        let err = store
            .create("p1", 3, &payload("B"), SaveOptions::default())
            .unwrap_err();
        assert!(matches!(err, Error::SlotOccupied { slot: 3, .. }));
    }

    #[test]
    fn test_slot_out_of_range() {
        let mut store = memory_store();
        let err = store
            .create("p1", 100, &payload("A"), SaveOptions::default())
            .unwrap_err();
        assert!(matches!(err, Error::InvalidSlot { slot: 100, max_slots: 100 }));
    }

    #[test]
    fn test_invalid_payload_reports_every_problem() {
        let mut store = memory_store();
        let err = store
            .create("p1", 0, &json!({"version": 2}), SaveOptions::default())
            .unwrap_err();
        match err {
            Error::InvalidPayload { errors } => assert_eq!(errors.len(), 3),
            other => panic!("unexpected: {other}"),
        }
    }

    #[test]
    fn test_mistyped_known_field_is_rejected() {
        let mut store = memory_store();
        let bad = json!({
            "version": 2,
            "world_state": {},
            "player_state": {"health": "full"},
            "progress_state": {}
        });
        let err = store.create("p1", 0, &bad, SaveOptions::default()).unwrap_err();
        assert!(matches!(err, Error::InvalidPayload { .. }));
    }

    #[test]
    fn test_update_snapshots_and_replaces() {
        let mut store = memory_store();
        store.create("p1", 3, &payload("A"), SaveOptions::default()).unwrap();
        let before = store.backups().count_for_slot("p1", 3).unwrap();

        let updated = store
            .update(
                "p1",
                3,
                SaveUpdate {
                    payload: Some(payload("B")),
                    metadata: Some(MetadataPatch {
                        playtime_secs: Some(120),
                        ..MetadataPatch::default()
                    }),
                    ..SaveUpdate::default()
                },
            )
            .unwrap();

        assert_eq!(updated.revision, 2);
        assert_eq!(updated.save_count, 2);
        assert_eq!(updated.sync_status, SyncStatus::LocalNewer);
        assert_eq!(updated.metadata.playtime_secs, 120);
        assert_eq!(store.backups().count_for_slot("p1", 3).unwrap(), before + 1);
        assert_eq!(store.load("p1", 3).unwrap().payload["world_state"]["level"], "B");
    }

    #[test]
    fn test_update_missing_slot() {
        let mut store = memory_store();
        let err = store.update("p1", 5, SaveUpdate::default()).unwrap_err();
        assert!(matches!(err, Error::SaveNotFound { slot: 5, .. }));
    }

    #[test]
    fn test_metadata_patch_merges_custom() {
        let mut metadata = SaveMetadata {
            display_name: "Marsh".into(),
            custom: json!({"difficulty": "hard", "seed": 7}).as_object().unwrap().clone(),
            ..SaveMetadata::default()
        };
        MetadataPatch {
            custom: json!({"seed": null, "mode": "ironman"}).as_object().unwrap().clone(),
            ..MetadataPatch::default()
        }
        .apply(&mut metadata);

        assert_eq!(metadata.display_name, "Marsh");
        assert_eq!(metadata.custom["difficulty"], "hard");
        assert_eq!(metadata.custom["mode"], "ironman");
        assert!(!metadata.custom.contains_key("seed"));
    }

    #[test]
    fn test_corrupt_checksum_flags_record() {
        let analytics = Arc::new(InMemoryAnalytics::new());
        let mut store = memory_store().with_analytics(analytics.clone());
        let record = store.create("p1", 3, &payload("A"), SaveOptions::default()).unwrap();

        store
            .storage()
            .conn()
            .execute(
                "UPDATE save_records SET checksum = ?2 WHERE id = ?1",
                rusqlite::params![record.id, "0".repeat(64)],
            )
            .unwrap();
        let backups_before = store.backups().count_for_slot("p1", 3).unwrap();

        let err = store.load("p1", 3).unwrap_err();
        assert!(matches!(err, Error::Integrity { .. }));

        let flagged = store.get("p1", 3).unwrap();
        assert!(flagged.is_corrupted);
        assert!(flagged.corruption_reason.unwrap().contains("Checksum"));
        assert_eq!(
            store.backups().count_for_slot("p1", 3).unwrap(),
            backups_before + 1
        );
        assert_eq!(analytics.stats("p1").corruption_count, 1);

        // Once flagged, loads fail fast without another forensic copy.
        let again = store.load("p1", 3).unwrap_err();
        assert!(matches!(again, Error::SaveCorrupted { slot: 3, .. }));
        assert_eq!(
            store.backups().count_for_slot("p1", 3).unwrap(),
            backups_before + 1
        );
    }

    #[test]
    fn test_update_with_payload_clears_corruption() {
        let mut store = memory_store();
        let record = store.create("p1", 1, &payload("A"), SaveOptions::default()).unwrap();
        store
            .storage_mut()
            .mark_corrupted(&record.id, "bad", "test")
            .unwrap();

        store
            .update(
                "p1",
                1,
                SaveUpdate {
                    payload: Some(payload("B")),
                    ..SaveUpdate::default()
                },
            )
            .unwrap();
        assert!(store.load("p1", 1).is_ok());
    }

    #[test]
    fn test_v1_payload_is_migrated_on_write() {
        let mut store = memory_store();
        let v1 = json!({
            "version": 1,
            "world_state": {},
            "player_state": {"hp": 12},
            "progress_state": {}
        });
        let record = store.create("p1", 0, &v1, SaveOptions::default()).unwrap();
        assert_eq!(record.schema_version, 2);
        assert_eq!(store.load("p1", 0).unwrap().typed().unwrap().player_state.health, Some(12.0));
    }

    #[test]
    fn test_unknown_top_level_section_survives_load() {
        let mut store = memory_store();
        let mut data = payload("A");
        data["quests_state"] = json!({"main": {"stage": 4}, "side": ["herbs"]});
        store.create("p1", 5, &data, SaveOptions::default()).unwrap();

        let loaded = store.load("p1", 5).unwrap();
        assert_eq!(loaded.payload["quests_state"]["main"]["stage"], 4);
        assert_eq!(loaded.payload["quests_state"]["side"], json!(["herbs"]));

        let typed = loaded.typed().unwrap();
        assert_eq!(typed.extensions["quests_state"]["side"][0], "herbs");
    }

    #[test]
    fn test_newer_version_with_reshaped_field_loads() {
        let mut store = memory_store();
        let future = json!({
            "version": versioning::CURRENT_VERSION + 1,
            "world_state": {"level": "orbit"},
            "player_state": {"health": {"current": 5, "max": 10}},
            "progress_state": {}
        });
        let record = store.create("p1", 6, &future, SaveOptions::default()).unwrap();
        assert_eq!(record.schema_version, versioning::CURRENT_VERSION + 1);

        let loaded = store.load("p1", 6).unwrap();
        assert_eq!(loaded.payload["player_state"]["health"]["max"], 10);
        assert_eq!(loaded.payload["version"], versioning::CURRENT_VERSION + 1);
        assert!(!store.get("p1", 6).unwrap().is_corrupted);

        // Only the typed view is out of reach.
        assert!(matches!(loaded.typed(), Err(Error::InvalidPayload { .. })));
    }

    #[test]
    fn test_inflated_original_size_is_integrity_failure() {
        let mut store = memory_store();
        let record = store.create("p1", 7, &payload("A"), SaveOptions::default()).unwrap();
        store
            .storage()
            .conn()
            .execute(
                "UPDATE save_records SET original_size = ?2 WHERE id = ?1",
                rusqlite::params![record.id, i64::MAX],
            )
            .unwrap();

        let err = store.load("p1", 7).unwrap_err();
        assert!(matches!(err, Error::Integrity { .. }));
        assert!(store.get("p1", 7).unwrap().is_corrupted);
    }

    #[test]
    fn test_delete_keeps_manual_backup() {
        let mut store = memory_store();
        store.create("p1", 2, &payload("A"), SaveOptions::default()).unwrap();

        let backup = store.delete("p1", 2).unwrap();
        assert_eq!(backup.reason, BackupReason::Manual);
        assert!(matches!(store.get("p1", 2), Err(Error::SaveNotFound { .. })));
        assert_eq!(store.backups().count_for_slot("p1", 2).unwrap(), 1);
    }

    #[test]
    fn test_empty_slots_and_capacity() {
        let mut store = SaveStore::new(
            SqliteStorage::open_memory().unwrap(),
            PayloadCodec::new(EncryptionCodec::random()),
            EngineSettings {
                max_slots: 3,
                auto_save_slot: 2,
                quick_save_slot: 1,
                ..EngineSettings::default()
            },
        );
        store.create("p1", 1, &payload("A"), SaveOptions::default()).unwrap();
        assert_eq!(store.list_empty_slots("p1", 5).unwrap(), vec![0, 2]);
        assert_eq!(store.next_free_slot("p1").unwrap(), 0);

        store.create("p1", 0, &payload("A"), SaveOptions::default()).unwrap();
        store.create("p1", 2, &payload("A"), SaveOptions::default()).unwrap();
        assert!(matches!(
            store.next_free_slot("p1"),
            Err(Error::NoFreeSlot { .. })
        ));
    }

    #[test]
    fn test_user_slot_skips_reserved() {
        let store = SaveStore::new(
            SqliteStorage::open_memory().unwrap(),
            PayloadCodec::new(EncryptionCodec::random()),
            EngineSettings {
                max_slots: 4,
                quick_save_slot: 0,
                auto_save_slot: 1,
                ..EngineSettings::default()
            },
        );
        assert_eq!(store.next_free_slot("p1").unwrap(), 0);
        assert_eq!(store.next_free_user_slot("p1").unwrap(), 2);
    }

    #[test]
    fn test_upsert_checks_expected_revision() {
        let mut store = memory_store();
        let (created, was_new) = store
            .upsert("p1", 4, &payload("A"), SaveOptions::default(), SyncStatus::Synced, Some(0))
            .unwrap();
        assert!(was_new);
        assert!(created.last_synced_at.is_some());

        let err = store
            .upsert("p1", 4, &payload("B"), SaveOptions::default(), SyncStatus::Synced, Some(7))
            .unwrap_err();
        assert!(matches!(
            err,
            Error::RevisionConflict { expected: 7, actual: 1, .. }
        ));

        let (updated, was_new) = store
            .upsert("p1", 4, &payload("B"), SaveOptions::default(), SyncStatus::Synced, Some(1))
            .unwrap();
        assert!(!was_new);
        assert_eq!(updated.revision, 2);
    }

    #[test]
    fn test_list_summaries() {
        let mut store = memory_store();
        store.create("p1", 5, &payload("A"), SaveOptions::default()).unwrap();
        store
            .create(
                "p1",
                1,
                &payload("B"),
                SaveOptions {
                    save_kind: Some(SaveKind::Auto),
                    ..SaveOptions::default()
                },
            )
            .unwrap();

        let list = store.list("p1").unwrap();
        assert_eq!(list.len(), 2);
        assert_eq!(list[0].slot_id, 1);
        assert_eq!(list[0].slot_name, "Auto Save");
        assert!(list[1].is_encrypted);
        assert!(store.list("p2").unwrap().is_empty());
    }
}
