//! SQLite storage implementation.
//!
//! Row-level persistence for saves and backups. Every write goes through
//! [`SqliteStorage::mutate`], which wraps the change in an IMMEDIATE
//! transaction and flushes the audit events collected on the way.

use crate::error::{Error, Result};
use crate::model::{
    BackupReason, BackupRecord, ChecksumInfo, CompressionInfo, EncryptionInfo, SaveKind,
    SaveMetadata, SaveRecord, SyncStatus,
};
use crate::storage::events::{insert_event, Event, EventType};
use crate::storage::schema::apply_schema;
use rusqlite::types::Type;
use rusqlite::{Connection, OptionalExtension, Transaction};
use std::path::Path;
use std::time::Duration;

const SAVE_COLUMNS: &str = "id, owner_id, slot_id, slot_name, save_kind, schema_version, revision,
    metadata, payload, checksum_algorithm, checksum, compression_algorithm, original_size,
    compressed_size, encryption_algorithm, encryption_nonce, encryption_tag, sync_status,
    last_modified_at, last_synced_at, device_id, platform, is_corrupted, corruption_reason,
    load_count, save_count, created_at";

const BACKUP_COLUMNS: &str = "id, save_id, owner_id, slot_id, slot_name, revision, reason, payload,
    backup_checksum, checksum_algorithm, checksum, compression_algorithm, original_size,
    compressed_size, encryption_algorithm, encryption_nonce, encryption_tag, schema_version,
    metadata, data_size, created_at, expires_at";

/// SQLite-based storage backend.
#[derive(Debug)]
pub struct SqliteStorage {
    conn: Connection,
}

/// Context for a mutation operation, collecting audit events.
pub struct MutationContext {
    /// Name of the operation being performed.
    pub op_name: String,
    /// Device or tool performing the operation.
    pub actor: String,
    /// Events to write at the end of the transaction.
    pub events: Vec<Event>,
}

impl MutationContext {
    /// Create a new mutation context.
    #[must_use]
    pub fn new(op_name: &str, actor: &str) -> Self {
        Self {
            op_name: op_name.to_string(),
            actor: actor.to_string(),
            events: Vec::new(),
        }
    }

    /// Record an event for this operation.
    pub fn record_event(&mut self, entity_type: &str, entity_id: &str, event_type: EventType) {
        self.events
            .push(Event::new(entity_type, entity_id, event_type, &self.actor));
    }

    /// Record an event with old/new values for field tracking.
    pub fn record_change(
        &mut self,
        entity_type: &str,
        entity_id: &str,
        event_type: EventType,
        old_value: Option<String>,
        new_value: Option<String>,
    ) {
        self.events.push(
            Event::new(entity_type, entity_id, event_type, &self.actor)
                .with_values(old_value, new_value),
        );
    }

    /// Record an event carrying a free-text comment.
    pub fn record_comment(
        &mut self,
        entity_type: &str,
        entity_id: &str,
        event_type: EventType,
        comment: &str,
    ) {
        self.events.push(
            Event::new(entity_type, entity_id, event_type, &self.actor).with_comment(comment),
        );
    }
}

impl SqliteStorage {
    /// Open a database at the given path.
    ///
    /// Creates the database and applies schema if it doesn't exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection cannot be established or schema fails.
    pub fn open(path: &Path) -> Result<Self> {
        Self::open_with_timeout(path, None)
    }

    /// Open a database with an optional busy timeout.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection cannot be established or schema fails.
    pub fn open_with_timeout(path: &Path, timeout_ms: Option<u64>) -> Result<Self> {
        let conn = Connection::open(path)?;

        if let Some(timeout) = timeout_ms {
            conn.busy_timeout(Duration::from_millis(timeout))?;
        } else {
            conn.busy_timeout(Duration::from_secs(5))?;
        }

        apply_schema(&conn)?;
        Ok(Self { conn })
    }

    /// Open an in-memory database (for testing).
    ///
    /// # Errors
    ///
    /// Returns an error if the connection cannot be established.
    pub fn open_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        apply_schema(&conn)?;
        Ok(Self { conn })
    }

    /// Get a reference to the underlying connection (for read operations).
    #[must_use]
    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    /// Execute a mutation with the transaction protocol.
    ///
    /// Begins an IMMEDIATE transaction, runs the closure, writes the audit
    /// events it recorded, then commits. Any error rolls everything back.
    ///
    /// # Errors
    ///
    /// Returns an error if any step fails.
    pub fn mutate<F, R>(&mut self, op: &str, actor: &str, f: F) -> Result<R>
    where
        F: FnOnce(&Transaction, &mut MutationContext) -> Result<R>,
    {
        let tx = self
            .conn
            .transaction_with_behavior(rusqlite::TransactionBehavior::Immediate)?;

        let mut ctx = MutationContext::new(op, actor);

        let result = f(&tx, &mut ctx)?;

        for event in &ctx.events {
            insert_event(&tx, event)?;
        }

        tx.commit()?;

        Ok(result)
    }

    // ===============
    // Save Operations
    // ===============

    /// Insert a new save row.
    ///
    /// # Errors
    ///
    /// Returns `SlotOccupied` if the owner already has a save in that slot.
    pub fn insert_save(&mut self, record: &SaveRecord, actor: &str) -> Result<()> {
        let metadata = serde_json::to_string(&record.metadata)?;

        self.mutate("insert_save", actor, |tx, ctx| {
            tx.execute(
                &format!(
                    "INSERT INTO save_records ({SAVE_COLUMNS})
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15,
                             ?16, ?17, ?18, ?19, ?20, ?21, ?22, ?23, ?24, ?25, ?26, ?27)"
                ),
                rusqlite::params![
                    record.id,
                    record.owner_id,
                    record.slot_id,
                    record.slot_name,
                    record.save_kind.as_str(),
                    record.schema_version,
                    record.revision,
                    metadata,
                    record.payload,
                    record.checksum.algorithm,
                    record.checksum.value,
                    record.compression.algorithm,
                    record.compression.original_size,
                    record.compression.compressed_size,
                    record.encryption.algorithm,
                    record.encryption.nonce,
                    record.encryption.tag,
                    record.sync_status.as_str(),
                    record.last_modified_at,
                    record.last_synced_at,
                    record.device_id,
                    record.platform,
                    record.is_corrupted,
                    record.corruption_reason,
                    record.load_count,
                    record.save_count,
                    record.created_at,
                ],
            )
            .map_err(|e| {
                if is_constraint_violation(&e) {
                    Error::SlotOccupied {
                        owner: record.owner_id.clone(),
                        slot: record.slot_id,
                    }
                } else {
                    Error::Database(e)
                }
            })?;

            ctx.record_comment(
                "save",
                &record.id,
                EventType::SaveCreated,
                &format!("slot {} ({})", record.slot_id, record.save_kind),
            );
            Ok(())
        })
    }

    /// Overwrite every mutable column of an existing save.
    ///
    /// # Errors
    ///
    /// Returns `SaveIdNotFound` if no row has `record.id`.
    pub fn replace_save(
        &mut self,
        record: &SaveRecord,
        event: EventType,
        previous_revision: i64,
        actor: &str,
    ) -> Result<()> {
        let metadata = serde_json::to_string(&record.metadata)?;

        self.mutate("replace_save", actor, |tx, ctx| {
            let updated = tx.execute(
                "UPDATE save_records SET
                    slot_name = ?2, save_kind = ?3, schema_version = ?4, revision = ?5,
                    metadata = ?6, payload = ?7, checksum_algorithm = ?8, checksum = ?9,
                    compression_algorithm = ?10, original_size = ?11, compressed_size = ?12,
                    encryption_algorithm = ?13, encryption_nonce = ?14, encryption_tag = ?15,
                    sync_status = ?16, last_modified_at = ?17, last_synced_at = ?18,
                    device_id = ?19, platform = ?20, is_corrupted = ?21,
                    corruption_reason = ?22, save_count = ?23
                 WHERE id = ?1",
                rusqlite::params![
                    record.id,
                    record.slot_name,
                    record.save_kind.as_str(),
                    record.schema_version,
                    record.revision,
                    metadata,
                    record.payload,
                    record.checksum.algorithm,
                    record.checksum.value,
                    record.compression.algorithm,
                    record.compression.original_size,
                    record.compression.compressed_size,
                    record.encryption.algorithm,
                    record.encryption.nonce,
                    record.encryption.tag,
                    record.sync_status.as_str(),
                    record.last_modified_at,
                    record.last_synced_at,
                    record.device_id,
                    record.platform,
                    record.is_corrupted,
                    record.corruption_reason,
                    record.save_count,
                ],
            )?;

            if updated == 0 {
                return Err(Error::SaveIdNotFound {
                    id: record.id.clone(),
                });
            }

            ctx.record_change(
                "save",
                &record.id,
                event,
                Some(previous_revision.to_string()),
                Some(record.revision.to_string()),
            );
            Ok(())
        })
    }

    /// Get the save in an owner's slot.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn get_save(&self, owner_id: &str, slot_id: u32) -> Result<Option<SaveRecord>> {
        let record = self
            .conn
            .query_row(
                &format!(
                    "SELECT {SAVE_COLUMNS} FROM save_records WHERE owner_id = ?1 AND slot_id = ?2"
                ),
                rusqlite::params![owner_id, slot_id],
                map_save_row,
            )
            .optional()?;
        Ok(record)
    }

    /// Get a save by ID, scoped to its owner.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn get_save_by_id(&self, owner_id: &str, id: &str) -> Result<Option<SaveRecord>> {
        let record = self
            .conn
            .query_row(
                &format!("SELECT {SAVE_COLUMNS} FROM save_records WHERE owner_id = ?1 AND id = ?2"),
                rusqlite::params![owner_id, id],
                map_save_row,
            )
            .optional()?;
        Ok(record)
    }

    /// All saves for an owner, ordered by slot.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn list_saves(&self, owner_id: &str) -> Result<Vec<SaveRecord>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {SAVE_COLUMNS} FROM save_records WHERE owner_id = ?1 ORDER BY slot_id ASC"
        ))?;
        let rows = stmt.query_map([owner_id], map_save_row)?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(Error::from)
    }

    /// Slot ids currently occupied by an owner, ascending.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn occupied_slots(&self, owner_id: &str) -> Result<Vec<u32>> {
        let mut stmt = self
            .conn
            .prepare("SELECT slot_id FROM save_records WHERE owner_id = ?1 ORDER BY slot_id ASC")?;
        let rows = stmt.query_map([owner_id], |row| row.get(0))?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(Error::from)
    }

    /// Delete the save in an owner's slot. Backups are untouched.
    ///
    /// # Errors
    ///
    /// Returns an error if the delete fails.
    pub fn delete_save(&mut self, owner_id: &str, slot_id: u32, actor: &str) -> Result<bool> {
        self.mutate("delete_save", actor, |tx, ctx| {
            let id: Option<String> = tx
                .query_row(
                    "SELECT id FROM save_records WHERE owner_id = ?1 AND slot_id = ?2",
                    rusqlite::params![owner_id, slot_id],
                    |row| row.get(0),
                )
                .optional()?;

            let Some(id) = id else {
                return Ok(false);
            };

            tx.execute("DELETE FROM save_records WHERE id = ?1", [&id])?;
            ctx.record_event("save", &id, EventType::SaveDeleted);
            Ok(true)
        })
    }

    /// Flag a save as corrupted.
    ///
    /// # Errors
    ///
    /// Returns an error if the update fails.
    pub fn mark_corrupted(&mut self, id: &str, reason: &str, actor: &str) -> Result<()> {
        self.mutate("mark_corrupted", actor, |tx, ctx| {
            tx.execute(
                "UPDATE save_records SET is_corrupted = 1, corruption_reason = ?2 WHERE id = ?1",
                rusqlite::params![id, reason],
            )?;
            ctx.record_comment("save", id, EventType::SaveCorrupted, reason);
            Ok(())
        })
    }

    /// Set a save's sync status, optionally stamping `last_synced_at`.
    ///
    /// # Errors
    ///
    /// Returns `SaveIdNotFound` if the save does not exist.
    pub fn set_sync_status(
        &mut self,
        id: &str,
        status: SyncStatus,
        synced_at: Option<i64>,
        actor: &str,
    ) -> Result<()> {
        self.mutate("set_sync_status", actor, |tx, ctx| {
            let old: Option<String> = tx
                .query_row(
                    "SELECT sync_status FROM save_records WHERE id = ?1",
                    [id],
                    |row| row.get(0),
                )
                .optional()?;

            let Some(old) = old else {
                return Err(Error::SaveIdNotFound { id: id.to_string() });
            };

            tx.execute(
                "UPDATE save_records
                 SET sync_status = ?2, last_synced_at = COALESCE(?3, last_synced_at)
                 WHERE id = ?1",
                rusqlite::params![id, status.as_str(), synced_at],
            )?;

            if old != status.as_str() {
                ctx.record_change(
                    "save",
                    id,
                    EventType::SyncStatusChanged,
                    Some(old),
                    Some(status.as_str().to_string()),
                );
            }
            Ok(())
        })
    }

    /// Bump the load counter. Reads are not audited.
    ///
    /// # Errors
    ///
    /// Returns an error if the update fails.
    pub fn increment_load_count(&mut self, id: &str) -> Result<i64> {
        self.conn.execute(
            "UPDATE save_records SET load_count = load_count + 1 WHERE id = ?1",
            [id],
        )?;
        let count = self.conn.query_row(
            "SELECT load_count FROM save_records WHERE id = ?1",
            [id],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    // =================
    // Backup Operations
    // =================

    /// Insert a backup row.
    ///
    /// # Errors
    ///
    /// Returns an error if the insert fails.
    pub fn insert_backup(&mut self, backup: &BackupRecord, actor: &str) -> Result<()> {
        let metadata = serde_json::to_string(&backup.metadata)?;

        self.mutate("insert_backup", actor, |tx, ctx| {
            tx.execute(
                &format!(
                    "INSERT INTO save_backups ({BACKUP_COLUMNS})
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15,
                             ?16, ?17, ?18, ?19, ?20, ?21, ?22)"
                ),
                rusqlite::params![
                    backup.id,
                    backup.save_id,
                    backup.owner_id,
                    backup.slot_id,
                    backup.slot_name,
                    backup.revision,
                    backup.reason.as_str(),
                    backup.payload,
                    backup.backup_checksum,
                    backup.checksum.algorithm,
                    backup.checksum.value,
                    backup.compression.algorithm,
                    backup.compression.original_size,
                    backup.compression.compressed_size,
                    backup.encryption.algorithm,
                    backup.encryption.nonce,
                    backup.encryption.tag,
                    backup.schema_version,
                    metadata,
                    backup.data_size,
                    backup.created_at,
                    backup.expires_at,
                ],
            )?;

            ctx.record_comment(
                "backup",
                &backup.id,
                EventType::BackupCreated,
                &format!("{} of {} rev {}", backup.reason, backup.save_id, backup.revision),
            );
            Ok(())
        })
    }

    /// Get a backup by ID, scoped to its owner.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn get_backup(&self, owner_id: &str, id: &str) -> Result<Option<BackupRecord>> {
        let backup = self
            .conn
            .query_row(
                &format!("SELECT {BACKUP_COLUMNS} FROM save_backups WHERE owner_id = ?1 AND id = ?2"),
                rusqlite::params![owner_id, id],
                map_backup_row,
            )
            .optional()?;
        Ok(backup)
    }

    /// Backups for an owner (optionally one slot), newest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn list_backups(
        &self,
        owner_id: &str,
        slot_id: Option<u32>,
        limit: u32,
    ) -> Result<Vec<BackupRecord>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {BACKUP_COLUMNS} FROM save_backups
             WHERE owner_id = ?1 AND (?2 IS NULL OR slot_id = ?2)
             ORDER BY created_at DESC, rowid DESC
             LIMIT ?3"
        ))?;
        let rows = stmt.query_map(rusqlite::params![owner_id, slot_id, limit], map_backup_row)?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(Error::from)
    }

    /// Number of backups held for one slot.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn count_backups(&self, owner_id: &str, slot_id: u32) -> Result<usize> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM save_backups WHERE owner_id = ?1 AND slot_id = ?2",
            rusqlite::params![owner_id, slot_id],
            |row| row.get(0),
        )?;
        Ok(usize::try_from(count).unwrap_or_default())
    }

    /// Delete the oldest backups of a slot beyond `keep`.
    ///
    /// # Errors
    ///
    /// Returns an error if the delete fails.
    pub fn trim_backups(
        &mut self,
        owner_id: &str,
        slot_id: u32,
        keep: usize,
        actor: &str,
    ) -> Result<usize> {
        self.mutate("trim_backups", actor, |tx, ctx| {
            let excess: Vec<String> = {
                let mut stmt = tx.prepare(
                    "SELECT id FROM save_backups
                     WHERE owner_id = ?1 AND slot_id = ?2
                     ORDER BY created_at DESC, rowid DESC
                     LIMIT -1 OFFSET ?3",
                )?;
                let rows = stmt.query_map(rusqlite::params![owner_id, slot_id, keep], |row| {
                    row.get(0)
                })?;
                rows.collect::<std::result::Result<_, _>>()?
            };

            for id in &excess {
                tx.execute("DELETE FROM save_backups WHERE id = ?1", [id])?;
                ctx.record_comment("backup", id, EventType::BackupDeleted, "over per-slot cap");
            }
            Ok(excess.len())
        })
    }

    /// Delete a backup.
    ///
    /// # Errors
    ///
    /// Returns an error if the delete fails.
    pub fn delete_backup(&mut self, owner_id: &str, id: &str, actor: &str) -> Result<bool> {
        self.mutate("delete_backup", actor, |tx, ctx| {
            let deleted = tx.execute(
                "DELETE FROM save_backups WHERE owner_id = ?1 AND id = ?2",
                rusqlite::params![owner_id, id],
            )?;
            if deleted > 0 {
                ctx.record_event("backup", id, EventType::BackupDeleted);
            }
            Ok(deleted > 0)
        })
    }

    /// Delete every backup whose retention window closed before `now`.
    ///
    /// # Errors
    ///
    /// Returns an error if the delete fails.
    pub fn delete_expired_backups(&mut self, now: i64, actor: &str) -> Result<usize> {
        self.mutate("delete_expired_backups", actor, |tx, ctx| {
            let deleted = tx.execute("DELETE FROM save_backups WHERE expires_at < ?1", [now])?;
            if deleted > 0 {
                ctx.record_comment(
                    "backup",
                    "*",
                    EventType::BackupsPurged,
                    &format!("{deleted} expired"),
                );
            }
            Ok(deleted)
        })
    }
}

fn is_constraint_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _) if e.code == rusqlite::ErrorCode::ConstraintViolation
    )
}

fn metadata_column(row: &rusqlite::Row, idx: usize) -> rusqlite::Result<SaveMetadata> {
    let raw: String = row.get(idx)?;
    serde_json::from_str(&raw)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

// Helper to map save rows
fn map_save_row(row: &rusqlite::Row) -> rusqlite::Result<SaveRecord> {
    let kind: String = row.get(4)?;
    let status: String = row.get(17)?;
    Ok(SaveRecord {
        id: row.get(0)?,
        owner_id: row.get(1)?,
        slot_id: row.get(2)?,
        slot_name: row.get(3)?,
        save_kind: SaveKind::from_db(&kind),
        schema_version: row.get(5)?,
        revision: row.get(6)?,
        metadata: metadata_column(row, 7)?,
        payload: row.get(8)?,
        checksum: ChecksumInfo {
            algorithm: row.get(9)?,
            value: row.get(10)?,
        },
        compression: CompressionInfo {
            algorithm: row.get(11)?,
            original_size: row.get(12)?,
            compressed_size: row.get(13)?,
        },
        encryption: EncryptionInfo {
            algorithm: row.get(14)?,
            nonce: row.get(15)?,
            tag: row.get(16)?,
        },
        sync_status: SyncStatus::from_db(&status),
        last_modified_at: row.get(18)?,
        last_synced_at: row.get(19)?,
        device_id: row.get(20)?,
        platform: row.get(21)?,
        is_corrupted: row.get(22)?,
        corruption_reason: row.get(23)?,
        load_count: row.get(24)?,
        save_count: row.get(25)?,
        created_at: row.get(26)?,
    })
}

// Helper to map backup rows
fn map_backup_row(row: &rusqlite::Row) -> rusqlite::Result<BackupRecord> {
    let reason: String = row.get(6)?;
    Ok(BackupRecord {
        id: row.get(0)?,
        save_id: row.get(1)?,
        owner_id: row.get(2)?,
        slot_id: row.get(3)?,
        slot_name: row.get(4)?,
        revision: row.get(5)?,
        reason: BackupReason::from_db(&reason),
        payload: row.get(7)?,
        backup_checksum: row.get(8)?,
        checksum: ChecksumInfo {
            algorithm: row.get(9)?,
            value: row.get(10)?,
        },
        compression: CompressionInfo {
            algorithm: row.get(11)?,
            original_size: row.get(12)?,
            compressed_size: row.get(13)?,
        },
        encryption: EncryptionInfo {
            algorithm: row.get(14)?,
            nonce: row.get(15)?,
            tag: row.get(16)?,
        },
        schema_version: row.get(17)?,
        metadata: metadata_column(row, 18)?,
        data_size: row.get(19)?,
        created_at: row.get(20)?,
        expires_at: row.get(21)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::events::get_events;

    fn record(owner: &str, slot: u32) -> SaveRecord {
        SaveRecord {
            id: format!("save_{owner}_{slot}"),
            owner_id: owner.to_string(),
            slot_id: slot,
            slot_name: format!("Save Slot {slot}"),
            save_kind: SaveKind::Manual,
            schema_version: 2,
            revision: 1,
            metadata: SaveMetadata {
                display_name: "Marsh".into(),
                playtime_secs: 3600,
                ..SaveMetadata::default()
            },
            payload: vec![1, 2, 3],
            checksum: ChecksumInfo {
                algorithm: "sha256".into(),
                value: "abc".into(),
            },
            compression: CompressionInfo {
                algorithm: "none".into(),
                original_size: 3,
                compressed_size: 3,
            },
            encryption: EncryptionInfo {
                algorithm: "aes-256-gcm".into(),
                nonce: "n".into(),
                tag: "t".into(),
            },
            sync_status: SyncStatus::LocalOnly,
            last_modified_at: 1_000,
            last_synced_at: None,
            device_id: Some("deck".into()),
            platform: None,
            is_corrupted: false,
            corruption_reason: None,
            load_count: 0,
            save_count: 1,
            created_at: 1_000,
        }
    }

    fn backup(owner: &str, slot: u32, id: &str, created_at: i64) -> BackupRecord {
        let source = record(owner, slot);
        BackupRecord {
            id: id.to_string(),
            save_id: source.id,
            owner_id: owner.to_string(),
            slot_id: slot,
            slot_name: source.slot_name,
            revision: 1,
            reason: BackupReason::PreUpdate,
            payload: source.payload,
            backup_checksum: "x".into(),
            checksum: source.checksum,
            compression: source.compression,
            encryption: source.encryption,
            schema_version: 2,
            metadata: source.metadata,
            data_size: 3,
            created_at,
            expires_at: created_at + 100,
        }
    }

    #[test]
    fn test_open_memory() {
        assert!(SqliteStorage::open_memory().is_ok());
    }

    #[test]
    fn test_save_crud() {
        let mut storage = SqliteStorage::open_memory().unwrap();
        let rec = record("p1", 3);
        storage.insert_save(&rec, "test").unwrap();

        let loaded = storage.get_save("p1", 3).unwrap().unwrap();
        assert_eq!(loaded.id, rec.id);
        assert_eq!(loaded.payload, vec![1, 2, 3]);
        assert_eq!(loaded.metadata.display_name, "Marsh");
        assert_eq!(loaded.device_id.as_deref(), Some("deck"));
        assert!(storage.get_save("p2", 3).unwrap().is_none());

        let mut changed = loaded.clone();
        changed.revision = 2;
        changed.sync_status = SyncStatus::LocalNewer;
        storage
            .replace_save(&changed, EventType::SaveUpdated, 1, "test")
            .unwrap();
        assert_eq!(storage.get_save("p1", 3).unwrap().unwrap().revision, 2);

        assert!(storage.delete_save("p1", 3, "test").unwrap());
        assert!(!storage.delete_save("p1", 3, "test").unwrap());
        assert!(storage.get_save_by_id("p1", &rec.id).unwrap().is_none());
    }

    #[test]
    fn test_duplicate_slot_is_slot_occupied() {
        let mut storage = SqliteStorage::open_memory().unwrap();
        storage.insert_save(&record("p1", 3), "test").unwrap();

        let mut dup = record("p1", 3);
        dup.id = "save_other".into();
        let err = storage.insert_save(&dup, "test").unwrap_err();
        assert!(matches!(err, Error::SlotOccupied { slot: 3, .. }));
    }

    #[test]
    fn test_replace_missing_save() {
        let mut storage = SqliteStorage::open_memory().unwrap();
        let err = storage
            .replace_save(&record("p1", 1), EventType::SaveUpdated, 1, "test")
            .unwrap_err();
        assert!(matches!(err, Error::SaveIdNotFound { .. }));
    }

    #[test]
    fn test_sync_status_change_is_audited() {
        let mut storage = SqliteStorage::open_memory().unwrap();
        let rec = record("p1", 0);
        storage.insert_save(&rec, "test").unwrap();

        storage
            .set_sync_status(&rec.id, SyncStatus::Conflict, None, "test")
            .unwrap();
        let loaded = storage.get_save("p1", 0).unwrap().unwrap();
        assert_eq!(loaded.sync_status, SyncStatus::Conflict);
        assert_eq!(loaded.last_synced_at, None);

        let events = get_events(storage.conn(), "save", &rec.id, None).unwrap();
        assert_eq!(events[0].event_type, EventType::SyncStatusChanged);
        assert_eq!(events[0].new_value.as_deref(), Some("CONFLICT"));
    }

    #[test]
    fn test_occupied_slots_sorted() {
        let mut storage = SqliteStorage::open_memory().unwrap();
        for slot in [7, 2, 4] {
            storage.insert_save(&record("p1", slot), "test").unwrap();
        }
        assert_eq!(storage.occupied_slots("p1").unwrap(), vec![2, 4, 7]);
    }

    #[test]
    fn test_backups_newest_first_and_trim() {
        let mut storage = SqliteStorage::open_memory().unwrap();
        for (i, ts) in [10, 30, 20, 40].into_iter().enumerate() {
            storage
                .insert_backup(&backup("p1", 1, &format!("bkp_{i}"), ts), "test")
                .unwrap();
        }

        let listed = storage.list_backups("p1", Some(1), 50).unwrap();
        let ids: Vec<_> = listed.iter().map(|b| b.id.as_str()).collect();
        assert_eq!(ids, vec!["bkp_3", "bkp_1", "bkp_2", "bkp_0"]);

        let removed = storage.trim_backups("p1", 1, 2, "test").unwrap();
        assert_eq!(removed, 2);
        assert_eq!(storage.count_backups("p1", 1).unwrap(), 2);
        assert!(storage.get_backup("p1", "bkp_0").unwrap().is_none());
        assert!(storage.get_backup("p1", "bkp_3").unwrap().is_some());
    }

    #[test]
    fn test_delete_expired_backups() {
        let mut storage = SqliteStorage::open_memory().unwrap();
        storage
            .insert_backup(&backup("p1", 1, "bkp_old", 0), "test")
            .unwrap();
        storage
            .insert_backup(&backup("p1", 1, "bkp_new", 1_000), "test")
            .unwrap();

        assert_eq!(storage.delete_expired_backups(500, "test").unwrap(), 1);
        assert!(storage.get_backup("p1", "bkp_new").unwrap().is_some());
    }

    #[test]
    fn test_backup_survives_save_deletion() {
        let mut storage = SqliteStorage::open_memory().unwrap();
        storage.insert_save(&record("p1", 1), "test").unwrap();
        storage
            .insert_backup(&backup("p1", 1, "bkp_1", 5), "test")
            .unwrap();

        storage.delete_save("p1", 1, "test").unwrap();
        assert!(storage.get_backup("p1", "bkp_1").unwrap().is_some());
    }
}
