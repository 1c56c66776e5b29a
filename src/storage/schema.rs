//! Database schema definitions.
//!
//! Timestamps are INTEGER Unix milliseconds. Descriptor structs
//! (checksum, compression, encryption, metadata) are stored flattened into
//! columns except `metadata`, which is a JSON document.

use rusqlite::{Connection, Result};

/// Current schema version for migration tracking.
pub const CURRENT_SCHEMA_VERSION: i32 = 1;

/// The complete SQL schema for the save database.
pub const SCHEMA_SQL: &str = r"
-- ====================
-- Schema Version Tracking
-- ====================

CREATE TABLE IF NOT EXISTS schema_migrations (
    version TEXT PRIMARY KEY,
    applied_at INTEGER NOT NULL
);

-- ====================
-- Saves
-- ====================

CREATE TABLE IF NOT EXISTS save_records (
    id TEXT PRIMARY KEY,
    owner_id TEXT NOT NULL,
    slot_id INTEGER NOT NULL CHECK (slot_id >= 0),
    slot_name TEXT NOT NULL,
    save_kind TEXT NOT NULL DEFAULT 'manual'
        CHECK (save_kind IN ('auto', 'manual', 'quicksave')),
    schema_version INTEGER NOT NULL,
    revision INTEGER NOT NULL DEFAULT 1 CHECK (revision >= 1),
    metadata TEXT NOT NULL DEFAULT '{}',
    payload BLOB NOT NULL,
    checksum_algorithm TEXT NOT NULL,
    checksum TEXT NOT NULL,
    compression_algorithm TEXT NOT NULL,
    original_size INTEGER NOT NULL,
    compressed_size INTEGER NOT NULL,
    encryption_algorithm TEXT NOT NULL,
    encryption_nonce TEXT NOT NULL,
    encryption_tag TEXT NOT NULL,
    sync_status TEXT NOT NULL DEFAULT 'LOCAL_ONLY',
    last_modified_at INTEGER NOT NULL,
    last_synced_at INTEGER,
    device_id TEXT,
    platform TEXT,
    is_corrupted INTEGER NOT NULL DEFAULT 0,
    corruption_reason TEXT,
    load_count INTEGER NOT NULL DEFAULT 0,
    save_count INTEGER NOT NULL DEFAULT 1,
    created_at INTEGER NOT NULL,
    UNIQUE (owner_id, slot_id)
);

CREATE INDEX IF NOT EXISTS idx_save_records_owner ON save_records(owner_id, slot_id);

-- ====================
-- Backups (no FK: backups outlive their save)
-- ====================

CREATE TABLE IF NOT EXISTS save_backups (
    id TEXT PRIMARY KEY,
    save_id TEXT NOT NULL,
    owner_id TEXT NOT NULL,
    slot_id INTEGER NOT NULL,
    slot_name TEXT NOT NULL,
    revision INTEGER NOT NULL,
    reason TEXT NOT NULL
        CHECK (reason IN ('scheduled', 'pre_update', 'manual', 'conflict', 'corruption_detected')),
    payload BLOB NOT NULL,
    backup_checksum TEXT NOT NULL,
    checksum_algorithm TEXT NOT NULL,
    checksum TEXT NOT NULL,
    compression_algorithm TEXT NOT NULL,
    original_size INTEGER NOT NULL,
    compressed_size INTEGER NOT NULL,
    encryption_algorithm TEXT NOT NULL,
    encryption_nonce TEXT NOT NULL,
    encryption_tag TEXT NOT NULL,
    schema_version INTEGER NOT NULL,
    metadata TEXT NOT NULL DEFAULT '{}',
    data_size INTEGER NOT NULL,
    created_at INTEGER NOT NULL,
    expires_at INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_save_backups_slot ON save_backups(owner_id, slot_id, created_at);

-- ====================
-- Audit Events
-- ====================

CREATE TABLE IF NOT EXISTS events (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    entity_type TEXT NOT NULL,
    entity_id TEXT NOT NULL,
    event_type TEXT NOT NULL,
    actor TEXT NOT NULL,
    old_value TEXT,
    new_value TEXT,
    comment TEXT,
    created_at INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_events_entity ON events(entity_type, entity_id);
";

/// Apply the schema to the database.
///
/// Idempotent: every statement uses `IF NOT EXISTS`.
///
/// # Errors
///
/// Returns an error if the SQL execution fails or pragmas cannot be set.
pub fn apply_schema(conn: &Connection) -> Result<()> {
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.pragma_update(None, "foreign_keys", "ON")?;
    conn.pragma_update(None, "synchronous", "NORMAL")?;
    conn.pragma_update(None, "temp_store", "MEMORY")?;

    conn.execute_batch(SCHEMA_SQL)?;

    super::migrations::run_migrations(conn)?;

    conn.execute(
        "INSERT OR IGNORE INTO schema_migrations (version, applied_at) VALUES (?1, ?2)",
        rusqlite::params![
            format!("v{CURRENT_SCHEMA_VERSION}"),
            chrono::Utc::now().timestamp_millis()
        ],
    )?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_apply_schema() {
        let conn = Connection::open_in_memory().unwrap();
        apply_schema(&conn).expect("Failed to apply schema");

        let tables: Vec<String> = conn
            .prepare("SELECT name FROM sqlite_master WHERE type='table' ORDER BY name")
            .unwrap()
            .query_map([], |row| row.get(0))
            .unwrap()
            .collect::<Result<Vec<_>, _>>()
            .unwrap();

        assert!(tables.contains(&"save_records".to_string()));
        assert!(tables.contains(&"save_backups".to_string()));
        assert!(tables.contains(&"events".to_string()));
        assert!(tables.contains(&"schema_migrations".to_string()));
    }

    #[test]
    fn test_schema_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        apply_schema(&conn).expect("First apply failed");
        apply_schema(&conn).expect("Second apply failed");
    }

    #[test]
    fn test_owner_slot_is_unique() {
        let conn = Connection::open_in_memory().unwrap();
        apply_schema(&conn).unwrap();

        let insert = |id: &str| {
            conn.execute(
                "INSERT INTO save_records (id, owner_id, slot_id, slot_name, schema_version, payload,
                    checksum_algorithm, checksum, compression_algorithm, original_size, compressed_size,
                    encryption_algorithm, encryption_nonce, encryption_tag, last_modified_at, created_at)
                 VALUES (?1, 'p1', 3, 'Slot', 2, x'00', 'sha256', 'c', 'none', 1, 1,
                    'aes-256-gcm', 'n', 't', 0, 0)",
                [id],
            )
        };

        assert!(insert("save_a").is_ok());
        assert!(insert("save_b").is_err());
    }

    #[test]
    fn test_backup_reason_constraint() {
        let conn = Connection::open_in_memory().unwrap();
        apply_schema(&conn).unwrap();

        let result = conn.execute(
            "INSERT INTO save_backups (id, save_id, owner_id, slot_id, slot_name, revision, reason,
                payload, backup_checksum, checksum_algorithm, checksum, compression_algorithm,
                original_size, compressed_size, encryption_algorithm, encryption_nonce,
                encryption_tag, schema_version, data_size, created_at, expires_at)
             VALUES ('b1', 's1', 'p1', 0, 'Slot', 1, 'whenever', x'00', 'c', 'sha256', 'c', 'none',
                1, 1, 'aes-256-gcm', 'n', 't', 2, 1, 0, 0)",
            [],
        );
        assert!(result.is_err());
    }
}
