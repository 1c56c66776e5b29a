//! Audit event storage and retrieval.
//!
//! Every save and backup mutation writes an event in the same transaction.

use rusqlite::{Connection, Result};
use tracing::warn;

/// Event types for audit logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventType {
    // Save events
    SaveCreated,
    SaveUpdated,
    SaveDeleted,
    SaveCorrupted,
    SaveRestored,
    SyncStatusChanged,
    ConflictResolved,

    // Backup events
    BackupCreated,
    BackupDeleted,
    BackupsPurged,
}

impl EventType {
    /// Get the string representation for storage.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::SaveCreated => "save_created",
            Self::SaveUpdated => "save_updated",
            Self::SaveDeleted => "save_deleted",
            Self::SaveCorrupted => "save_corrupted",
            Self::SaveRestored => "save_restored",
            Self::SyncStatusChanged => "sync_status_changed",
            Self::ConflictResolved => "conflict_resolved",
            Self::BackupCreated => "backup_created",
            Self::BackupDeleted => "backup_deleted",
            Self::BackupsPurged => "backups_purged",
        }
    }

    /// Parse a stored name. Unknown names are logged and read as `SaveUpdated`.
    fn parse(s: &str) -> Self {
        match s {
            "save_created" => Self::SaveCreated,
            "save_updated" => Self::SaveUpdated,
            "save_deleted" => Self::SaveDeleted,
            "save_corrupted" => Self::SaveCorrupted,
            "save_restored" => Self::SaveRestored,
            "sync_status_changed" => Self::SyncStatusChanged,
            "conflict_resolved" => Self::ConflictResolved,
            "backup_created" => Self::BackupCreated,
            "backup_deleted" => Self::BackupDeleted,
            "backups_purged" => Self::BackupsPurged,
            other => {
                warn!(event_type = other, "Unknown audit event type");
                Self::SaveUpdated
            }
        }
    }
}

/// An audit event record.
#[derive(Debug, Clone)]
pub struct Event {
    pub id: i64,
    pub entity_type: String,
    pub entity_id: String,
    pub event_type: EventType,
    pub actor: String,
    pub old_value: Option<String>,
    pub new_value: Option<String>,
    pub comment: Option<String>,
    pub created_at: i64,
}

impl Event {
    /// Create a new event (id will be assigned by database).
    #[must_use]
    pub fn new(entity_type: &str, entity_id: &str, event_type: EventType, actor: &str) -> Self {
        Self {
            id: 0,
            entity_type: entity_type.to_string(),
            entity_id: entity_id.to_string(),
            event_type,
            actor: actor.to_string(),
            old_value: None,
            new_value: None,
            comment: None,
            created_at: chrono::Utc::now().timestamp_millis(),
        }
    }

    /// Add old/new values for field change tracking.
    #[must_use]
    pub fn with_values(mut self, old: Option<String>, new: Option<String>) -> Self {
        self.old_value = old;
        self.new_value = new;
        self
    }

    /// Add a comment to the event.
    #[must_use]
    pub fn with_comment(mut self, comment: &str) -> Self {
        self.comment = Some(comment.to_string());
        self
    }
}

/// Insert an event into the database.
///
/// # Errors
///
/// Returns an error if the insert fails.
pub fn insert_event(conn: &Connection, event: &Event) -> Result<i64> {
    conn.execute(
        "INSERT INTO events (entity_type, entity_id, event_type, actor, old_value, new_value, comment, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        rusqlite::params![
            event.entity_type,
            event.entity_id,
            event.event_type.as_str(),
            event.actor,
            event.old_value,
            event.new_value,
            event.comment,
            event.created_at,
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

/// Get events for an entity, newest first.
///
/// # Errors
///
/// Returns an error if the query fails.
pub fn get_events(
    conn: &Connection,
    entity_type: &str,
    entity_id: &str,
    limit: Option<u32>,
) -> Result<Vec<Event>> {
    let limit = limit.unwrap_or(100);
    let mut stmt = conn.prepare(
        "SELECT id, entity_type, entity_id, event_type, actor, old_value, new_value, comment, created_at
         FROM events
         WHERE entity_type = ?1 AND entity_id = ?2
         ORDER BY created_at DESC, id DESC
         LIMIT ?3",
    )?;

    let rows = stmt.query_map(rusqlite::params![entity_type, entity_id, limit], |row| {
        Ok(Event {
            id: row.get(0)?,
            entity_type: row.get(1)?,
            entity_id: row.get(2)?,
            event_type: EventType::parse(row.get::<_, String>(3)?.as_str()),
            actor: row.get(4)?,
            old_value: row.get(5)?,
            new_value: row.get(6)?,
            comment: row.get(7)?,
            created_at: row.get(8)?,
        })
    })?;

    rows.collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::schema::apply_schema;

    #[test]
    fn test_every_event_type_reads_back() {
        let all = [
            EventType::SaveCreated,
            EventType::SaveUpdated,
            EventType::SaveDeleted,
            EventType::SaveCorrupted,
            EventType::SaveRestored,
            EventType::SyncStatusChanged,
            EventType::ConflictResolved,
            EventType::BackupCreated,
            EventType::BackupDeleted,
            EventType::BackupsPurged,
        ];
        for event_type in all {
            assert_eq!(EventType::parse(event_type.as_str()), event_type);
        }
        assert_eq!(EventType::parse("save_renamed"), EventType::SaveUpdated);
    }

    #[test]
    fn test_event_insert_and_get() {
        let conn = Connection::open_in_memory().unwrap();
        apply_schema(&conn).unwrap();

        let event = Event::new("save", "save_123", EventType::SaveCorrupted, "deck")
            .with_comment("Checksum verification failed");

        let id = insert_event(&conn, &event).unwrap();
        assert!(id > 0);

        let events = get_events(&conn, "save", "save_123", Some(10)).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].actor, "deck");
        assert_eq!(events[0].event_type, EventType::SaveCorrupted);
        assert_eq!(
            events[0].comment.as_deref(),
            Some("Checksum verification failed")
        );
    }
}
