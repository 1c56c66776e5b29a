//! Create the save database.
//!
//! The database lives at `~/.gamesave/data/saves.db` (or
//! `~/.gamesave/test/saves.db` in test mode) unless `--db` or `GSAVE_DB`
//! point elsewhere. Init is idempotent: re-running it on an existing
//! database only applies pending migrations. `--force` deletes the file
//! first.

use crate::config::resolve_db_path;
use crate::error::{Error, Result};
use crate::storage::SqliteStorage;
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

#[derive(Serialize)]
struct InitOutput {
    database: PathBuf,
    created: bool,
}

/// Execute the init command.
///
/// # Errors
///
/// Returns an error if the directory or database cannot be created.
pub fn execute(db: Option<&Path>, force: bool, json: bool) -> Result<()> {
    let db_path = resolve_db_path(db)
        .ok_or_else(|| Error::Config("Could not determine the gamesave directory".to_string()))?;

    let existed = db_path.exists();
    if existed && force {
        info!(path = %db_path.display(), "Removing existing database");
        fs::remove_file(&db_path)?;
    }

    if let Some(parent) = db_path.parent() {
        fs::create_dir_all(parent)?;
    }

    // Opening applies the schema and any pending migrations.
    SqliteStorage::open(&db_path)?;

    let created = !existed || force;
    if json {
        let output = InitOutput {
            database: db_path,
            created,
        };
        println!("{}", serde_json::to_string(&output)?);
    } else if created {
        println!("Initialized save database");
        println!("  Database: {}", db_path.display());
    } else {
        println!("Save database already initialized (migrations applied)");
        println!("  Database: {}", db_path.display());
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_init_creates_database_and_parents() {
        let dir = TempDir::new().unwrap();
        let db = dir.path().join("nested").join("saves.db");

        execute(Some(&db), false, true).unwrap();
        assert!(db.exists());

        let storage = SqliteStorage::open(&db).unwrap();
        assert!(storage.list_saves("nobody").unwrap().is_empty());
    }

    #[test]
    fn test_init_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let db = dir.path().join("saves.db");

        execute(Some(&db), false, true).unwrap();
        execute(Some(&db), false, true).unwrap();
        execute(Some(&db), true, true).unwrap();
        assert!(db.exists());
    }
}
