//! Backup commands.

use crate::cli::commands::format_millis;
use crate::cli::{BackupCommands, CommandContext};
use crate::error::Result;
use crate::model::BackupInfo;
use colored::Colorize;
use serde::Serialize;

#[derive(Serialize)]
struct BackupListOutput {
    count: usize,
    backups: Vec<BackupInfo>,
}

#[derive(Serialize)]
struct RestoreOutput {
    backup_id: String,
    slot_id: u32,
    revision: i64,
}

#[derive(Serialize)]
struct DeleteOutput<'a> {
    id: &'a str,
    deleted: bool,
}

#[derive(Serialize)]
struct PurgeOutput {
    purged: usize,
}

/// Execute a backup command.
///
/// # Errors
///
/// Returns an error if the store cannot be opened or the operation fails.
pub fn execute(command: &BackupCommands, ctx: &CommandContext, json: bool) -> Result<()> {
    let mut store = ctx.open_store()?;

    match command {
        BackupCommands::List { slot } => {
            let owner = ctx.owner()?;
            let backups = store.backups().list_backups(&owner, *slot)?;
            if json {
                let output = BackupListOutput {
                    count: backups.len(),
                    backups,
                };
                println!("{}", serde_json::to_string(&output)?);
            } else if backups.is_empty() {
                println!("No backups.");
            } else {
                println!(
                    "{}",
                    format!(
                        "{:<38} {:>4} {:>4}  {:<12} {:>8}  {}",
                        "ID", "SLOT", "REV", "REASON", "BYTES", "CREATED"
                    )
                    .bold()
                );
                for b in &backups {
                    println!(
                        "{:<38} {:>4} {:>4}  {:<12} {:>8}  {}",
                        b.id,
                        b.slot_id,
                        b.revision,
                        b.reason.as_str(),
                        b.data_size,
                        format_millis(b.created_at).dimmed()
                    );
                }
            }
        }

        BackupCommands::Restore { id } => {
            let owner = ctx.owner()?;
            let record = store.backups().restore_from_backup(&owner, id)?;
            if json {
                let output = RestoreOutput {
                    backup_id: id.clone(),
                    slot_id: record.slot_id,
                    revision: record.revision,
                };
                println!("{}", serde_json::to_string(&output)?);
            } else {
                println!(
                    "Restored slot {} from backup {id} (revision {})",
                    record.slot_id, record.revision
                );
            }
        }

        BackupCommands::Delete { id } => {
            let owner = ctx.owner()?;
            store.backups().delete_backup(&owner, id)?;
            if json {
                let output = DeleteOutput { id, deleted: true };
                println!("{}", serde_json::to_string(&output)?);
            } else {
                println!("Deleted backup {id}");
            }
        }

        BackupCommands::Purge => {
            let purged = store.backups().purge_expired()?;
            if json {
                println!("{}", serde_json::to_string(&PurgeOutput { purged })?);
            } else {
                println!("Purged {purged} expired backups");
            }
        }
    }

    Ok(())
}
