//! Save slot commands.

use crate::cli::commands::{emit_payload, format_millis, read_json_input};
use crate::cli::{CommandContext, SaveCommands};
use crate::error::Result;
use crate::model::{BackupInfo, SaveRecord, SaveSummary};
use crate::store::{SaveOptions, SaveUpdate};
use colored::Colorize;
use serde::Serialize;

#[derive(Serialize)]
struct WriteOutput {
    save: SaveSummary,
}

#[derive(Serialize)]
struct DeleteOutput {
    slot_id: u32,
    backup: BackupInfo,
}

#[derive(Serialize)]
struct ListOutput {
    owner_id: String,
    count: usize,
    saves: Vec<SaveSummary>,
}

#[derive(Serialize)]
struct EmptySlotsOutput {
    slots: Vec<u32>,
}

/// Execute a save command.
///
/// # Errors
///
/// Returns an error if the store cannot be opened or the operation fails.
pub fn execute(command: &SaveCommands, ctx: &CommandContext, json: bool) -> Result<()> {
    let owner = ctx.owner()?;
    let mut store = ctx.open_store()?;

    match command {
        SaveCommands::Create { slot, data, meta } => {
            let payload = read_json_input(data)?;
            let options = SaveOptions {
                slot_name: meta.name.clone(),
                save_kind: meta.save_kind()?,
                metadata: meta.metadata(),
                device_id: ctx.device.clone(),
                platform: ctx.platform.clone(),
            };
            let record = store.create(&owner, *slot, &payload, options)?;
            print_written(&record, "Created", json)
        }

        SaveCommands::Update { slot, data, meta } => {
            let update = SaveUpdate {
                payload: data.as_deref().map(read_json_input).transpose()?,
                slot_name: meta.name.clone(),
                save_kind: meta.save_kind()?,
                metadata: meta.patch(),
                device_id: ctx.device.clone(),
                platform: ctx.platform.clone(),
            };
            let record = store.update(&owner, *slot, update)?;
            print_written(&record, "Updated", json)
        }

        SaveCommands::Load { slot, output } => {
            let loaded = store.load(&owner, *slot)?;
            if json && output.is_none() {
                println!("{}", serde_json::to_string(&loaded)?);
                return Ok(());
            }
            emit_payload(&loaded.payload, output.as_deref())?;
            if let Some(path) = output {
                if !json {
                    println!("Wrote slot {slot} to {}", path.display());
                }
            }
            Ok(())
        }

        SaveCommands::Delete { slot } => {
            let backup = store.delete(&owner, *slot)?;
            if json {
                let output = DeleteOutput {
                    slot_id: *slot,
                    backup,
                };
                println!("{}", serde_json::to_string(&output)?);
            } else {
                println!("Deleted slot {slot}");
                println!("  Backup: {}", backup.id);
            }
            Ok(())
        }

        SaveCommands::List => {
            let saves = store.list(&owner)?;
            if json {
                let output = ListOutput {
                    owner_id: owner,
                    count: saves.len(),
                    saves,
                };
                println!("{}", serde_json::to_string(&output)?);
            } else if saves.is_empty() {
                println!("No saves for {owner}.");
            } else {
                print_summaries(&saves);
            }
            Ok(())
        }

        SaveCommands::Show { slot } => {
            let record = store.get(&owner, *slot)?;
            if json {
                println!("{}", serde_json::to_string(&record)?);
            } else {
                print_record(&record);
            }
            Ok(())
        }

        SaveCommands::EmptySlots { count } => {
            let slots = store.list_empty_slots(&owner, *count)?;
            if json {
                println!("{}", serde_json::to_string(&EmptySlotsOutput { slots })?);
            } else if slots.is_empty() {
                println!("No empty slots.");
            } else {
                let list: Vec<String> = slots.iter().map(ToString::to_string).collect();
                println!("Empty slots: {}", list.join(", "));
            }
            Ok(())
        }
    }
}

fn print_written(record: &SaveRecord, verb: &str, json: bool) -> Result<()> {
    if json {
        let output = WriteOutput {
            save: record.summary(),
        };
        println!("{}", serde_json::to_string(&output)?);
    } else {
        println!(
            "{verb} slot {} \"{}\" (revision {})",
            record.slot_id, record.slot_name, record.revision
        );
    }
    Ok(())
}

/// One line per save.
pub(crate) fn print_summaries(saves: &[SaveSummary]) {
    println!(
        "{}",
        format!(
            "{:>4}  {:<24} {:<10} {:>4}  {:<13} {}",
            "SLOT", "NAME", "KIND", "REV", "SYNC", "MODIFIED"
        )
        .bold()
    );
    for s in saves {
        let name = if s.is_corrupted {
            format!("{} (corrupted)", s.slot_name).red().to_string()
        } else {
            s.slot_name.clone()
        };
        println!(
            "{:>4}  {:<24} {:<10} {:>4}  {:<13} {}",
            s.slot_id,
            name,
            s.save_kind.to_string(),
            s.revision,
            s.sync_status.to_string(),
            format_millis(s.last_modified_at).dimmed()
        );
    }
}

fn print_record(record: &SaveRecord) {
    println!("{}", record.slot_name.cyan().bold());
    println!("  ID:        {}", record.id);
    println!("  Slot:      {}", record.slot_id);
    println!("  Kind:      {}", record.save_kind);
    println!("  Revision:  {}", record.revision);
    println!("  Schema:    v{}", record.schema_version);
    println!("  Sync:      {}", record.sync_status);
    println!("  Modified:  {}", format_millis(record.last_modified_at));
    if let Some(synced) = record.last_synced_at {
        println!("  Synced:    {}", format_millis(synced));
    }
    if !record.metadata.display_name.is_empty() {
        println!("  Display:   {}", record.metadata.display_name);
    }
    println!("  Playtime:  {}s", record.metadata.playtime_secs);
    if let Some(level) = record.metadata.level {
        println!("  Level:     {level}");
    }
    if let Some(chapter) = &record.metadata.chapter {
        println!("  Chapter:   {chapter}");
    }
    println!(
        "  Size:      {} bytes ({} compressed, {})",
        record.compression.original_size,
        record.compression.compressed_size,
        record.compression.algorithm
    );
    println!("  Checksum:  {}", record.checksum.value.dimmed());
    if let Some(device) = &record.device_id {
        println!("  Device:    {device}");
    }
    if record.is_corrupted {
        println!(
            "  {} {}",
            "Corrupted:".red().bold(),
            record.corruption_reason.as_deref().unwrap_or("unknown")
        );
    }
}
