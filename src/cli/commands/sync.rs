//! Sync commands: status, conflict resolution, upload and download.

use crate::cli::commands::save::print_summaries;
use crate::cli::commands::{emit_payload, format_millis, read_json_input};
use crate::cli::{CommandContext, SyncCommands};
use crate::error::{Error, Result};
use crate::model::{SaveSummary, SyncStatus};
use crate::sync::{LocalSaveInfo, ResolutionOutcome, SyncCoordinator, SyncResult, UploadOptions};
use crate::validate::{invalid_value, normalize_resolution};
use colored::Colorize;
use serde::Serialize;

#[derive(Serialize)]
struct StatusOutput {
    results: Vec<SyncResult>,
    conflicts: usize,
}

#[derive(Serialize)]
struct CloudListOutput {
    count: usize,
    saves: Vec<SaveSummary>,
}

/// Execute a sync command.
///
/// # Errors
///
/// Returns an error if the store cannot be opened or the operation fails.
pub fn execute(command: &SyncCommands, ctx: &CommandContext, json: bool) -> Result<()> {
    let owner = ctx.owner()?;
    let mut store = ctx.open_store()?;
    let mut coordinator = SyncCoordinator::new(&mut store);

    match command {
        SyncCommands::Status {
            slot,
            checksum,
            modified_at,
            batch,
        } => {
            let locals: Vec<LocalSaveInfo> = match (batch, slot) {
                (Some(source), _) => serde_json::from_value(read_json_input(source)?)?,
                (None, Some(slot_id)) => vec![LocalSaveInfo {
                    slot_id: *slot_id,
                    checksum: checksum.clone(),
                    last_modified_at: *modified_at,
                }],
                (None, None) => {
                    return Err(Error::InvalidArgument(
                        "pass --slot or --batch".to_string(),
                    ));
                }
            };

            let results = coordinator.batch_sync(&owner, &locals)?;
            let conflicts = results
                .iter()
                .filter(|r| r.status == SyncStatus::Conflict)
                .count();

            if json {
                let output = StatusOutput { results, conflicts };
                println!("{}", serde_json::to_string(&output)?);
            } else {
                for result in &results {
                    print_result(result);
                }
            }
            Ok(())
        }

        SyncCommands::Resolve {
            save_id,
            resolution,
            merged,
        } => {
            let resolution =
                normalize_resolution(resolution).map_err(|e| invalid_value("resolution", e))?;
            let merged = merged.as_deref().map(read_json_input).transpose()?;
            let outcome =
                coordinator.resolve_conflict(&owner, save_id, resolution, merged.as_ref())?;

            if json {
                println!("{}", serde_json::to_string(&outcome)?);
            } else {
                print_outcome(&outcome);
            }
            Ok(())
        }

        SyncCommands::Upload {
            slot,
            data,
            expected_revision,
            meta,
        } => {
            let payload = read_json_input(data)?;
            let options = UploadOptions {
                slot_name: meta.name.clone(),
                save_kind: meta.save_kind()?,
                metadata: meta.metadata(),
                device_id: ctx.device.clone(),
                platform: ctx.platform.clone(),
                expected_revision: *expected_revision,
            };
            let result = coordinator.upload_to_cloud(&owner, *slot, &payload, options)?;

            if json {
                println!("{}", serde_json::to_string(&result)?);
            } else {
                let verb = if result.created { "Created" } else { "Updated" };
                println!(
                    "{verb} cloud save in slot {} (revision {})",
                    result.save.slot_id, result.save.revision
                );
            }
            Ok(())
        }

        SyncCommands::Download { slot, output } => {
            let loaded = coordinator.download_from_cloud(&owner, *slot)?;
            if json && output.is_none() {
                println!("{}", serde_json::to_string(&loaded)?);
            } else {
                emit_payload(&loaded.payload, output.as_deref())?;
            }
            Ok(())
        }

        SyncCommands::List => {
            let saves = coordinator.list_cloud_saves(&owner)?;
            if json {
                let output = CloudListOutput {
                    count: saves.len(),
                    saves,
                };
                println!("{}", serde_json::to_string(&output)?);
            } else if saves.is_empty() {
                println!("No cloud saves for {owner}.");
            } else {
                print_summaries(&saves);
            }
            Ok(())
        }
    }
}

fn print_result(result: &SyncResult) {
    let status = match result.status {
        SyncStatus::Synced => result.status.to_string().green(),
        SyncStatus::Conflict => result.status.to_string().red().bold(),
        _ => result.status.to_string().yellow(),
    };
    println!("Slot {}: {status}", result.slot_id);

    if let Some(conflict) = &result.conflict {
        println!(
            "  Local modified:  {}",
            format_millis(conflict.local_last_modified)
        );
        println!(
            "  Cloud modified:  {}",
            format_millis(conflict.cloud_last_modified)
        );
        println!("  Suggested:       {}", conflict.suggested_resolution);
        if let Some(cloud) = &result.cloud_save {
            println!(
                "  {}",
                format!(
                    "gsave sync resolve --save-id {} --resolution {}",
                    cloud.id, conflict.suggested_resolution
                )
                .dimmed()
            );
        }
    }
}

fn print_outcome(outcome: &ResolutionOutcome) {
    println!(
        "Resolved slot {} with {} (now {}, revision {})",
        outcome.save.slot_id, outcome.resolution, outcome.save.sync_status, outcome.save.revision
    );
    if let Some(copy) = &outcome.copy {
        println!("  Cloud copy kept in slot {} \"{}\"", copy.slot_id, copy.slot_name);
    }
    println!("  Backup: {}", outcome.backup_id);
}
