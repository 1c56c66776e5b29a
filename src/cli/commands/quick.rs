//! Quick save / quick load.

use crate::autosave::{quick_load, quick_save};
use crate::cli::commands::{emit_payload, read_json_input};
use crate::cli::{CommandContext, QuickCommands};
use crate::error::Result;
use crate::model::SaveSummary;
use serde::Serialize;

#[derive(Serialize)]
struct QuickSaveOutput {
    save: SaveSummary,
}

/// Execute a quick command.
///
/// # Errors
///
/// Returns an error if the store cannot be opened or the operation fails.
pub fn execute(command: &QuickCommands, ctx: &CommandContext, json: bool) -> Result<()> {
    let owner = ctx.owner()?;
    let mut store = ctx.open_store()?;

    match command {
        QuickCommands::Save { data } => {
            let payload = read_json_input(data)?;
            let record = quick_save(&mut store, &owner, &payload)?;
            if json {
                let output = QuickSaveOutput {
                    save: record.summary(),
                };
                println!("{}", serde_json::to_string(&output)?);
            } else {
                println!(
                    "Quick saved to slot {} (revision {})",
                    record.slot_id, record.revision
                );
            }
        }

        QuickCommands::Load { output } => {
            let loaded = quick_load(&mut store, &owner)?;
            if json && output.is_none() {
                println!("{}", serde_json::to_string(&loaded)?);
            } else {
                emit_payload(&loaded.payload, output.as_deref())?;
            }
        }
    }

    Ok(())
}
