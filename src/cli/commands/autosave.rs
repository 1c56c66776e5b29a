//! Auto-save watch loop.
//!
//! Reads one JSON payload per stdin line, queues each into the coalescer,
//! and lets the background flush loop write them to the auto-save slot.
//! Expired backups are swept alongside. A final flush runs at EOF.

use crate::autosave::{spawn_flush_loop, AutoSaveCoalescer, FlushReport, QueueOutcome};
use crate::backup::spawn_purge_loop;
use crate::cli::{AutosaveCommands, CommandContext};
use crate::error::{Error, Result};
use serde::Serialize;
use std::io::BufRead;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tracing::{info, warn};

#[derive(Debug, Default, Serialize)]
struct WatchOutput {
    lines: usize,
    queued: usize,
    throttled: usize,
    disabled: usize,
    invalid: usize,
    final_flush: FlushReport,
}

/// Execute an autosave command.
///
/// # Errors
///
/// Returns an error if the store cannot be opened or stdin cannot be read.
pub fn execute(command: &AutosaveCommands, ctx: &CommandContext, json: bool) -> Result<()> {
    match command {
        AutosaveCommands::Watch { interval, cadence } => watch(ctx, *interval, *cadence, json),
    }
}

fn watch(
    ctx: &CommandContext,
    interval: Option<u64>,
    cadence: Option<u64>,
    json: bool,
) -> Result<()> {
    if cadence == Some(0) {
        return Err(Error::InvalidArgument(
            "--cadence must be at least 1 second".to_string(),
        ));
    }

    let owner = ctx.owner()?;
    let store = ctx.open_store()?;

    let coalescer = Arc::new(AutoSaveCoalescer::new(store.settings()));
    coalescer.enable_auto_save(&owner, None, interval.map(Duration::from_secs));
    let cadence = cadence.map_or_else(|| store.settings().flush_cadence(), Duration::from_secs);
    let purge_cadence = store.settings().backup_purge_cadence();
    let store = Arc::new(Mutex::new(store));

    let rt = tokio::runtime::Runtime::new()
        .map_err(|e| Error::Other(format!("Failed to create async runtime: {e}")))?;

    let mut output = rt.block_on(async {
        let flusher = spawn_flush_loop(Arc::clone(&coalescer), Arc::clone(&store), cadence);
        let purger = spawn_purge_loop(Arc::clone(&store), purge_cadence);
        info!(owner_id = %owner, ?cadence, "Watching stdin for auto-saves");

        let reader_coalescer = Arc::clone(&coalescer);
        let reader_owner = owner.clone();
        let read = tokio::task::spawn_blocking(move || {
            read_payloads(&reader_coalescer, &reader_owner)
        })
        .await;

        flusher.abort();
        purger.abort();
        read.unwrap_or_else(|e| Err(Error::Other(format!("stdin reader failed: {e}"))))
    })?;

    let mut store = store.lock().unwrap_or_else(PoisonError::into_inner);
    output.final_flush = coalescer.flush(&mut store);

    if json {
        println!("{}", serde_json::to_string(&output)?);
    } else {
        println!(
            "Read {} payloads: {} queued, {} throttled, {} disabled, {} invalid",
            output.lines, output.queued, output.throttled, output.disabled, output.invalid
        );
        let flush = &output.final_flush;
        if !flush.is_empty() {
            println!(
                "Final flush: {} created, {} updated, {} failed",
                flush.created, flush.updated, flush.failed
            );
        }
    }
    Ok(())
}

fn read_payloads(
    coalescer: &AutoSaveCoalescer,
    owner_id: &str,
) -> Result<WatchOutput> {
    let mut output = WatchOutput::default();

    for line in std::io::stdin().lock().lines() {
        let line = line?;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        output.lines += 1;

        let data = match serde_json::from_str(line) {
            Ok(data) => data,
            Err(e) => {
                warn!(line = output.lines, error = %e, "Skipping invalid JSON line");
                output.invalid += 1;
                continue;
            }
        };

        match coalescer.queue_auto_save(owner_id, data, None) {
            QueueOutcome::Queued => output.queued += 1,
            QueueOutcome::Throttled => output.throttled += 1,
            QueueOutcome::Disabled => output.disabled += 1,
        }
    }

    Ok(output)
}
