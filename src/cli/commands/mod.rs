//! Command implementations.

pub mod autosave;
pub mod backup;
pub mod completions;
pub mod init;
pub mod quick;
pub mod save;
pub mod sync;
pub mod version;

use crate::cli::MetadataArgs;
use crate::error::{Error, Result};
use crate::model::SaveKind;
use crate::store::MetadataPatch;
use crate::validate::{invalid_value, normalize_save_kind};
use serde_json::Value;
use std::io::Read;
use std::path::Path;

/// Read a JSON document from a file, or from stdin when `source` is `-`.
pub(crate) fn read_json_input(source: &str) -> Result<Value> {
    let raw = if source == "-" {
        let mut buf = String::new();
        std::io::stdin().read_to_string(&mut buf)?;
        buf
    } else {
        std::fs::read_to_string(source)?
    };

    if raw.trim().is_empty() {
        return Err(Error::InvalidArgument(format!(
            "no JSON data in {}",
            if source == "-" { "stdin" } else { source }
        )));
    }

    Ok(serde_json::from_str(&raw)?)
}

/// Print a loaded payload, or write it to `output` when given.
pub(crate) fn emit_payload(payload: &Value, output: Option<&Path>) -> Result<()> {
    let body = serde_json::to_string_pretty(payload)?;
    match output {
        Some(path) => std::fs::write(path, body)?,
        None => println!("{body}"),
    }
    Ok(())
}

impl MetadataArgs {
    /// Parsed `--kind`, if given.
    pub(crate) fn save_kind(&self) -> Result<Option<SaveKind>> {
        self.kind
            .as_deref()
            .map(|k| normalize_save_kind(k).map_err(|e| invalid_value("save kind", e)))
            .transpose()
    }

    /// Only the metadata fields actually passed on the command line.
    pub(crate) fn patch(&self) -> Option<MetadataPatch> {
        let patch = MetadataPatch {
            display_name: self.display_name.clone(),
            playtime_secs: self.playtime,
            level: self.level,
            chapter: self.chapter.clone(),
            custom: serde_json::Map::new(),
        };
        let touched = patch.display_name.is_some()
            || patch.playtime_secs.is_some()
            || patch.level.is_some()
            || patch.chapter.is_some();
        touched.then_some(patch)
    }

    /// Full metadata for a new save.
    pub(crate) fn metadata(&self) -> Option<crate::model::SaveMetadata> {
        self.patch().map(|p| crate::model::SaveMetadata {
            display_name: p.display_name.unwrap_or_default(),
            playtime_secs: p.playtime_secs.unwrap_or(0),
            level: p.level,
            chapter: p.chapter,
            custom: serde_json::Map::new(),
        })
    }
}

/// Render an epoch-millis timestamp for humans.
pub(crate) fn format_millis(ms: i64) -> String {
    chrono::DateTime::from_timestamp_millis(ms).map_or_else(
        || ms.to_string(),
        |dt| dt.format("%Y-%m-%d %H:%M:%S").to_string(),
    )
}
