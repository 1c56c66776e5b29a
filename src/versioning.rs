//! Payload schema validation, default merging and migration.
//!
//! Payloads are validated and migrated as raw JSON before they are bound to
//! [`SavePayload`], so an old save whose shape no longer fits the typed
//! envelope can still be upgraded.
//!
//! [`SavePayload`]: crate::model::SavePayload

use serde::Serialize;
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::error::{Error, Result};

/// Current payload schema version. Bump when adding a migration.
pub const CURRENT_VERSION: u32 = 2;

/// Object sections every payload must carry alongside `version`.
const REQUIRED_SECTIONS: [&str; 3] = ["world_state", "player_state", "progress_state"];

/// One step in the migration chain.
struct Migration {
    from: u32,
    to: u32,
    migrate: fn(Value) -> Value,
}

/// Ordered migration chain.
const MIGRATIONS: &[Migration] = &[Migration {
    from: 1,
    to: 2,
    migrate: migrate_v1_to_v2,
}];

/// v1 stored hit points as `player_state.hp` and had no settings section.
fn migrate_v1_to_v2(mut data: Value) -> Value {
    if let Some(player) = data.get_mut("player_state").and_then(Value::as_object_mut) {
        if !player.contains_key("health") {
            if let Some(hp) = player.remove("hp") {
                player.insert("health".to_string(), hp);
            }
        }
    }
    if let Some(obj) = data.as_object_mut() {
        obj.entry("settings").or_insert_with(|| json!({}));
        obj.insert("version".to_string(), json!(2));
    }
    data
}

/// Outcome of structural validation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationReport {
    pub valid: bool,
    pub errors: Vec<String>,
}

impl ValidationReport {
    /// Convert a failed report into an `InvalidPayload` error.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidPayload` carrying every violation when invalid.
    pub fn into_result(self) -> Result<()> {
        if self.valid {
            Ok(())
        } else {
            Err(Error::InvalidPayload {
                errors: self.errors,
            })
        }
    }
}

/// Check that all required sections are present and well-shaped.
///
/// Collects every violation rather than stopping at the first.
#[must_use]
pub fn validate_structure(data: &Value) -> ValidationReport {
    let Some(obj) = data.as_object() else {
        return ValidationReport {
            valid: false,
            errors: vec!["Data must be an object".to_string()],
        };
    };

    let mut errors = Vec::new();

    match obj.get("version") {
        Some(v) if v.as_u64().is_some_and(|n| u32::try_from(n).is_ok()) => {}
        _ => errors.push("Missing or invalid version field".to_string()),
    }

    for section in REQUIRED_SECTIONS {
        if !obj.get(section).is_some_and(Value::is_object) {
            errors.push(format!("Missing or invalid {section} field"));
        }
    }

    ValidationReport {
        valid: errors.is_empty(),
        errors,
    }
}

/// The canonical default payload.
#[must_use]
pub fn default_payload() -> Value {
    json!({
        "version": CURRENT_VERSION,
        "world_state": {},
        "player_state": {
            "position": {"x": 0.0, "y": 0.0},
            "health": 100.0,
            "inventory": [],
            "stats": {}
        },
        "progress_state": {
            "completed_levels": [],
            "unlocked_achievements": [],
            "collectibles": []
        },
        "settings": {}
    })
}

/// Deep-merge `partial` over the default payload.
///
/// Objects merge key by key at every depth; any other caller value (scalar,
/// array, or an object replacing a non-object default) wins as-is.
#[must_use]
pub fn merge_with_defaults(partial: &Value) -> Value {
    let mut merged = default_payload();
    deep_merge(&mut merged, partial);
    merged
}

fn deep_merge(base: &mut Value, overlay: &Value) {
    match (base, overlay) {
        (Value::Object(base_map), Value::Object(overlay_map)) => {
            for (key, value) in overlay_map {
                match base_map.get_mut(key) {
                    Some(existing) => deep_merge(existing, value),
                    None => {
                        base_map.insert(key.clone(), value.clone());
                    }
                }
            }
        }
        (base, overlay) => *base = overlay.clone(),
    }
}

/// The payload's `version` field, if it is a valid `u32`.
#[must_use]
pub fn payload_version(data: &Value) -> Option<u32> {
    data.get("version")
        .and_then(Value::as_u64)
        .and_then(|v| u32::try_from(v).ok())
}

/// Whether a payload at `version` can be brought to [`CURRENT_VERSION`].
#[must_use]
pub fn is_compatible(version: u32) -> bool {
    if version >= CURRENT_VERSION {
        return version == CURRENT_VERSION;
    }

    let mut current = version;
    while current < CURRENT_VERSION {
        match MIGRATIONS.iter().find(|m| m.from == current) {
            Some(m) => current = m.to,
            None => return false,
        }
    }
    current == CURRENT_VERSION
}

/// Apply ordered migrations until the payload reaches [`CURRENT_VERSION`].
///
/// Payloads from a newer client are returned unchanged with a warning.
///
/// # Errors
///
/// Returns `UnsupportedFormat` if the version is missing or no migration
/// step exists for an intermediate version.
pub fn migrate_to_current(data: Value) -> Result<Value> {
    let Some(version) = payload_version(&data) else {
        return Err(Error::UnsupportedFormat {
            kind: "payload",
            algorithm: "missing version".to_string(),
        });
    };

    if version == CURRENT_VERSION {
        return Ok(data);
    }

    if version > CURRENT_VERSION {
        warn!(
            version,
            current = CURRENT_VERSION,
            "Save data is newer than this engine supports; loading as-is"
        );
        return Ok(data);
    }

    info!(from = version, to = CURRENT_VERSION, "Migrating save data");

    let mut migrated = data;
    let mut current = version;
    while current < CURRENT_VERSION {
        let Some(step) = MIGRATIONS.iter().find(|m| m.from == current) else {
            return Err(Error::UnsupportedFormat {
                kind: "payload",
                algorithm: format!("no migration from v{current} to v{CURRENT_VERSION}"),
            });
        };
        debug!(from = step.from, to = step.to, "Applying migration");
        migrated = (step.migrate)(migrated);
        current = step.to;
    }

    Ok(migrated)
}

/// Full write-path preparation: validate, migrate, fill defaults.
///
/// # Errors
///
/// Returns `InvalidPayload` listing every structural violation, or
/// `UnsupportedFormat` if the payload cannot be migrated.
pub fn prepare_for_write(data: &Value) -> Result<Value> {
    validate_structure(data).into_result()?;
    let migrated = migrate_to_current(data.clone())?;
    Ok(merge_with_defaults(&migrated))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal(version: u32) -> Value {
        json!({
            "version": version,
            "world_state": {},
            "player_state": {},
            "progress_state": {}
        })
    }

    #[test]
    fn test_validate_accepts_minimal_payload() {
        let report = validate_structure(&minimal(CURRENT_VERSION));
        assert!(report.valid);
        assert!(report.errors.is_empty());
    }

    #[test]
    fn test_validate_collects_all_errors() {
        let report = validate_structure(&json!({"player_state": []}));
        assert!(!report.valid);
        assert_eq!(report.errors.len(), 4);
        assert!(report.errors.iter().any(|e| e.contains("version")));
        assert!(report.errors.iter().any(|e| e.contains("world_state")));
        assert!(report.errors.iter().any(|e| e.contains("player_state")));
        assert!(report.errors.iter().any(|e| e.contains("progress_state")));
    }

    #[test]
    fn test_validate_rejects_non_object() {
        let report = validate_structure(&json!("save"));
        assert_eq!(report.errors, vec!["Data must be an object".to_string()]);
    }

    #[test]
    fn test_merge_preserves_nested_caller_values() {
        let partial = json!({
            "version": 2,
            "world_state": {"zone": {"name": "marsh", "flags": [1, 2]}},
            "player_state": {"position": {"x": 5.0}, "health": 42.0},
            "progress_state": {"collectibles": ["gem"]}
        });

        let merged = merge_with_defaults(&partial);

        assert_eq!(merged["world_state"]["zone"]["name"], "marsh");
        assert_eq!(merged["player_state"]["position"]["x"], 5.0);
        assert_eq!(merged["player_state"]["position"]["y"], 0.0);
        assert_eq!(merged["player_state"]["health"], 42.0);
        assert_eq!(merged["player_state"]["inventory"], json!([]));
        assert_eq!(merged["progress_state"]["collectibles"], json!(["gem"]));
        assert_eq!(merged["progress_state"]["completed_levels"], json!([]));
        assert_eq!(merged["settings"], json!({}));
    }

    #[test]
    fn test_merge_keeps_newer_version() {
        let merged = merge_with_defaults(&minimal(CURRENT_VERSION + 3));
        assert_eq!(merged["version"], CURRENT_VERSION + 3);
    }

    #[test]
    fn test_migrate_v1_renames_hp() {
        let v1 = json!({
            "version": 1,
            "world_state": {},
            "player_state": {"hp": 73},
            "progress_state": {}
        });

        let migrated = migrate_to_current(v1).unwrap();
        assert_eq!(migrated["version"], CURRENT_VERSION);
        assert_eq!(migrated["player_state"]["health"], 73);
        assert!(migrated["player_state"].get("hp").is_none());
        assert_eq!(migrated["settings"], json!({}));
    }

    #[test]
    fn test_migrate_newer_version_is_untouched() {
        let future = minimal(CURRENT_VERSION + 1);
        let result = migrate_to_current(future.clone()).unwrap();
        assert_eq!(result, future);
    }

    #[test]
    fn test_migrate_without_path_fails() {
        let err = migrate_to_current(minimal(0)).unwrap_err();
        assert!(matches!(err, Error::UnsupportedFormat { .. }));
    }

    #[test]
    fn test_is_compatible() {
        assert!(is_compatible(1));
        assert!(is_compatible(CURRENT_VERSION));
        assert!(!is_compatible(0));
        assert!(!is_compatible(CURRENT_VERSION + 1));
    }

    #[test]
    fn test_prepare_for_write_rejects_before_migration() {
        let err = prepare_for_write(&json!({"version": 1})).unwrap_err();
        match err {
            Error::InvalidPayload { errors } => assert_eq!(errors.len(), 3),
            other => panic!("unexpected error: {other}"),
        }
    }
}
