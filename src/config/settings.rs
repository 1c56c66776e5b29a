//! Engine tunables.
//!
//! Loaded from `~/.gamesave/config.json` when present, then overridden by
//! `GSAVE_*` environment variables. Every field has a default, so a partial
//! file is fine.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::debug;

use crate::error::{Error, Result};
use crate::model::BackupReason;

const DAY_MS: i64 = 24 * 60 * 60 * 1000;

/// Backup retention window per reason, in days.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetentionDays {
    pub manual: u32,
    pub conflict: u32,
    pub corruption_detected: u32,
    /// `pre_update` and `scheduled`.
    pub routine: u32,
}

impl Default for RetentionDays {
    fn default() -> Self {
        Self {
            manual: 90,
            conflict: 30,
            corruption_detected: 30,
            routine: 7,
        }
    }
}

impl RetentionDays {
    /// Retention window for `reason` in milliseconds.
    #[must_use]
    pub fn window_ms(&self, reason: BackupReason) -> i64 {
        let days = match reason {
            BackupReason::Manual => self.manual,
            BackupReason::Conflict => self.conflict,
            BackupReason::CorruptionDetected => self.corruption_detected,
            BackupReason::PreUpdate | BackupReason::Scheduled => self.routine,
        };
        i64::from(days) * DAY_MS
    }
}

/// All engine tunables.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineSettings {
    /// Slots per owner; valid ids are `0..max_slots`.
    pub max_slots: u32,
    /// Local and cloud writes closer than this are a conflict.
    pub conflict_threshold_ms: i64,
    pub max_backups_per_slot: usize,
    /// Cap on `list_backups` results.
    pub backup_list_limit: u32,
    pub retention_days: RetentionDays,
    pub auto_save_interval_secs: u64,
    pub flush_cadence_secs: u64,
    /// Seconds between sweeps of expired backups.
    pub backup_purge_cadence_secs: u64,
    pub auto_save_slot: u32,
    pub quick_save_slot: u32,
    pub busy_timeout_ms: u64,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            max_slots: 100,
            conflict_threshold_ms: 60_000,
            max_backups_per_slot: 10,
            backup_list_limit: 50,
            retention_days: RetentionDays::default(),
            auto_save_interval_secs: 300,
            flush_cadence_secs: 60,
            backup_purge_cadence_secs: 86_400,
            auto_save_slot: 99,
            quick_save_slot: 98,
            busy_timeout_ms: 5_000,
        }
    }
}

impl EngineSettings {
    /// Load from the global config file (if any) plus environment overrides.
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` if the file is malformed, an override does not
    /// parse, or the resulting settings are inconsistent.
    pub fn load() -> Result<Self> {
        let file = super::global_gamesave_dir().map(|dir| dir.join("config.json"));
        let mut settings = match file {
            Some(path) if path.exists() => Self::load_from(&path)?,
            _ => Self::default(),
        };
        settings.apply_overrides(|key| std::env::var(key).ok())?;
        settings.validate()?;
        Ok(settings)
    }

    /// Load from a specific JSON file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load_from(path: &Path) -> Result<Self> {
        debug!(path = %path.display(), "Loading engine settings");
        let raw = std::fs::read_to_string(path)?;
        serde_json::from_str(&raw)
            .map_err(|e| Error::Config(format!("{}: {e}", path.display())))
    }

    /// Apply `GSAVE_*` overrides using `lookup` to read variables.
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` naming the variable that failed to parse.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        override_with(&lookup, "GSAVE_MAX_SLOTS", &mut self.max_slots)?;
        override_with(
            &lookup,
            "GSAVE_CONFLICT_THRESHOLD_MS",
            &mut self.conflict_threshold_ms,
        )?;
        override_with(
            &lookup,
            "GSAVE_MAX_BACKUPS_PER_SLOT",
            &mut self.max_backups_per_slot,
        )?;
        override_with(
            &lookup,
            "GSAVE_AUTOSAVE_INTERVAL_SECS",
            &mut self.auto_save_interval_secs,
        )?;
        override_with(&lookup, "GSAVE_FLUSH_CADENCE_SECS", &mut self.flush_cadence_secs)?;
        override_with(
            &lookup,
            "GSAVE_BACKUP_PURGE_CADENCE_SECS",
            &mut self.backup_purge_cadence_secs,
        )?;
        Ok(())
    }

    /// Reject settings the engine cannot run with.
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` describing the first inconsistency.
    pub fn validate(&self) -> Result<()> {
        if self.max_slots == 0 {
            return Err(Error::Config("max_slots must be at least 1".to_string()));
        }
        for (name, slot) in [
            ("auto_save_slot", self.auto_save_slot),
            ("quick_save_slot", self.quick_save_slot),
        ] {
            if slot >= self.max_slots {
                return Err(Error::Config(format!(
                    "{name} {slot} is outside 0..{}",
                    self.max_slots
                )));
            }
        }
        if self.auto_save_slot == self.quick_save_slot {
            return Err(Error::Config(
                "auto_save_slot and quick_save_slot must differ".to_string(),
            ));
        }
        if self.conflict_threshold_ms < 0 {
            return Err(Error::Config(
                "conflict_threshold_ms cannot be negative".to_string(),
            ));
        }
        if self.flush_cadence_secs == 0 {
            return Err(Error::Config("flush_cadence_secs must be positive".to_string()));
        }
        if self.backup_purge_cadence_secs == 0 {
            return Err(Error::Config(
                "backup_purge_cadence_secs must be positive".to_string(),
            ));
        }
        Ok(())
    }

    #[must_use]
    pub fn auto_save_interval(&self) -> Duration {
        Duration::from_secs(self.auto_save_interval_secs)
    }

    #[must_use]
    pub fn flush_cadence(&self) -> Duration {
        Duration::from_secs(self.flush_cadence_secs)
    }

    #[must_use]
    pub fn backup_purge_cadence(&self) -> Duration {
        Duration::from_secs(self.backup_purge_cadence_secs)
    }
}

fn override_with<F, T>(lookup: &F, key: &str, target: &mut T) -> Result<()>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    if let Some(raw) = lookup(key) {
        *target = raw
            .trim()
            .parse()
            .map_err(|_| Error::Config(format!("{key} has invalid value {raw:?}")))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults_are_valid() {
        let settings = EngineSettings::default();
        assert!(settings.validate().is_ok());
        assert_eq!(settings.max_slots, 100);
        assert_eq!(settings.auto_save_slot, 99);
        assert_eq!(settings.quick_save_slot, 98);
    }

    #[test]
    fn test_retention_by_reason() {
        let r = RetentionDays::default();
        assert_eq!(r.window_ms(BackupReason::Manual), 90 * DAY_MS);
        assert_eq!(r.window_ms(BackupReason::Conflict), 30 * DAY_MS);
        assert_eq!(r.window_ms(BackupReason::CorruptionDetected), 30 * DAY_MS);
        assert_eq!(r.window_ms(BackupReason::PreUpdate), 7 * DAY_MS);
        assert_eq!(r.window_ms(BackupReason::Scheduled), 7 * DAY_MS);
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"max_slots": 20, "retention_days": {"manual": 14}}"#).unwrap();

        let settings = EngineSettings::load_from(&path).unwrap();
        assert_eq!(settings.max_slots, 20);
        assert_eq!(settings.retention_days.manual, 14);
        assert_eq!(settings.retention_days.conflict, 30);
        assert_eq!(settings.conflict_threshold_ms, 60_000);
    }

    #[test]
    fn test_env_overrides() {
        let vars: HashMap<&str, &str> = [
            ("GSAVE_MAX_SLOTS", "50"),
            ("GSAVE_CONFLICT_THRESHOLD_MS", "1000"),
            ("GSAVE_BACKUP_PURGE_CADENCE_SECS", "600"),
        ]
        .into_iter()
        .collect();

        let mut settings = EngineSettings::default();
        settings
            .apply_overrides(|k| vars.get(k).map(ToString::to_string))
            .unwrap();
        assert_eq!(settings.max_slots, 50);
        assert_eq!(settings.conflict_threshold_ms, 1000);
        assert_eq!(settings.backup_purge_cadence(), Duration::from_secs(600));
    }

    #[test]
    fn test_bad_override_names_variable() {
        let mut settings = EngineSettings::default();
        let err = settings
            .apply_overrides(|k| (k == "GSAVE_MAX_SLOTS").then(|| "many".to_string()))
            .unwrap_err();
        assert!(err.to_string().contains("GSAVE_MAX_SLOTS"));
    }

    #[test]
    fn test_reserved_slot_must_fit() {
        let settings = EngineSettings {
            max_slots: 50,
            ..EngineSettings::default()
        };
        assert!(matches!(settings.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn test_zero_purge_cadence_rejected() {
        let settings = EngineSettings {
            backup_purge_cadence_secs: 0,
            ..EngineSettings::default()
        };
        assert!(matches!(settings.validate(), Err(Error::Config(_))));
    }
}
