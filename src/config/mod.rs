//! Configuration management.
//!
//! Resolves the database location, the acting owner and device, the
//! encryption key, and loads [`EngineSettings`].
//!
//! # Layout
//!
//! - **Database**: `~/.gamesave/data/saves.db`
//! - **Settings**: `~/.gamesave/config.json` (optional)
//! - **Test database**: `~/.gamesave/test/saves.db` when `GSAVE_TEST_DB` is set

mod settings;

pub use settings::{EngineSettings, RetentionDays};

use crate::error::{Error, Result};

use std::path::{Path, PathBuf};

/// Environment variable holding the 64-hex-char master key.
pub const ENCRYPTION_KEY_ENV: &str = "GSAVE_ENCRYPTION_KEY";

/// Get the global gamesave directory location (`~/.gamesave/`).
#[must_use]
pub fn global_gamesave_dir() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|b| b.home_dir().join(".gamesave"))
}

/// Check if test mode is enabled.
///
/// Test mode is enabled by setting `GSAVE_TEST_DB=1` (or any non-empty value
/// other than `0`/`false`). It redirects the database to an isolated file.
#[must_use]
pub fn is_test_mode() -> bool {
    std::env::var("GSAVE_TEST_DB").is_ok_and(|v| is_truthy(&v))
}

fn is_truthy(v: &str) -> bool {
    !v.is_empty() && v != "0" && !v.eq_ignore_ascii_case("false")
}

/// Get the test database path (`~/.gamesave/test/saves.db`).
#[must_use]
pub fn test_db_path() -> Option<PathBuf> {
    global_gamesave_dir().map(|dir| dir.join("test").join("saves.db"))
}

/// Resolve the database path.
///
/// Priority:
/// 1. If `explicit_path` is provided, use it directly
/// 2. `GSAVE_TEST_DB` environment variable → uses test database
/// 3. `GSAVE_DB` environment variable
/// 4. Global location: `~/.gamesave/data/saves.db`
#[must_use]
pub fn resolve_db_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return Some(path.to_path_buf());
    }

    if is_test_mode() {
        return test_db_path();
    }

    if let Ok(db_path) = std::env::var("GSAVE_DB") {
        if !db_path.trim().is_empty() {
            return Some(PathBuf::from(db_path));
        }
    }

    global_gamesave_dir().map(|dir| dir.join("data").join("saves.db"))
}

/// Resolve the owner (player) every save operation is scoped to.
///
/// Priority: explicit `--owner` flag, then `GSAVE_OWNER`.
///
/// # Errors
///
/// Returns `InvalidArgument` when neither is set; owners are never guessed.
pub fn resolve_owner(explicit: Option<&str>) -> Result<String> {
    if let Some(owner) = explicit.map(str::trim).filter(|o| !o.is_empty()) {
        return Ok(owner.to_string());
    }

    if let Ok(owner) = std::env::var("GSAVE_OWNER") {
        if !owner.trim().is_empty() {
            return Ok(owner.trim().to_string());
        }
    }

    Err(Error::InvalidArgument(
        "No owner given: pass --owner or set GSAVE_OWNER".to_string(),
    ))
}

/// Resolve the device id stamped onto writes.
///
/// Priority: explicit `--device` flag, then `GSAVE_DEVICE`, else none.
#[must_use]
pub fn resolve_device(explicit: Option<&str>) -> Option<String> {
    explicit
        .map(str::to_string)
        .or_else(|| std::env::var("GSAVE_DEVICE").ok())
        .map(|d| d.trim().to_string())
        .filter(|d| !d.is_empty())
}

/// The master key from the environment, if set.
#[must_use]
pub fn encryption_key_from_env() -> Option<String> {
    std::env::var(ENCRYPTION_KEY_ENV)
        .ok()
        .filter(|k| !k.trim().is_empty())
}

/// Get the default actor name recorded on audit events.
///
/// Priority:
/// 1. The resolved device id
/// 2. `GSAVE_ACTOR` environment variable
/// 3. System username
/// 4. "unknown"
#[must_use]
pub fn default_actor(device: Option<&str>) -> String {
    if let Some(device) = device {
        return device.to_string();
    }

    if let Ok(actor) = std::env::var("GSAVE_ACTOR") {
        if !actor.is_empty() {
            return actor;
        }
    }

    if let Ok(user) = std::env::var("USER") {
        return user;
    }

    "unknown".to_string()
}
