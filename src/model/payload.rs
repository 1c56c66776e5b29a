//! Save payload envelope.
//!
//! The payload is what the game hands us: a schema version, the world,
//! the player and progress sections, plus free-form settings. Known fields
//! are typed; anything else, at the top level or inside the player and
//! progress sections, rides along in an `extensions` map so newer clients
//! never lose data through an older engine.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// A position in the game world.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub z: Option<f64>,
}

/// Player section of a save.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PlayerState {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<Position>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub health: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inventory: Option<Vec<Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stats: Option<BTreeMap<String, f64>>,
    /// Fields this engine has no typed knowledge of.
    #[serde(flatten)]
    pub extensions: Map<String, Value>,
}

/// Progress section of a save.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProgressState {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_levels: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unlocked_achievements: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub collectibles: Option<Vec<String>>,
    #[serde(flatten)]
    pub extensions: Map<String, Value>,
}

/// The full save payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SavePayload {
    /// Payload schema version (not the record revision).
    pub version: u32,
    #[serde(default)]
    pub world_state: Map<String, Value>,
    #[serde(default)]
    pub player_state: PlayerState,
    #[serde(default)]
    pub progress_state: ProgressState,
    #[serde(default)]
    pub settings: Map<String, Value>,
    /// Top-level sections this engine has no typed knowledge of.
    #[serde(flatten)]
    pub extensions: Map<String, Value>,
}

impl SavePayload {
    /// Convert to a JSON value (the form validation and migration operate on).
    ///
    /// # Errors
    ///
    /// Returns an error if a float field is not representable in JSON.
    pub fn to_value(&self) -> serde_json::Result<Value> {
        serde_json::to_value(self)
    }

    /// Build a typed payload from a JSON value.
    ///
    /// # Errors
    ///
    /// Returns an error if a known field has the wrong type.
    pub fn from_value(value: Value) -> serde_json::Result<Self> {
        serde_json::from_value(value)
    }
}
