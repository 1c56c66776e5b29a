//! CLI definitions using clap.

use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use std::sync::Arc;

use crate::analytics::TracingAnalytics;
use crate::codec::{EncryptionCodec, PayloadCodec};
use crate::config::{
    default_actor, encryption_key_from_env, resolve_db_path, resolve_device, resolve_owner,
    EngineSettings, ENCRYPTION_KEY_ENV,
};
use crate::error::{Error, Result};
use crate::store::SaveStore;

/// Output format for list/query commands.
#[derive(ValueEnum, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum OutputFormat {
    /// Human-readable table (default)
    #[default]
    Table,
    /// JSON (same as --json)
    Json,
}

pub mod commands;

/// gsave - game-save storage and cloud sync
#[derive(Parser, Debug)]
#[command(name = "gsave", author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Database path (default: ~/.gamesave/data/saves.db)
    #[arg(long, global = true)]
    pub db: Option<PathBuf>,

    /// Player the saves belong to
    #[arg(long, global = true)]
    pub owner: Option<String>,

    /// Device id stamped on writes
    #[arg(long, global = true)]
    pub device: Option<String>,

    /// Platform stamped on writes (e.g. pc, switch)
    #[arg(long, global = true, env = "GSAVE_PLATFORM")]
    pub platform: Option<String>,

    /// Output as JSON
    #[arg(long, global = true)]
    pub json: bool,

    /// Output format (table, json)
    #[arg(long, value_enum, global = true, default_value_t)]
    pub format: OutputFormat,

    /// Increase logging verbosity (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Quiet mode (no output except errors)
    #[arg(short, long, global = true)]
    pub quiet: bool,
}

impl Cli {
    /// Global flags every store-backed command needs.
    #[must_use]
    pub fn context(&self) -> CommandContext {
        CommandContext {
            db: self.db.clone(),
            owner: self.owner.clone(),
            device: resolve_device(self.device.as_deref()),
            platform: self.platform.clone(),
        }
    }
}

/// Resolved global flags.
#[derive(Debug, Clone, Default)]
pub struct CommandContext {
    pub db: Option<PathBuf>,
    pub owner: Option<String>,
    pub device: Option<String>,
    pub platform: Option<String>,
}

impl CommandContext {
    /// The owner every command is scoped to.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if neither `--owner` nor `GSAVE_OWNER` is set.
    pub fn owner(&self) -> Result<String> {
        resolve_owner(self.owner.as_deref())
    }

    /// Open the store for an initialized database.
    ///
    /// # Errors
    ///
    /// Returns `NotInitialized` if the database file does not exist, or
    /// `Config` if settings or the encryption key are missing or invalid.
    pub fn open_store(&self) -> Result<SaveStore> {
        let db_path = resolve_db_path(self.db.as_deref()).ok_or(Error::NotInitialized)?;
        if !db_path.exists() {
            return Err(Error::NotInitialized);
        }

        let settings = EngineSettings::load()?;
        let key = encryption_key_from_env().ok_or_else(|| {
            Error::Config(format!("{ENCRYPTION_KEY_ENV} is not set; the encryption key is required"))
        })?;
        let codec = PayloadCodec::new(EncryptionCodec::from_hex(&key)?);

        Ok(SaveStore::open(&db_path, codec, settings)?
            .with_analytics(Arc::new(TracingAnalytics))
            .with_actor(default_actor(self.device.as_deref())))
    }
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Create the save database
    Init {
        /// Recreate the database even if one exists
        #[arg(long)]
        force: bool,
    },

    /// Print version information
    Version,

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },

    /// Save slot management
    Save {
        #[command(subcommand)]
        command: SaveCommands,
    },

    /// Cloud sync and conflict resolution
    Sync {
        #[command(subcommand)]
        command: SyncCommands,
    },

    /// Quick save / quick load
    Quick {
        #[command(subcommand)]
        command: QuickCommands,
    },

    /// Background auto-saving
    Autosave {
        #[command(subcommand)]
        command: AutosaveCommands,
    },

    /// Backup management
    Backup {
        #[command(subcommand)]
        command: BackupCommands,
    },
}

/// Supported shells for completions.
#[derive(clap::ValueEnum, Clone, Copy, Debug)]
pub enum Shell {
    Bash,
    Zsh,
    Fish,
    PowerShell,
    Elvish,
}

// ============================================================================
// Save Commands
// ============================================================================

/// Descriptive fields shared by create and update.
#[derive(Args, Debug, Clone, Default)]
pub struct MetadataArgs {
    /// Slot name shown in save menus
    #[arg(long)]
    pub name: Option<String>,

    /// Save kind (manual, auto, quicksave)
    #[arg(long)]
    pub kind: Option<String>,

    /// Display name for the save
    #[arg(long)]
    pub display_name: Option<String>,

    /// Total playtime in seconds
    #[arg(long)]
    pub playtime: Option<u64>,

    /// Player level
    #[arg(long)]
    pub level: Option<u32>,

    /// Chapter or area name
    #[arg(long)]
    pub chapter: Option<String>,
}

#[derive(Subcommand, Debug)]
pub enum SaveCommands {
    /// Create a save in an empty slot
    Create {
        /// Slot id
        #[arg(long)]
        slot: u32,

        /// Payload JSON file ("-" for stdin)
        #[arg(long, default_value = "-")]
        data: String,

        #[command(flatten)]
        meta: MetadataArgs,
    },

    /// Update an existing save
    Update {
        /// Slot id
        #[arg(long)]
        slot: u32,

        /// Replacement payload JSON file ("-" for stdin)
        #[arg(long)]
        data: Option<String>,

        #[command(flatten)]
        meta: MetadataArgs,
    },

    /// Load and print a save's payload
    Load {
        /// Slot id
        #[arg(long)]
        slot: u32,

        /// Write the payload to a file instead of stdout
        #[arg(long, short)]
        output: Option<PathBuf>,
    },

    /// Delete a save (a manual backup is kept)
    Delete {
        /// Slot id
        #[arg(long)]
        slot: u32,
    },

    /// List saves
    List,

    /// Show one save's record
    Show {
        /// Slot id
        #[arg(long)]
        slot: u32,
    },

    /// List free slots
    EmptySlots {
        /// Maximum number of slots to list
        #[arg(long, default_value = "5")]
        count: usize,
    },
}

// ============================================================================
// Sync Commands
// ============================================================================

#[derive(Subcommand, Debug)]
pub enum SyncCommands {
    /// Compare a local copy with the stored one
    Status {
        /// Slot id
        #[arg(long, required_unless_present = "batch")]
        slot: Option<u32>,

        /// Checksum of the local copy
        #[arg(long)]
        checksum: Option<String>,

        /// Local last-modified time (epoch millis)
        #[arg(long)]
        modified_at: Option<i64>,

        /// JSON array of {slot_id, checksum?, last_modified_at?} ("-" for stdin)
        #[arg(long, conflicts_with_all = ["slot", "checksum", "modified_at"])]
        batch: Option<String>,
    },

    /// Resolve a conflict
    Resolve {
        /// Save id (from `sync status`)
        #[arg(long)]
        save_id: String,

        /// use_cloud, use_local, use_newest, merge, keep_both
        #[arg(long)]
        resolution: String,

        /// Merged payload JSON file for `merge` ("-" for stdin)
        #[arg(long)]
        merged: Option<String>,
    },

    /// Upload a payload as the cloud copy
    Upload {
        /// Slot id
        #[arg(long)]
        slot: u32,

        /// Payload JSON file ("-" for stdin)
        #[arg(long, default_value = "-")]
        data: String,

        /// Only write if the stored revision matches (0 for an empty slot)
        #[arg(long)]
        expected_revision: Option<i64>,

        #[command(flatten)]
        meta: MetadataArgs,
    },

    /// Download the cloud copy
    Download {
        /// Slot id
        #[arg(long)]
        slot: u32,

        /// Write the payload to a file instead of stdout
        #[arg(long, short)]
        output: Option<PathBuf>,
    },

    /// List cloud saves
    List,
}

// ============================================================================
// Quick / Autosave Commands
// ============================================================================

#[derive(Subcommand, Debug)]
pub enum QuickCommands {
    /// Write the quick-save slot
    Save {
        /// Payload JSON file ("-" for stdin)
        #[arg(long, default_value = "-")]
        data: String,
    },

    /// Load the quick-save slot
    Load {
        /// Write the payload to a file instead of stdout
        #[arg(long, short)]
        output: Option<PathBuf>,
    },
}

#[derive(Subcommand, Debug)]
pub enum AutosaveCommands {
    /// Read newline-delimited payloads from stdin and auto-save them
    Watch {
        /// Minimum seconds between auto-saves
        #[arg(long)]
        interval: Option<u64>,

        /// Seconds between flushes
        #[arg(long)]
        cadence: Option<u64>,
    },
}

// ============================================================================
// Backup Commands
// ============================================================================

#[derive(Subcommand, Debug)]
pub enum BackupCommands {
    /// List backups, newest first
    List {
        /// Only backups of this slot
        #[arg(long)]
        slot: Option<u32>,
    },

    /// Restore a backup into its slot
    Restore {
        /// Backup id
        id: String,
    },

    /// Delete a backup
    Delete {
        /// Backup id
        id: String,
    },

    /// Delete every expired backup
    Purge,
}
