//! gamesave - game-save storage and cloud sync engine
//!
//! This crate provides the core functionality for the `gsave` CLI tool.
//!
//! # Architecture
//!
//! - [`store`] - Save records: create, update, load, delete
//! - [`codec`] - Compression, checksums and AES-256-GCM encryption
//! - [`versioning`] - Payload validation, defaults and migrations
//! - [`backup`] - Snapshots, retention and restore
//! - [`sync`] - Local/cloud reconciliation and conflict resolution
//! - [`autosave`] - Coalesced background auto-save and quick save
//! - [`analytics`] - Activity sinks
//! - [`storage`] - SQLite database layer
//! - [`config`] - Configuration management
//! - [`cli`] - Command-line interface using clap
//! - [`error`] - Error types and handling

#![forbid(unsafe_code)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod analytics;
pub mod autosave;
pub mod backup;
pub mod cli;
pub mod codec;
pub mod config;
pub mod error;
pub mod model;
pub mod storage;
pub mod store;
pub mod sync;
pub mod validate;
pub mod versioning;

pub use error::{Error, Result};
