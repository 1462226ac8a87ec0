// src/config/mod.rs

//! Configuration loading and validation for assetdag.
//!
//! Responsibilities:
//! - Define the TOML-backed data model (`model.rs`).
//! - Load a config file from disk (`loader.rs`).
//! - Validate invariants like graph acyclicity (`validate.rs`).
//! - Build assets, engine options and history from it (`convert.rs`).

pub mod convert;
pub mod loader;
pub mod model;
pub mod validate;

pub use loader::{default_config_path, load_and_validate, load_from_path, parse_str};
pub use model::{
    AssetConfig, ConfigFile, DaemonSection, EventConfig, EventKind, HeaderTagConfig,
    PartitionsConfig, RawConfigFile, RunConfigSection, RunCoordinatorConfig,
};
