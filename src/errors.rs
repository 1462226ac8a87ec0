// src/errors.rs

//! Crate-wide error aliases and helpers.
//!
//! [`AssetdagError`] covers failures that abort an operation. Rule, hook and
//! launch failures are recovered where they happen and carry their own
//! types.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum AssetdagError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Asset not found: {0}")]
    UnknownAsset(String),

    /// Fatal: the asset graph cannot be built.
    #[error("Cycle detected in asset graph: {0}")]
    GraphCycle(String),

    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),
}

/// A rule failed to evaluate for one asset partition.
///
/// Recovered by the engine: the rule is treated as not firing.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("rule '{rule}' failed for {asset_partition}: {message}")]
pub struct RuleEvaluationError {
    pub rule: String,
    pub asset_partition: String,
    pub message: String,
}

/// A submission hook could not derive its tags.
///
/// Recovered by the custom coordinator: submission continues without the
/// hook's contribution.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("submission hook '{hook}' failed: {message}")]
pub struct SubmissionHookError {
    pub hook: String,
    pub message: String,
}

/// Handing a run to the executor failed. The run transitions to FAILED.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("failed to launch run {run_id}: {message}")]
pub struct LaunchError {
    pub run_id: String,
    pub message: String,
}

pub type Result<T> = std::result::Result<T, AssetdagError>;
