// src/exec/backend.rs

//! Pluggable launcher abstraction.
//!
//! Coordinators hand admitted runs to a [`RunLauncher`] instead of talking
//! to an executor directly. The executor that actually runs the steps is an
//! external collaborator; tests swap in a recording launcher.

use std::future::Future;
use std::pin::Pin;

use tracing::info;

use crate::asset::AssetPartition;
use crate::errors::LaunchError;
use crate::run::{RunId, Tags};

/// Resolved configuration for one step of a run.
#[derive(Debug, Clone, PartialEq)]
pub struct StepLaunch {
    pub asset_partition: AssetPartition,
    pub config: toml::Table,
}

/// Everything an executor needs to start a run.
#[derive(Debug, Clone, PartialEq)]
pub struct LaunchRequest {
    pub run_id: RunId,
    pub tags: Tags,
    pub steps: Vec<StepLaunch>,
}

/// Trait abstracting how admitted runs reach the executor.
pub trait RunLauncher: Send + Sync {
    /// Hand the run to the executor. An error marks the run FAILED; this
    /// layer never retries.
    fn launch(
        &self,
        request: LaunchRequest,
    ) -> Pin<Box<dyn Future<Output = Result<(), LaunchError>> + Send + '_>>;
}

/// Launcher used by the CLI: logs each run and reports success.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingLauncher;

impl RunLauncher for LoggingLauncher {
    fn launch(
        &self,
        request: LaunchRequest,
    ) -> Pin<Box<dyn Future<Output = Result<(), LaunchError>> + Send + '_>> {
        Box::pin(async move {
            let steps: Vec<String> = request
                .steps
                .iter()
                .map(|s| s.asset_partition.to_string())
                .collect();
            info!(run_id = %request.run_id, ?steps, tags = ?request.tags, "launching run");
            Ok(())
        })
    }
}
