use std::collections::BTreeSet;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};

use assetdag::asset::AssetPartition;
use assetdag::engine::{AssetPartitionEvaluation, EvaluationSink};
use assetdag::errors::LaunchError;
use assetdag::exec::{LaunchRequest, RunLauncher};
use assetdag::run::RunId;

/// A fake launcher that:
/// - records every launch request it receives, in order
/// - fails launches for runs touching any asset named in `fail_assets`.
#[derive(Clone, Default)]
pub struct RecordingLauncher {
    launched: Arc<Mutex<Vec<LaunchRequest>>>,
    fail_assets: Arc<BTreeSet<String>>,
}

impl RecordingLauncher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Launcher that rejects runs containing any of `assets`.
    pub fn failing_for<I, S>(assets: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            launched: Arc::default(),
            fail_assets: Arc::new(assets.into_iter().map(Into::into).collect()),
        }
    }

    pub fn launched(&self) -> Vec<LaunchRequest> {
        self.launched.lock().unwrap().clone()
    }

    pub fn launched_ids(&self) -> Vec<RunId> {
        self.launched().iter().map(|r| r.run_id).collect()
    }

    /// Asset partitions per launch, in launch order.
    pub fn launched_partitions(&self) -> Vec<Vec<AssetPartition>> {
        self.launched()
            .iter()
            .map(|r| r.steps.iter().map(|s| s.asset_partition.clone()).collect())
            .collect()
    }
}

impl RunLauncher for RecordingLauncher {
    fn launch(
        &self,
        request: LaunchRequest,
    ) -> Pin<Box<dyn Future<Output = Result<(), LaunchError>> + Send + '_>> {
        let launched = Arc::clone(&self.launched);
        let fail = request
            .steps
            .iter()
            .any(|s| self.fail_assets.contains(s.asset_partition.asset.as_str()));

        Box::pin(async move {
            let run_id = request.run_id;
            {
                let mut guard = launched.lock().unwrap();
                guard.push(request);
            }
            if fail {
                return Err(LaunchError {
                    run_id: run_id.to_string(),
                    message: "executor rejected run".to_string(),
                });
            }
            Ok(())
        })
    }
}

/// Evaluation sink that keeps every record in memory.
#[derive(Clone, Default)]
pub struct MemorySink {
    records: Arc<Mutex<Vec<AssetPartitionEvaluation>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<AssetPartitionEvaluation> {
        self.records.lock().unwrap().clone()
    }
}

impl EvaluationSink for MemorySink {
    fn record(&self, evaluation: &AssetPartitionEvaluation) {
        self.records.lock().unwrap().push(evaluation.clone());
    }
}
