// src/coordinator/default.rs

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tracing::{info, warn};

use super::{RunCoordinator, launch_request};
use crate::exec::{RunLauncher, StepConfigResolver};
use crate::run::{RunId, RunRequest, RunStatus, SubmissionContext, SubmittedRun};

/// Launches every submitted run immediately; nothing is queued.
pub struct DefaultRunCoordinator {
    launcher: Arc<dyn RunLauncher>,
    resolver: Arc<StepConfigResolver>,
}

impl DefaultRunCoordinator {
    pub fn new(launcher: Arc<dyn RunLauncher>, resolver: Arc<StepConfigResolver>) -> Self {
        Self { launcher, resolver }
    }
}

impl RunCoordinator for DefaultRunCoordinator {
    fn submit_run<'a>(
        &'a self,
        request: RunRequest,
        context: &'a SubmissionContext,
    ) -> Pin<Box<dyn Future<Output = SubmittedRun> + Send + 'a>> {
        Box::pin(async move {
            let run_id = RunId::new();
            let launch = launch_request(run_id, &request, &self.resolver);
            let status = match self.launcher.launch(launch).await {
                Ok(()) => {
                    info!(%run_id, source = context.source.as_str(), "run launched");
                    RunStatus::Launched
                }
                Err(e) => {
                    warn!(%run_id, error = %e, "run launch failed");
                    RunStatus::Failed
                }
            };
            SubmittedRun::from_request(run_id, request, status)
        })
    }

    /// Launched runs belong to the executor; there is nothing to cancel here.
    fn cancel_run(&self, _run_id: &RunId) -> bool {
        false
    }
}
