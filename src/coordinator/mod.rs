// src/coordinator/mod.rs

//! Run coordination: the admission layer between run requests and the
//! launcher.
//!
//! - [`default`] launches immediately.
//! - [`queued`] queues runs under a global concurrency limit and launches
//!   them from a background loop; [`queue`] is its pure queue structure.
//! - [`custom`] wraps another coordinator and derives tags with
//!   [`SubmissionHook`]s before delegating.
//!
//! [`Coordinator`] is the closed set of these kinds.

pub mod custom;
pub mod default;
pub mod queue;
pub mod queued;

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::config::model::RunCoordinatorConfig;
use crate::exec::{LaunchRequest, RunLauncher, StepConfigResolver};
use crate::run::{RunId, RunRequest, SubmissionContext, SubmittedRun};
use crate::types::CoordinatorKind;

pub use custom::{CustomRunCoordinator, HeaderTagHook, SubmissionHook};
pub use default::DefaultRunCoordinator;
pub use queue::{Admission, RunQueue, TagConcurrencyLimit};
pub use queued::{QueuedCoordinatorOptions, QueuedRunCoordinator};

/// Shared capability of every coordinator kind.
pub trait RunCoordinator: Send + Sync {
    /// Admit a run. Never waits on the queue: a full queue yields a QUEUED
    /// run with `pending_retry` set.
    fn submit_run<'a>(
        &'a self,
        request: RunRequest,
        context: &'a SubmissionContext,
    ) -> Pin<Box<dyn Future<Output = SubmittedRun> + Send + 'a>>;

    /// Remove a run that is still queued. Returns false if it is unknown or
    /// already launched.
    fn cancel_run(&self, run_id: &RunId) -> bool;
}

pub enum Coordinator {
    Default(DefaultRunCoordinator),
    Queued(Arc<QueuedRunCoordinator>),
    Custom(CustomRunCoordinator),
}

impl Coordinator {
    /// Build the coordinator described by `[run_coordinator]`.
    ///
    /// Header tag hooks, when configured, wrap the base coordinator in a
    /// custom one.
    pub fn from_config(
        config: &RunCoordinatorConfig,
        launcher: Arc<dyn RunLauncher>,
        resolver: Arc<StepConfigResolver>,
    ) -> Self {
        let base = match config.kind {
            CoordinatorKind::Default => {
                Coordinator::Default(DefaultRunCoordinator::new(launcher, resolver))
            }
            CoordinatorKind::Queued => {
                let options = QueuedCoordinatorOptions {
                    max_concurrent_runs: config.max_concurrent_runs,
                    queue_capacity: config.queue_capacity,
                    tag_concurrency_limits: config.tag_concurrency_limits.clone(),
                    dequeue_interval: std::time::Duration::from_millis(config.dequeue_interval_ms),
                    ..QueuedCoordinatorOptions::default()
                };
                Coordinator::Queued(Arc::new(QueuedRunCoordinator::new(options, launcher, resolver)))
            }
        };

        if config.header_tags.is_empty() {
            return base;
        }
        let custom = config
            .header_tags
            .iter()
            .fold(CustomRunCoordinator::new(base), |c, h| {
                c.with_hook(HeaderTagHook::new(&h.header, &h.tag))
            });
        Coordinator::Custom(custom)
    }

    /// The queued coordinator at the bottom of this stack, if any.
    pub fn queued(&self) -> Option<&Arc<QueuedRunCoordinator>> {
        match self {
            Coordinator::Default(_) => None,
            Coordinator::Queued(q) => Some(q),
            Coordinator::Custom(c) => c.inner().queued(),
        }
    }
}

impl RunCoordinator for Coordinator {
    fn submit_run<'a>(
        &'a self,
        request: RunRequest,
        context: &'a SubmissionContext,
    ) -> Pin<Box<dyn Future<Output = SubmittedRun> + Send + 'a>> {
        match self {
            Coordinator::Default(c) => c.submit_run(request, context),
            Coordinator::Queued(c) => c.submit_run(request, context),
            Coordinator::Custom(c) => c.submit_run(request, context),
        }
    }

    fn cancel_run(&self, run_id: &RunId) -> bool {
        match self {
            Coordinator::Default(c) => c.cancel_run(run_id),
            Coordinator::Queued(c) => c.cancel_run(run_id),
            Coordinator::Custom(c) => c.cancel_run(run_id),
        }
    }
}

/// Launch request for `request` with step config resolved per partition.
pub(crate) fn launch_request(
    run_id: RunId,
    request: &RunRequest,
    resolver: &StepConfigResolver,
) -> LaunchRequest {
    LaunchRequest {
        run_id,
        tags: request.tags.clone(),
        steps: resolver.steps(&request.asset_partitions),
    }
}
