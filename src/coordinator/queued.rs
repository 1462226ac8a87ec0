// src/coordinator/queued.rs

//! Queued coordinator: admission under a global concurrency limit.
//!
//! `submit_run` only touches the in-memory queue and returns immediately.
//! A background dequeue loop launches runs while fewer than
//! `max_concurrent_runs` are in flight and no tag concurrency limit is hit.
//! The mutex guards enqueue/dequeue bookkeeping only; launch I/O happens
//! outside it.

use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{Notify, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::queue::{Admission, InFlight, QueuedRun, RunQueue, TagConcurrencyLimit};
use super::{RunCoordinator, launch_request};
use crate::exec::{RunLauncher, StepConfigResolver};
use crate::run::{RunId, RunRequest, RunStatus, SubmissionContext, SubmittedRun};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueuedCoordinatorOptions {
    pub max_concurrent_runs: usize,
    pub queue_capacity: usize,
    pub tag_concurrency_limits: Vec<TagConcurrencyLimit>,
    /// How often the dequeue loop wakes up without being notified.
    pub dequeue_interval: Duration,
    /// How many failed or finished runs keep a queryable status.
    pub terminal_status_history: usize,
}

impl Default for QueuedCoordinatorOptions {
    fn default() -> Self {
        Self {
            max_concurrent_runs: 10,
            queue_capacity: 100,
            tag_concurrency_limits: Vec::new(),
            dequeue_interval: Duration::from_secs(1),
            terminal_status_history: 256,
        }
    }
}

#[derive(Debug)]
struct State {
    queue: RunQueue,
    in_flight: InFlight,
    /// Queued and launched runs only.
    statuses: HashMap<RunId, RunStatus>,
    /// Most recent terminal statuses, oldest first.
    terminal: VecDeque<(RunId, RunStatus)>,
}

impl State {
    fn retire(&mut self, run_id: RunId, status: RunStatus, keep: usize) {
        self.statuses.remove(&run_id);
        if keep == 0 {
            return;
        }
        while self.terminal.len() >= keep {
            self.terminal.pop_front();
        }
        self.terminal.push_back((run_id, status));
    }
}

pub struct QueuedRunCoordinator {
    options: QueuedCoordinatorOptions,
    state: Mutex<State>,
    launcher: Arc<dyn RunLauncher>,
    resolver: Arc<StepConfigResolver>,
    wake: Notify,
}

impl QueuedRunCoordinator {
    pub fn new(
        options: QueuedCoordinatorOptions,
        launcher: Arc<dyn RunLauncher>,
        resolver: Arc<StepConfigResolver>,
    ) -> Self {
        let state = State {
            queue: RunQueue::new(options.queue_capacity),
            in_flight: InFlight::new(),
            statuses: HashMap::new(),
            terminal: VecDeque::new(),
        };
        Self {
            options,
            state: Mutex::new(state),
            launcher,
            resolver,
            wake: Notify::new(),
        }
    }

    pub fn options(&self) -> &QueuedCoordinatorOptions {
        &self.options
    }

    pub fn queued_len(&self) -> usize {
        let state = self.state.lock();
        state.queue.len() + state.queue.overflow_len()
    }

    pub fn in_flight_len(&self) -> usize {
        self.state.lock().in_flight.len()
    }

    /// Queued run ids in the order they would launch, overflow last.
    pub fn queued_run_ids(&self) -> Vec<RunId> {
        self.state.lock().queue.ordered_ids()
    }

    /// Status of a live run, or of one of the most recent
    /// `terminal_status_history` failed or finished runs.
    pub fn run_status(&self, run_id: &RunId) -> Option<RunStatus> {
        let state = self.state.lock();
        state.statuses.get(run_id).copied().or_else(|| {
            state
                .terminal
                .iter()
                .rev()
                .find(|(id, _)| id == run_id)
                .map(|(_, status)| *status)
        })
    }

    /// Queued plus launched runs still tracked by the coordinator.
    pub fn live_runs(&self) -> usize {
        self.state.lock().statuses.len()
    }

    /// The executor reports a launched run as done; frees its slot.
    pub fn run_finished(&self, run_id: &RunId) -> bool {
        let freed = {
            let mut state = self.state.lock();
            let freed = state.in_flight.remove(run_id).is_some();
            if freed {
                state.retire(*run_id, RunStatus::Finished, self.options.terminal_status_history);
            }
            freed
        };
        if freed {
            debug!(%run_id, "run finished; slot freed");
            self.wake.notify_one();
        }
        freed
    }

    /// Pick the next launchable run, if a slot and tag limits allow it.
    fn take_next(&self) -> Option<QueuedRun> {
        let mut state = self.state.lock();
        if state.in_flight.len() >= self.options.max_concurrent_runs {
            return None;
        }
        let State {
            queue, in_flight, ..
        } = &mut *state;
        let limits = &self.options.tag_concurrency_limits;
        let run = queue.pop_next(|candidate| {
            !limits
                .iter()
                .any(|l| l.would_exceed(&candidate.request.tags, in_flight.values()))
        })?;
        in_flight.insert(run.run_id, run.request.tags.clone());
        Some(run)
    }

    /// Launch queued runs until no slot is free or nothing is eligible.
    /// Returns how many launches were attempted.
    pub async fn dequeue_once(&self) -> usize {
        let mut attempted = 0;
        while let Some(run) = self.take_next() {
            attempted += 1;
            let run_id = run.run_id;
            let launch = launch_request(run_id, &run.request, &self.resolver);

            let status = match self.launcher.launch(launch).await {
                Ok(()) => {
                    info!(%run_id, priority = run.priority, "dequeued and launched run");
                    RunStatus::Launched
                }
                Err(e) => {
                    warn!(%run_id, error = %e, "run launch failed; marking run failed");
                    RunStatus::Failed
                }
            };

            let mut state = self.state.lock();
            if status == RunStatus::Failed {
                state.in_flight.remove(&run_id);
                state.retire(run_id, status, self.options.terminal_status_history);
            } else if state.in_flight.contains_key(&run_id) {
                // Not already reported finished while the launch was running.
                state.statuses.insert(run_id, status);
            }
        }
        attempted
    }

    /// Background loop: dequeue on every submission, every finished run,
    /// and every `dequeue_interval`, until `shutdown` flips to true.
    pub fn spawn_dequeue_loop(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!(
                max_concurrent_runs = self.options.max_concurrent_runs,
                "queued run coordinator dequeue loop started"
            );
            let mut interval = tokio::time::interval(self.options.dequeue_interval);
            loop {
                tokio::select! {
                    _ = self.wake.notified() => {}
                    _ = interval.tick() => {}
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                }
                self.dequeue_once().await;
            }
            info!("queued run coordinator dequeue loop stopped");
        })
    }
}

impl RunCoordinator for QueuedRunCoordinator {
    fn submit_run<'a>(
        &'a self,
        request: RunRequest,
        context: &'a SubmissionContext,
    ) -> Pin<Box<dyn Future<Output = SubmittedRun> + Send + 'a>> {
        Box::pin(async move {
            let run_id = RunId::new();
            let admission = {
                let mut state = self.state.lock();
                let admission = state.queue.push(run_id, request.clone());
                state.statuses.insert(run_id, RunStatus::Queued);
                admission
            };
            self.wake.notify_one();

            debug!(%run_id, source = context.source.as_str(), ?admission, "run submitted");
            let mut submitted = SubmittedRun::from_request(run_id, request, RunStatus::Queued);
            submitted.pending_retry = admission == Admission::Overflow;
            submitted
        })
    }

    fn cancel_run(&self, run_id: &RunId) -> bool {
        let mut state = self.state.lock();
        if state.queue.remove(run_id).is_some() {
            state.statuses.remove(run_id);
            info!(%run_id, "cancelled queued run");
            true
        } else {
            false
        }
    }
}
