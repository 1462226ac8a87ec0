// src/daemon.rs

//! The auto-materialize daemon: the async shell around the engine.
//!
//! Ticks arrive as [`DaemonEvent`]s on an mpsc channel (from a ticker task,
//! Ctrl-C handling, or tests) and are processed one at a time, so ticks never
//! overlap. Each tick's run requests go to the coordinator.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::coordinator::{Coordinator, RunCoordinator};
use crate::engine::{AutoMaterializeEngine, TickResult};
use crate::errors::Result;
use crate::run::{RunStatus, SubmissionContext, SubmittedRun};
use crate::types::TriggerSource;

/// Events flowing into the daemon.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DaemonEvent {
    /// Evaluate a tick at `at`, or at the current time.
    Tick { at: Option<DateTime<Utc>> },
    /// Graceful shutdown requested (e.g. Ctrl-C).
    ShutdownRequested,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct DaemonOptions {
    /// Stop after the first tick (used for `--once`).
    pub exit_after_one_tick: bool,
}

/// What one tick produced and how the coordinator admitted it.
#[derive(Debug, Clone)]
pub struct TickReport {
    pub tick: TickResult,
    pub submitted: Vec<SubmittedRun>,
}

impl TickReport {
    pub fn count(&self, status: RunStatus) -> usize {
        self.submitted.iter().filter(|r| r.status == status).count()
    }
}

pub struct Daemon {
    engine: AutoMaterializeEngine,
    coordinator: Arc<Coordinator>,
    options: DaemonOptions,
}

impl fmt::Debug for Daemon {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Daemon")
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl Daemon {
    pub fn new(
        engine: AutoMaterializeEngine,
        coordinator: Arc<Coordinator>,
        options: DaemonOptions,
    ) -> Self {
        Self {
            engine,
            coordinator,
            options,
        }
    }

    pub fn coordinator(&self) -> &Arc<Coordinator> {
        &self.coordinator
    }

    /// Evaluate one tick and submit its run requests.
    pub async fn tick(&self, now: DateTime<Utc>) -> Result<TickReport> {
        let tick = self.engine.evaluate(now)?;
        let context = SubmissionContext::new(TriggerSource::AutoMaterialize);

        let mut submitted = Vec::with_capacity(tick.run_requests.len());
        for request in tick.run_requests.iter().cloned() {
            let run = self.coordinator.submit_run(request, &context).await;
            if run.status != RunStatus::Failed {
                self.engine.record_submitted(&run, now)?;
            }
            submitted.push(run);
        }

        let report = TickReport { tick, submitted };
        info!(
            tick_time = %report.tick.tick_time,
            queued = report.count(RunStatus::Queued),
            launched = report.count(RunStatus::Launched),
            failed = report.count(RunStatus::Failed),
            "tick submitted"
        );
        Ok(report)
    }

    /// Main event loop.
    ///
    /// - Starts the queued coordinator's dequeue loop, if there is one.
    /// - Evaluates a tick for every `Tick` event.
    /// - Stops on `ShutdownRequested`, on channel close, or after the first
    ///   tick in `exit_after_one_tick` mode.
    ///
    /// Returns the report of the last successful tick.
    pub async fn run(self, mut event_rx: mpsc::Receiver<DaemonEvent>) -> Result<Option<TickReport>> {
        info!("assetdag daemon started");
        let mut last_report = None;

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let dequeue = self
            .coordinator
            .queued()
            .map(|q| Arc::clone(q).spawn_dequeue_loop(shutdown_rx));

        loop {
            let Some(event) = event_rx.recv().await else {
                info!("daemon event channel closed; exiting");
                break;
            };
            debug!(?event, "daemon received event");

            match event {
                DaemonEvent::Tick { at } => {
                    let now = at.unwrap_or_else(Utc::now);
                    match self.tick(now).await {
                        Ok(report) => last_report = Some(report),
                        Err(e) => error!(tick_time = %now, error = %e, "tick failed"),
                    }
                    if self.options.exit_after_one_tick {
                        if let Some(q) = self.coordinator.queued() {
                            q.dequeue_once().await;
                        }
                        info!("single tick complete; stopping daemon");
                        break;
                    }
                }
                DaemonEvent::ShutdownRequested => {
                    info!("shutdown requested; stopping daemon");
                    break;
                }
            }
        }

        let _ = shutdown_tx.send(true);
        if let Some(handle) = dequeue {
            if let Err(e) = handle.await {
                error!(error = %e, "dequeue loop task failed");
            }
        }

        info!("daemon exiting");
        Ok(last_report)
    }
}

/// Send a `Tick` every `interval`, starting immediately.
pub fn spawn_ticker(tx: mpsc::Sender<DaemonEvent>, interval: std::time::Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            if tx.send(DaemonEvent::Tick { at: None }).await.is_err() {
                break;
            }
        }
    })
}
