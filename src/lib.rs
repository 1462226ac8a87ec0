// src/lib.rs

pub mod asset;
pub mod cli;
pub mod config;
pub mod coordinator;
pub mod daemon;
pub mod engine;
pub mod errors;
pub mod exec;
pub mod logging;
pub mod run;
pub mod store;
pub mod types;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use chrono::Utc;
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::cli::CliArgs;
use crate::config::loader::load_and_validate;
use crate::config::model::ConfigFile;
use crate::coordinator::Coordinator;
use crate::daemon::{Daemon, DaemonEvent, DaemonOptions, TickReport, spawn_ticker};
use crate::engine::AutoMaterializeEngine;
use crate::exec::LoggingLauncher;
use crate::store::{EventStore, InMemoryEventStore};

/// High-level entry point used by `main.rs`.
///
/// This wires together:
/// - config loading
/// - asset graph + seeded in-memory event store
/// - engine, step config resolver and run coordinator
/// - the daemon loop with its ticker
/// - Ctrl-C handling
pub async fn run(args: CliArgs) -> Result<()> {
    let config_path = PathBuf::from(&args.config);
    let cfg = load_and_validate(&config_path)?;

    if args.dry_run {
        print_dry_run(&cfg)?;
        return Ok(());
    }

    let daemon = build_daemon(
        &cfg,
        DaemonOptions {
            exit_after_one_tick: args.once,
        },
    )?;

    let (tx, rx) = mpsc::channel::<DaemonEvent>(64);

    if args.once {
        let now = args.now.unwrap_or_else(Utc::now);
        tx.send(DaemonEvent::Tick { at: Some(now) }).await?;
        match daemon.run(rx).await? {
            Some(report) => print_tick_report(&report),
            None => println!("tick {} failed; see logs", now.to_rfc3339()),
        }
        return Ok(());
    }

    // Ctrl-C → graceful shutdown.
    {
        let tx = tx.clone();
        tokio::spawn(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                eprintln!("failed to listen for Ctrl+C: {e}");
                return;
            }
            let _ = tx.send(DaemonEvent::ShutdownRequested).await;
        });
    }

    let interval = std::time::Duration::from_secs(cfg.daemon.tick_interval_seconds);
    let _ticker = spawn_ticker(tx, interval);
    info!(tick_interval_seconds = cfg.daemon.tick_interval_seconds, "ticker started");

    daemon.run(rx).await?;
    Ok(())
}

/// Build the full daemon stack from a validated config, using an in-memory
/// store seeded from `[[event]]` and the logging launcher.
pub fn build_daemon(cfg: &ConfigFile, options: DaemonOptions) -> Result<Daemon> {
    let graph = Arc::new(cfg.build_graph()?);

    let store = Arc::new(InMemoryEventStore::new());
    cfg.seed_store(store.as_ref())?;
    let store: Arc<dyn EventStore> = store;

    let engine = AutoMaterializeEngine::new(Arc::clone(&graph), store, cfg.engine_options());
    let resolver = Arc::new(cfg.step_config_resolver(&graph));
    let coordinator = Coordinator::from_config(&cfg.run_coordinator, Arc::new(LoggingLauncher), resolver);

    debug!(assets = graph.len(), "daemon built");
    Ok(Daemon::new(engine, Arc::new(coordinator), options))
}

/// Dry-run output: print assets, deps, policies and coordinator settings.
fn print_dry_run(cfg: &ConfigFile) -> Result<()> {
    let graph = cfg.build_graph()?;

    println!("assetdag dry-run");
    println!("  daemon.enabled = {}", cfg.daemon.enabled);
    println!(
        "  daemon.tick_interval_seconds = {}",
        cfg.daemon.tick_interval_seconds
    );
    println!(
        "  run_coordinator.kind = {:?} (max_concurrent_runs = {})",
        cfg.run_coordinator.kind, cfg.run_coordinator.max_concurrent_runs
    );
    println!();

    println!("assets ({}):", graph.len());
    for key in graph.toposorted_keys() {
        println!("  - {key}");
        let parents = graph.parents_of(key);
        if !parents.is_empty() {
            let names: Vec<&str> = parents.iter().map(|p| p.as_str()).collect();
            println!("      deps: {names:?}");
        }
        if let Some(policy) = graph.policy_of(key) {
            let rules: Vec<&str> = policy.rules().iter().map(|r| r.name()).collect();
            println!("      rules: {rules:?}");
            println!(
                "      max_materializations_per_minute: {}",
                policy.max_materializations_per_minute()
            );
        }
        if let Some(freshness) = graph.freshness_policy_of(key) {
            println!(
                "      freshness: maximum_lag = {}m",
                freshness.maximum_lag.num_minutes()
            );
        }
    }

    debug!("dry-run complete (no evaluation)");
    Ok(())
}

fn print_tick_report(report: &TickReport) {
    println!("tick {}", report.tick.tick_time.to_rfc3339());
    if report.submitted.is_empty() {
        println!("  no run requests");
    }
    for run in &report.submitted {
        let members: Vec<String> = run.asset_partitions.iter().map(|ap| ap.to_string()).collect();
        let retry = if run.pending_retry { " (pending retry)" } else { "" };
        println!("  {} {}{retry}: {}", run.run_id, run.status, members.join(", "));
    }
}
