// src/config/model.rs

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::asset::{AssetCheckSeverity, AssetCheckSpec, PartitionMapping};
use crate::coordinator::TagConcurrencyLimit;
use crate::types::{CoordinatorKind, PolicyPreset};

/// Top-level configuration as read from a TOML file.
///
/// ```toml
/// [daemon]
/// tick_interval_seconds = 30
///
/// [run_coordinator]
/// kind = "queued"
/// max_concurrent_runs = 4
///
/// [run_config.instance]
/// retries = 1
///
/// [asset."raw/orders"]
///
/// [asset."warehouse/orders"]
/// deps = ["raw/orders"]
/// policy = "eager"
/// ```
///
/// All sections except `[asset.*]` are optional and have defaults.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawConfigFile {
    #[serde(default)]
    pub daemon: DaemonSection,

    #[serde(default)]
    pub run_coordinator: RunCoordinatorConfig,

    #[serde(default)]
    pub run_config: RunConfigSection,

    /// All assets from `[asset.<key>]`, keyed by asset key.
    #[serde(default)]
    pub asset: BTreeMap<String, AssetConfig>,

    /// Optional history from `[[event]]`, loaded into the in-memory store.
    #[serde(default)]
    pub event: Vec<EventConfig>,
}

/// Validated configuration. Only built through `TryFrom<RawConfigFile>`.
#[derive(Debug, Clone)]
pub struct ConfigFile {
    pub daemon: DaemonSection,
    pub run_coordinator: RunCoordinatorConfig,
    pub run_config: RunConfigSection,
    pub asset: BTreeMap<String, AssetConfig>,
    pub event: Vec<EventConfig>,
}

impl ConfigFile {
    pub(crate) fn new_unchecked(raw: RawConfigFile) -> Self {
        Self {
            daemon: raw.daemon,
            run_coordinator: raw.run_coordinator,
            run_config: raw.run_config,
            asset: raw.asset,
            event: raw.event,
        }
    }
}

/// `[daemon]` section.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DaemonSection {
    /// Process-wide auto-materialization toggle.
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Seconds between ticks. Also the freshness lookahead.
    #[serde(default = "default_tick_interval_seconds")]
    pub tick_interval_seconds: u64,

    /// Seed for random throttling choices.
    #[serde(default)]
    pub seed: u64,
}

fn default_enabled() -> bool {
    true
}

fn default_tick_interval_seconds() -> u64 {
    30
}

impl Default for DaemonSection {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            tick_interval_seconds: default_tick_interval_seconds(),
            seed: 0,
        }
    }
}

/// `[run_coordinator]` section.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RunCoordinatorConfig {
    /// `"queued"` (default) or `"default"`.
    #[serde(default)]
    pub kind: CoordinatorKind,

    #[serde(default = "default_max_concurrent_runs")]
    pub max_concurrent_runs: usize,

    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    #[serde(default = "default_dequeue_interval_ms")]
    pub dequeue_interval_ms: u64,

    #[serde(default)]
    pub tag_concurrency_limits: Vec<TagConcurrencyLimit>,

    /// Headers copied into run tags; wraps the coordinator in a custom one.
    #[serde(default)]
    pub header_tags: Vec<HeaderTagConfig>,
}

fn default_max_concurrent_runs() -> usize {
    10
}

fn default_queue_capacity() -> usize {
    100
}

fn default_dequeue_interval_ms() -> u64 {
    1000
}

impl Default for RunCoordinatorConfig {
    fn default() -> Self {
        Self {
            kind: CoordinatorKind::default(),
            max_concurrent_runs: default_max_concurrent_runs(),
            queue_capacity: default_queue_capacity(),
            dequeue_interval_ms: default_dequeue_interval_ms(),
            tag_concurrency_limits: Vec::new(),
            header_tags: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HeaderTagConfig {
    pub header: String,
    pub tag: String,
}

/// `[run_config]` section: the two outer step config scopes.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RunConfigSection {
    #[serde(default)]
    pub instance: toml::Table,
    #[serde(default)]
    pub executor: toml::Table,
}

/// `[asset.<key>]` section.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AssetConfig {
    /// Parent asset keys.
    #[serde(default)]
    pub deps: Vec<String>,

    /// Explicit partition mapping per parent key.
    #[serde(default)]
    pub partition_mappings: BTreeMap<String, PartitionMapping>,

    #[serde(default)]
    pub partitions: Option<PartitionsConfig>,

    /// No policy means the asset is never auto-materialized.
    #[serde(default)]
    pub policy: Option<PolicyPreset>,

    /// Built-in rule names appended to the preset.
    #[serde(default)]
    pub add_rules: Vec<String>,

    /// Built-in rule names removed from the preset.
    #[serde(default)]
    pub remove_rules: Vec<String>,

    #[serde(default)]
    pub max_materializations_per_minute: Option<u32>,

    #[serde(default)]
    pub time_window_partitions: Option<usize>,

    #[serde(default)]
    pub freshness_lag_minutes: Option<i64>,

    #[serde(default)]
    pub code_version: Option<String>,

    #[serde(default)]
    pub group: Option<String>,

    #[serde(default)]
    pub description: Option<String>,

    /// `checks = [{ name = "no_nulls", blocking = true }]`
    #[serde(default)]
    pub checks: Vec<AssetCheckSpec>,

    /// Asset-scoped step configuration.
    #[serde(default)]
    pub step_config: toml::Table,
}

/// `partitions = { kind = "daily", start = "2024-01-01T00:00:00Z" }` or
/// `partitions = { kind = "static", keys = ["eu", "us"] }`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum PartitionsConfig {
    Static { keys: Vec<String> },
    Hourly { start: DateTime<Utc> },
    Daily { start: DateTime<Utc> },
    Weekly { start: DateTime<Utc> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Materialization,
    Observation,
    /// Result of an asset check; needs `check` and `success`.
    Check,
}

/// `[[event]]` entry: one historical materialization, observation or check
/// result.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EventConfig {
    pub asset: String,
    #[serde(default)]
    pub partition: Option<String>,
    #[serde(default = "default_event_kind")]
    pub kind: EventKind,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub data_version: Option<String>,
    #[serde(default)]
    pub code_version: Option<String>,
    #[serde(default)]
    pub check: Option<String>,
    #[serde(default)]
    pub success: Option<bool>,
    #[serde(default)]
    pub severity: Option<AssetCheckSeverity>,
}

fn default_event_kind() -> EventKind {
    EventKind::Materialization
}
