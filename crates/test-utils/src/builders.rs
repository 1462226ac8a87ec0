#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};

use assetdag::asset::{
    AssetCheckSeverity, AssetCheckSpec, AssetDefinition, AssetGraph, AssetKey, AssetPartition,
};
use assetdag::config::{
    AssetConfig, ConfigFile, DaemonSection, EventConfig, EventKind, HeaderTagConfig,
    PartitionsConfig, RawConfigFile, RunConfigSection, RunCoordinatorConfig,
};
use assetdag::coordinator::TagConcurrencyLimit;
use assetdag::engine::{AutoMaterializeEngine, EngineOptions};
use assetdag::errors::Result;
use assetdag::store::{
    AssetCheckResult, EventStore, InMemoryEventStore, MaterializationRecord, ObservationRecord,
};
use assetdag::types::{CoordinatorKind, PolicyPreset};

use crate::recording::MemorySink;

/// Builder for `ConfigFile` to simplify test setup.
pub struct ConfigFileBuilder {
    config: RawConfigFile,
}

impl ConfigFileBuilder {
    pub fn new() -> Self {
        Self {
            config: RawConfigFile {
                daemon: DaemonSection::default(),
                run_coordinator: RunCoordinatorConfig::default(),
                run_config: RunConfigSection::default(),
                asset: BTreeMap::new(),
                event: Vec::new(),
            },
        }
    }

    pub fn with_asset(mut self, key: &str, asset: AssetConfig) -> Self {
        self.config.asset.insert(key.to_string(), asset);
        self
    }

    pub fn with_coordinator(mut self, kind: CoordinatorKind, max_concurrent_runs: usize) -> Self {
        self.config.run_coordinator.kind = kind;
        self.config.run_coordinator.max_concurrent_runs = max_concurrent_runs;
        self
    }

    pub fn with_tag_limit(mut self, key: &str, value: Option<&str>, limit: usize) -> Self {
        self.config
            .run_coordinator
            .tag_concurrency_limits
            .push(TagConcurrencyLimit {
                key: key.to_string(),
                value: value.map(str::to_string),
                limit,
            });
        self
    }

    pub fn with_header_tag(mut self, header: &str, tag: &str) -> Self {
        self.config.run_coordinator.header_tags.push(HeaderTagConfig {
            header: header.to_string(),
            tag: tag.to_string(),
        });
        self
    }

    pub fn with_materialization(
        mut self,
        asset: &str,
        partition: Option<&str>,
        at: DateTime<Utc>,
        data_version: Option<&str>,
    ) -> Self {
        self.config.event.push(EventConfig {
            asset: asset.to_string(),
            partition: partition.map(str::to_string),
            kind: EventKind::Materialization,
            timestamp: at,
            data_version: data_version.map(str::to_string),
            code_version: None,
            check: None,
            success: None,
            severity: None,
        });
        self
    }

    pub fn with_check_result(
        mut self,
        asset: &str,
        check: &str,
        at: DateTime<Utc>,
        success: bool,
        severity: AssetCheckSeverity,
    ) -> Self {
        self.config.event.push(EventConfig {
            asset: asset.to_string(),
            partition: None,
            kind: EventKind::Check,
            timestamp: at,
            data_version: None,
            code_version: None,
            check: Some(check.to_string()),
            success: Some(success),
            severity: Some(severity),
        });
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.config.daemon.seed = seed;
        self
    }

    pub fn raw(self) -> RawConfigFile {
        self.config
    }

    pub fn try_build(self) -> Result<ConfigFile> {
        ConfigFile::try_from(self.config)
    }

    pub fn build(self) -> ConfigFile {
        self.try_build()
            .expect("Failed to build valid config from builder")
    }
}

impl Default for ConfigFileBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for `AssetConfig`.
pub struct AssetConfigBuilder {
    asset: AssetConfig,
}

impl AssetConfigBuilder {
    pub fn new() -> Self {
        Self {
            asset: AssetConfig::default(),
        }
    }

    pub fn dep(mut self, dep: &str) -> Self {
        self.asset.deps.push(dep.to_string());
        self
    }

    pub fn policy(mut self, preset: PolicyPreset) -> Self {
        self.asset.policy = Some(preset);
        self
    }

    pub fn add_rule(mut self, rule: &str) -> Self {
        self.asset.add_rules.push(rule.to_string());
        self
    }

    pub fn max_per_minute(mut self, max: u32) -> Self {
        self.asset.max_materializations_per_minute = Some(max);
        self
    }

    pub fn freshness_lag_minutes(mut self, minutes: i64) -> Self {
        self.asset.freshness_lag_minutes = Some(minutes);
        self
    }

    pub fn partitions(mut self, partitions: PartitionsConfig) -> Self {
        self.asset.partitions = Some(partitions);
        self
    }

    pub fn check(mut self, spec: AssetCheckSpec) -> Self {
        self.asset.checks.push(spec);
        self
    }

    pub fn step_config(mut self, table: toml::Table) -> Self {
        self.asset.step_config = table;
        self
    }

    pub fn build(self) -> AssetConfig {
        self.asset
    }
}

impl Default for AssetConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Graph + in-memory store + recording sink, for engine tests.
pub struct Fixture {
    pub graph: Arc<AssetGraph>,
    pub store: Arc<InMemoryEventStore>,
    pub sink: MemorySink,
}

impl Fixture {
    pub fn new(assets: impl IntoIterator<Item = AssetDefinition>) -> Self {
        Self {
            graph: Arc::new(AssetGraph::new(assets).expect("valid test graph")),
            store: Arc::new(InMemoryEventStore::new()),
            sink: MemorySink::new(),
        }
    }

    pub fn materialize(&self, ap: AssetPartition, at: DateTime<Utc>, data_version: Option<&str>) {
        let mut record = MaterializationRecord::at(at);
        if let Some(v) = data_version {
            record = record.with_data_version(v);
        }
        self.store
            .put_materialization(&ap, record)
            .expect("in-memory store accepts writes");
    }

    /// Materialize the unpartitioned asset `asset` at `at`.
    pub fn materialize_at(&self, asset: &str, at: DateTime<Utc>) {
        self.materialize(AssetPartition::unpartitioned(asset), at, None);
    }

    pub fn observe(&self, ap: AssetPartition, at: DateTime<Utc>, data_version: &str) {
        self.store
            .put_observation(&ap, ObservationRecord::new(at, data_version))
            .expect("in-memory store accepts writes");
    }

    pub fn check_result(&self, asset: &str, result: AssetCheckResult) {
        self.store
            .put_check_result(&AssetKey::new(asset), result)
            .expect("in-memory store accepts writes");
    }

    pub fn engine(&self) -> AutoMaterializeEngine {
        self.engine_with(EngineOptions::default())
    }

    pub fn engine_with(&self, options: EngineOptions) -> AutoMaterializeEngine {
        AutoMaterializeEngine::new(Arc::clone(&self.graph), self.store.clone(), options)
            .with_sink(Arc::new(self.sink.clone()))
    }
}
