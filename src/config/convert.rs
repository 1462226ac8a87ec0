// src/config/convert.rs

//! Turning a validated [`ConfigFile`] into runtime values.

use chrono::Duration;
use tracing::debug;

use crate::asset::{
    AssetDefinition, AssetDep, AssetGraph, AssetKey, AssetPartition, AutoMaterializePolicy,
    AutoMaterializeRule, Cadence, FreshnessPolicy, PartitionsDefinition, TimeWindowPartitions,
};
use crate::config::model::{AssetConfig, ConfigFile, EventKind, PartitionsConfig};
use crate::config::validate::tick_interval;
use crate::engine::EngineOptions;
use crate::errors::{AssetdagError, Result};
use crate::exec::StepConfigResolver;
use crate::store::{AssetCheckResult, EventStore, MaterializationRecord, ObservationRecord};
use crate::types::PolicyPreset;

impl ConfigFile {
    /// Asset definitions in key order.
    pub fn asset_definitions(&self) -> Result<Vec<AssetDefinition>> {
        self.asset
            .iter()
            .map(|(key, cfg)| asset_definition(key, cfg))
            .collect()
    }

    pub fn build_graph(&self) -> Result<AssetGraph> {
        AssetGraph::new(self.asset_definitions()?)
    }

    pub fn engine_options(&self) -> EngineOptions {
        EngineOptions {
            enabled: self.daemon.enabled,
            seed: self.daemon.seed,
            freshness_lookahead: self.tick_interval(),
        }
    }

    /// Out-of-range intervals are rejected during validation.
    pub fn tick_interval(&self) -> Duration {
        tick_interval(self.daemon.tick_interval_seconds).unwrap_or(Duration::MAX)
    }

    pub fn step_config_resolver(&self, graph: &AssetGraph) -> StepConfigResolver {
        StepConfigResolver::from_graph(
            graph,
            self.run_config.instance.clone(),
            self.run_config.executor.clone(),
        )
    }

    /// Write every `[[event]]` into `store`.
    pub fn seed_store(&self, store: &dyn EventStore) -> Result<usize> {
        for event in &self.event {
            let ap = AssetPartition::new(event.asset.as_str(), event.partition.clone());
            match event.kind {
                EventKind::Materialization => {
                    let mut record = MaterializationRecord::at(event.timestamp);
                    if let Some(v) = &event.data_version {
                        record = record.with_data_version(v.clone());
                    }
                    if let Some(v) = &event.code_version {
                        record = record.with_code_version(v.clone());
                    }
                    store.put_materialization(&ap, record)?;
                }
                EventKind::Observation => {
                    let version = event.data_version.clone().ok_or_else(|| {
                        AssetdagError::ConfigError(format!(
                            "observation of '{ap}' has no data_version"
                        ))
                    })?;
                    store.put_observation(&ap, ObservationRecord::new(event.timestamp, version))?;
                }
                EventKind::Check => {
                    let (Some(check), Some(success)) = (&event.check, event.success) else {
                        return Err(AssetdagError::ConfigError(format!(
                            "check result for '{}' needs `check` and `success`",
                            event.asset
                        )));
                    };
                    let result = AssetCheckResult {
                        timestamp: event.timestamp,
                        check_name: check.clone(),
                        success,
                        severity: event.severity.unwrap_or_default(),
                    };
                    store.put_check_result(&AssetKey::new(event.asset.as_str()), result)?;
                }
            }
        }
        debug!(events = self.event.len(), "seeded event store from config");
        Ok(self.event.len())
    }
}

fn asset_definition(key: &str, cfg: &AssetConfig) -> Result<AssetDefinition> {
    let deps = cfg
        .deps
        .iter()
        .map(|dep| match cfg.partition_mappings.get(dep) {
            Some(mapping) => AssetDep::with_mapping(dep.as_str(), *mapping),
            None => AssetDep::new(dep.as_str()),
        })
        .collect();

    let mut definition = AssetDefinition::new(key);
    definition.deps = deps;
    definition.partitions = cfg.partitions.as_ref().map(partitions_definition);
    definition.freshness_policy = cfg
        .freshness_lag_minutes
        .map(|lag| {
            FreshnessPolicy::try_from_minutes(lag).ok_or_else(|| {
                AssetdagError::ConfigError(format!(
                    "asset '{key}': freshness_lag_minutes is out of range (got {lag})"
                ))
            })
        })
        .transpose()?;
    definition.auto_materialize_policy = cfg.policy.map(|preset| policy(key, preset, cfg)).transpose()?;
    definition.code_version = cfg.code_version.clone();
    definition.group_name = cfg.group.clone();
    definition.description = cfg.description.clone();
    definition.checks = cfg.checks.clone();
    definition.step_config = cfg.step_config.clone();
    Ok(definition)
}

fn partitions_definition(cfg: &PartitionsConfig) -> PartitionsDefinition {
    match cfg {
        PartitionsConfig::Static { keys } => PartitionsDefinition::Static(keys.clone()),
        PartitionsConfig::Hourly { start } => {
            PartitionsDefinition::TimeWindow(TimeWindowPartitions::new(*start, Cadence::Hourly))
        }
        PartitionsConfig::Daily { start } => {
            PartitionsDefinition::TimeWindow(TimeWindowPartitions::new(*start, Cadence::Daily))
        }
        PartitionsConfig::Weekly { start } => {
            PartitionsDefinition::TimeWindow(TimeWindowPartitions::new(*start, Cadence::Weekly))
        }
    }
}

fn policy(key: &str, preset: PolicyPreset, cfg: &AssetConfig) -> Result<AutoMaterializePolicy> {
    let rules = |names: &[String]| -> Result<Vec<AutoMaterializeRule>> {
        names
            .iter()
            .map(|n| {
                AutoMaterializeRule::from_name(n).ok_or_else(|| {
                    AssetdagError::ConfigError(format!("asset '{key}' references unknown rule '{n}'"))
                })
            })
            .collect()
    };

    let mut policy = match preset {
        PolicyPreset::Eager => AutoMaterializePolicy::eager(),
        PolicyPreset::Lazy => AutoMaterializePolicy::lazy(),
    };
    policy = policy
        .with_rules(rules(&cfg.add_rules)?)
        .without_rules(rules(&cfg.remove_rules)?);
    if let Some(max) = cfg.max_materializations_per_minute {
        policy = policy.with_max_materializations_per_minute(max);
    }
    if let Some(n) = cfg.time_window_partitions {
        policy = policy.with_time_window_partitions(n);
    }
    Ok(policy)
}
