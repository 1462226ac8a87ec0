// src/config/validate.rs

use std::collections::BTreeSet;

use chrono::Duration;
use petgraph::algo::toposort;
use petgraph::graphmap::DiGraphMap;

use crate::asset::{AutoMaterializeRule, FreshnessPolicy};
use crate::config::model::{ConfigFile, EventKind, PartitionsConfig, RawConfigFile};
use crate::errors::{AssetdagError, Result};

impl TryFrom<RawConfigFile> for ConfigFile {
    type Error = crate::errors::AssetdagError;

    fn try_from(raw: RawConfigFile) -> std::result::Result<Self, Self::Error> {
        validate_raw_config(&raw)?;
        Ok(ConfigFile::new_unchecked(raw))
    }
}

fn validate_raw_config(cfg: &RawConfigFile) -> Result<()> {
    ensure_has_assets(cfg)?;
    validate_daemon_config(cfg)?;
    validate_coordinator_config(cfg)?;
    validate_assets(cfg)?;
    validate_asset_dependencies(cfg)?;
    validate_dag(cfg)?;
    validate_events(cfg)?;
    Ok(())
}

fn config_error(message: impl Into<String>) -> AssetdagError {
    AssetdagError::ConfigError(message.into())
}

fn ensure_has_assets(cfg: &RawConfigFile) -> Result<()> {
    if cfg.asset.is_empty() {
        return Err(config_error(
            "config must contain at least one [asset.<key>] section",
        ));
    }
    Ok(())
}

fn validate_daemon_config(cfg: &RawConfigFile) -> Result<()> {
    let secs = cfg.daemon.tick_interval_seconds;
    if secs == 0 {
        return Err(config_error(
            "[daemon].tick_interval_seconds must be >= 1 (got 0)",
        ));
    }
    if tick_interval(secs).is_none() {
        return Err(config_error(format!(
            "[daemon].tick_interval_seconds is out of range (got {secs})"
        )));
    }
    Ok(())
}

/// `None` when `secs` does not fit a [`Duration`].
pub(crate) fn tick_interval(secs: u64) -> Option<Duration> {
    i64::try_from(secs).ok().and_then(Duration::try_seconds)
}

fn validate_coordinator_config(cfg: &RawConfigFile) -> Result<()> {
    let rc = &cfg.run_coordinator;
    if rc.max_concurrent_runs == 0 {
        return Err(config_error(
            "[run_coordinator].max_concurrent_runs must be >= 1 (got 0)",
        ));
    }
    if rc.queue_capacity == 0 {
        return Err(config_error(
            "[run_coordinator].queue_capacity must be >= 1 (got 0)",
        ));
    }
    if rc.dequeue_interval_ms == 0 {
        return Err(config_error(
            "[run_coordinator].dequeue_interval_ms must be >= 1 (got 0)",
        ));
    }
    for limit in &rc.tag_concurrency_limits {
        if limit.key.trim().is_empty() {
            return Err(config_error("tag concurrency limit has an empty key"));
        }
    }
    for hook in &rc.header_tags {
        if hook.header.trim().is_empty() || hook.tag.trim().is_empty() {
            return Err(config_error(
                "[run_coordinator].header_tags entries need a non-empty header and tag",
            ));
        }
    }
    Ok(())
}

fn validate_assets(cfg: &RawConfigFile) -> Result<()> {
    for (key, asset) in cfg.asset.iter() {
        if key.trim().is_empty() || key.split('/').any(str::is_empty) {
            return Err(config_error(format!(
                "invalid asset key '{key}' (expected non-empty '/'-separated segments)"
            )));
        }

        for name in asset.add_rules.iter().chain(asset.remove_rules.iter()) {
            if AutoMaterializeRule::from_name(name).is_none() {
                return Err(config_error(format!(
                    "asset '{key}' references unknown rule '{name}'"
                )));
            }
        }

        let tunes_policy = !asset.add_rules.is_empty()
            || !asset.remove_rules.is_empty()
            || asset.max_materializations_per_minute.is_some()
            || asset.time_window_partitions.is_some();
        if tunes_policy && asset.policy.is_none() {
            return Err(config_error(format!(
                "asset '{key}' tunes its auto-materialize policy but sets no `policy`"
            )));
        }

        if let Some(lag) = asset.freshness_lag_minutes {
            if lag <= 0 {
                return Err(config_error(format!(
                    "asset '{key}': freshness_lag_minutes must be > 0 (got {lag})"
                )));
            }
            if FreshnessPolicy::try_from_minutes(lag).is_none() {
                return Err(config_error(format!(
                    "asset '{key}': freshness_lag_minutes is out of range (got {lag})"
                )));
            }
        }

        if let Some(PartitionsConfig::Static { keys }) = &asset.partitions {
            if keys.is_empty() {
                return Err(config_error(format!(
                    "asset '{key}': static partitions need at least one key"
                )));
            }
            let unique: BTreeSet<&String> = keys.iter().collect();
            if unique.len() != keys.len() {
                return Err(config_error(format!(
                    "asset '{key}': static partition keys must be unique"
                )));
            }
        }
    }
    Ok(())
}

fn validate_asset_dependencies(cfg: &RawConfigFile) -> Result<()> {
    for (name, asset) in cfg.asset.iter() {
        let mut seen = BTreeSet::new();
        for dep in asset.deps.iter() {
            if dep == name {
                return Err(config_error(format!(
                    "asset '{name}' cannot depend on itself in `deps`"
                )));
            }
            if !cfg.asset.contains_key(dep) {
                return Err(AssetdagError::UnknownAsset(format!(
                    "asset '{name}' has unknown dependency '{dep}' in `deps`"
                )));
            }
            if !seen.insert(dep) {
                return Err(config_error(format!(
                    "asset '{name}' lists dependency '{dep}' more than once"
                )));
            }
        }
        for parent in asset.partition_mappings.keys() {
            if !asset.deps.contains(parent) {
                return Err(config_error(format!(
                    "asset '{name}' has a partition mapping for '{parent}', which is not in `deps`"
                )));
            }
        }
    }
    Ok(())
}

fn validate_dag(cfg: &RawConfigFile) -> Result<()> {
    // Edge direction: dep -> asset.
    let mut graph: DiGraphMap<&str, ()> = DiGraphMap::new();

    for name in cfg.asset.keys() {
        graph.add_node(name.as_str());
    }

    for (name, asset) in cfg.asset.iter() {
        for dep in asset.deps.iter() {
            graph.add_edge(dep.as_str(), name.as_str(), ());
        }
    }

    match toposort(&graph, None) {
        Ok(_order) => Ok(()),
        Err(cycle) => {
            let node = cycle.node_id();
            Err(AssetdagError::GraphCycle(format!(
                "cycle detected in asset graph involving asset '{node}'"
            )))
        }
    }
}

fn validate_events(cfg: &RawConfigFile) -> Result<()> {
    for (i, event) in cfg.event.iter().enumerate() {
        let Some(asset) = cfg.asset.get(&event.asset) else {
            return Err(AssetdagError::UnknownAsset(format!(
                "[[event]] #{i} references unknown asset '{}'",
                event.asset
            )));
        };
        match (&asset.partitions, &event.partition) {
            (_, Some(_)) if event.kind == EventKind::Check => {
                return Err(config_error(format!(
                    "[[event]] #{i}: check results apply to the whole asset; drop `partition`"
                )));
            }
            (_, None) if event.kind == EventKind::Check => {}
            (None, Some(p)) => {
                return Err(config_error(format!(
                    "[[event]] #{i}: asset '{}' is unpartitioned but partition '{p}' was given",
                    event.asset
                )));
            }
            (Some(_), None) => {
                return Err(config_error(format!(
                    "[[event]] #{i}: asset '{}' is partitioned; `partition` is required",
                    event.asset
                )));
            }
            _ => {}
        }
        let check_fields = event.check.is_some() || event.success.is_some() || event.severity.is_some();
        match event.kind {
            EventKind::Observation if event.data_version.is_none() => {
                return Err(config_error(format!(
                    "[[event]] #{i}: observations need a `data_version`"
                )));
            }
            EventKind::Check => {
                let Some(check) = &event.check else {
                    return Err(config_error(format!(
                        "[[event]] #{i}: check results need a `check` name"
                    )));
                };
                if !asset.checks.iter().any(|c| &c.name == check) {
                    return Err(config_error(format!(
                        "[[event]] #{i}: asset '{}' declares no check '{check}'",
                        event.asset
                    )));
                }
                if event.success.is_none() {
                    return Err(config_error(format!(
                        "[[event]] #{i}: check results need `success`"
                    )));
                }
            }
            EventKind::Materialization | EventKind::Observation if check_fields => {
                return Err(config_error(format!(
                    "[[event]] #{i}: `check`, `success` and `severity` only apply to kind = \"check\""
                )));
            }
            _ => {}
        }
    }
    Ok(())
}
