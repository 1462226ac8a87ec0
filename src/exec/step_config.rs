// src/exec/step_config.rs

//! Per-step run configuration.
//!
//! Three scopes are merged key by key: instance, then executor, then the
//! asset itself. A more specific scope replaces the whole value of a key it
//! sets (no deep merge); keys it does not set are kept.

use std::collections::BTreeMap;

use crate::asset::{AssetGraph, AssetKey, AssetPartition};
use crate::exec::backend::StepLaunch;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct StepConfigResolver {
    instance: toml::Table,
    executor: toml::Table,
    assets: BTreeMap<AssetKey, toml::Table>,
}

impl StepConfigResolver {
    pub fn new(instance: toml::Table, executor: toml::Table) -> Self {
        Self {
            instance,
            executor,
            assets: BTreeMap::new(),
        }
    }

    /// Resolver with asset scopes taken from each definition's
    /// `step_config`.
    pub fn from_graph(graph: &AssetGraph, instance: toml::Table, executor: toml::Table) -> Self {
        let mut resolver = Self::new(instance, executor);
        for asset in graph.assets() {
            if !asset.step_config.is_empty() {
                resolver
                    .assets
                    .insert(asset.key.clone(), asset.step_config.clone());
            }
        }
        resolver
    }

    pub fn with_asset_config(mut self, asset: impl Into<AssetKey>, config: toml::Table) -> Self {
        self.assets.insert(asset.into(), config);
        self
    }

    pub fn resolve(&self, asset: &AssetKey) -> toml::Table {
        let mut merged = merge_shallow(&self.instance, &self.executor);
        if let Some(scoped) = self.assets.get(asset) {
            merged = merge_shallow(&merged, scoped);
        }
        merged
    }

    pub fn steps<'a>(
        &self,
        asset_partitions: impl IntoIterator<Item = &'a AssetPartition>,
    ) -> Vec<StepLaunch> {
        asset_partitions
            .into_iter()
            .map(|ap| StepLaunch {
                asset_partition: ap.clone(),
                config: self.resolve(&ap.asset),
            })
            .collect()
    }
}

/// `base` overridden by `overrides`, one level deep.
pub fn merge_shallow(base: &toml::Table, overrides: &toml::Table) -> toml::Table {
    let mut out = base.clone();
    for (key, value) in overrides {
        out.insert(key.clone(), value.clone());
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table(src: &str) -> toml::Table {
        src.parse().unwrap()
    }

    #[test]
    fn most_specific_scope_wins_per_key() {
        let resolver = StepConfigResolver::new(
            table("retries = 1\nqueue = \"default\"\n[resources]\ncpu = 1\nmemory = \"1Gi\""),
            table("retries = 3\nimage = \"base:1\""),
        )
        .with_asset_config("orders", table("image = \"orders:2\"\n[resources]\ncpu = 4"));

        let resolved = resolver.resolve(&AssetKey::from("orders"));
        assert_eq!(resolved["retries"].as_integer(), Some(3));
        assert_eq!(resolved["queue"].as_str(), Some("default"));
        assert_eq!(resolved["image"].as_str(), Some("orders:2"));
        // Shallow: the asset's table replaces the instance table entirely.
        let resources = resolved["resources"].as_table().unwrap();
        assert_eq!(resources.get("cpu").and_then(|v| v.as_integer()), Some(4));
        assert!(resources.get("memory").is_none());

        let other = resolver.resolve(&AssetKey::from("customers"));
        assert_eq!(other["image"].as_str(), Some("base:1"));
    }
}
