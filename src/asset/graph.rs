// src/asset/graph.rs

use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};

use chrono::{DateTime, Utc};
use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};
use tracing::debug;

use crate::asset::checks::AssetCheckSpec;
use crate::asset::key::{AssetKey, AssetPartition};
use crate::asset::mapping::{PartitionMapping, UpstreamPartitions};
use crate::asset::partitions::PartitionsDefinition;
use crate::asset::policy::{AutoMaterializePolicy, FreshnessPolicy};
use crate::errors::{AssetdagError, Result};

/// A dependency edge from a child asset onto one parent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetDep {
    pub asset: AssetKey,
    /// Explicit mapping; `None` means [`PartitionMapping::default_for`].
    pub partition_mapping: Option<PartitionMapping>,
}

impl AssetDep {
    pub fn new(asset: impl Into<AssetKey>) -> Self {
        Self {
            asset: asset.into(),
            partition_mapping: None,
        }
    }

    pub fn with_mapping(asset: impl Into<AssetKey>, mapping: PartitionMapping) -> Self {
        Self {
            asset: asset.into(),
            partition_mapping: Some(mapping),
        }
    }
}

/// Static definition of one asset.
#[derive(Debug, Clone)]
pub struct AssetDefinition {
    pub key: AssetKey,
    pub deps: Vec<AssetDep>,
    pub partitions: Option<PartitionsDefinition>,
    pub freshness_policy: Option<FreshnessPolicy>,
    pub auto_materialize_policy: Option<AutoMaterializePolicy>,
    pub code_version: Option<String>,
    pub group_name: Option<String>,
    pub description: Option<String>,
    pub checks: Vec<AssetCheckSpec>,
    /// Asset-scoped step configuration; wins over executor and instance
    /// scope when a run is launched.
    pub step_config: toml::Table,
}

impl AssetDefinition {
    pub fn new(key: impl Into<AssetKey>) -> Self {
        Self {
            key: key.into(),
            deps: Vec::new(),
            partitions: None,
            freshness_policy: None,
            auto_materialize_policy: None,
            code_version: None,
            group_name: None,
            description: None,
            checks: Vec::new(),
            step_config: toml::Table::new(),
        }
    }

    pub fn with_deps<I, K>(mut self, deps: I) -> Self
    where
        I: IntoIterator<Item = K>,
        K: Into<AssetKey>,
    {
        self.deps.extend(deps.into_iter().map(AssetDep::new));
        self
    }

    pub fn with_dep(mut self, dep: AssetDep) -> Self {
        self.deps.push(dep);
        self
    }

    pub fn with_partitions(mut self, partitions: PartitionsDefinition) -> Self {
        self.partitions = Some(partitions);
        self
    }

    pub fn with_freshness_policy(mut self, policy: FreshnessPolicy) -> Self {
        self.freshness_policy = Some(policy);
        self
    }

    pub fn with_policy(mut self, policy: AutoMaterializePolicy) -> Self {
        self.auto_materialize_policy = Some(policy);
        self
    }

    pub fn with_code_version(mut self, version: impl Into<String>) -> Self {
        self.code_version = Some(version.into());
        self
    }

    pub fn with_check(mut self, check: AssetCheckSpec) -> Self {
        self.checks.push(check);
        self
    }

    pub fn with_step_config(mut self, config: toml::Table) -> Self {
        self.step_config = config;
        self
    }
}

#[derive(Debug, Clone)]
struct AssetNode {
    definition: AssetDefinition,
    children: Vec<AssetKey>,
}

/// Immutable graph of assets for one evaluation tick.
///
/// Construction validates that every parent exists, that no parent is listed
/// twice, and that the graph is acyclic.
#[derive(Debug, Clone)]
pub struct AssetGraph {
    nodes: BTreeMap<AssetKey, AssetNode>,
    topo_order: Vec<AssetKey>,
    topo_index: HashMap<AssetKey, usize>,
}

impl AssetGraph {
    pub fn new(assets: impl IntoIterator<Item = AssetDefinition>) -> Result<Self> {
        let mut nodes: BTreeMap<AssetKey, AssetNode> = BTreeMap::new();

        for definition in assets {
            let key = definition.key.clone();
            if nodes.contains_key(&key) {
                return Err(AssetdagError::ConfigError(format!(
                    "asset '{key}' is defined more than once"
                )));
            }
            nodes.insert(
                key,
                AssetNode {
                    definition,
                    children: Vec::new(),
                },
            );
        }

        validate_deps(&nodes)?;

        // Second pass: populate children from deps.
        let edges: Vec<(AssetKey, AssetKey)> = nodes
            .values()
            .flat_map(|n| {
                n.definition
                    .deps
                    .iter()
                    .map(|d| (d.asset.clone(), n.definition.key.clone()))
                    .collect::<Vec<_>>()
            })
            .collect();
        for (parent, child) in &edges {
            if let Some(node) = nodes.get_mut(parent) {
                node.children.push(child.clone());
            }
        }

        let topo_order = topological_order(&nodes, &edges)?;
        let topo_index = topo_order
            .iter()
            .enumerate()
            .map(|(i, k)| (k.clone(), i))
            .collect();

        debug!(assets = nodes.len(), edges = edges.len(), "built asset graph");

        Ok(Self {
            nodes,
            topo_order,
            topo_index,
        })
    }

    pub fn contains(&self, key: &AssetKey) -> bool {
        self.nodes.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn asset(&self, key: &AssetKey) -> Option<&AssetDefinition> {
        self.nodes.get(key).map(|n| &n.definition)
    }

    pub fn assets(&self) -> impl Iterator<Item = &AssetDefinition> {
        self.nodes.values().map(|n| &n.definition)
    }

    /// Asset keys with every parent before its children.
    pub fn toposorted_keys(&self) -> &[AssetKey] {
        &self.topo_order
    }

    /// Position of `key` in [`Self::toposorted_keys`].
    pub fn topo_index(&self, key: &AssetKey) -> usize {
        self.topo_index.get(key).copied().unwrap_or(usize::MAX)
    }

    pub fn parents_of(&self, key: &AssetKey) -> BTreeSet<AssetKey> {
        self.nodes
            .get(key)
            .map(|n| n.definition.deps.iter().map(|d| d.asset.clone()).collect())
            .unwrap_or_default()
    }

    pub fn children_of(&self, key: &AssetKey) -> &[AssetKey] {
        self.nodes
            .get(key)
            .map(|n| n.children.as_slice())
            .unwrap_or(&[])
    }

    pub fn policy_of(&self, key: &AssetKey) -> Option<&AutoMaterializePolicy> {
        self.asset(key)?.auto_materialize_policy.as_ref()
    }

    pub fn freshness_policy_of(&self, key: &AssetKey) -> Option<&FreshnessPolicy> {
        self.asset(key)?.freshness_policy.as_ref()
    }

    pub fn checks_of(&self, key: &AssetKey) -> &[AssetCheckSpec] {
        self.asset(key).map(|a| a.checks.as_slice()).unwrap_or(&[])
    }

    pub fn partitions_def_of(&self, key: &AssetKey) -> Option<&PartitionsDefinition> {
        self.asset(key)?.partitions.as_ref()
    }

    /// Every asset partition of `key` that exists at `now`.
    pub fn partitions_of(&self, key: &AssetKey, now: DateTime<Utc>) -> Vec<AssetPartition> {
        match self.partitions_def_of(key) {
            None => vec![AssetPartition::unpartitioned(key.clone())],
            Some(def) => def
                .partition_keys(now)
                .into_iter()
                .map(|p| AssetPartition::partitioned(key.clone(), p))
                .collect(),
        }
    }

    pub fn mapping_for(&self, child: &AssetKey, parent: &AssetKey) -> PartitionMapping {
        let explicit = self
            .asset(child)
            .and_then(|c| c.deps.iter().find(|d| &d.asset == parent))
            .and_then(|d| d.partition_mapping);

        explicit.unwrap_or_else(|| {
            PartitionMapping::default_for(
                self.partitions_def_of(child),
                self.partitions_def_of(parent),
            )
        })
    }

    /// Partitions of `parent` that `child` depends on.
    pub fn parent_partitions(
        &self,
        child: &AssetPartition,
        parent: &AssetKey,
        now: DateTime<Utc>,
    ) -> std::result::Result<UpstreamPartitions, String> {
        let mapping = self.mapping_for(&child.asset, parent);
        let upstream = mapping.upstream_partitions(
            child.partition.as_deref(),
            self.partitions_def_of(&child.asset),
            self.partitions_def_of(parent),
            now,
        )?;
        Ok(upstream)
    }

    /// Existing parent partitions of `child` across all of its parents,
    /// ordered by parent key.
    pub fn existing_parent_partitions(
        &self,
        child: &AssetPartition,
        now: DateTime<Utc>,
    ) -> std::result::Result<Vec<AssetPartition>, String> {
        let mut out = Vec::new();
        for parent in self.parents_of(&child.asset) {
            let upstream = self.parent_partitions(child, &parent, now)?;
            out.extend(
                upstream
                    .existent
                    .into_iter()
                    .map(|p| AssetPartition::new(parent.clone(), p)),
            );
        }
        Ok(out)
    }
}

fn validate_deps(nodes: &BTreeMap<AssetKey, AssetNode>) -> Result<()> {
    for (key, node) in nodes {
        let mut check_names = BTreeSet::new();
        for check in &node.definition.checks {
            if !check_names.insert(check.name.as_str()) {
                return Err(AssetdagError::ConfigError(format!(
                    "asset '{key}' declares check '{}' more than once",
                    check.name
                )));
            }
        }

        let mut seen = BTreeSet::new();
        for dep in &node.definition.deps {
            if !nodes.contains_key(&dep.asset) {
                return Err(AssetdagError::ConfigError(format!(
                    "asset '{key}' depends on unknown asset '{}'",
                    dep.asset
                )));
            }
            if !seen.insert(&dep.asset) {
                return Err(AssetdagError::ConfigError(format!(
                    "asset '{key}' lists dependency '{}' more than once",
                    dep.asset
                )));
            }
        }
    }
    Ok(())
}

fn topological_order(
    nodes: &BTreeMap<AssetKey, AssetNode>,
    edges: &[(AssetKey, AssetKey)],
) -> Result<Vec<AssetKey>> {
    // Edge direction: parent -> child.
    let mut graph: DiGraph<AssetKey, ()> = DiGraph::new();
    let mut index: HashMap<AssetKey, NodeIndex> = HashMap::new();

    for key in nodes.keys() {
        index.insert(key.clone(), graph.add_node(key.clone()));
    }
    for (parent, child) in edges {
        graph.add_edge(index[parent], index[child], ());
    }

    match toposort(&graph, None) {
        Ok(order) => Ok(order.into_iter().map(|i| graph[i].clone()).collect()),
        Err(cycle) => {
            let path = describe_cycle(&graph, cycle.node_id());
            Err(AssetdagError::GraphCycle(path))
        }
    }
}

/// Render a cycle through `start` as `a -> b -> a`.
fn describe_cycle(graph: &DiGraph<AssetKey, ()>, start: NodeIndex) -> String {
    let mut previous: HashMap<NodeIndex, NodeIndex> = HashMap::new();
    let mut queue: VecDeque<NodeIndex> = graph.neighbors(start).collect();
    for n in graph.neighbors(start) {
        previous.insert(n, start);
    }

    while let Some(node) = queue.pop_front() {
        if node == start {
            break;
        }
        for next in graph.neighbors(node) {
            if let std::collections::hash_map::Entry::Vacant(e) = previous.entry(next) {
                e.insert(node);
                queue.push_back(next);
            }
        }
    }

    if !previous.contains_key(&start) {
        return graph[start].to_string();
    }

    let mut path = vec![graph[start].to_string()];
    let mut cursor = previous[&start];
    while cursor != start {
        path.push(graph[cursor].to_string());
        cursor = previous[&cursor];
    }
    path.push(graph[start].to_string());
    path.reverse();
    path.join(" -> ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_two_node_cycle_and_names_it() {
        let err = AssetGraph::new([
            AssetDefinition::new("a").with_deps(["b"]),
            AssetDefinition::new("b").with_deps(["a"]),
        ])
        .unwrap_err();

        match err {
            AssetdagError::GraphCycle(path) => {
                assert!(path == "a -> b -> a" || path == "b -> a -> b", "{path}");
            }
            other => panic!("expected GraphCycle, got {other:?}"),
        }
    }

    #[test]
    fn rejects_self_dependency() {
        let err = AssetGraph::new([AssetDefinition::new("a").with_deps(["a"])]).unwrap_err();
        assert!(matches!(err, AssetdagError::GraphCycle(ref p) if p == "a -> a"));
    }

    #[test]
    fn rejects_unknown_and_duplicate_parents() {
        let unknown = AssetGraph::new([AssetDefinition::new("a").with_deps(["missing"])]);
        assert!(matches!(unknown, Err(AssetdagError::ConfigError(_))));

        let dup = AssetGraph::new([
            AssetDefinition::new("a"),
            AssetDefinition::new("b").with_deps(["a", "a"]),
        ]);
        assert!(matches!(dup, Err(AssetdagError::ConfigError(_))));
    }

    #[test]
    fn check_names_are_unique_per_asset() {
        let dup = AssetGraph::new([AssetDefinition::new("orders")
            .with_check(AssetCheckSpec::new("no_nulls"))
            .with_check(AssetCheckSpec::new("no_nulls").blocking())]);
        assert!(matches!(dup, Err(AssetdagError::ConfigError(ref m)) if m.contains("no_nulls")));

        let graph = AssetGraph::new([
            AssetDefinition::new("orders").with_check(AssetCheckSpec::new("no_nulls").blocking()),
            AssetDefinition::new("items").with_check(AssetCheckSpec::new("no_nulls")),
        ])
        .unwrap();
        assert_eq!(graph.checks_of(&AssetKey::from("orders")).len(), 1);
        assert!(graph.checks_of(&AssetKey::from("missing")).is_empty());
    }

    #[test]
    fn parents_children_and_topological_order() {
        let graph = AssetGraph::new([
            AssetDefinition::new("c").with_deps(["b"]),
            AssetDefinition::new("b").with_deps(["a"]),
            AssetDefinition::new("a"),
        ])
        .unwrap();

        let order: Vec<&str> = graph.toposorted_keys().iter().map(|k| k.as_str()).collect();
        assert_eq!(order, vec!["a", "b", "c"]);
        assert_eq!(
            graph.parents_of(&AssetKey::from("c")),
            BTreeSet::from([AssetKey::from("b")])
        );
        assert_eq!(graph.children_of(&AssetKey::from("a")), &[AssetKey::from("b")]);
        assert!(graph.policy_of(&AssetKey::from("a")).is_none());
    }
}
