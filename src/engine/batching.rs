// src/engine/batching.rs

//! Grouping of selected partitions into run requests.
//!
//! A selected partition joins the group of each selected parent partition it
//! reads, as long as the merged group still holds at most one distinct
//! partition key. Unpartitioned assets carry no key and merge freely.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, SecondsFormat, Utc};

use crate::asset::{AssetGraph, AssetPartition, PartitionKey};
use crate::run::{AUTO_MATERIALIZE_TAG, PARTITION_TAG, RunRequest, TICK_TAG};

struct Groups {
    parent: Vec<usize>,
    keys: Vec<BTreeSet<PartitionKey>>,
}

impl Groups {
    fn new(members: &[AssetPartition]) -> Self {
        Self {
            parent: (0..members.len()).collect(),
            keys: members
                .iter()
                .map(|ap| ap.partition.iter().cloned().collect())
                .collect(),
        }
    }

    fn find(&mut self, mut i: usize) -> usize {
        while self.parent[i] != i {
            self.parent[i] = self.parent[self.parent[i]];
            i = self.parent[i];
        }
        i
    }

    /// Merge unless the result would span two partition keys.
    fn try_union(&mut self, a: usize, b: usize) -> bool {
        let (ra, rb) = (self.find(a), self.find(b));
        if ra == rb {
            return true;
        }
        let merged: BTreeSet<PartitionKey> = self.keys[ra].union(&self.keys[rb]).cloned().collect();
        if merged.len() > 1 {
            return false;
        }
        // Lower index wins so the result does not depend on union order.
        let (root, child) = if ra < rb { (ra, rb) } else { (rb, ra) };
        self.parent[child] = root;
        self.keys[root] = merged;
        true
    }
}

/// Build run requests for `selected`, tagged for the tick at `tick_time`.
///
/// Output order is deterministic: requests are sorted by their smallest
/// member, members are sorted within each request.
pub fn batch_run_requests(
    graph: &AssetGraph,
    selected: &BTreeSet<AssetPartition>,
    tick_time: DateTime<Utc>,
) -> Vec<RunRequest> {
    // Parents before children so chains collapse in one pass.
    let mut members: Vec<AssetPartition> = selected.iter().cloned().collect();
    members.sort_by(|a, b| {
        graph
            .topo_index(&a.asset)
            .cmp(&graph.topo_index(&b.asset))
            .then_with(|| a.cmp(b))
    });
    let index: BTreeMap<&AssetPartition, usize> =
        members.iter().enumerate().map(|(i, ap)| (ap, i)).collect();

    let mut groups = Groups::new(&members);
    for (i, ap) in members.iter().enumerate() {
        let Ok(parents) = graph.existing_parent_partitions(ap, tick_time) else {
            continue;
        };
        for parent in parents {
            if let Some(&j) = index.get(&parent) {
                groups.try_union(i, j);
            }
        }
    }

    let mut by_root: BTreeMap<usize, BTreeSet<AssetPartition>> = BTreeMap::new();
    for i in 0..members.len() {
        let root = groups.find(i);
        by_root.entry(root).or_default().insert(members[i].clone());
    }

    let tick = tick_time.to_rfc3339_opts(SecondsFormat::Millis, true);
    let mut requests: Vec<RunRequest> = by_root
        .into_values()
        .map(|asset_partitions| {
            let key = asset_partitions.iter().find_map(|ap| ap.partition.clone());
            let mut request = RunRequest::new(asset_partitions)
                .with_tag(AUTO_MATERIALIZE_TAG, "true")
                .with_tag(TICK_TAG, tick.clone());
            if let Some(key) = key {
                request = request.with_tag(PARTITION_TAG, key);
            }
            request
        })
        .collect();
    requests.sort_by(|a, b| a.asset_partitions.first().cmp(&b.asset_partitions.first()));
    requests
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::asset::{AssetDefinition, PartitionsDefinition};
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
    }

    #[test]
    fn chain_collapses_into_one_request() {
        let graph = AssetGraph::new([
            AssetDefinition::new("a"),
            AssetDefinition::new("b").with_deps(["a"]),
            AssetDefinition::new("c").with_deps(["b"]),
            AssetDefinition::new("z"),
        ])
        .unwrap();
        let selected: BTreeSet<_> = ["a", "b", "c", "z"]
            .into_iter()
            .map(AssetPartition::unpartitioned)
            .collect();

        let requests = batch_run_requests(&graph, &selected, now());
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[0].asset_partitions.len(), 3);
        assert_eq!(requests[0].tags.get(AUTO_MATERIALIZE_TAG).map(String::as_str), Some("true"));
        assert!(!requests[0].tags.contains_key(PARTITION_TAG));
        assert_eq!(
            requests[1].asset_partitions,
            BTreeSet::from([AssetPartition::unpartitioned("z")])
        );
    }

    #[test]
    fn distinct_partition_keys_never_share_a_request() {
        let keys = PartitionsDefinition::Static(vec!["x".into(), "y".into()]);
        let graph = AssetGraph::new([
            AssetDefinition::new("up").with_partitions(keys.clone()),
            AssetDefinition::new("down")
                .with_deps(["up"])
                .with_partitions(keys),
        ])
        .unwrap();
        let selected: BTreeSet<_> = [
            AssetPartition::partitioned("up", "x"),
            AssetPartition::partitioned("up", "y"),
            AssetPartition::partitioned("down", "x"),
            AssetPartition::partitioned("down", "y"),
        ]
        .into_iter()
        .collect();

        let requests = batch_run_requests(&graph, &selected, now());
        assert_eq!(requests.len(), 2);
        for request in &requests {
            let keys: BTreeSet<_> = request
                .asset_partitions
                .iter()
                .filter_map(|ap| ap.partition.clone())
                .collect();
            assert_eq!(keys.len(), 1);
            assert_eq!(request.tags.get(PARTITION_TAG), keys.iter().next());
        }
    }
}
