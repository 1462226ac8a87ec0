// src/engine/freshness.rs

//! Freshness-driven ("lazy") materialization.
//!
//! For every asset with a [`FreshnessPolicy`](crate::asset::FreshnessPolicy),
//! walk its ancestry backwards and find the partitions that must be
//! rematerialized now so the policy's `maximum_lag` still holds at the next
//! tick.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, warn};

use crate::asset::{AssetGraph, AssetPartition};
use crate::engine::snapshot::HistorySnapshot;

/// Partitions required to keep all freshness policies satisfied at
/// `now + lookahead`.
pub fn required_for_freshness(
    graph: &AssetGraph,
    snapshot: &HistorySnapshot,
    now: DateTime<Utc>,
    lookahead: Duration,
) -> HashSet<AssetPartition> {
    let mut required = HashSet::new();

    for asset in graph.assets() {
        let Some(policy) = asset.freshness_policy else {
            continue;
        };

        let root = match &asset.partitions {
            None => AssetPartition::unpartitioned(asset.key.clone()),
            Some(def) => match def.last_partition_key(now) {
                Some(key) => AssetPartition::partitioned(asset.key.clone(), key),
                None => continue,
            },
        };

        let ancestry = collect_ancestry(graph, &root, now);
        let since = unincorporated_since(graph, snapshot, &ancestry, now);

        let violates = |ap: &AssetPartition| {
            since
                .get(ap)
                .copied()
                .flatten()
                .is_some_and(|s| {
                    (now - s)
                        .checked_add(&lookahead)
                        .is_none_or(|age| age > policy.maximum_lag)
                })
        };

        if !violates(&root) {
            continue;
        }

        let needed: Vec<&AssetPartition> = ancestry.iter().filter(|&ap| violates(ap)).collect();
        debug!(
            asset = %asset.key,
            maximum_lag_minutes = policy.maximum_lag.num_minutes(),
            needed = needed.len(),
            "freshness policy would be violated; requiring upstream materializations"
        );
        required.extend(needed.into_iter().cloned());
    }

    required
}

/// `root` plus every partition it transitively reads, parents before
/// children.
///
/// Iterative with an explicit work-list; the visited set also guards
/// against cycles.
fn collect_ancestry(
    graph: &AssetGraph,
    root: &AssetPartition,
    now: DateTime<Utc>,
) -> Vec<AssetPartition> {
    let mut stack = vec![root.clone()];
    let mut visited: HashSet<AssetPartition> = HashSet::new();
    let mut out = Vec::new();

    while let Some(ap) = stack.pop() {
        if !visited.insert(ap.clone()) {
            continue;
        }
        match graph.existing_parent_partitions(&ap, now) {
            Ok(parents) => stack.extend(parents),
            Err(e) => {
                warn!(asset_partition = %ap, error = %e, "cannot resolve parents during freshness traversal");
            }
        }
        out.push(ap);
    }

    out.sort_by(|a, b| {
        graph
            .topo_index(&a.asset)
            .cmp(&graph.topo_index(&b.asset))
            .then_with(|| a.partition.cmp(&b.partition))
    });
    out
}

/// For each partition in `ancestry` (parents first), the earliest time of an
/// upstream change it has not incorporated yet; `None` when it is current.
fn unincorporated_since(
    graph: &AssetGraph,
    snapshot: &HistorySnapshot,
    ancestry: &[AssetPartition],
    now: DateTime<Utc>,
) -> HashMap<AssetPartition, Option<DateTime<Utc>>> {
    let mut since: HashMap<AssetPartition, Option<DateTime<Utc>>> = HashMap::new();

    for ap in ancestry {
        let last = snapshot.last_materialized_at(ap);
        let parents = graph.existing_parent_partitions(ap, now).unwrap_or_default();

        let earliest = parents
            .iter()
            .filter_map(|p| {
                let direct = snapshot.first_real_update_after(p, last);
                let inherited = since.get(p).copied().flatten();
                match (direct, inherited) {
                    (Some(a), Some(b)) => Some(a.min(b)),
                    (a, b) => a.or(b),
                }
            })
            .min();

        since.insert(ap.clone(), earliest);
    }

    since
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::asset::{AssetDefinition, AutoMaterializePolicy, FreshnessPolicy};
    use crate::store::{EventStore, InMemoryEventStore, MaterializationRecord};
    use chrono::TimeZone;

    fn t(minutes: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + Duration::minutes(minutes)
    }

    fn chain() -> AssetGraph {
        AssetGraph::new([
            AssetDefinition::new("b"),
            AssetDefinition::new("mid")
                .with_deps(["b"])
                .with_policy(AutoMaterializePolicy::lazy()),
            AssetDefinition::new("a")
                .with_deps(["mid"])
                .with_policy(AutoMaterializePolicy::lazy())
                .with_freshness_policy(FreshnessPolicy::new(Duration::minutes(60))),
        ])
        .unwrap()
    }

    #[test]
    fn stale_chain_past_the_lag_is_required() {
        let graph = chain();
        let store = InMemoryEventStore::new();
        for (asset, minute) in [("b", 0), ("mid", 1), ("a", 2)] {
            store
                .put_materialization(&AssetPartition::unpartitioned(asset), MaterializationRecord::at(t(minute)))
                .unwrap();
        }
        store
            .put_materialization(&AssetPartition::unpartitioned("b"), MaterializationRecord::at(t(10)))
            .unwrap();

        // Within budget: nothing required.
        let snap = HistorySnapshot::load(&graph, &store, t(30)).unwrap();
        assert!(required_for_freshness(&graph, &snap, t(30), Duration::zero()).is_empty());

        // Lookahead pushes it over.
        let ahead = required_for_freshness(&graph, &snap, t(30), Duration::minutes(45));
        assert_eq!(ahead.len(), 2);

        let snap = HistorySnapshot::load(&graph, &store, t(80)).unwrap();
        let required = required_for_freshness(&graph, &snap, t(80), Duration::zero());
        assert_eq!(
            required,
            HashSet::from([
                AssetPartition::unpartitioned("mid"),
                AssetPartition::unpartitioned("a"),
            ])
        );
    }

    #[test]
    fn up_to_date_asset_requires_nothing() {
        let graph = chain();
        let store = InMemoryEventStore::new();
        for (asset, minute) in [("b", 0), ("mid", 1), ("a", 2)] {
            store
                .put_materialization(&AssetPartition::unpartitioned(asset), MaterializationRecord::at(t(minute)))
                .unwrap();
        }
        let snap = HistorySnapshot::load(&graph, &store, t(500)).unwrap();
        assert!(required_for_freshness(&graph, &snap, t(500), Duration::zero()).is_empty());
    }
}
