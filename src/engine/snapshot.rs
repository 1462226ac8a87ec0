// src/engine/snapshot.rs

//! Tick-local, read-only view of materialization and observation history.
//!
//! Loaded once at the start of a tick so every rule sees the same state no
//! matter how long evaluation takes. Also carries which partitions are in
//! flight (requested, not yet materialized) and which assets have a failed
//! blocking check.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Duration, Utc};
use tracing::debug;

use crate::asset::{AssetCheckSeverity, AssetGraph, AssetKey, AssetPartition};
use crate::errors::Result;
use crate::store::{DataVersion, EventStore, MaterializationRecord, ObservationRecord, TimeRange};

/// Window used for `max_materializations_per_minute`.
pub const THROTTLE_WINDOW_SECONDS: i64 = 60;

#[derive(Debug, Clone, Default)]
struct PartitionHistory {
    materializations: Vec<MaterializationRecord>,
    observations: Vec<ObservationRecord>,
}

/// One change to an asset partition's data: a materialization or an
/// observation.
#[derive(Debug, Clone, Copy)]
struct Update<'a> {
    timestamp: DateTime<Utc>,
    version: Option<&'a DataVersion>,
}

impl PartitionHistory {
    /// Materializations and observations merged by timestamp.
    fn updates(&self) -> Vec<Update<'_>> {
        let mut updates: Vec<Update<'_>> = self
            .materializations
            .iter()
            .map(|m| Update {
                timestamp: m.timestamp,
                version: m.data_version.as_ref(),
            })
            .chain(self.observations.iter().map(|o| Update {
                timestamp: o.timestamp,
                version: Some(&o.data_version),
            }))
            .collect();
        updates.sort_by_key(|u| u.timestamp);
        updates
    }
}

#[derive(Debug, Clone)]
pub struct HistorySnapshot {
    taken_at: DateTime<Utc>,
    partitions: HashMap<AssetPartition, PartitionHistory>,
    recent_materializations: HashMap<AssetKey, usize>,
    in_flight: HashSet<AssetPartition>,
    recent_in_flight: HashMap<AssetKey, usize>,
    failed_blocking_checks: HashMap<AssetKey, Vec<String>>,
}

impl HistorySnapshot {
    /// Read history up to `now` for every partition of every asset.
    pub fn load(graph: &AssetGraph, store: &dyn EventStore, now: DateTime<Utc>) -> Result<Self> {
        let mut partitions = HashMap::new();
        let mut recent_materializations = HashMap::new();
        let mut in_flight = HashSet::new();
        let mut recent_in_flight: HashMap<AssetKey, usize> = HashMap::new();
        let mut failed_blocking_checks = HashMap::new();
        let window_start = now - Duration::seconds(THROTTLE_WINDOW_SECONDS);
        let window = TimeRange::between(window_start, now);

        for key in graph.toposorted_keys() {
            for ap in graph.partitions_of(key, now) {
                let materializations = store.materializations_in_range(&ap, TimeRange::until(now))?;
                let observations = store.observations_in_range(&ap, TimeRange::until(now))?;

                let requested = store.run_requests_in_range(&ap, TimeRange::until(now))?;
                if let Some(request) = requested.last() {
                    let done = materializations
                        .last()
                        .is_some_and(|m| m.timestamp >= request.timestamp);
                    if !done {
                        if request.timestamp > window_start {
                            *recent_in_flight.entry(key.clone()).or_default() += 1;
                        }
                        in_flight.insert(ap.clone());
                    }
                }

                if !materializations.is_empty() || !observations.is_empty() {
                    partitions.insert(
                        ap,
                        PartitionHistory {
                            materializations,
                            observations,
                        },
                    );
                }
            }
            recent_materializations.insert(key.clone(), store.materialization_count(key, window)?);

            let mut failed = Vec::new();
            for check in graph.checks_of(key).iter().filter(|c| c.blocking) {
                let results = store.check_results_in_range(key, &check.name, TimeRange::until(now))?;
                if results
                    .last()
                    .is_some_and(|r| !r.success && r.severity == AssetCheckSeverity::Error)
                {
                    failed.push(check.name.clone());
                }
            }
            if !failed.is_empty() {
                failed_blocking_checks.insert(key.clone(), failed);
            }
        }

        debug!(
            partitions_with_history = partitions.len(),
            in_flight = in_flight.len(),
            %now,
            "loaded history snapshot"
        );

        Ok(Self {
            taken_at: now,
            partitions,
            recent_materializations,
            in_flight,
            recent_in_flight,
            failed_blocking_checks,
        })
    }

    /// Empty snapshot, for tests and for graphs without history.
    pub fn empty(now: DateTime<Utc>) -> Self {
        Self {
            taken_at: now,
            partitions: HashMap::new(),
            recent_materializations: HashMap::new(),
            in_flight: HashSet::new(),
            recent_in_flight: HashMap::new(),
            failed_blocking_checks: HashMap::new(),
        }
    }

    pub fn taken_at(&self) -> DateTime<Utc> {
        self.taken_at
    }

    pub fn latest_materialization(&self, ap: &AssetPartition) -> Option<&MaterializationRecord> {
        self.partitions.get(ap)?.materializations.last()
    }

    pub fn last_materialized_at(&self, ap: &AssetPartition) -> Option<DateTime<Utc>> {
        self.latest_materialization(ap).map(|m| m.timestamp)
    }

    /// No materialization and no observation has ever been recorded.
    pub fn is_missing(&self, ap: &AssetPartition) -> bool {
        self.partitions
            .get(ap)
            .is_none_or(|h| h.materializations.is_empty() && h.observations.is_empty())
    }

    /// Materializations of `asset` within the trailing throttle window.
    pub fn recent_materializations(&self, asset: &AssetKey) -> usize {
        self.recent_materializations.get(asset).copied().unwrap_or(0)
    }

    /// Budget already spent in the throttle window: recent materializations
    /// plus partitions requested in the window that have not materialized.
    pub fn throttle_usage(&self, asset: &AssetKey) -> usize {
        self.recent_materializations(asset) + self.recent_in_flight.get(asset).copied().unwrap_or(0)
    }

    /// Requested by an earlier tick and not materialized since.
    pub fn is_in_flight(&self, ap: &AssetPartition) -> bool {
        self.in_flight.contains(ap)
    }

    /// Blocking checks of `asset` whose latest result failed with ERROR
    /// severity.
    pub fn failed_blocking_checks(&self, asset: &AssetKey) -> &[String] {
        self.failed_blocking_checks
            .get(asset)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Data version of `ap` as of `at` (the latest update at or before it).
    pub fn version_at(&self, ap: &AssetPartition, at: DateTime<Utc>) -> Option<&DataVersion> {
        let history = self.partitions.get(ap)?;
        history
            .updates()
            .into_iter()
            .filter(|u| u.timestamp <= at)
            .last()
            .and_then(|u| u.version)
    }

    /// Timestamp of the first *real* update of `ap` after `since`.
    ///
    /// An update is real unless it carries the same data version that `ap`
    /// had at `since`. With `since == None` every update is real.
    pub fn first_real_update_after(
        &self,
        ap: &AssetPartition,
        since: Option<DateTime<Utc>>,
    ) -> Option<DateTime<Utc>> {
        let history = self.partitions.get(ap)?;
        let updates = history.updates();

        let baseline: Option<&DataVersion> = since.and_then(|s| {
            updates
                .iter()
                .filter(|u| u.timestamp <= s)
                .last()
                .and_then(|u| u.version)
        });

        updates
            .iter()
            .filter(|u| since.is_none_or(|s| u.timestamp > s))
            .find(|u| match (u.version, baseline) {
                (Some(v), Some(b)) => v != b,
                _ => true,
            })
            .map(|u| u.timestamp)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::asset::{AssetCheckSpec, AssetDefinition};
    use crate::store::{AssetCheckResult, InMemoryEventStore, RunRequestRecord};
    use chrono::TimeZone;

    fn t(minutes: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + Duration::minutes(minutes)
    }

    #[test]
    fn same_version_rematerialization_is_not_a_real_update() {
        let graph = AssetGraph::new([AssetDefinition::new("a")]).unwrap();
        let store = InMemoryEventStore::new();
        let a = AssetPartition::unpartitioned("a");
        store
            .put_materialization(&a, MaterializationRecord::at(t(0)).with_data_version("v1"))
            .unwrap();
        store
            .put_materialization(&a, MaterializationRecord::at(t(10)).with_data_version("v1"))
            .unwrap();

        let snapshot = HistorySnapshot::load(&graph, &store, t(20)).unwrap();
        assert_eq!(snapshot.first_real_update_after(&a, Some(t(5))), None);
        assert_eq!(snapshot.first_real_update_after(&a, None), Some(t(0)));

        store
            .put_materialization(&a, MaterializationRecord::at(t(15)).with_data_version("v2"))
            .unwrap();
        let snapshot = HistorySnapshot::load(&graph, &store, t(20)).unwrap();
        assert_eq!(snapshot.first_real_update_after(&a, Some(t(5))), Some(t(15)));
        assert_eq!(snapshot.version_at(&a, t(12)).map(|v| v.0.as_str()), Some("v1"));
    }

    #[test]
    fn history_after_the_tick_is_invisible() {
        let graph = AssetGraph::new([AssetDefinition::new("a")]).unwrap();
        let store = InMemoryEventStore::new();
        let a = AssetPartition::unpartitioned("a");
        store
            .put_materialization(&a, MaterializationRecord::at(t(30)))
            .unwrap();

        let snapshot = HistorySnapshot::load(&graph, &store, t(20)).unwrap();
        assert!(snapshot.is_missing(&a));
        assert_eq!(snapshot.recent_materializations(&AssetKey::from("a")), 0);
    }

    #[test]
    fn requested_partitions_stay_in_flight_until_materialized() {
        let graph = AssetGraph::new([AssetDefinition::new("a")]).unwrap();
        let store = InMemoryEventStore::new();
        let a = AssetPartition::unpartitioned("a");
        let key = AssetKey::from("a");
        store.put_run_request(&a, RunRequestRecord::new(t(0), "r1")).unwrap();

        let snapshot = HistorySnapshot::load(&graph, &store, t(0) + Duration::seconds(30)).unwrap();
        assert!(snapshot.is_in_flight(&a));
        assert_eq!(snapshot.throttle_usage(&key), 1);

        // Still in flight, but outside the throttle window.
        let snapshot = HistorySnapshot::load(&graph, &store, t(5)).unwrap();
        assert!(snapshot.is_in_flight(&a));
        assert_eq!(snapshot.throttle_usage(&key), 0);

        store
            .put_materialization(&a, MaterializationRecord::at(t(0) + Duration::seconds(40)))
            .unwrap();
        let snapshot = HistorySnapshot::load(&graph, &store, t(0) + Duration::seconds(50)).unwrap();
        assert!(!snapshot.is_in_flight(&a));
        assert_eq!(snapshot.throttle_usage(&key), 1);
    }

    #[test]
    fn only_failed_blocking_error_checks_are_reported() {
        let graph = AssetGraph::new([AssetDefinition::new("orders")
            .with_check(AssetCheckSpec::new("no_nulls").blocking())
            .with_check(AssetCheckSpec::new("row_count").blocking())
            .with_check(AssetCheckSpec::new("advisory"))])
        .unwrap();
        let store = InMemoryEventStore::new();
        let orders = AssetKey::from("orders");
        store
            .put_check_result(&orders, AssetCheckResult::failed(t(0), "no_nulls", AssetCheckSeverity::Error))
            .unwrap();
        store
            .put_check_result(&orders, AssetCheckResult::failed(t(0), "row_count", AssetCheckSeverity::Warn))
            .unwrap();
        store
            .put_check_result(&orders, AssetCheckResult::failed(t(0), "advisory", AssetCheckSeverity::Error))
            .unwrap();

        let snapshot = HistorySnapshot::load(&graph, &store, t(1)).unwrap();
        assert_eq!(snapshot.failed_blocking_checks(&orders), &["no_nulls".to_string()]);

        store
            .put_check_result(&orders, AssetCheckResult::passed(t(2), "no_nulls"))
            .unwrap();
        let snapshot = HistorySnapshot::load(&graph, &store, t(3)).unwrap();
        assert!(snapshot.failed_blocking_checks(&orders).is_empty());
    }
}
