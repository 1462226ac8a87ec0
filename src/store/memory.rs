// src/store/memory.rs

//! In-memory event store.
//!
//! Not durable; history is lost when the process exits.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use tracing::trace;

use super::{
    AssetCheckResult, EventStore, MaterializationRecord, ObservationRecord, RunRequestRecord,
    TimeRange,
};
use crate::asset::{AssetKey, AssetPartition};
use crate::errors::Result;

#[derive(Debug, Default)]
struct PartitionEvents {
    materializations: Vec<MaterializationRecord>,
    observations: Vec<ObservationRecord>,
    run_requests: Vec<RunRequestRecord>,
}

#[derive(Debug, Default)]
pub struct InMemoryEventStore {
    events: RwLock<HashMap<AssetPartition, PartitionEvents>>,
    checks: RwLock<HashMap<(AssetKey, String), Vec<AssetCheckResult>>>,
}

/// Insert keeping `list` sorted by timestamp; equal timestamps keep
/// insertion order.
fn insert_sorted<T>(list: &mut Vec<T>, record: T, timestamp: impl Fn(&T) -> DateTime<Utc>) {
    let at = list.partition_point(|r| timestamp(r) <= timestamp(&record));
    list.insert(at, record);
}

fn in_range<T: Clone>(
    list: &[T],
    range: TimeRange,
    timestamp: impl Fn(&T) -> DateTime<Utc>,
) -> Vec<T> {
    list.iter()
        .filter(|r| range.contains(timestamp(r)))
        .cloned()
        .collect()
}

impl InMemoryEventStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl EventStore for InMemoryEventStore {
    fn put_materialization(
        &self,
        partition: &AssetPartition,
        record: MaterializationRecord,
    ) -> Result<()> {
        trace!(%partition, timestamp = %record.timestamp, "store: put materialization");
        let mut events = self.events.write();
        let list = &mut events.entry(partition.clone()).or_default().materializations;
        insert_sorted(list, record, |r| r.timestamp);
        Ok(())
    }

    fn put_observation(&self, partition: &AssetPartition, record: ObservationRecord) -> Result<()> {
        trace!(%partition, timestamp = %record.timestamp, "store: put observation");
        let mut events = self.events.write();
        let list = &mut events.entry(partition.clone()).or_default().observations;
        insert_sorted(list, record, |r| r.timestamp);
        Ok(())
    }

    fn latest_materialization(
        &self,
        partition: &AssetPartition,
    ) -> Result<Option<MaterializationRecord>> {
        let events = self.events.read();
        Ok(events
            .get(partition)
            .and_then(|e| e.materializations.last().cloned()))
    }

    fn materializations_in_range(
        &self,
        partition: &AssetPartition,
        range: TimeRange,
    ) -> Result<Vec<MaterializationRecord>> {
        let events = self.events.read();
        Ok(events
            .get(partition)
            .map(|e| in_range(&e.materializations, range, |r| r.timestamp))
            .unwrap_or_default())
    }

    fn observations_in_range(
        &self,
        partition: &AssetPartition,
        range: TimeRange,
    ) -> Result<Vec<ObservationRecord>> {
        let events = self.events.read();
        Ok(events
            .get(partition)
            .map(|e| in_range(&e.observations, range, |r| r.timestamp))
            .unwrap_or_default())
    }

    fn materialization_count(&self, asset: &AssetKey, range: TimeRange) -> Result<usize> {
        let events = self.events.read();
        Ok(events
            .iter()
            .filter(|(partition, _)| &partition.asset == asset)
            .map(|(_, e)| {
                e.materializations
                    .iter()
                    .filter(|r| range.contains(r.timestamp))
                    .count()
            })
            .sum())
    }

    fn put_run_request(&self, partition: &AssetPartition, record: RunRequestRecord) -> Result<()> {
        trace!(%partition, run_id = %record.run_id, "store: put run request");
        let mut events = self.events.write();
        let list = &mut events.entry(partition.clone()).or_default().run_requests;
        insert_sorted(list, record, |r| r.timestamp);
        Ok(())
    }

    fn run_requests_in_range(
        &self,
        partition: &AssetPartition,
        range: TimeRange,
    ) -> Result<Vec<RunRequestRecord>> {
        let events = self.events.read();
        Ok(events
            .get(partition)
            .map(|e| in_range(&e.run_requests, range, |r| r.timestamp))
            .unwrap_or_default())
    }

    fn put_check_result(&self, asset: &AssetKey, result: AssetCheckResult) -> Result<()> {
        trace!(%asset, check = %result.check_name, success = result.success, "store: put check result");
        let mut checks = self.checks.write();
        let list = checks
            .entry((asset.clone(), result.check_name.clone()))
            .or_default();
        insert_sorted(list, result, |r| r.timestamp);
        Ok(())
    }

    fn check_results_in_range(
        &self,
        asset: &AssetKey,
        check_name: &str,
        range: TimeRange,
    ) -> Result<Vec<AssetCheckResult>> {
        let checks = self.checks.read();
        Ok(checks
            .get(&(asset.clone(), check_name.to_string()))
            .map(|list| in_range(list, range, |r| r.timestamp))
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::asset::AssetCheckSeverity;
    use chrono::{Duration, TimeZone, Utc};

    #[test]
    fn range_scans_are_ordered_and_half_open() {
        let store = InMemoryEventStore::new();
        let t0 = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let ap = AssetPartition::unpartitioned("a");

        store
            .put_materialization(&ap, MaterializationRecord::at(t0 + Duration::minutes(2)))
            .unwrap();
        store
            .put_materialization(&ap, MaterializationRecord::at(t0))
            .unwrap();
        store
            .put_materialization(&ap, MaterializationRecord::at(t0 + Duration::minutes(1)))
            .unwrap();

        let all = store
            .materializations_in_range(&ap, TimeRange::default())
            .unwrap();
        let times: Vec<_> = all.iter().map(|r| r.timestamp).collect();
        assert_eq!(
            times,
            vec![t0, t0 + Duration::minutes(1), t0 + Duration::minutes(2)]
        );

        let tail = store
            .materializations_in_range(&ap, TimeRange::between(t0, t0 + Duration::minutes(1)))
            .unwrap();
        assert_eq!(tail.len(), 1);

        assert_eq!(
            store.latest_materialization(&ap).unwrap().map(|r| r.timestamp),
            Some(t0 + Duration::minutes(2))
        );
        assert_eq!(
            store
                .materialization_count(&AssetKey::from("a"), TimeRange::until(t0))
                .unwrap(),
            1
        );
    }

    #[test]
    fn run_requests_and_check_results_are_scoped() {
        let store = InMemoryEventStore::new();
        let t0 = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let a = AssetPartition::partitioned("a", "x");
        let orders = AssetKey::from("orders");

        store
            .put_run_request(&a, RunRequestRecord::new(t0 + Duration::seconds(30), "r2"))
            .unwrap();
        store.put_run_request(&a, RunRequestRecord::new(t0, "r1")).unwrap();
        let ids: Vec<String> = store
            .run_requests_in_range(&a, TimeRange::default())
            .unwrap()
            .into_iter()
            .map(|r| r.run_id)
            .collect();
        assert_eq!(ids, vec!["r1".to_string(), "r2".to_string()]);
        assert!(store
            .run_requests_in_range(&AssetPartition::partitioned("a", "y"), TimeRange::default())
            .unwrap()
            .is_empty());

        store
            .put_check_result(&orders, AssetCheckResult::failed(t0, "no_nulls", AssetCheckSeverity::Error))
            .unwrap();
        store
            .put_check_result(&orders, AssetCheckResult::passed(t0 + Duration::minutes(5), "no_nulls"))
            .unwrap();
        let until_t0 = store
            .check_results_in_range(&orders, "no_nulls", TimeRange::until(t0))
            .unwrap();
        assert_eq!(until_t0.len(), 1);
        assert!(!until_t0[0].success);
        assert!(store
            .check_results_in_range(&orders, "other", TimeRange::default())
            .unwrap()
            .is_empty());
    }
}
