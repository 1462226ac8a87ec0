// src/store/mod.rs

//! Materialization / observation history.
//!
//! The persistent store is an external collaborator; the engine only needs
//! the get/put/range-scan operations of [`EventStore`]. [`memory`] provides
//! an in-process implementation used by the CLI and tests.
//!
//! Besides materializations and observations the store keeps:
//! - run requests the daemon handed to a coordinator, so the engine can
//!   tell which partitions are already in flight;
//! - asset check results, read by the blocking-check skip rule.

pub mod memory;

use std::fmt::Debug;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::asset::{AssetCheckSeverity, AssetKey, AssetPartition};
use crate::errors::Result;

pub use memory::InMemoryEventStore;

/// Opaque fingerprint of an asset partition's contents.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DataVersion(pub String);

impl DataVersion {
    pub fn new(v: impl Into<String>) -> Self {
        Self(v.into())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MaterializationRecord {
    pub timestamp: DateTime<Utc>,
    pub data_version: Option<DataVersion>,
    pub code_version: Option<String>,
    pub run_id: Option<String>,
}

impl MaterializationRecord {
    pub fn at(timestamp: DateTime<Utc>) -> Self {
        Self {
            timestamp,
            data_version: None,
            code_version: None,
            run_id: None,
        }
    }

    pub fn with_data_version(mut self, version: impl Into<String>) -> Self {
        self.data_version = Some(DataVersion::new(version));
        self
    }

    pub fn with_code_version(mut self, version: impl Into<String>) -> Self {
        self.code_version = Some(version.into());
        self
    }
}

/// Observation of an observable source asset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObservationRecord {
    pub timestamp: DateTime<Utc>,
    pub data_version: DataVersion,
}

impl ObservationRecord {
    pub fn new(timestamp: DateTime<Utc>, version: impl Into<String>) -> Self {
        Self {
            timestamp,
            data_version: DataVersion::new(version),
        }
    }
}

/// A partition was part of a run request submitted at `timestamp`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunRequestRecord {
    pub timestamp: DateTime<Utc>,
    pub run_id: String,
}

impl RunRequestRecord {
    pub fn new(timestamp: DateTime<Utc>, run_id: impl Into<String>) -> Self {
        Self {
            timestamp,
            run_id: run_id.into(),
        }
    }
}

/// Outcome of one asset check execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetCheckResult {
    pub timestamp: DateTime<Utc>,
    pub check_name: String,
    pub success: bool,
    pub severity: AssetCheckSeverity,
}

impl AssetCheckResult {
    pub fn passed(timestamp: DateTime<Utc>, check_name: impl Into<String>) -> Self {
        Self {
            timestamp,
            check_name: check_name.into(),
            success: true,
            severity: AssetCheckSeverity::Error,
        }
    }

    pub fn failed(
        timestamp: DateTime<Utc>,
        check_name: impl Into<String>,
        severity: AssetCheckSeverity,
    ) -> Self {
        Self {
            timestamp,
            check_name: check_name.into(),
            success: false,
            severity,
        }
    }
}

/// Half-open time range `(after, until]`; open ends are unbounded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TimeRange {
    pub after: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
}

impl TimeRange {
    pub fn until(until: DateTime<Utc>) -> Self {
        Self {
            after: None,
            until: Some(until),
        }
    }

    pub fn between(after: DateTime<Utc>, until: DateTime<Utc>) -> Self {
        Self {
            after: Some(after),
            until: Some(until),
        }
    }

    pub fn contains(&self, t: DateTime<Utc>) -> bool {
        self.after.is_none_or(|a| t > a) && self.until.is_none_or(|u| t <= u)
    }
}

/// Persistence seam for history, keyed by asset key and partition key.
///
/// Range scans return records ordered by timestamp, oldest first.
pub trait EventStore: Send + Sync + Debug {
    fn put_materialization(
        &self,
        partition: &AssetPartition,
        record: MaterializationRecord,
    ) -> Result<()>;

    fn put_observation(&self, partition: &AssetPartition, record: ObservationRecord)
    -> Result<()>;

    fn latest_materialization(
        &self,
        partition: &AssetPartition,
    ) -> Result<Option<MaterializationRecord>>;

    fn materializations_in_range(
        &self,
        partition: &AssetPartition,
        range: TimeRange,
    ) -> Result<Vec<MaterializationRecord>>;

    fn observations_in_range(
        &self,
        partition: &AssetPartition,
        range: TimeRange,
    ) -> Result<Vec<ObservationRecord>>;

    /// Materializations of any partition of `asset` within `range`.
    fn materialization_count(&self, asset: &AssetKey, range: TimeRange) -> Result<usize>;

    fn put_run_request(&self, partition: &AssetPartition, record: RunRequestRecord) -> Result<()>;

    fn run_requests_in_range(
        &self,
        partition: &AssetPartition,
        range: TimeRange,
    ) -> Result<Vec<RunRequestRecord>>;

    fn put_check_result(&self, asset: &AssetKey, result: AssetCheckResult) -> Result<()>;

    /// Results of the check `check_name` on `asset` within `range`.
    fn check_results_in_range(
        &self,
        asset: &AssetKey,
        check_name: &str,
        range: TimeRange,
    ) -> Result<Vec<AssetCheckResult>>;
}
