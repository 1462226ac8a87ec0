// src/run.rs

//! Run requests and submitted runs.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::Serialize;
use uuid::Uuid;

use crate::asset::AssetPartition;
use crate::types::TriggerSource;

/// Set on every run request produced by the auto-materialize engine.
pub const AUTO_MATERIALIZE_TAG: &str = "assetdag/auto_materialize";
/// RFC 3339 timestamp of the tick that produced the request.
pub const TICK_TAG: &str = "assetdag/tick";
/// Partition key shared by every asset partition in the request.
pub const PARTITION_TAG: &str = "assetdag/partition";
/// Integer priority read by the queued coordinator; higher launches first.
pub const PRIORITY_TAG: &str = "assetdag/priority";

pub type Tags = BTreeMap<String, String>;

/// A batch of asset partitions proposed for materialization together.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunRequest {
    pub asset_partitions: BTreeSet<AssetPartition>,
    pub tags: Tags,
}

impl RunRequest {
    pub fn new(asset_partitions: impl IntoIterator<Item = AssetPartition>) -> Self {
        Self {
            asset_partitions: asset_partitions.into_iter().collect(),
            tags: Tags::new(),
        }
    }

    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    /// Priority from [`PRIORITY_TAG`]; missing or malformed values count as 0.
    pub fn priority(&self) -> i64 {
        self.tags
            .get(PRIORITY_TAG)
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct RunId(Uuid);

impl RunId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunStatus {
    Queued,
    Launched,
    Failed,
    /// The executor reported the launched run as done.
    Finished,
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RunStatus::Queued => "QUEUED",
            RunStatus::Launched => "LAUNCHED",
            RunStatus::Failed => "FAILED",
            RunStatus::Finished => "FINISHED",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubmittedRun {
    pub run_id: RunId,
    pub tags: Tags,
    pub asset_partitions: BTreeSet<AssetPartition>,
    pub status: RunStatus,
    /// The queue was full; the run waits in the overflow backlog and will be
    /// admitted by the dequeue loop.
    pub pending_retry: bool,
}

impl SubmittedRun {
    pub fn from_request(run_id: RunId, request: RunRequest, status: RunStatus) -> Self {
        Self {
            run_id,
            tags: request.tags,
            asset_partitions: request.asset_partitions,
            status,
            pending_retry: false,
        }
    }
}

/// Who submitted a run, plus request metadata such as forwarded HTTP headers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmissionContext {
    pub source: TriggerSource,
    pub headers: BTreeMap<String, String>,
}

impl SubmissionContext {
    pub fn new(source: TriggerSource) -> Self {
        Self {
            source,
            headers: BTreeMap::new(),
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    /// Header lookup, case-insensitive on the name.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn priority_defaults_to_zero() {
        let request = RunRequest::new([AssetPartition::unpartitioned("a")]);
        assert_eq!(request.priority(), 0);
        assert_eq!(request.clone().with_tag(PRIORITY_TAG, "5").priority(), 5);
        assert_eq!(request.with_tag(PRIORITY_TAG, "high").priority(), 0);
    }

    #[test]
    fn header_lookup_ignores_case() {
        let ctx = SubmissionContext::new(TriggerSource::Manual).with_header("X-Team", "data");
        assert_eq!(ctx.header("x-team"), Some("data"));
        assert_eq!(ctx.header("x-other"), None);
    }
}
