// src/asset/mapping.rs

//! Mapping a child partition onto the parent partitions it depends on.

use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::asset::key::PartitionKey;
use crate::asset::partitions::PartitionsDefinition;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PartitionMapping {
    /// Child partition `k` depends on parent partition `k`.
    Identity,
    /// Depends on every partition of the parent.
    All,
    /// Depends on the parent's most recent partition.
    LastPartition,
    /// Depends on every parent time window overlapping the child's window.
    TimeWindow,
}

/// Parent partitions a child partition depends on.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UpstreamPartitions {
    /// `None` entries stand for an unpartitioned parent.
    pub existent: Vec<Option<PartitionKey>>,
    pub required_but_nonexistent: Vec<PartitionKey>,
}

impl PartitionMapping {
    /// Mapping used when a dependency does not name one.
    pub fn default_for(
        child: Option<&PartitionsDefinition>,
        parent: Option<&PartitionsDefinition>,
    ) -> Self {
        match (child, parent) {
            (Some(c), Some(p)) if c.is_time_windowed() && p.is_time_windowed() => {
                PartitionMapping::TimeWindow
            }
            (Some(PartitionsDefinition::Static(_)), Some(PartitionsDefinition::Static(_))) => {
                PartitionMapping::Identity
            }
            _ => PartitionMapping::All,
        }
    }

    pub fn upstream_partitions(
        &self,
        child_partition: Option<&str>,
        child_def: Option<&PartitionsDefinition>,
        parent_def: Option<&PartitionsDefinition>,
        now: DateTime<Utc>,
    ) -> Result<UpstreamPartitions, String> {
        let Some(parent_def) = parent_def else {
            return Ok(UpstreamPartitions {
                existent: vec![None],
                required_but_nonexistent: Vec::new(),
            });
        };

        let all = || UpstreamPartitions {
            existent: parent_def.partition_keys(now).into_iter().map(Some).collect(),
            required_but_nonexistent: Vec::new(),
        };

        match self {
            PartitionMapping::All => Ok(all()),
            PartitionMapping::LastPartition => Ok(UpstreamPartitions {
                existent: parent_def.last_partition_key(now).into_iter().map(Some).collect(),
                required_but_nonexistent: Vec::new(),
            }),
            PartitionMapping::Identity => match child_partition {
                None => Ok(all()),
                Some(key) if parent_def.contains(key, now) => Ok(UpstreamPartitions {
                    existent: vec![Some(key.to_string())],
                    required_but_nonexistent: Vec::new(),
                }),
                Some(key) => Ok(UpstreamPartitions {
                    existent: Vec::new(),
                    required_but_nonexistent: vec![key.to_string()],
                }),
            },
            PartitionMapping::TimeWindow => {
                let (Some(key), Some(child_def)) = (child_partition, child_def) else {
                    return Ok(all());
                };
                let window = match child_def.time_window_for(key) {
                    Some(window) => window?,
                    None => {
                        return Err(format!(
                            "time window mapping requires a time-partitioned child (got key '{key}')"
                        ));
                    }
                };
                if !parent_def.is_time_windowed() {
                    return Err("time window mapping requires a time-partitioned parent".to_string());
                }
                let (existent, nonexistent) = parent_def.overlapping_keys(&window, now);
                Ok(UpstreamPartitions {
                    existent: existent.into_iter().map(Some).collect(),
                    required_but_nonexistent: nonexistent,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::asset::partitions::TimeWindowPartitions;
    use chrono::TimeZone;

    fn jan(day: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, day, 0, 0, 0).unwrap()
    }

    fn statics(keys: &[&str]) -> PartitionsDefinition {
        PartitionsDefinition::Static(keys.iter().map(|k| k.to_string()).collect())
    }

    #[test]
    fn unpartitioned_parent_maps_to_single_partition() {
        let got = PartitionMapping::All
            .upstream_partitions(Some("a"), Some(&statics(&["a"])), None, jan(2))
            .unwrap();
        assert_eq!(got.existent, vec![None]);
    }

    #[test]
    fn identity_reports_missing_parent_keys_as_nonexistent() {
        let child = statics(&["a", "b", "c"]);
        let parent = statics(&["a", "b"]);
        let got = PartitionMapping::Identity
            .upstream_partitions(Some("c"), Some(&child), Some(&parent), jan(2))
            .unwrap();
        assert!(got.existent.is_empty());
        assert_eq!(got.required_but_nonexistent, vec!["c".to_string()]);
    }

    #[test]
    fn last_partition_of_static_parent() {
        let parent = statics(&["a", "b", "c", "d"]);
        let got = PartitionMapping::LastPartition
            .upstream_partitions(None, None, Some(&parent), jan(2))
            .unwrap();
        assert_eq!(got.existent, vec![Some("d".to_string())]);
    }

    #[test]
    fn time_window_mapping_between_daily_assets() {
        let daily = PartitionsDefinition::TimeWindow(TimeWindowPartitions::daily(jan(1)));
        let got = PartitionMapping::TimeWindow
            .upstream_partitions(Some("2024-01-03"), Some(&daily), Some(&daily), jan(10))
            .unwrap();
        assert_eq!(got.existent, vec![Some("2024-01-03".to_string())]);
    }

    #[test]
    fn time_window_mapping_fails_on_bad_key() {
        let daily = PartitionsDefinition::TimeWindow(TimeWindowPartitions::daily(jan(1)));
        let got = PartitionMapping::TimeWindow.upstream_partitions(
            Some("not-a-date"),
            Some(&daily),
            Some(&daily),
            jan(10),
        );
        assert!(got.is_err());
    }

    #[test]
    fn defaults_follow_partition_kinds() {
        let daily = PartitionsDefinition::TimeWindow(TimeWindowPartitions::daily(jan(1)));
        let st = statics(&["a"]);
        assert_eq!(
            PartitionMapping::default_for(Some(&daily), Some(&daily)),
            PartitionMapping::TimeWindow
        );
        assert_eq!(
            PartitionMapping::default_for(Some(&st), Some(&st)),
            PartitionMapping::Identity
        );
        assert_eq!(PartitionMapping::default_for(None, Some(&st)), PartitionMapping::All);
    }
}
