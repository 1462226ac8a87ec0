// src/asset/partitions.rs

//! Partitions definitions: static key sets and time-windowed partitions.

use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, Utc};
use serde::Deserialize;

use crate::asset::key::PartitionKey;

/// Width of one window of a time-partitioned asset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Cadence {
    Hourly,
    Daily,
    Weekly,
}

impl Cadence {
    pub fn step(&self) -> Duration {
        match self {
            Cadence::Hourly => Duration::hours(1),
            Cadence::Daily => Duration::days(1),
            Cadence::Weekly => Duration::weeks(1),
        }
    }

    fn key_format(&self) -> &'static str {
        match self {
            Cadence::Hourly => "%Y-%m-%d-%H:%M",
            Cadence::Daily | Cadence::Weekly => "%Y-%m-%d",
        }
    }
}

/// Half-open interval `[start, end)` covered by one time partition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeWindow {
    pub fn overlaps(&self, other: &TimeWindow) -> bool {
        self.start < other.end && other.start < self.end
    }
}

/// Consecutive fixed-width windows starting at `start`.
///
/// A window is only a partition once it is complete (`end <= now`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimeWindowPartitions {
    pub start: DateTime<Utc>,
    pub cadence: Cadence,
}

impl TimeWindowPartitions {
    pub fn new(start: DateTime<Utc>, cadence: Cadence) -> Self {
        Self { start, cadence }
    }

    pub fn daily(start: DateTime<Utc>) -> Self {
        Self::new(start, Cadence::Daily)
    }

    pub fn hourly(start: DateTime<Utc>) -> Self {
        Self::new(start, Cadence::Hourly)
    }

    /// Window at a (possibly negative) index relative to `start`.
    pub fn window_at(&self, index: i64) -> TimeWindow {
        let step = self.cadence.step();
        let start = self.start + step * (index as i32);
        TimeWindow {
            start,
            end: start + step,
        }
    }

    pub fn key_for(&self, window: &TimeWindow) -> PartitionKey {
        window.start.format(self.cadence.key_format()).to_string()
    }

    /// Number of complete windows at `now`.
    pub fn complete_count(&self, now: DateTime<Utc>) -> i64 {
        if now < self.start {
            return 0;
        }
        let step = self.cadence.step().num_seconds();
        (now - self.start).num_seconds() / step
    }

    /// Parse a key back into its window.
    ///
    /// Fails for malformed keys and for keys not aligned to the cadence.
    pub fn window_for(&self, key: &str) -> Result<TimeWindow, String> {
        let start = match self.cadence {
            Cadence::Hourly => NaiveDateTime::parse_from_str(key, self.cadence.key_format())
                .map_err(|e| format!("invalid hourly partition key '{key}': {e}"))?
                .and_utc(),
            Cadence::Daily | Cadence::Weekly => {
                NaiveDate::parse_from_str(key, self.cadence.key_format())
                    .map_err(|e| format!("invalid partition key '{key}': {e}"))?
                    .and_hms_opt(0, 0, 0)
                    .ok_or_else(|| format!("invalid partition key '{key}'"))?
                    .and_utc()
            }
        };

        let step = self.cadence.step().num_seconds();
        let offset = (start - self.start).num_seconds();
        if offset % step != 0 {
            return Err(format!(
                "partition key '{key}' is not aligned to the {:?} cadence starting at {}",
                self.cadence, self.start
            ));
        }

        Ok(TimeWindow {
            start,
            end: start + self.cadence.step(),
        })
    }

    /// Index of the window starting at `start`, relative to `self.start`.
    fn index_of(&self, start: DateTime<Utc>) -> i64 {
        let step = self.cadence.step().num_seconds();
        (start - self.start).num_seconds().div_euclid(step)
    }
}

/// How an asset is split into partitions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PartitionsDefinition {
    Static(Vec<PartitionKey>),
    TimeWindow(TimeWindowPartitions),
}

impl PartitionsDefinition {
    pub fn is_time_windowed(&self) -> bool {
        matches!(self, PartitionsDefinition::TimeWindow(_))
    }

    /// All partition keys that exist at `now`, oldest first for time windows.
    pub fn partition_keys(&self, now: DateTime<Utc>) -> Vec<PartitionKey> {
        match self {
            PartitionsDefinition::Static(keys) => keys.clone(),
            PartitionsDefinition::TimeWindow(tw) => (0..tw.complete_count(now))
                .map(|i| tw.key_for(&tw.window_at(i)))
                .collect(),
        }
    }

    /// The last `n` partition keys at `now` (all keys for static sets).
    pub fn latest_partition_keys(&self, now: DateTime<Utc>, n: usize) -> Vec<PartitionKey> {
        match self {
            PartitionsDefinition::Static(keys) => keys.clone(),
            PartitionsDefinition::TimeWindow(tw) => {
                let count = tw.complete_count(now);
                let first = (count - n as i64).max(0);
                (first..count)
                    .map(|i| tw.key_for(&tw.window_at(i)))
                    .collect()
            }
        }
    }

    pub fn last_partition_key(&self, now: DateTime<Utc>) -> Option<PartitionKey> {
        match self {
            PartitionsDefinition::Static(keys) => keys.last().cloned(),
            PartitionsDefinition::TimeWindow(_) => {
                self.latest_partition_keys(now, 1).into_iter().next()
            }
        }
    }

    pub fn contains(&self, key: &str, now: DateTime<Utc>) -> bool {
        match self {
            PartitionsDefinition::Static(keys) => keys.iter().any(|k| k == key),
            PartitionsDefinition::TimeWindow(tw) => match tw.window_for(key) {
                Ok(window) => window.start >= tw.start && window.end <= now,
                Err(_) => false,
            },
        }
    }

    /// Time window of a key, for time-windowed definitions only.
    pub fn time_window_for(&self, key: &str) -> Option<Result<TimeWindow, String>> {
        match self {
            PartitionsDefinition::Static(_) => None,
            PartitionsDefinition::TimeWindow(tw) => Some(tw.window_for(key)),
        }
    }

    /// Keys of all windows overlapping `window`, including windows that do
    /// not exist yet (before the start or not complete at `now`).
    ///
    /// Returns `(existent, nonexistent)`.
    pub(crate) fn overlapping_keys(
        &self,
        window: &TimeWindow,
        now: DateTime<Utc>,
    ) -> (Vec<PartitionKey>, Vec<PartitionKey>) {
        let mut existent = Vec::new();
        let mut nonexistent = Vec::new();

        if let PartitionsDefinition::TimeWindow(tw) = self {
            let first = tw.index_of(window.start);
            let mut index = first;
            loop {
                let candidate = tw.window_at(index);
                if candidate.start >= window.end {
                    break;
                }
                if candidate.overlaps(window) {
                    let key = tw.key_for(&candidate);
                    if index >= 0 && candidate.end <= now {
                        existent.push(key);
                    } else {
                        nonexistent.push(key);
                    }
                }
                index += 1;
            }
        }

        (existent, nonexistent)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn jan(day: u32, hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, day, hour, 0, 0).unwrap()
    }

    #[test]
    fn only_complete_daily_windows_are_partitions() {
        let def = PartitionsDefinition::TimeWindow(TimeWindowPartitions::daily(jan(1, 0)));
        let keys = def.partition_keys(jan(3, 12));
        assert_eq!(keys, vec!["2024-01-01", "2024-01-02"]);
        assert!(def.contains("2024-01-02", jan(3, 12)));
        assert!(!def.contains("2024-01-03", jan(3, 12)));
    }

    #[test]
    fn latest_keys_are_the_most_recent_windows() {
        let def = PartitionsDefinition::TimeWindow(TimeWindowPartitions::daily(jan(1, 0)));
        assert_eq!(
            def.latest_partition_keys(jan(5, 0), 2),
            vec!["2024-01-03", "2024-01-04"]
        );
        assert_eq!(def.last_partition_key(jan(5, 0)).as_deref(), Some("2024-01-04"));
        assert!(def.latest_partition_keys(jan(1, 0), 3).is_empty());
    }

    #[test]
    fn hourly_keys_round_trip_through_windows() {
        let tw = TimeWindowPartitions::hourly(jan(1, 0));
        let window = tw.window_for("2024-01-01-05:00").unwrap();
        assert_eq!(window.start, jan(1, 5));
        assert_eq!(tw.key_for(&window), "2024-01-01-05:00");
    }

    #[test]
    fn malformed_keys_are_rejected() {
        let tw = TimeWindowPartitions::daily(jan(1, 0));
        assert!(tw.window_for("yesterday").is_err());

        let weekly = TimeWindowPartitions::new(jan(1, 0), Cadence::Weekly);
        assert!(weekly.window_for("2024-01-03").is_err());
        assert!(weekly.window_for("2024-01-08").is_ok());
    }

    #[test]
    fn overlapping_hourly_windows_of_a_day() {
        let hourly = PartitionsDefinition::TimeWindow(TimeWindowPartitions::hourly(jan(1, 0)));
        let day = TimeWindow {
            start: jan(1, 0),
            end: jan(2, 0),
        };
        let (existent, nonexistent) = hourly.overlapping_keys(&day, jan(1, 12));
        assert_eq!(existent.len(), 12);
        assert_eq!(nonexistent.len(), 12);
    }
}
