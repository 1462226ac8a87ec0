// src/engine/throttle.rs

//! Per-asset rate limiting of materialization candidates.

use chrono::{DateTime, Utc};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

use crate::asset::{AssetPartition, PartitionsDefinition};

/// Split of one asset's candidates into what runs this tick and what is
/// dropped. Both lists are in canonical (sorted) order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Selection {
    pub kept: Vec<AssetPartition>,
    pub discarded: Vec<AssetPartition>,
}

/// RNG for one tick, derived from the configured seed and the tick time so
/// re-running a tick reproduces its random choices.
pub fn tick_rng(seed: u64, tick_time: DateTime<Utc>) -> StdRng {
    StdRng::seed_from_u64(seed ^ tick_time.timestamp_millis() as u64)
}

/// Keep at most `budget` of `candidates`.
///
/// Time-partitioned assets keep the most recent partitions by window start;
/// everything else keeps a uniformly random subset drawn from `rng`.
pub fn select(
    partitions: Option<&PartitionsDefinition>,
    mut candidates: Vec<AssetPartition>,
    budget: usize,
    rng: &mut StdRng,
) -> Selection {
    candidates.sort();

    if candidates.len() <= budget {
        return Selection {
            kept: candidates,
            discarded: Vec::new(),
        };
    }

    let (mut kept, mut discarded) = match partitions {
        Some(def @ PartitionsDefinition::TimeWindow(_)) => {
            // Newest first; keys that do not parse sort as oldest.
            candidates.sort_by_key(|ap| {
                let start = ap
                    .partition
                    .as_deref()
                    .and_then(|k| def.time_window_for(k))
                    .and_then(|w| w.ok())
                    .map(|w| w.start);
                std::cmp::Reverse(start)
            });
            let discarded = candidates.split_off(budget);
            (candidates, discarded)
        }
        _ => {
            candidates.shuffle(rng);
            let discarded = candidates.split_off(budget);
            (candidates, discarded)
        }
    };

    kept.sort();
    discarded.sort();
    Selection { kept, discarded }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::asset::TimeWindowPartitions;
    use chrono::TimeZone;

    fn daily() -> PartitionsDefinition {
        PartitionsDefinition::TimeWindow(TimeWindowPartitions::daily(
            Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
        ))
    }

    #[test]
    fn time_partitions_keep_most_recent() {
        let candidates: Vec<_> = (1..=5)
            .map(|d| AssetPartition::partitioned("a", format!("2024-01-0{d}")))
            .collect();
        let mut rng = StdRng::seed_from_u64(7);
        let got = select(Some(&daily()), candidates, 2, &mut rng);
        assert_eq!(
            got.kept,
            vec![
                AssetPartition::partitioned("a", "2024-01-04"),
                AssetPartition::partitioned("a", "2024-01-05"),
            ]
        );
        assert_eq!(got.discarded.len(), 3);
    }

    #[test]
    fn random_selection_is_reproducible_per_seed() {
        let candidates: Vec<_> = ["w", "x", "y", "z"]
            .iter()
            .map(|k| AssetPartition::partitioned("a", *k))
            .collect();
        let def = PartitionsDefinition::Static(vec!["w".into(), "x".into(), "y".into(), "z".into()]);

        let tick = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let first = select(Some(&def), candidates.clone(), 2, &mut tick_rng(3, tick));
        let second = select(Some(&def), candidates, 2, &mut tick_rng(3, tick));
        assert_eq!(first, second);
        assert_eq!(first.kept.len(), 2);
        assert_eq!(first.discarded.len(), 2);
    }

    #[test]
    fn zero_budget_discards_everything() {
        let mut rng = StdRng::seed_from_u64(0);
        let got = select(None, vec![AssetPartition::unpartitioned("a")], 0, &mut rng);
        assert!(got.kept.is_empty());
        assert_eq!(got.discarded, vec![AssetPartition::unpartitioned("a")]);
    }
}
