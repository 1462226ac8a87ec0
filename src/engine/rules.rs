// src/engine/rules.rs

//! Rule evaluation for one asset partition.
//!
//! Every rule is a pure function of the [`RuleContext`]: the partition, the
//! immutable graph and history snapshot, the evaluation time, and decisions
//! already taken earlier in the same tick (parents are always decided before
//! their children).

use std::collections::{BTreeMap, HashSet};

use chrono::{DateTime, Utc};

use crate::asset::{AssetGraph, AssetKey, AssetPartition, AutoMaterializeRule};
use crate::engine::snapshot::HistorySnapshot;
use crate::errors::RuleEvaluationError;

/// Decisions accumulated while walking the graph in topological order.
#[derive(Debug, Default)]
pub struct TickState {
    /// Partitions selected (after throttling) earlier in this tick.
    pub(crate) will_materialize: HashSet<AssetPartition>,
    /// Partitions a freshness policy needs rematerialized.
    pub(crate) required_for_freshness: HashSet<AssetPartition>,
    /// Partitions waiting on an upstream update that is not part of this
    /// tick.
    pub(crate) outdated: HashSet<AssetPartition>,
}

impl TickState {
    pub fn new(required_for_freshness: HashSet<AssetPartition>) -> Self {
        Self {
            required_for_freshness,
            ..Self::default()
        }
    }
}

pub struct RuleContext<'a> {
    pub asset_partition: &'a AssetPartition,
    pub graph: &'a AssetGraph,
    pub snapshot: &'a HistorySnapshot,
    pub evaluation_time: DateTime<Utc>,
    pub(crate) tick: &'a TickState,
}

impl<'a> RuleContext<'a> {
    pub fn last_materialized_at(&self) -> Option<DateTime<Utc>> {
        self.snapshot.last_materialized_at(self.asset_partition)
    }

    /// Whether `ap` has been selected for materialization earlier in this
    /// tick.
    pub fn will_materialize(&self, ap: &AssetPartition) -> bool {
        self.tick.will_materialize.contains(ap)
    }

    /// Existing parent partitions, ordered by parent key.
    pub fn parent_partitions(&self) -> Result<Vec<AssetPartition>, String> {
        self.graph
            .existing_parent_partitions(self.asset_partition, self.evaluation_time)
    }

    /// `parent` counts as updated if it will materialize in this tick or has
    /// a real update since this partition was last materialized.
    pub fn parent_updated(&self, parent: &AssetPartition) -> bool {
        self.will_materialize(parent)
            || self
                .snapshot
                .first_real_update_after(parent, self.last_materialized_at())
                .is_some()
    }

    fn error(&self, rule: &AutoMaterializeRule, message: impl Into<String>) -> RuleEvaluationError {
        RuleEvaluationError {
            rule: rule.name().to_string(),
            asset_partition: self.asset_partition.to_string(),
            message: message.into(),
        }
    }
}

/// Evaluate one rule. `Ok(true)` means the rule fires.
pub fn evaluate_rule(
    rule: &AutoMaterializeRule,
    ctx: &RuleContext<'_>,
) -> Result<bool, RuleEvaluationError> {
    let parents = || ctx.parent_partitions().map_err(|e| ctx.error(rule, e));

    match rule {
        AutoMaterializeRule::MaterializeOnMissing => {
            Ok(ctx.snapshot.latest_materialization(ctx.asset_partition).is_none())
        }
        AutoMaterializeRule::MaterializeOnParentUpdated => {
            Ok(parents()?.iter().any(|p| ctx.parent_updated(p)))
        }
        AutoMaterializeRule::MaterializeOnRequiredForFreshness => Ok(ctx
            .tick
            .required_for_freshness
            .contains(ctx.asset_partition)),
        AutoMaterializeRule::MaterializeOnCodeVersionChange => {
            let current = ctx
                .graph
                .asset(&ctx.asset_partition.asset)
                .and_then(|a| a.code_version.as_deref());
            let Some(current) = current else {
                return Ok(false);
            };
            Ok(ctx
                .snapshot
                .latest_materialization(ctx.asset_partition)
                .is_some_and(|m| m.code_version.as_deref() != Some(current)))
        }
        AutoMaterializeRule::SkipOnParentMissing => Ok(parents()?
            .iter()
            .any(|p| !ctx.will_materialize(p) && ctx.snapshot.is_missing(p))),
        AutoMaterializeRule::SkipOnParentOutdated => {
            Ok(parents()?.iter().any(|p| ctx.tick.outdated.contains(p)))
        }
        AutoMaterializeRule::SkipOnRequiredButNonexistentParents => {
            for parent in ctx.graph.parents_of(&ctx.asset_partition.asset) {
                let upstream = ctx
                    .graph
                    .parent_partitions(ctx.asset_partition, &parent, ctx.evaluation_time)
                    .map_err(|e| ctx.error(rule, e))?;
                if !upstream.required_but_nonexistent.is_empty() {
                    return Ok(true);
                }
            }
            Ok(false)
        }
        AutoMaterializeRule::SkipOnNotAllParentsUpdated {
            require_update_for_all_parent_partitions,
        } => {
            let mut by_parent: BTreeMap<AssetKey, Vec<bool>> = BTreeMap::new();
            for p in parents()? {
                let updated = ctx.parent_updated(&p);
                by_parent.entry(p.asset.clone()).or_default().push(updated);
            }
            let all_updated = by_parent.values().all(|flags| {
                if *require_update_for_all_parent_partitions {
                    flags.iter().all(|f| *f)
                } else {
                    flags.iter().any(|f| *f)
                }
            });
            Ok(!all_updated)
        }
        AutoMaterializeRule::SkipOnParentBlockingCheckFailed => Ok(parents()?.iter().any(|p| {
            !ctx.will_materialize(p) && !ctx.snapshot.failed_blocking_checks(&p.asset).is_empty()
        })),
        AutoMaterializeRule::Custom(custom) => custom.call(ctx).map_err(|e| ctx.error(rule, e)),
    }
}

/// Whether `ap` is waiting on an upstream change that this tick will not
/// deliver. That holds when `ap` is not selected and either a run for it is
/// already in flight or some parent updated since `ap` last materialized
/// (or is itself outdated).
pub fn is_outdated(
    ap: &AssetPartition,
    graph: &AssetGraph,
    snapshot: &HistorySnapshot,
    tick: &TickState,
    now: DateTime<Utc>,
) -> bool {
    if tick.will_materialize.contains(ap) {
        return false;
    }
    if snapshot.is_in_flight(ap) {
        return true;
    }
    let Ok(parents) = graph.existing_parent_partitions(ap, now) else {
        return false;
    };
    let last = snapshot.last_materialized_at(ap);
    parents.iter().any(|p| {
        tick.outdated.contains(p)
            || tick.will_materialize.contains(p)
            || snapshot.first_real_update_after(p, last).is_some()
    })
}
