// src/asset/policy.rs

//! Auto-materialize rules, policies, and freshness policies.
//!
//! Policies are plain immutable values: `with_rules` / `without_rules`
//! always return a new policy and never touch the receiver.

use std::fmt;
use std::sync::Arc;

use chrono::Duration;
use serde::Serialize;

use crate::engine::rules::RuleContext;

/// Whether a firing rule votes to materialize or to skip.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleKind {
    Materialize,
    Skip,
}

/// User-supplied rule predicate. Returning `Err` marks the rule as errored
/// for that partition.
pub type RulePredicate = Arc<dyn Fn(&RuleContext<'_>) -> Result<bool, String> + Send + Sync>;

/// A named rule backed by an arbitrary predicate.
#[derive(Clone)]
pub struct CustomRule {
    name: String,
    kind: RuleKind,
    predicate: RulePredicate,
}

impl CustomRule {
    pub fn new(name: impl Into<String>, kind: RuleKind, predicate: RulePredicate) -> Self {
        Self {
            name: name.into(),
            kind,
            predicate,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> RuleKind {
        self.kind
    }

    pub(crate) fn call(&self, ctx: &RuleContext<'_>) -> Result<bool, String> {
        (self.predicate)(ctx)
    }
}

impl fmt::Debug for CustomRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CustomRule")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .finish_non_exhaustive()
    }
}

impl PartialEq for CustomRule {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name && self.kind == other.kind
    }
}

impl Eq for CustomRule {}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AutoMaterializeRule {
    /// The partition has never been materialized.
    MaterializeOnMissing,
    /// A parent partition has a real update newer than this partition, or is
    /// being materialized in the same tick.
    MaterializeOnParentUpdated,
    /// Materializing is needed to keep a downstream freshness policy intact.
    MaterializeOnRequiredForFreshness,
    /// The asset's code version differs from the one of its last
    /// materialization.
    MaterializeOnCodeVersionChange,
    /// Some parent partition has never been materialized (or observed).
    SkipOnParentMissing,
    /// Some parent partition is itself waiting on an upstream update.
    SkipOnParentOutdated,
    /// The partition mapping requires parent partitions that do not exist.
    SkipOnRequiredButNonexistentParents,
    /// Not every parent has been updated since the last materialization.
    SkipOnNotAllParentsUpdated {
        require_update_for_all_parent_partitions: bool,
    },
    /// A parent's latest result for one of its blocking checks failed with
    /// ERROR severity, and the parent is not rematerializing in this tick.
    SkipOnParentBlockingCheckFailed,
    Custom(CustomRule),
}

impl AutoMaterializeRule {
    pub fn name(&self) -> &str {
        match self {
            AutoMaterializeRule::MaterializeOnMissing => "materialize_on_missing",
            AutoMaterializeRule::MaterializeOnParentUpdated => "materialize_on_parent_updated",
            AutoMaterializeRule::MaterializeOnRequiredForFreshness => {
                "materialize_on_required_for_freshness"
            }
            AutoMaterializeRule::MaterializeOnCodeVersionChange => {
                "materialize_on_code_version_change"
            }
            AutoMaterializeRule::SkipOnParentMissing => "skip_on_parent_missing",
            AutoMaterializeRule::SkipOnParentOutdated => "skip_on_parent_outdated",
            AutoMaterializeRule::SkipOnRequiredButNonexistentParents => {
                "skip_on_required_but_nonexistent_parents"
            }
            AutoMaterializeRule::SkipOnNotAllParentsUpdated { .. } => {
                "skip_on_not_all_parents_updated"
            }
            AutoMaterializeRule::SkipOnParentBlockingCheckFailed => {
                "skip_on_parent_blocking_check_failed"
            }
            AutoMaterializeRule::Custom(rule) => rule.name(),
        }
    }

    pub fn kind(&self) -> RuleKind {
        match self {
            AutoMaterializeRule::MaterializeOnMissing
            | AutoMaterializeRule::MaterializeOnParentUpdated
            | AutoMaterializeRule::MaterializeOnRequiredForFreshness
            | AutoMaterializeRule::MaterializeOnCodeVersionChange => RuleKind::Materialize,
            AutoMaterializeRule::SkipOnParentMissing
            | AutoMaterializeRule::SkipOnParentOutdated
            | AutoMaterializeRule::SkipOnRequiredButNonexistentParents
            | AutoMaterializeRule::SkipOnNotAllParentsUpdated { .. }
            | AutoMaterializeRule::SkipOnParentBlockingCheckFailed => RuleKind::Skip,
            AutoMaterializeRule::Custom(rule) => rule.kind(),
        }
    }

    /// Look up a built-in rule by its configuration name.
    pub fn from_name(name: &str) -> Option<Self> {
        let rule = match name.trim() {
            "materialize_on_missing" => AutoMaterializeRule::MaterializeOnMissing,
            "materialize_on_parent_updated" => AutoMaterializeRule::MaterializeOnParentUpdated,
            "materialize_on_required_for_freshness" => {
                AutoMaterializeRule::MaterializeOnRequiredForFreshness
            }
            "materialize_on_code_version_change" => {
                AutoMaterializeRule::MaterializeOnCodeVersionChange
            }
            "skip_on_parent_missing" => AutoMaterializeRule::SkipOnParentMissing,
            "skip_on_parent_outdated" => AutoMaterializeRule::SkipOnParentOutdated,
            "skip_on_required_but_nonexistent_parents" => {
                AutoMaterializeRule::SkipOnRequiredButNonexistentParents
            }
            "skip_on_not_all_parents_updated" => AutoMaterializeRule::SkipOnNotAllParentsUpdated {
                require_update_for_all_parent_partitions: false,
            },
            "skip_on_parent_blocking_check_failed" => {
                AutoMaterializeRule::SkipOnParentBlockingCheckFailed
            }
            _ => return None,
        };
        Some(rule)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AutoMaterializePolicy {
    rules: Vec<AutoMaterializeRule>,
    max_materializations_per_minute: u32,
    time_window_partitions: usize,
}

impl AutoMaterializePolicy {
    /// Materialize missing partitions and react to upstream updates.
    pub fn eager() -> Self {
        Self::from_rules(vec![
            AutoMaterializeRule::MaterializeOnMissing,
            AutoMaterializeRule::MaterializeOnParentUpdated,
            AutoMaterializeRule::MaterializeOnRequiredForFreshness,
            AutoMaterializeRule::SkipOnParentOutdated,
            AutoMaterializeRule::SkipOnParentMissing,
            AutoMaterializeRule::SkipOnRequiredButNonexistentParents,
        ])
    }

    /// Materialize only when a freshness policy requires it.
    pub fn lazy() -> Self {
        Self::from_rules(vec![
            AutoMaterializeRule::MaterializeOnRequiredForFreshness,
            AutoMaterializeRule::SkipOnParentOutdated,
            AutoMaterializeRule::SkipOnParentMissing,
            AutoMaterializeRule::SkipOnRequiredButNonexistentParents,
        ])
    }

    pub fn from_rules(rules: Vec<AutoMaterializeRule>) -> Self {
        Self {
            rules,
            max_materializations_per_minute: 1,
            time_window_partitions: 1,
        }
    }

    pub fn rules(&self) -> &[AutoMaterializeRule] {
        &self.rules
    }

    pub fn max_materializations_per_minute(&self) -> u32 {
        self.max_materializations_per_minute
    }

    /// How many of the most recent complete time windows are candidates.
    pub fn time_window_partitions(&self) -> usize {
        self.time_window_partitions
    }

    pub fn has_rule(&self, rule: &AutoMaterializeRule) -> bool {
        self.rules.contains(rule)
    }

    /// New policy with `rules` appended (rules already present are kept in
    /// their original position).
    pub fn with_rules(&self, rules: impl IntoIterator<Item = AutoMaterializeRule>) -> Self {
        let mut next = self.clone();
        for rule in rules {
            if !next.rules.contains(&rule) {
                next.rules.push(rule);
            }
        }
        next
    }

    /// New policy without any rule equal to one of `rules`.
    pub fn without_rules(&self, rules: impl IntoIterator<Item = AutoMaterializeRule>) -> Self {
        let removed: Vec<AutoMaterializeRule> = rules.into_iter().collect();
        let mut next = self.clone();
        next.rules.retain(|r| !removed.contains(r));
        next
    }

    pub fn with_max_materializations_per_minute(&self, max: u32) -> Self {
        let mut next = self.clone();
        next.max_materializations_per_minute = max;
        next
    }

    pub fn with_time_window_partitions(&self, count: usize) -> Self {
        let mut next = self.clone();
        next.time_window_partitions = count.max(1);
        next
    }
}

/// Maximum acceptable staleness of an asset relative to its upstream data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FreshnessPolicy {
    pub maximum_lag: Duration,
}

impl FreshnessPolicy {
    pub fn new(maximum_lag: Duration) -> Self {
        Self { maximum_lag }
    }

    /// `None` when `minutes` is outside the range of a [`Duration`].
    pub fn try_from_minutes(minutes: i64) -> Option<Self> {
        Duration::try_minutes(minutes).map(Self::new)
    }
}
