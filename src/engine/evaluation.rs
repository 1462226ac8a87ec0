// src/engine/evaluation.rs

//! Per-partition evaluation records and the sink they are reported to.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info};

use crate::asset::{AssetPartition, RuleKind};

/// Result of one rule against one partition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "result", content = "message")]
pub enum RuleResult {
    Fired,
    NotFired,
    /// The rule failed; it counts as not firing.
    Errored(String),
}

impl RuleResult {
    pub fn fired(&self) -> bool {
        matches!(self, RuleResult::Fired)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RuleOutcome {
    pub rule: String,
    pub kind: RuleKind,
    pub result: RuleResult,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscardReason {
    /// Dropped by `max_materializations_per_minute`. `recent` counts
    /// materializations and in-flight requests in the trailing minute.
    RateLimited { max_per_minute: u32, recent: usize },
    /// An earlier tick already requested this partition and it has not
    /// materialized yet.
    InFlight,
}

/// Final decision for one candidate partition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Materialize,
    /// At least one skip rule fired.
    Skip,
    /// No rule fired.
    NoVote,
    /// Voted to materialize, then throttled away.
    Discarded(DiscardReason),
}

impl Verdict {
    pub fn is_materialize(&self) -> bool {
        matches!(self, Verdict::Materialize)
    }
}

/// Everything the engine decided about one partition in one tick.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AssetPartitionEvaluation {
    pub asset_partition: AssetPartition,
    pub evaluation_time: DateTime<Utc>,
    pub rule_outcomes: Vec<RuleOutcome>,
    pub verdict: Verdict,
}

impl AssetPartitionEvaluation {
    pub fn fired_rules(&self) -> impl Iterator<Item = &str> {
        self.rule_outcomes
            .iter()
            .filter(|o| o.result.fired())
            .map(|o| o.rule.as_str())
    }

    pub fn errored_rules(&self) -> impl Iterator<Item = &str> {
        self.rule_outcomes
            .iter()
            .filter(|o| matches!(o.result, RuleResult::Errored(_)))
            .map(|o| o.rule.as_str())
    }
}

/// Receives one record per candidate partition per tick.
pub trait EvaluationSink: Send + Sync {
    fn record(&self, evaluation: &AssetPartitionEvaluation);
}

/// Default sink: logs every evaluation with `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl EvaluationSink for TracingSink {
    fn record(&self, evaluation: &AssetPartitionEvaluation) {
        let fired: Vec<&str> = evaluation.fired_rules().collect();
        match evaluation.verdict {
            Verdict::Materialize => info!(
                asset_partition = %evaluation.asset_partition,
                ?fired,
                "auto-materialize: materialize"
            ),
            Verdict::Discarded(DiscardReason::RateLimited {
                max_per_minute,
                recent,
            }) => info!(
                asset_partition = %evaluation.asset_partition,
                max_per_minute,
                recent,
                "auto-materialize: discarded by rate limit"
            ),
            Verdict::Discarded(DiscardReason::InFlight) => debug!(
                asset_partition = %evaluation.asset_partition,
                "auto-materialize: already in flight"
            ),
            Verdict::Skip | Verdict::NoVote => debug!(
                asset_partition = %evaluation.asset_partition,
                verdict = ?evaluation.verdict,
                ?fired,
                "auto-materialize: no materialization"
            ),
        }
    }
}
