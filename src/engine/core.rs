// src/engine/core.rs

//! The auto-materialize engine.
//!
//! [`AutoMaterializeEngine::evaluate`] is synchronous and performs no IO
//! beyond reading the event store once per tick. It is driven by the daemon
//! (`crate::daemon`), which owns the timers and hands the resulting run
//! requests to a coordinator.

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info, warn};

use crate::asset::{AssetGraph, AssetKey, AssetPartition, AutoMaterializePolicy, RuleKind};
use crate::engine::batching::batch_run_requests;
use crate::engine::evaluation::{
    AssetPartitionEvaluation, DiscardReason, EvaluationSink, RuleOutcome, RuleResult, TracingSink,
    Verdict,
};
use crate::engine::freshness::required_for_freshness;
use crate::engine::rules::{RuleContext, TickState, evaluate_rule, is_outdated};
use crate::engine::snapshot::HistorySnapshot;
use crate::engine::throttle::{self, tick_rng};
use crate::errors::Result;
use crate::run::{RunRequest, SubmittedRun};
use crate::store::{EventStore, RunRequestRecord};

/// Options fixed for the lifetime of one engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineOptions {
    /// When false, every tick returns an empty result.
    pub enabled: bool,
    /// Seed for the per-tick RNG used by throttling.
    pub seed: u64,
    /// How far ahead freshness policies are checked; normally the tick
    /// interval.
    pub freshness_lookahead: Duration,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            enabled: true,
            seed: 0,
            freshness_lookahead: Duration::zero(),
        }
    }
}

/// Output of one tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TickResult {
    pub tick_time: DateTime<Utc>,
    pub run_requests: Vec<RunRequest>,
    pub evaluations: Vec<AssetPartitionEvaluation>,
}

impl TickResult {
    fn empty(tick_time: DateTime<Utc>) -> Self {
        Self {
            tick_time,
            run_requests: Vec::new(),
            evaluations: Vec::new(),
        }
    }

    /// Every asset partition requested in this tick.
    pub fn requested(&self) -> BTreeSet<AssetPartition> {
        self.run_requests
            .iter()
            .flat_map(|r| r.asset_partitions.iter().cloned())
            .collect()
    }

    pub fn evaluation_for(&self, ap: &AssetPartition) -> Option<&AssetPartitionEvaluation> {
        self.evaluations.iter().find(|e| &e.asset_partition == ap)
    }
}

pub struct AutoMaterializeEngine {
    graph: Arc<AssetGraph>,
    store: Arc<dyn EventStore>,
    options: EngineOptions,
    sink: Arc<dyn EvaluationSink>,
}

impl AutoMaterializeEngine {
    pub fn new(graph: Arc<AssetGraph>, store: Arc<dyn EventStore>, options: EngineOptions) -> Self {
        Self {
            graph,
            store,
            options,
            sink: Arc::new(TracingSink),
        }
    }

    pub fn with_sink(mut self, sink: Arc<dyn EvaluationSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn graph(&self) -> &Arc<AssetGraph> {
        &self.graph
    }

    pub fn options(&self) -> &EngineOptions {
        &self.options
    }

    /// Run one tick at `tick_time`.
    ///
    /// Store errors abort the tick; rule errors only mark the rule as not
    /// firing for that partition.
    pub fn evaluate(&self, tick_time: DateTime<Utc>) -> Result<TickResult> {
        if !self.options.enabled {
            debug!(%tick_time, "auto-materialization disabled; skipping tick");
            return Ok(TickResult::empty(tick_time));
        }

        let snapshot = HistorySnapshot::load(&self.graph, self.store.as_ref(), tick_time)?;
        let required = required_for_freshness(
            &self.graph,
            &snapshot,
            tick_time,
            self.options.freshness_lookahead,
        );
        let mut tick = TickState::new(required);
        let mut rng = tick_rng(self.options.seed, tick_time);
        let mut evaluations = Vec::new();

        for key in self.graph.toposorted_keys() {
            if let Some(policy) = self.graph.policy_of(key) {
                let mut decided = Vec::new();
                let mut to_materialize = Vec::new();

                for ap in self.candidates(key, policy, &tick, tick_time) {
                    let mut evaluation =
                        self.evaluate_partition(&ap, policy, &snapshot, &tick, tick_time);
                    if evaluation.verdict.is_materialize() {
                        if snapshot.is_in_flight(&ap) {
                            evaluation.verdict = Verdict::Discarded(DiscardReason::InFlight);
                        } else {
                            to_materialize.push(ap);
                        }
                    }
                    decided.push(evaluation);
                }

                let max_per_minute = policy.max_materializations_per_minute();
                let recent = snapshot.throttle_usage(key);
                let budget = (max_per_minute as usize).saturating_sub(recent);
                let selection = throttle::select(
                    self.graph.partitions_def_of(key),
                    to_materialize,
                    budget,
                    &mut rng,
                );

                if !selection.discarded.is_empty() {
                    debug!(
                        asset = %key,
                        max_per_minute,
                        recent,
                        discarded = selection.discarded.len(),
                        "throttled auto-materializations"
                    );
                    let reason = DiscardReason::RateLimited {
                        max_per_minute,
                        recent,
                    };
                    for evaluation in decided
                        .iter_mut()
                        .filter(|e| selection.discarded.contains(&e.asset_partition))
                    {
                        evaluation.verdict = Verdict::Discarded(reason);
                    }
                }

                tick.will_materialize.extend(selection.kept);
                evaluations.extend(decided);
            }

            let outdated: Vec<AssetPartition> = self
                .graph
                .partitions_of(key, tick_time)
                .into_iter()
                .filter(|ap| is_outdated(ap, &self.graph, &snapshot, &tick, tick_time))
                .collect();
            tick.outdated.extend(outdated);
        }

        for evaluation in &evaluations {
            self.sink.record(evaluation);
        }

        let selected: BTreeSet<AssetPartition> = tick.will_materialize.into_iter().collect();
        let run_requests = batch_run_requests(&self.graph, &selected, tick_time);

        info!(
            %tick_time,
            evaluated = evaluations.len(),
            selected = selected.len(),
            run_requests = run_requests.len(),
            "auto-materialize tick complete"
        );

        Ok(TickResult {
            tick_time,
            run_requests,
            evaluations,
        })
    }

    /// Record that `run` was handed to a coordinator at `tick_time`.
    ///
    /// Its partitions count as in flight until a newer materialization
    /// lands, and consume the throttle budget of the trailing minute.
    pub fn record_submitted(&self, run: &SubmittedRun, tick_time: DateTime<Utc>) -> Result<()> {
        let record = RunRequestRecord::new(tick_time, run.run_id.to_string());
        for ap in &run.asset_partitions {
            self.store.put_run_request(ap, record.clone())?;
        }
        debug!(run_id = %run.run_id, partitions = run.asset_partitions.len(), "recorded submitted run");
        Ok(())
    }

    /// Candidate partitions of `key`: the most recent windows for
    /// time-partitioned assets, every partition otherwise. Partitions a
    /// freshness policy requires are always candidates.
    fn candidates(
        &self,
        key: &AssetKey,
        policy: &AutoMaterializePolicy,
        tick: &TickState,
        now: DateTime<Utc>,
    ) -> BTreeSet<AssetPartition> {
        let mut out: BTreeSet<AssetPartition> = match self.graph.partitions_def_of(key) {
            Some(def) if def.is_time_windowed() => def
                .latest_partition_keys(now, policy.time_window_partitions())
                .into_iter()
                .map(|p| AssetPartition::partitioned(key.clone(), p))
                .collect(),
            _ => self.graph.partitions_of(key, now).into_iter().collect(),
        };
        out.extend(
            tick.required_for_freshness
                .iter()
                .filter(|ap| &ap.asset == key)
                .cloned(),
        );
        out
    }

    fn evaluate_partition(
        &self,
        ap: &AssetPartition,
        policy: &AutoMaterializePolicy,
        snapshot: &HistorySnapshot,
        tick: &TickState,
        now: DateTime<Utc>,
    ) -> AssetPartitionEvaluation {
        let ctx = RuleContext {
            asset_partition: ap,
            graph: &self.graph,
            snapshot,
            evaluation_time: now,
            tick,
        };

        let mut rule_outcomes = Vec::with_capacity(policy.rules().len());
        let mut materialize = false;
        let mut skip = false;

        for rule in policy.rules() {
            let result = match evaluate_rule(rule, &ctx) {
                Ok(true) => RuleResult::Fired,
                Ok(false) => RuleResult::NotFired,
                Err(e) => {
                    warn!(
                        rule = %e.rule,
                        asset_partition = %e.asset_partition,
                        error = %e.message,
                        "rule evaluation failed; treating as not fired"
                    );
                    RuleResult::Errored(e.message)
                }
            };
            if result.fired() {
                match rule.kind() {
                    RuleKind::Materialize => materialize = true,
                    RuleKind::Skip => skip = true,
                }
            }
            rule_outcomes.push(RuleOutcome {
                rule: rule.name().to_string(),
                kind: rule.kind(),
                result,
            });
        }

        // Any firing skip rule vetoes every materialize vote.
        let verdict = if skip {
            Verdict::Skip
        } else if materialize {
            Verdict::Materialize
        } else {
            Verdict::NoVote
        };

        AssetPartitionEvaluation {
            asset_partition: ap.clone(),
            evaluation_time: now,
            rule_outcomes,
            verdict,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::asset::{AssetDefinition, AutoMaterializeRule, PartitionsDefinition};
    use crate::run::{RunId, RunStatus};
    use crate::store::{InMemoryEventStore, MaterializationRecord};
    use chrono::TimeZone;

    fn t(minutes: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + Duration::minutes(minutes)
    }

    fn engine(assets: Vec<AssetDefinition>, store: Arc<InMemoryEventStore>) -> AutoMaterializeEngine {
        let graph = Arc::new(AssetGraph::new(assets).unwrap());
        AutoMaterializeEngine::new(graph, store, EngineOptions::default())
    }

    #[test]
    fn skip_vetoes_materialize() {
        let store = Arc::new(InMemoryEventStore::new());
        let engine = engine(
            vec![
                AssetDefinition::new("up"),
                AssetDefinition::new("down")
                    .with_deps(["up"])
                    .with_policy(AutoMaterializePolicy::eager()),
            ],
            store,
        );
        let result = engine.evaluate(t(0)).unwrap();
        assert!(result.run_requests.is_empty());
        let evaluation = result
            .evaluation_for(&AssetPartition::unpartitioned("down"))
            .unwrap();
        assert_eq!(evaluation.verdict, Verdict::Skip);
        assert!(evaluation.fired_rules().any(|r| r == "materialize_on_missing"));
        assert!(evaluation.fired_rules().any(|r| r == "skip_on_parent_missing"));
    }

    #[test]
    fn disabled_engine_does_nothing() {
        let store = Arc::new(InMemoryEventStore::new());
        let graph = Arc::new(
            AssetGraph::new([AssetDefinition::new("a").with_policy(AutoMaterializePolicy::eager())])
                .unwrap(),
        );
        let options = EngineOptions {
            enabled: false,
            ..EngineOptions::default()
        };
        let result = AutoMaterializeEngine::new(graph, store, options)
            .evaluate(t(0))
            .unwrap();
        assert_eq!(result, TickResult::empty(t(0)));
    }

    #[test]
    fn recent_materializations_consume_the_budget() {
        let store = Arc::new(InMemoryEventStore::new());
        let policy = AutoMaterializePolicy::from_rules(vec![AutoMaterializeRule::MaterializeOnCodeVersionChange]);
        store
            .put_materialization(
                &AssetPartition::unpartitioned("a"),
                MaterializationRecord::at(t(0)).with_code_version("1"),
            )
            .unwrap();
        let engine = engine(
            vec![AssetDefinition::new("a").with_policy(policy).with_code_version("2")],
            store,
        );

        // The materialization 30s ago still counts against the window.
        let throttled = engine.evaluate(t(0) + Duration::seconds(30)).unwrap();
        assert!(throttled.run_requests.is_empty());
        assert!(matches!(
            throttled.evaluations[0].verdict,
            Verdict::Discarded(DiscardReason::RateLimited { recent: 1, .. })
        ));

        let later = engine.evaluate(t(2)).unwrap();
        assert_eq!(later.run_requests.len(), 1);
    }

    #[test]
    fn in_flight_partitions_are_not_requested_again_and_use_the_budget() {
        let store = Arc::new(InMemoryEventStore::new());
        let keys = PartitionsDefinition::Static(vec!["x".into(), "y".into(), "z".into()]);
        let engine = engine(
            vec![AssetDefinition::new("a")
                .with_partitions(keys)
                .with_policy(AutoMaterializePolicy::eager().with_max_materializations_per_minute(2))],
            Arc::clone(&store),
        );
        let x = AssetPartition::partitioned("a", "x");
        let run = SubmittedRun::from_request(RunId::new(), RunRequest::new([x.clone()]), RunStatus::Launched);
        engine.record_submitted(&run, t(0)).unwrap();

        let result = engine.evaluate(t(0) + Duration::seconds(30)).unwrap();
        assert_eq!(
            result.evaluation_for(&x).map(|e| e.verdict),
            Some(Verdict::Discarded(DiscardReason::InFlight))
        );
        let requested = result.requested();
        assert_eq!(requested.len(), 1);
        assert!(!requested.contains(&x));

        store
            .put_materialization(&x, MaterializationRecord::at(t(0) + Duration::seconds(40)))
            .unwrap();
        let after = engine.evaluate(t(0) + Duration::seconds(50)).unwrap();
        assert_ne!(
            after.evaluation_for(&x).map(|e| e.verdict),
            Some(Verdict::Discarded(DiscardReason::InFlight))
        );
    }
}
