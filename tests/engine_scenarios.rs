// tests/engine_scenarios.rs

mod common;
use crate::common::{Fixture, epoch, init_tracing, t};

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::Duration;

use assetdag::asset::{
    AssetCheckSeverity, AssetCheckSpec, AssetDefinition, AssetPartition, AutoMaterializePolicy, AutoMaterializeRule, CustomRule,
    PartitionsDefinition, RuleKind, TimeWindowPartitions,
};
use assetdag::engine::{DiscardReason, EngineOptions, RuleContext, RuleResult, Verdict};
use assetdag::run::{AUTO_MATERIALIZE_TAG, PARTITION_TAG, TICK_TAG};
use assetdag::store::{AssetCheckResult, EventStore, MaterializationRecord};

fn up(asset: &str) -> AssetPartition {
    AssetPartition::unpartitioned(asset)
}

fn always(name: &str, kind: RuleKind) -> AutoMaterializeRule {
    AutoMaterializeRule::Custom(CustomRule::new(name, kind, Arc::new(|_: &RuleContext<'_>| Ok(true))))
}

#[test]
fn parent_update_materializes_never_materialized_child() {
    init_tracing();

    let fx = Fixture::new([
        AssetDefinition::new("asset1"),
        AssetDefinition::new("asset2")
            .with_deps(["asset1"])
            .with_policy(AutoMaterializePolicy::eager()),
    ]);
    fx.materialize(up("asset1"), epoch(), Some("v1"));

    let result = fx.engine().evaluate(epoch() + Duration::seconds(1)).unwrap();

    assert_eq!(result.run_requests.len(), 1);
    let request = &result.run_requests[0];
    assert_eq!(request.asset_partitions, BTreeSet::from([up("asset2")]));
    assert_eq!(request.tags.get(AUTO_MATERIALIZE_TAG).map(String::as_str), Some("true"));
    assert!(request.tags.contains_key(TICK_TAG));

    let evaluation = result.evaluation_for(&up("asset2")).unwrap();
    let fired: Vec<&str> = evaluation.fired_rules().collect();
    assert!(fired.contains(&"materialize_on_parent_updated"));
    assert!(fired.contains(&"materialize_on_missing"));
    assert!(!fired.iter().any(|r| r.starts_with("skip_")));
    assert_eq!(evaluation.verdict, Verdict::Materialize);

    // Assets without a policy are never candidates.
    assert!(result.evaluation_for(&up("asset1")).is_none());
}

#[test]
fn a_single_skip_vetoes_any_number_of_materialize_votes() {
    let policy = AutoMaterializePolicy::from_rules(vec![
        always("m1", RuleKind::Materialize),
        always("m2", RuleKind::Materialize),
        AutoMaterializeRule::MaterializeOnMissing,
        always("veto", RuleKind::Skip),
    ]);
    let fx = Fixture::new([AssetDefinition::new("a").with_policy(policy)]);

    let result = fx.engine().evaluate(t(0)).unwrap();

    assert!(result.run_requests.is_empty());
    assert_eq!(result.evaluations[0].verdict, Verdict::Skip);
    assert_eq!(result.evaluations[0].fired_rules().count(), 4);
}

#[test]
fn skip_on_parent_outdated_holds_back_grandchildren() {
    let fx = Fixture::new([
        AssetDefinition::new("a"),
        AssetDefinition::new("b").with_deps(["a"]),
        AssetDefinition::new("c")
            .with_deps(["b"])
            .with_policy(AutoMaterializePolicy::eager()),
    ]);
    fx.materialize_at("b", t(0));
    fx.materialize_at("a", t(1));

    let result = fx.engine().evaluate(t(5)).unwrap();

    assert!(result.run_requests.is_empty());
    let evaluation = result.evaluation_for(&up("c")).unwrap();
    assert_eq!(evaluation.verdict, Verdict::Skip);
    assert!(evaluation.fired_rules().any(|r| r == "skip_on_parent_outdated"));
}

#[test]
fn same_version_rematerialization_does_not_trigger_children() {
    let fx = Fixture::new([
        AssetDefinition::new("asset1"),
        AssetDefinition::new("asset2")
            .with_deps(["asset1"])
            .with_policy(AutoMaterializePolicy::eager()),
    ]);
    fx.materialize(up("asset1"), t(0), Some("v1"));
    fx.materialize(up("asset2"), t(1), None);
    fx.materialize(up("asset1"), t(2), Some("v1"));

    let engine = fx.engine();
    assert!(engine.evaluate(t(3)).unwrap().run_requests.is_empty());

    fx.materialize(up("asset1"), t(4), Some("v2"));
    let result = engine.evaluate(t(5)).unwrap();
    assert_eq!(result.requested(), BTreeSet::from([up("asset2")]));
}

#[test]
fn observation_with_new_version_counts_as_parent_update() {
    let fx = Fixture::new([
        AssetDefinition::new("source"),
        AssetDefinition::new("derived")
            .with_deps(["source"])
            .with_policy(AutoMaterializePolicy::eager()),
    ]);
    fx.observe(up("source"), t(0), "v1");
    fx.materialize_at("derived", t(1));
    fx.observe(up("source"), t(2), "v1");

    let engine = fx.engine();
    assert!(engine.evaluate(t(3)).unwrap().run_requests.is_empty());

    fx.observe(up("source"), t(4), "v2");
    assert_eq!(engine.evaluate(t(5)).unwrap().requested(), BTreeSet::from([up("derived")]));
}

#[test]
fn evaluate_is_idempotent_for_frozen_state() {
    let keys: Vec<String> = (0..8).map(|i| format!("region-{i}")).collect();
    let fx = Fixture::new([
        AssetDefinition::new("regions")
            .with_partitions(PartitionsDefinition::Static(keys))
            .with_policy(AutoMaterializePolicy::eager().with_max_materializations_per_minute(3)),
        AssetDefinition::new("report")
            .with_deps(["regions"])
            .with_policy(AutoMaterializePolicy::eager()),
    ]);
    let options = EngineOptions {
        seed: 42,
        ..EngineOptions::default()
    };

    let first = fx.engine_with(options).evaluate(t(10)).unwrap();
    let second = fx.engine_with(options).evaluate(t(10)).unwrap();

    assert_eq!(first.run_requests, second.run_requests);
    assert_eq!(first.evaluations, second.evaluations);
    assert_eq!(first.requested().iter().filter(|ap| ap.asset.as_str() == "regions").count(), 3);
}

#[test]
fn throttling_keeps_the_most_recent_time_partitions() {
    let policy = AutoMaterializePolicy::eager()
        .with_time_window_partitions(5)
        .with_max_materializations_per_minute(2);
    let fx = Fixture::new([AssetDefinition::new("events")
        .with_partitions(PartitionsDefinition::TimeWindow(TimeWindowPartitions::daily(epoch())))
        .with_policy(policy)]);

    let result = fx.engine().evaluate(epoch() + Duration::days(7)).unwrap();

    let requested: Vec<String> = result
        .requested()
        .into_iter()
        .filter_map(|ap| ap.partition)
        .collect();
    assert_eq!(requested, vec!["2024-01-06".to_string(), "2024-01-07".to_string()]);

    let discarded: Vec<_> = result
        .evaluations
        .iter()
        .filter(|e| matches!(e.verdict, Verdict::Discarded(DiscardReason::RateLimited { .. })))
        .collect();
    assert_eq!(discarded.len(), 3);

    // Different partition keys never share a run.
    assert_eq!(result.run_requests.len(), 2);
    for request in &result.run_requests {
        assert!(request.tags.contains_key(PARTITION_TAG));
    }

    assert_eq!(fx.sink.records().len(), result.evaluations.len());

    // Discarded partitions are reconsidered on the next tick.
    let next = fx.engine().evaluate(epoch() + Duration::days(7)).unwrap();
    assert_eq!(next.requested(), result.requested());
}

#[test]
fn selected_chain_is_batched_into_one_run() {
    let fx = Fixture::new([
        AssetDefinition::new("a").with_policy(AutoMaterializePolicy::eager()),
        AssetDefinition::new("b")
            .with_deps(["a"])
            .with_policy(AutoMaterializePolicy::eager()),
        AssetDefinition::new("c")
            .with_deps(["b"])
            .with_policy(AutoMaterializePolicy::eager()),
    ]);

    let result = fx.engine().evaluate(t(0)).unwrap();

    assert_eq!(result.run_requests.len(), 1);
    assert_eq!(
        result.run_requests[0].asset_partitions,
        BTreeSet::from([up("a"), up("b"), up("c")])
    );
}

#[test]
fn static_partitions_batch_per_key() {
    let keys = PartitionsDefinition::Static(vec!["x".into(), "y".into()]);
    let fx = Fixture::new([
        AssetDefinition::new("up")
            .with_partitions(keys.clone())
            .with_policy(AutoMaterializePolicy::eager().with_max_materializations_per_minute(10)),
        AssetDefinition::new("down")
            .with_deps(["up"])
            .with_partitions(keys)
            .with_policy(AutoMaterializePolicy::eager().with_max_materializations_per_minute(10)),
    ]);

    let result = fx.engine().evaluate(t(0)).unwrap();

    assert_eq!(result.run_requests.len(), 2);
    for (request, key) in result.run_requests.iter().zip(["x", "y"]) {
        assert_eq!(
            request.asset_partitions,
            BTreeSet::from([
                AssetPartition::partitioned("down", key),
                AssetPartition::partitioned("up", key),
            ])
        );
        assert_eq!(request.tags.get(PARTITION_TAG).map(String::as_str), Some(key));
    }
}

#[test]
fn failing_rule_counts_as_not_fired_and_does_not_block_others() {
    let flaky = AutoMaterializeRule::Custom(CustomRule::new(
        "flaky_skip",
        RuleKind::Skip,
        Arc::new(|ctx: &RuleContext<'_>| {
            if ctx.asset_partition.asset.as_str() == "a" {
                Err("upstream catalog unavailable".to_string())
            } else {
                Ok(false)
            }
        }),
    ));
    let policy = AutoMaterializePolicy::eager().with_rules([flaky]);
    let fx = Fixture::new([
        AssetDefinition::new("a").with_policy(policy.clone()),
        AssetDefinition::new("z").with_policy(policy),
    ]);

    let result = fx.engine().evaluate(t(0)).unwrap();

    assert_eq!(result.requested(), BTreeSet::from([up("a"), up("z")]));
    let evaluation = result.evaluation_for(&up("a")).unwrap();
    assert_eq!(evaluation.errored_rules().collect::<Vec<_>>(), vec!["flaky_skip"]);
    let outcome = evaluation
        .rule_outcomes
        .iter()
        .find(|o| o.rule == "flaky_skip")
        .unwrap();
    assert_eq!(
        outcome.result,
        RuleResult::Errored("upstream catalog unavailable".to_string())
    );
}

#[test]
fn code_version_change_rematerializes() {
    let policy = AutoMaterializePolicy::lazy().with_rules([AutoMaterializeRule::MaterializeOnCodeVersionChange]);
    let fx = Fixture::new([AssetDefinition::new("model")
        .with_code_version("2")
        .with_policy(policy)]);
    fx.store
        .put_materialization(
            &up("model"),
            MaterializationRecord::at(t(0)).with_code_version("1"),
        )
        .unwrap();

    let result = fx.engine().evaluate(t(5)).unwrap();
    assert_eq!(result.requested(), BTreeSet::from([up("model")]));
}

#[test]
fn disabled_engine_produces_nothing() {
    let fx = Fixture::new([AssetDefinition::new("a").with_policy(AutoMaterializePolicy::eager())]);
    let options = EngineOptions {
        enabled: false,
        ..EngineOptions::default()
    };

    let result = fx.engine_with(options).evaluate(t(0)).unwrap();

    assert!(result.run_requests.is_empty());
    assert!(result.evaluations.is_empty());
    assert!(fx.sink.records().is_empty());
}

#[test]
fn failed_blocking_check_holds_back_children_until_it_passes() {
    let fx = Fixture::new([
        AssetDefinition::new("orders")
            .with_check(AssetCheckSpec::new("no_nulls").blocking())
            .with_check(AssetCheckSpec::new("row_count")),
        AssetDefinition::new("report").with_deps(["orders"]).with_policy(
            AutoMaterializePolicy::eager().with_rules([AutoMaterializeRule::SkipOnParentBlockingCheckFailed]),
        ),
    ]);
    fx.materialize_at("orders", t(0));
    fx.check_result("orders", AssetCheckResult::failed(t(1), "row_count", AssetCheckSeverity::Error));
    fx.check_result("orders", AssetCheckResult::failed(t(1), "no_nulls", AssetCheckSeverity::Warn));

    // Non-blocking checks and WARN failures never hold anything back.
    let result = fx.engine().evaluate(t(2)).unwrap();
    assert_eq!(result.run_requests.len(), 1);

    fx.check_result("orders", AssetCheckResult::failed(t(3), "no_nulls", AssetCheckSeverity::Error));
    let result = fx.engine().evaluate(t(4)).unwrap();
    assert!(result.run_requests.is_empty());
    let evaluation = result.evaluation_for(&up("report")).unwrap();
    assert_eq!(evaluation.verdict, Verdict::Skip);
    assert!(evaluation.fired_rules().any(|r| r == "skip_on_parent_blocking_check_failed"));

    fx.check_result("orders", AssetCheckResult::passed(t(5), "no_nulls"));
    let result = fx.engine().evaluate(t(6)).unwrap();
    assert_eq!(result.run_requests.len(), 1);
}
