// tests/freshness.rs

mod common;
use crate::common::{Fixture, t};

use std::collections::BTreeSet;

use chrono::Duration;

use assetdag::asset::{AssetDefinition, AssetPartition, AutoMaterializePolicy, FreshnessPolicy};
use assetdag::engine::{EngineOptions, Verdict};

/// b -> mid -> a, with a one-hour freshness policy on `a`.
fn lazy_chain() -> Fixture {
    let fx = Fixture::new([
        AssetDefinition::new("b"),
        AssetDefinition::new("mid")
            .with_deps(["b"])
            .with_policy(AutoMaterializePolicy::lazy()),
        AssetDefinition::new("a")
            .with_deps(["mid"])
            .with_policy(AutoMaterializePolicy::lazy())
            .with_freshness_policy(FreshnessPolicy::new(Duration::minutes(60))),
    ]);
    fx.materialize_at("b", t(0));
    fx.materialize_at("mid", t(1));
    fx.materialize_at("a", t(2));
    fx.materialize_at("b", t(10));
    fx
}

#[test]
fn lazy_assets_wait_until_the_lag_is_at_risk() {
    let fx = lazy_chain();

    let result = fx.engine().evaluate(t(30)).unwrap();

    assert!(result.run_requests.is_empty());
    let mid = result
        .evaluation_for(&AssetPartition::unpartitioned("mid"))
        .unwrap();
    assert_eq!(mid.verdict, Verdict::NoVote);
}

#[test]
fn violated_freshness_materializes_the_stale_chain_in_one_run() {
    let fx = lazy_chain();

    let result = fx.engine().evaluate(t(80)).unwrap();

    assert_eq!(result.run_requests.len(), 1);
    assert_eq!(
        result.run_requests[0].asset_partitions,
        BTreeSet::from([
            AssetPartition::unpartitioned("a"),
            AssetPartition::unpartitioned("mid"),
        ])
    );
    let a = result.evaluation_for(&AssetPartition::unpartitioned("a")).unwrap();
    assert!(a.fired_rules().any(|r| r == "materialize_on_required_for_freshness"));
}

#[test]
fn lookahead_requests_before_the_deadline() {
    let fx = lazy_chain();
    let options = EngineOptions {
        freshness_lookahead: Duration::minutes(45),
        ..EngineOptions::default()
    };

    let result = fx.engine_with(options).evaluate(t(30)).unwrap();

    assert_eq!(
        result.requested(),
        BTreeSet::from([
            AssetPartition::unpartitioned("a"),
            AssetPartition::unpartitioned("mid"),
        ])
    );
}

#[test]
fn freshly_materialized_chain_requires_nothing() {
    let fx = lazy_chain();
    fx.materialize_at("mid", t(11));
    fx.materialize_at("a", t(12));

    let result = fx.engine().evaluate(t(200)).unwrap();

    assert!(result.run_requests.is_empty());
}
