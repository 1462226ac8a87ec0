// src/asset/mod.rs

//! Asset graph model.
//!
//! - [`checks`] declares asset checks and their severities.
//! - [`key`] holds asset and asset-partition identity.
//! - [`partitions`] defines static and time-windowed partition sets.
//! - [`mapping`] resolves which parent partitions a child partition reads.
//! - [`policy`] contains auto-materialize rules, policies and freshness
//!   policies.
//! - [`graph`] is the validated, immutable asset graph.

pub mod checks;
pub mod graph;
pub mod key;
pub mod mapping;
pub mod partitions;
pub mod policy;

pub use checks::{AssetCheckSeverity, AssetCheckSpec};
pub use graph::{AssetDefinition, AssetDep, AssetGraph};
pub use key::{AssetKey, AssetPartition, PartitionKey};
pub use mapping::{PartitionMapping, UpstreamPartitions};
pub use partitions::{Cadence, PartitionsDefinition, TimeWindow, TimeWindowPartitions};
pub use policy::{
    AutoMaterializePolicy, AutoMaterializeRule, CustomRule, FreshnessPolicy, RuleKind,
    RulePredicate,
};
