// src/engine/mod.rs

//! Auto-materialize engine.
//!
//! One tick runs through these stages:
//! - [`snapshot`] freezes materialization/observation history,
//! - [`freshness`] works out what freshness policies require,
//! - [`rules`] evaluates every policy rule per candidate partition,
//! - [`throttle`] applies per-asset rate limits,
//! - [`batching`] groups the survivors into run requests.
//!
//! [`core`] drives the stages; [`evaluation`] holds the per-partition
//! records reported to an [`EvaluationSink`].

pub mod batching;
pub mod core;
pub mod evaluation;
pub mod freshness;
pub mod rules;
pub mod snapshot;
pub mod throttle;

pub use core::{AutoMaterializeEngine, EngineOptions, TickResult};
pub use evaluation::{
    AssetPartitionEvaluation, DiscardReason, EvaluationSink, RuleOutcome, RuleResult, TracingSink,
    Verdict,
};
pub use rules::{RuleContext, TickState};
pub use snapshot::HistorySnapshot;
