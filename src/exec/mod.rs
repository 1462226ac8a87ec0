// src/exec/mod.rs

//! Execution seam.
//!
//! - [`backend`] provides the [`RunLauncher`] trait and the logging
//!   launcher used by the CLI; tests replace it with a recording fake.
//! - [`step_config`] resolves the per-step configuration handed to the
//!   launcher.

pub mod backend;
pub mod step_config;

pub use backend::{LaunchRequest, LoggingLauncher, RunLauncher, StepLaunch};
pub use step_config::{StepConfigResolver, merge_shallow};
