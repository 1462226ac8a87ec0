use std::str::FromStr;
use serde::Deserialize;

/// Which run coordinator the daemon builds from `[run_coordinator]`.
///
/// - `Default`: launch every submitted run immediately.
/// - `Queued`: hold runs in a priority queue and launch them from a background
///   loop under a global concurrency limit.
///
/// Either kind is wrapped in a custom coordinator when `header_tags` hooks are
/// configured.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CoordinatorKind {
    Default,
    Queued,
}

impl Default for CoordinatorKind {
    fn default() -> Self {
        CoordinatorKind::Queued
    }
}

impl FromStr for CoordinatorKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "default" => Ok(CoordinatorKind::Default),
            "queued" => Ok(CoordinatorKind::Queued),
            other => Err(format!(
                "invalid run coordinator kind: {other} (expected \"default\" or \"queued\")"
            )),
        }
    }
}

/// Named policy presets accepted by `[asset.<key>].policy`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PolicyPreset {
    /// Materialize on missing data and on upstream updates.
    Eager,
    /// Materialize only when required to satisfy a freshness policy.
    Lazy,
}

impl FromStr for PolicyPreset {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "eager" => Ok(PolicyPreset::Eager),
            "lazy" => Ok(PolicyPreset::Lazy),
            other => Err(format!(
                "invalid policy preset: {other} (expected \"eager\" or \"lazy\")"
            )),
        }
    }
}

/// Where a run request came from. Carried in the submission context so hooks
/// and logs can tell triggers apart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerSource {
    AutoMaterialize,
    Schedule,
    Sensor,
    Manual,
}

impl TriggerSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            TriggerSource::AutoMaterialize => "auto_materialize",
            TriggerSource::Schedule => "schedule",
            TriggerSource::Sensor => "sensor",
            TriggerSource::Manual => "manual",
        }
    }
}
