// src/asset/checks.rs

//! Asset checks: named data-quality assertions attached to an asset.
//!
//! Checks run outside the engine; their results land in the event store.
//! A *blocking* check whose latest result failed with ERROR severity holds
//! back downstream assets through
//! [`crate::asset::AutoMaterializeRule::SkipOnParentBlockingCheckFailed`].

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AssetCheckSeverity {
    /// Reported, never blocks.
    Warn,
    #[default]
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AssetCheckSpec {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    /// A failed ERROR-severity result blocks downstream materializations.
    #[serde(default)]
    pub blocking: bool,
}

impl AssetCheckSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
            blocking: false,
        }
    }

    pub fn blocking(mut self) -> Self {
        self.blocking = true;
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}
