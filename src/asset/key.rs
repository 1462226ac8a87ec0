// src/asset/key.rs

//! Asset and partition identity.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Unique identity of an asset.
///
/// Keys are slash-separated paths (`"warehouse/orders"`); a single segment is
/// the common case.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AssetKey(String);

impl AssetKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn from_path<I, S>(segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let joined = segments
            .into_iter()
            .map(|s| s.as_ref().to_string())
            .collect::<Vec<_>>()
            .join("/");
        Self(joined)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn path(&self) -> impl Iterator<Item = &str> {
        self.0.split('/')
    }
}

impl fmt::Display for AssetKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for AssetKey {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for AssetKey {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Key of one partition of a partitioned asset (e.g. `"2024-01-01"`).
pub type PartitionKey = String;

/// One addressable unit of materialization: an asset plus an optional
/// partition key (`None` for unpartitioned assets).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct AssetPartition {
    pub asset: AssetKey,
    pub partition: Option<PartitionKey>,
}

impl AssetPartition {
    pub fn new(asset: impl Into<AssetKey>, partition: Option<PartitionKey>) -> Self {
        Self {
            asset: asset.into(),
            partition,
        }
    }

    pub fn unpartitioned(asset: impl Into<AssetKey>) -> Self {
        Self::new(asset, None)
    }

    pub fn partitioned(asset: impl Into<AssetKey>, partition: impl Into<PartitionKey>) -> Self {
        Self::new(asset, Some(partition.into()))
    }
}

impl fmt::Display for AssetPartition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.partition {
            Some(p) => write!(f, "{}[{}]", self.asset, p),
            None => write!(f, "{}", self.asset),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_from_path_joins_segments() {
        let key = AssetKey::from_path(["warehouse", "orders"]);
        assert_eq!(key.as_str(), "warehouse/orders");
        assert_eq!(key.path().collect::<Vec<_>>(), vec!["warehouse", "orders"]);
    }

    #[test]
    fn asset_partition_display() {
        assert_eq!(AssetPartition::unpartitioned("a").to_string(), "a");
        assert_eq!(AssetPartition::partitioned("a", "x").to_string(), "a[x]");
    }
}
