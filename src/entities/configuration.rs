//! Configuration items and path-to-path links

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::identity::ConfigurationItemKey;

/// Root of one product structure
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigurationItem {
    pub key: ConfigurationItemKey,

    /// Part master id at the root of the structure
    pub design_item: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    pub author: String,

    pub created: DateTime<Utc>,
}

/// Typed directed relation between two structure paths
///
/// `(configuration item, link_type, source_path, target_path)` is unique.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PathToPathLink {
    pub id: i64,

    /// Relation kind, e.g. "wiring" or "routing"
    pub link_type: String,

    pub source_path: String,

    pub target_path: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl PathToPathLink {
    /// Uniqueness key within its owner
    pub fn unique_key(&self) -> (&str, &str, &str) {
        (&self.link_type, &self.source_path, &self.target_path)
    }
}
