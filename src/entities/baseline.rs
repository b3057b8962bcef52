//! Baselines - frozen, fully resolved configurations of a product

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::identity::{ConfigurationItemKey, IterationKey, MasterKind};
use crate::entities::configuration::PathToPathLink;

/// Which iterations a baseline pins
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[derive(Default)]
pub enum BaselineType {
    /// Latest checked-in iteration of every reachable master
    #[default]
    Latest,
    /// Last iteration of the latest released revision
    Released,
}

impl std::fmt::Display for BaselineType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BaselineType::Latest => write!(f, "latest"),
            BaselineType::Released => write!(f, "released"),
        }
    }
}

impl std::str::FromStr for BaselineType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "latest" => Ok(BaselineType::Latest),
            "released" => Ok(BaselineType::Released),
            _ => Err(format!(
                "Invalid baseline type: {}. Use 'latest' or 'released'",
                s
            )),
        }
    }
}

/// Deviations from the default structure chosen for a configuration
///
/// Only deviations are listed: a selected substitute path replaces the
/// default usage link at that position, a retained optional path keeps an
/// optional usage link (and its subtree) in the configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectionPolicy {
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub substitute_paths: BTreeSet<String>,

    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub optional_paths: BTreeSet<String>,
}

impl SelectionPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn select_substitute(mut self, path: impl Into<String>) -> Self {
        self.substitute_paths.insert(path.into());
        self
    }

    pub fn retain_optional(mut self, path: impl Into<String>) -> Self {
        self.optional_paths.insert(path.into());
        self
    }

    pub fn is_substitute_selected(&self, path: &str) -> bool {
        self.substitute_paths.contains(path)
    }

    pub fn is_optional_retained(&self, path: &str) -> bool {
        self.optional_paths.contains(path)
    }
}

/// Resolved state captured by a baseline or a product instance iteration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    /// Pinned part iterations, one per reachable part master
    pub parts: Vec<IterationKey>,

    /// Pinned document iterations linked from the pinned parts
    pub documents: Vec<IterationKey>,

    /// Selected substitute and retained optional paths
    pub selection: SelectionPolicy,

    /// Structural copies of the applicable path-to-path links
    pub path_to_path_links: Vec<PathToPathLink>,
}

impl Snapshot {
    /// Pinned iteration of a part master
    pub fn part(&self, master_id: &str) -> Option<&IterationKey> {
        self.parts.iter().find(|k| k.master().id == master_id)
    }

    /// Pinned part iterations keyed by part master id
    pub fn pinned_parts(&self) -> BTreeMap<String, IterationKey> {
        self.parts
            .iter()
            .map(|key| (key.master().id.clone(), key.clone()))
            .collect()
    }

    /// Whether any pinned part or document belongs to the given revision
    pub fn references(&self, kind: MasterKind, master_id: &str, version: &str) -> bool {
        let pinned = match kind {
            MasterKind::Part => &self.parts,
            MasterKind::Document => &self.documents,
        };
        pinned
            .iter()
            .any(|k| k.master().id == master_id && k.revision.version == version)
    }
}

/// Immutable snapshot of a configuration item at one moment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductBaseline {
    pub id: i64,

    pub ci: ConfigurationItemKey,

    /// Unique within the configuration item
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    pub baseline_type: BaselineType,

    pub author: String,

    pub created: DateTime<Utc>,

    pub snapshot: Snapshot,
}
