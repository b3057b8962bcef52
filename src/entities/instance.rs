//! Product instances - serialized units derived from a baseline

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::entity::{CheckoutState, Iterated};
use crate::core::identity::ProductInstanceKey;
use crate::entities::baseline::Snapshot;
use crate::entities::content::BinaryResource;

/// One iteration of a product instance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductInstanceIteration {
    pub instance: ProductInstanceKey,

    pub iteration: u32,

    /// Baseline this iteration was copied or rebased from
    pub based_on: i64,

    pub author: String,

    pub created: DateTime<Utc>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checkin_date: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub files: Vec<BinaryResource>,

    pub snapshot: Snapshot,
}

impl ProductInstanceIteration {
    pub fn is_checked_in(&self) -> bool {
        self.checkin_date.is_some()
    }
}

/// A serialized physical unit with its own iteration history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductInstance {
    pub key: ProductInstanceKey,

    pub author: String,

    pub created: DateTime<Utc>,

    pub checkout: CheckoutState,

    pub iterations: Vec<ProductInstanceIteration>,
}

impl ProductInstance {
    pub fn last_iteration(&self) -> Option<&ProductInstanceIteration> {
        self.iterations.last()
    }

    pub fn working_copy(&self) -> Option<&ProductInstanceIteration> {
        self.iterations.last().filter(|i| !i.is_checked_in())
    }

    pub fn last_checked_in(&self) -> Option<&ProductInstanceIteration> {
        self.iterations.iter().rev().find(|i| i.is_checked_in())
    }
}

impl Iterated for ProductInstance {
    fn display_key(&self) -> String {
        self.key.to_string()
    }

    fn checkout(&self) -> &CheckoutState {
        &self.checkout
    }

    fn last_iteration_number(&self) -> u32 {
        self.last_iteration().map(|i| i.iteration).unwrap_or(0)
    }

    fn last_iteration_checked_in(&self) -> bool {
        self.last_iteration()
            .is_some_and(ProductInstanceIteration::is_checked_in)
    }
}
