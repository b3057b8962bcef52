//! Structure edges - usage links and their substitutes
//!
//! A usage link belongs to one part iteration and points at a child part
//! master. Its id is assigned by the store; cloning an iteration (checkout,
//! new revision) produces links with new ids, hence new path segments.

use serde::{Deserialize, Serialize};

use crate::core::identity::LinkId;

/// Alternate child usable in place of a usage link's default component
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubstituteLink {
    pub id: i64,

    /// Part master id of the substitute
    pub substitute: String,

    pub amount: f64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference_description: Option<String>,
}

impl SubstituteLink {
    pub fn link_id(&self) -> LinkId {
        LinkId::Substitute(self.id)
    }

    /// Path segment of this substitute, e.g. `s7`
    pub fn full_id(&self) -> String {
        self.link_id().full_id()
    }
}

/// Edge from a parent part iteration to a child part master
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PartUsageLink {
    pub id: i64,

    /// Part master id of the child
    pub component: String,

    pub amount: f64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,

    /// Optional links are dropped from a configuration unless retained
    #[serde(default)]
    pub optional: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference_description: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub substitutes: Vec<SubstituteLink>,
}

impl PartUsageLink {
    pub fn link_id(&self) -> LinkId {
        LinkId::Usage(self.id)
    }

    /// Path segment of this link, e.g. `u12`
    pub fn full_id(&self) -> String {
        self.link_id().full_id()
    }

    /// Description of this link usable to create an equivalent one
    pub fn to_spec(&self) -> UsageLinkSpec {
        UsageLinkSpec {
            component: self.component.clone(),
            amount: self.amount,
            unit: self.unit.clone(),
            optional: self.optional,
            reference_description: self.reference_description.clone(),
            substitutes: self.substitutes.iter().map(SubstituteSpec::from).collect(),
        }
    }
}

/// Input describing a substitute to create
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubstituteSpec {
    pub substitute: String,
    pub amount: f64,
    #[serde(default)]
    pub unit: Option<String>,
    #[serde(default)]
    pub reference_description: Option<String>,
}

impl SubstituteSpec {
    pub fn new(substitute: impl Into<String>) -> Self {
        Self {
            substitute: substitute.into(),
            amount: 1.0,
            unit: None,
            reference_description: None,
        }
    }
}

impl From<&SubstituteLink> for SubstituteSpec {
    fn from(link: &SubstituteLink) -> Self {
        Self {
            substitute: link.substitute.clone(),
            amount: link.amount,
            unit: link.unit.clone(),
            reference_description: link.reference_description.clone(),
        }
    }
}

/// Input describing a usage link to create
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageLinkSpec {
    pub component: String,
    pub amount: f64,
    #[serde(default)]
    pub unit: Option<String>,
    #[serde(default)]
    pub optional: bool,
    #[serde(default)]
    pub reference_description: Option<String>,
    #[serde(default)]
    pub substitutes: Vec<SubstituteSpec>,
}

impl UsageLinkSpec {
    pub fn new(component: impl Into<String>) -> Self {
        Self {
            component: component.into(),
            amount: 1.0,
            unit: None,
            optional: false,
            reference_description: None,
            substitutes: Vec::new(),
        }
    }

    pub fn amount(mut self, amount: f64) -> Self {
        self.amount = amount;
        self
    }

    pub fn optional(mut self) -> Self {
        self.optional = true;
        self
    }

    pub fn with_substitute(mut self, substitute: impl Into<String>) -> Self {
        self.substitutes.push(SubstituteSpec::new(substitute));
        self
    }
}
