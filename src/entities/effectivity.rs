//! Effectivity - validity ranges gating whether a revision applies
//!
//! An effectivity is a plain filter attached to a revision: a serial-number,
//! date or lot range, optionally scoped to one configuration item.

use std::cmp::Ordering;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::identity::ConfigurationItemKey;

/// Range bounds of an effectivity; a missing end means open-ended
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EffectivityRange {
    SerialNumber {
        start: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        end: Option<String>,
    },
    Date {
        start: DateTime<Utc>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        end: Option<DateTime<Utc>>,
    },
    Lot {
        start: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        end: Option<String>,
    },
}

impl EffectivityRange {
    pub fn type_name(&self) -> &'static str {
        match self {
            EffectivityRange::SerialNumber { .. } => "serial_number",
            EffectivityRange::Date { .. } => "date",
            EffectivityRange::Lot { .. } => "lot",
        }
    }
}

/// Validity range attached to a revision
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Effectivity {
    pub id: i64,

    pub name: String,

    /// Restricts the effectivity to one configuration item
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<ConfigurationItemKey>,

    pub range: EffectivityRange,
}

/// The unit, date or lot an effectivity is checked against
#[derive(Debug, Clone, Default)]
pub struct Applicability<'a> {
    pub ci: Option<&'a ConfigurationItemKey>,
    pub serial_number: Option<&'a str>,
    pub date: Option<DateTime<Utc>>,
    pub lot: Option<&'a str>,
}

/// Compare identifiers numerically when both are numbers, otherwise by
/// length then lexically, so `SN-9 < SN-10`
fn compare_identifiers(a: &str, b: &str) -> Ordering {
    match (a.parse::<u64>(), b.parse::<u64>()) {
        (Ok(x), Ok(y)) => x.cmp(&y),
        _ => a.len().cmp(&b.len()).then_with(|| a.cmp(b)),
    }
}

fn within_identifiers(value: &str, start: &str, end: Option<&str>) -> bool {
    compare_identifiers(value, start) != Ordering::Less
        && end.map_or(true, |end| compare_identifiers(value, end) != Ordering::Greater)
}

impl Effectivity {
    /// Whether this effectivity admits the given unit, date or lot
    ///
    /// A scoped effectivity never applies to another configuration item.
    /// A range whose dimension is absent from `target` does not apply.
    pub fn applies_to(&self, target: &Applicability<'_>) -> bool {
        if let (Some(scope), Some(ci)) = (&self.scope, target.ci) {
            if scope != ci {
                return false;
            }
        }

        match &self.range {
            EffectivityRange::SerialNumber { start, end } => target
                .serial_number
                .is_some_and(|sn| within_identifiers(sn, start, end.as_deref())),
            EffectivityRange::Lot { start, end } => target
                .lot
                .is_some_and(|lot| within_identifiers(lot, start, end.as_deref())),
            EffectivityRange::Date { start, end } => target
                .date
                .is_some_and(|d| d >= *start && end.map_or(true, |end| d <= end)),
        }
    }
}
