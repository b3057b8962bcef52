//! Iteration content - attached files, attributes and document links

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::identity::RevisionKey;

/// Reference to file content held by the blob store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BinaryResource {
    /// Deterministic vault name, e.g. `ws/parts/P-1/A/2/model.step`
    pub full_name: String,

    /// Content length in bytes
    pub length: u64,

    pub last_modified: DateTime<Utc>,
}

impl BinaryResource {
    /// The bare file name, the last segment of the full name
    pub fn file_name(&self) -> &str {
        self.full_name.rsplit('/').next().unwrap_or(&self.full_name)
    }
}

/// Typed attribute value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
pub enum AttributeValue {
    Text(String),
    Number(f64),
    Boolean(bool),
    Date(DateTime<Utc>),
    Url(String),
}

impl AttributeValue {
    pub fn type_name(&self) -> &'static str {
        match self {
            AttributeValue::Text(_) => "text",
            AttributeValue::Number(_) => "number",
            AttributeValue::Boolean(_) => "boolean",
            AttributeValue::Date(_) => "date",
            AttributeValue::Url(_) => "url",
        }
    }
}

impl std::fmt::Display for AttributeValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AttributeValue::Text(s) | AttributeValue::Url(s) => write!(f, "{}", s),
            AttributeValue::Number(n) => write!(f, "{}", n),
            AttributeValue::Boolean(b) => write!(f, "{}", b),
            AttributeValue::Date(d) => write!(f, "{}", d.to_rfc3339()),
        }
    }
}

/// Named attribute on an iteration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstanceAttribute {
    pub name: String,
    pub value: AttributeValue,
}

impl InstanceAttribute {
    pub fn new(name: impl Into<String>, value: AttributeValue) -> Self {
        Self {
            name: name.into(),
            value,
        }
    }
}

/// Outgoing link from an iteration to a document revision
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentLink {
    pub target: RevisionKey,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_name() {
        let file = BinaryResource {
            full_name: "ws/parts/P-1/A/1/model.step".to_string(),
            length: 10,
            last_modified: Utc::now(),
        };
        assert_eq!(file.file_name(), "model.step");
    }

    #[test]
    fn test_attribute_value_json_shape() {
        let attr = InstanceAttribute::new("mass", AttributeValue::Number(1.5));
        let json = serde_json::to_string(&attr).unwrap();
        assert_eq!(json, r#"{"name":"mass","value":{"type":"number","value":1.5}}"#);
        let back: InstanceAttribute = serde_json::from_str(&json).unwrap();
        assert_eq!(back, attr);
    }
}
