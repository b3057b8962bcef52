//! Identity layer - stable keys for masters, revisions, iterations and links
//!
//! Masters are named by `(workspace, kind, id)`. Revisions add a version
//! string (`A`, `B`, ... `Z`, `AA`, ...), iterations add a sequence number.
//! Usage and substitute links get store-assigned numeric ids rendered as
//! full ids (`u12`, `s7`) which form the segments of structure paths.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised when parsing identifiers
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IdParseError {
    #[error("Invalid master kind: '{0}'. Use 'document' or 'part'")]
    InvalidKind(String),

    #[error("Invalid version '{0}': expected uppercase letters (A, B, ..., AA)")]
    InvalidVersion(String),

    #[error("Invalid link id '{0}': expected u<number> or s<number>")]
    InvalidLinkId(String),
}

/// Whether a master names a document or a part
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MasterKind {
    Document,
    Part,
}

impl MasterKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MasterKind::Document => "document",
            MasterKind::Part => "part",
        }
    }

    /// Directory name used for vault file names
    pub fn vault_dir(&self) -> &'static str {
        match self {
            MasterKind::Document => "documents",
            MasterKind::Part => "parts",
        }
    }
}

impl std::fmt::Display for MasterKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for MasterKind {
    type Err = IdParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "document" => Ok(MasterKind::Document),
            "part" => Ok(MasterKind::Part),
            _ => Err(IdParseError::InvalidKind(s.to_string())),
        }
    }
}

/// Stable identity of a document or part
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MasterKey {
    pub workspace: String,
    pub kind: MasterKind,
    pub id: String,
}

impl MasterKey {
    pub fn new(workspace: impl Into<String>, kind: MasterKind, id: impl Into<String>) -> Self {
        Self {
            workspace: workspace.into(),
            kind,
            id: id.into(),
        }
    }

    pub fn part(workspace: impl Into<String>, id: impl Into<String>) -> Self {
        Self::new(workspace, MasterKind::Part, id)
    }

    pub fn document(workspace: impl Into<String>, id: impl Into<String>) -> Self {
        Self::new(workspace, MasterKind::Document, id)
    }

    /// Key of one revision of this master
    pub fn revision(&self, version: impl Into<String>) -> RevisionKey {
        RevisionKey {
            master: self.clone(),
            version: version.into(),
        }
    }
}

impl std::fmt::Display for MasterKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}/{}", self.workspace, self.kind, self.id)
    }
}

/// One version line of a master
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RevisionKey {
    pub master: MasterKey,
    pub version: String,
}

impl RevisionKey {
    pub fn iteration(&self, iteration: u32) -> IterationKey {
        IterationKey {
            revision: self.clone(),
            iteration,
        }
    }

    pub fn workspace(&self) -> &str {
        &self.master.workspace
    }
}

impl std::fmt::Display for RevisionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}-{}", self.master, self.version)
    }
}

/// One snapshot within a revision
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct IterationKey {
    pub revision: RevisionKey,
    pub iteration: u32,
}

impl IterationKey {
    /// Deterministic blob name of a file attached to this iteration
    pub fn vault_path(&self, file_name: &str) -> String {
        let master = &self.revision.master;
        format!(
            "{}/{}/{}/{}/{}/{}",
            master.workspace,
            master.kind.vault_dir(),
            master.id,
            self.revision.version,
            self.iteration,
            file_name
        )
    }

    pub fn master(&self) -> &MasterKey {
        &self.revision.master
    }
}

impl std::fmt::Display for IterationKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.revision, self.iteration)
    }
}

/// Root of one product structure
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ConfigurationItemKey {
    pub workspace: String,
    pub id: String,
}

impl ConfigurationItemKey {
    pub fn new(workspace: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            workspace: workspace.into(),
            id: id.into(),
        }
    }
}

impl std::fmt::Display for ConfigurationItemKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.workspace, self.id)
    }
}

/// One serialized physical unit built from a configuration item
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ProductInstanceKey {
    pub ci: ConfigurationItemKey,
    pub serial_number: String,
}

impl ProductInstanceKey {
    pub fn new(ci: ConfigurationItemKey, serial_number: impl Into<String>) -> Self {
        Self {
            ci,
            serial_number: serial_number.into(),
        }
    }

    /// Deterministic blob name of a file attached to one instance iteration
    pub fn vault_path(&self, iteration: u32, file_name: &str) -> String {
        format!(
            "{}/product-instances/{}/{}/{}/{}",
            self.ci.workspace, self.ci.id, self.serial_number, iteration, file_name
        )
    }
}

impl std::fmt::Display for ProductInstanceKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}#{}", self.ci, self.serial_number)
    }
}

/// Store-assigned identity of a structure edge
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum LinkId {
    Usage(i64),
    Substitute(i64),
}

impl LinkId {
    /// Path segment form, e.g. `u12` or `s7`
    pub fn full_id(&self) -> String {
        self.to_string()
    }
}

impl std::fmt::Display for LinkId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LinkId::Usage(id) => write!(f, "u{}", id),
            LinkId::Substitute(id) => write!(f, "s{}", id),
        }
    }
}

impl std::str::FromStr for LinkId {
    type Err = IdParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || IdParseError::InvalidLinkId(s.to_string());
        let (tag, digits) = match (s.get(..1), s.get(1..)) {
            (Some(tag), Some(digits)) => (tag, digits),
            _ => return Err(invalid()),
        };
        if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return Err(invalid());
        }
        let id: i64 = digits.parse().map_err(|_| invalid())?;
        match tag {
            "u" => Ok(LinkId::Usage(id)),
            "s" => Ok(LinkId::Substitute(id)),
            _ => Err(invalid()),
        }
    }
}

/// The first revision name of every master
pub const FIRST_VERSION: &str = "A";

/// Check that a version string is a non-empty run of uppercase ASCII letters
pub fn validate_version(version: &str) -> Result<(), IdParseError> {
    if version.is_empty() || !version.bytes().all(|b| b.is_ascii_uppercase()) {
        return Err(IdParseError::InvalidVersion(version.to_string()));
    }
    Ok(())
}

/// Successor of a revision name: `A -> B`, `Z -> AA`, `AZ -> BA`, `ZZ -> AAA`
pub fn next_version(version: &str) -> Result<String, IdParseError> {
    validate_version(version)?;

    let mut letters: Vec<u8> = version.bytes().collect();
    let mut idx = letters.len();
    loop {
        if idx == 0 {
            letters.insert(0, b'A');
            break;
        }
        idx -= 1;
        if letters[idx] == b'Z' {
            letters[idx] = b'A';
        } else {
            letters[idx] += 1;
            break;
        }
    }

    Ok(String::from_utf8_lossy(&letters).into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_next_version() {
        assert_eq!(next_version("A").unwrap(), "B");
        assert_eq!(next_version("Y").unwrap(), "Z");
        assert_eq!(next_version("Z").unwrap(), "AA");
        assert_eq!(next_version("AZ").unwrap(), "BA");
        assert_eq!(next_version("ZZ").unwrap(), "AAA");
    }

    #[test]
    fn test_next_version_rejects_garbage() {
        assert!(next_version("").is_err());
        assert!(next_version("a").is_err());
        assert!(next_version("A1").is_err());
    }

    #[test]
    fn test_link_id_parse() {
        assert_eq!("u12".parse::<LinkId>().unwrap(), LinkId::Usage(12));
        assert_eq!("s7".parse::<LinkId>().unwrap(), LinkId::Substitute(7));
        assert!("x7".parse::<LinkId>().is_err());
        assert!("u".parse::<LinkId>().is_err());
        assert!("u-3".parse::<LinkId>().is_err());
        assert!("".parse::<LinkId>().is_err());
        assert_eq!(LinkId::Usage(5).full_id(), "u5");
    }

    #[test]
    fn test_vault_paths() {
        let key = MasterKey::part("ws", "P-100").revision("B").iteration(3);
        assert_eq!(key.vault_path("model.step"), "ws/parts/P-100/B/3/model.step");

        let doc = MasterKey::document("ws", "D-1").revision("A").iteration(1);
        assert_eq!(doc.vault_path("spec.pdf"), "ws/documents/D-1/A/1/spec.pdf");

        let instance = ProductInstanceKey::new(ConfigurationItemKey::new("ws", "BIKE"), "SN-001");
        assert_eq!(
            instance.vault_path(2, "report.pdf"),
            "ws/product-instances/BIKE/SN-001/2/report.pdf"
        );
    }

    #[test]
    fn test_key_display() {
        let key = MasterKey::part("ws", "P-100").revision("A").iteration(1);
        assert_eq!(key.to_string(), "ws/part/P-100-A/1");
        assert_eq!("Part".parse::<MasterKind>().unwrap(), MasterKind::Part);
    }
}
