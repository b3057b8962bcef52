//! Master, Revision and Iteration - the versioned core of documents and parts

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::entity::{CheckoutState, Iterated, RevisionStatus};
use crate::core::identity::{IterationKey, MasterKey, RevisionKey};
use crate::entities::content::{BinaryResource, DocumentLink, InstanceAttribute};
use crate::entities::part::PartUsageLink;

/// Stable identity of a document or part
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Master {
    pub key: MasterKey,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    pub author: String,

    pub created: DateTime<Utc>,
}

/// Who moved a revision to a status, and when
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusChange {
    pub by: String,
    pub at: DateTime<Utc>,
}

/// One immutable snapshot within a revision, mutable only while it is the
/// working copy (no check-in date yet)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Iteration {
    pub key: IterationKey,

    pub author: String,

    pub created: DateTime<Utc>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checkin_date: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub files: Vec<BinaryResource>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attributes: Vec<InstanceAttribute>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub document_links: Vec<DocumentLink>,

    /// Usage links of a part iteration; always empty for documents
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub components: Vec<PartUsageLink>,
}

impl Iteration {
    pub fn is_checked_in(&self) -> bool {
        self.checkin_date.is_some()
    }

    pub fn number(&self) -> u32 {
        self.key.iteration
    }

    /// Fresh working copy carrying this iteration's content
    ///
    /// Files are renamed into the new iteration's vault folder; component ids
    /// are placeholders until the store assigns new ones.
    pub fn next_working_copy(&self, key: IterationKey, author: &str, now: DateTime<Utc>) -> Self {
        let files = self
            .files
            .iter()
            .map(|file| BinaryResource {
                full_name: key.vault_path(file.file_name()),
                length: file.length,
                last_modified: now,
            })
            .collect();

        Self {
            key,
            author: author.to_string(),
            created: now,
            checkin_date: None,
            note: None,
            files,
            attributes: self.attributes.clone(),
            document_links: self.document_links.clone(),
            components: self.components.clone(),
        }
    }

    pub fn attribute(&self, name: &str) -> Option<&InstanceAttribute> {
        self.attributes.iter().find(|a| a.name == name)
    }
}

/// One formal version line of a master
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Revision {
    pub key: RevisionKey,

    pub status: RevisionStatus,

    pub checkout: CheckoutState,

    pub author: String,

    pub created: DateTime<Utc>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub released: Option<StatusChange>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub obsoleted: Option<StatusChange>,

    /// Iterations in order, numbered 1..=N
    pub iterations: Vec<Iteration>,
}

impl Revision {
    pub fn last_iteration(&self) -> Option<&Iteration> {
        self.iterations.last()
    }

    /// Latest iteration with a check-in date
    pub fn last_checked_in(&self) -> Option<&Iteration> {
        self.iterations.iter().rev().find(|i| i.is_checked_in())
    }

    /// The trailing iteration when it has not been checked in yet
    pub fn working_copy(&self) -> Option<&Iteration> {
        self.iterations.last().filter(|i| !i.is_checked_in())
    }

    pub fn iteration(&self, number: u32) -> Option<&Iteration> {
        number
            .checked_sub(1)
            .and_then(|idx| self.iterations.get(idx as usize))
    }

    pub fn is_checked_out(&self) -> bool {
        !self.checkout.is_free()
    }
}

impl Iterated for Revision {
    fn display_key(&self) -> String {
        self.key.to_string()
    }

    fn checkout(&self) -> &CheckoutState {
        &self.checkout
    }

    fn last_iteration_number(&self) -> u32 {
        self.last_iteration().map(Iteration::number).unwrap_or(0)
    }

    fn last_iteration_checked_in(&self) -> bool {
        self.last_iteration().is_some_and(Iteration::is_checked_in)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::identity::MasterKey;

    fn iteration(n: u32, checked_in: bool) -> Iteration {
        Iteration {
            key: MasterKey::part("ws", "P-1").revision("A").iteration(n),
            author: "alice".to_string(),
            created: Utc::now(),
            checkin_date: checked_in.then(Utc::now),
            note: None,
            files: vec![BinaryResource {
                full_name: MasterKey::part("ws", "P-1")
                    .revision("A")
                    .iteration(n)
                    .vault_path("model.step"),
                length: 42,
                last_modified: Utc::now(),
            }],
            attributes: Vec::new(),
            document_links: Vec::new(),
            components: Vec::new(),
        }
    }

    #[test]
    fn test_working_copy_and_last_checked_in() {
        let revision = Revision {
            key: MasterKey::part("ws", "P-1").revision("A"),
            status: RevisionStatus::Wip,
            checkout: CheckoutState::Free,
            author: "alice".to_string(),
            created: Utc::now(),
            released: None,
            obsoleted: None,
            iterations: vec![iteration(1, true), iteration(2, false)],
        };

        assert_eq!(revision.working_copy().map(Iteration::number), Some(2));
        assert_eq!(revision.last_checked_in().map(Iteration::number), Some(1));
        assert_eq!(revision.iteration(1).map(Iteration::number), Some(1));
        assert!(revision.iteration(0).is_none());
        assert_eq!(revision.last_iteration_number(), 2);
        assert!(!revision.last_iteration_checked_in());
    }

    #[test]
    fn test_next_working_copy_renames_files() {
        let first = iteration(1, true);
        let key = first.key.revision.iteration(2);
        let next = first.next_working_copy(key, "bob", Utc::now());

        assert_eq!(next.author, "bob");
        assert!(next.checkin_date.is_none());
        assert_eq!(next.files[0].full_name, "ws/parts/P-1/A/2/model.step");
        assert_eq!(next.files[0].length, 42);
    }
}
