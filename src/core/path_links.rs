//! Path-to-path link graph and its upgrade algorithm
//!
//! Paths embed link full ids, so any edit that gives a structure slot a new
//! link id invalidates every path running through it. The upgrade batch
//! rewrites affected links in two phases: a batch-scoped map from each
//! original link to its pending clone is folded over every `(old, new)` id
//! pair, then each distinct clone is attached to its owner exactly once.
//! Originals are kept, so baselines and checked-in structures still resolve.

use std::collections::BTreeMap;

use rusqlite::Connection;
use serde::Serialize;
use tracing::{debug, info};

use crate::core::collaborators::{Action, Event};
use crate::core::error::{Denial, EntityKind, PlmError, Result};
use crate::core::identity::ConfigurationItemKey;
use crate::core::manager::ProductManager;
use crate::core::path;
use crate::core::store::{self, path_links as links};
use crate::core::structure::{self, PartFilter};
use crate::entities::configuration::PathToPathLink;
use crate::entities::part::PartUsageLink;

/// Outcome of one upgrade batch
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct UpgradeReport {
    /// Clones attached by this batch
    pub created: Vec<PathToPathLink>,

    /// Clones that already existed and were left alone
    pub existing: Vec<PathToPathLink>,
}

impl UpgradeReport {
    pub fn is_empty(&self) -> bool {
        self.created.is_empty() && self.existing.is_empty()
    }
}

/// State of one original link within a batch
#[derive(Debug, Clone)]
enum UpgradeEntry {
    /// Clone being rewritten, not yet attached
    Pending {
        owner: ConfigurationItemKey,
        clone: PathToPathLink,
    },
    /// Clone attached to its owner, or found already there
    Resolved { link: PathToPathLink, created: bool },
}

impl UpgradeEntry {
    fn rewrite(&mut self, old_id: &str, new_id: &str) {
        if let UpgradeEntry::Pending { clone, .. } = self {
            clone.source_path = path::upgrade_path(&clone.source_path, old_id, new_id);
            clone.target_path = path::upgrade_path(&clone.target_path, old_id, new_id);
        }
    }

    /// Attach a pending clone unless an identical link already exists
    fn commit(&mut self, conn: &Connection) -> Result<()> {
        let UpgradeEntry::Pending { owner, clone } = self else {
            return Ok(());
        };
        let resolved = match links::find_exact(
            conn,
            owner,
            &clone.link_type,
            &clone.source_path,
            &clone.target_path,
        )? {
            Some(link) => UpgradeEntry::Resolved {
                link,
                created: false,
            },
            None => UpgradeEntry::Resolved {
                link: links::insert(
                    conn,
                    owner,
                    &clone.link_type,
                    &clone.source_path,
                    &clone.target_path,
                    clone.description.as_deref(),
                )?,
                created: true,
            },
        };
        *self = resolved;
        Ok(())
    }
}

/// `(old full id, new full id)` pairs for a batch of replaced usage links,
/// substitutes included
///
/// Substitutes are matched by substitute master id and occurrence order
/// among equal masters, never by list position, so reordering substitutes
/// on the new link keeps every path on the right alternate.
pub fn id_pairs(old: &[PartUsageLink], new: &[PartUsageLink]) -> Result<Vec<(String, String)>> {
    if old.len() != new.len() {
        return Err(PlmError::not_allowed(
            "path-to-path upgrade",
            Denial::MismatchedBatch {
                old: old.len(),
                new: new.len(),
            },
        ));
    }

    let mut pairs = Vec::new();
    for (old_link, new_link) in old.iter().zip(new) {
        pairs.push((old_link.full_id(), new_link.full_id()));

        let mut occurrences: BTreeMap<&str, usize> = BTreeMap::new();
        for old_sub in &old_link.substitutes {
            let seen = occurrences.entry(old_sub.substitute.as_str()).or_insert(0);
            let matching = new_link
                .substitutes
                .iter()
                .filter(|s| s.substitute == old_sub.substitute)
                .nth(*seen);
            *seen += 1;
            if let Some(new_sub) = matching {
                pairs.push((old_sub.full_id(), new_sub.full_id()));
            }
        }
    }
    Ok(pairs)
}

/// Clone and rewrite every link of `workspace` touched by `pairs`
pub(crate) fn upgrade_batch(
    conn: &Connection,
    workspace: &str,
    pairs: &[(String, String)],
) -> Result<UpgradeReport> {
    // Keyed by original link id: a link crossed by several pairs is
    // rewritten once per pair but cloned only once
    let mut batch: BTreeMap<i64, UpgradeEntry> = BTreeMap::new();

    for (old_id, new_id) in pairs {
        for (owner, original) in links::containing_segment(conn, workspace, old_id)? {
            batch
                .entry(original.id)
                .or_insert_with(|| UpgradeEntry::Pending {
                    owner,
                    clone: original,
                })
                .rewrite(old_id, new_id);
        }
    }

    for entry in batch.values_mut() {
        entry.commit(conn)?;
    }

    let mut report = UpgradeReport::default();
    for (original, entry) in batch {
        if let UpgradeEntry::Resolved { link, created } = entry {
            if created {
                debug!(original, clone = link.id, "path-to-path link upgraded");
                report.created.push(link);
            } else {
                report.existing.push(link);
            }
        }
    }
    Ok(report)
}

/// Upgrade links after usage links were replaced, as one batch
pub(crate) fn upgrade_for_replaced(
    conn: &Connection,
    workspace: &str,
    old: &[PartUsageLink],
    new: &[PartUsageLink],
) -> Result<UpgradeReport> {
    let pairs = id_pairs(old, new)?;
    if pairs.is_empty() {
        return Ok(UpgradeReport::default());
    }
    upgrade_batch(conn, workspace, &pairs)
}

/// Detach every link of `workspace` whose paths contain `full_id`
pub(crate) fn remove_path_to_path_links(
    conn: &Connection,
    workspace: &str,
    full_id: &str,
) -> Result<usize> {
    let affected = links::containing_segment(conn, workspace, full_id)?;
    for (_, link) in &affected {
        links::delete(conn, link.id)?;
    }
    if !affected.is_empty() {
        debug!(full_id, removed = affected.len(), "path-to-path links detached");
    }
    Ok(affected.len())
}

/// Full ids of a set of usage links and all their substitutes
pub(crate) fn link_full_ids(components: &[PartUsageLink]) -> Vec<String> {
    components
        .iter()
        .flat_map(|link| {
            std::iter::once(link.full_id()).chain(link.substitutes.iter().map(|s| s.full_id()))
        })
        .collect()
}

pub(crate) fn validate_link_paths(source: &str, target: &str) -> Result<()> {
    for p in [source, target] {
        if p.is_empty() {
            return Err(PlmError::InvalidPath {
                path: p.to_string(),
                reason: "path is empty".to_string(),
            });
        }
        path::parse(p)?;
    }
    if source == target {
        return Err(PlmError::not_allowed(
            format!("[{}]", source),
            Denial::SamePath,
        ));
    }
    Ok(())
}

impl ProductManager {
    /// Create a typed link between two paths of a configuration item
    ///
    /// Both paths must decode against the structure as seen by `user`.
    pub fn create_path_to_path_link(
        &self,
        ci: &ConfigurationItemKey,
        user: &str,
        link_type: &str,
        source_path: &str,
        target_path: &str,
        description: Option<&str>,
    ) -> Result<PathToPathLink> {
        self.authorize(user, Action::ManagePathLinks, ci)?;
        validate_link_paths(source_path, target_path)?;

        let link = self.transact(|tx, _| {
            let item = store::structure::get_configuration_item(tx, ci)?;
            let filter = PartFilter::Latest {
                user: user.to_string(),
            };
            structure::decode_in(tx, &item, source_path, &filter)?;
            structure::decode_in(tx, &item, target_path, &filter)?;

            if links::find_exact(tx, ci, link_type, source_path, target_path)?.is_some() {
                return Err(PlmError::already_exists(
                    EntityKind::PathToPathLink,
                    links::describe(link_type, source_path, target_path),
                ));
            }
            links::insert(tx, ci, link_type, source_path, target_path, description)
        })?;

        info!(ci = %ci, link = link.id, link_type, "path-to-path link created");
        Ok(link)
    }

    pub fn get_path_to_path_link(
        &self,
        ci: &ConfigurationItemKey,
        id: i64,
    ) -> Result<PathToPathLink> {
        self.query(|tx| links::get(tx, ci, id))
    }

    pub fn list_path_to_path_links(&self, ci: &ConfigurationItemKey) -> Result<Vec<PathToPathLink>> {
        self.query(|tx| {
            store::structure::get_configuration_item(tx, ci)?;
            links::list(tx, ci)
        })
    }

    pub fn list_path_to_path_links_by_type(
        &self,
        ci: &ConfigurationItemKey,
        link_type: &str,
    ) -> Result<Vec<PathToPathLink>> {
        self.query(|tx| links::list_by_type(tx, ci, link_type))
    }

    /// Links of any type from `source_path` to `target_path`
    pub fn find_path_to_path_links(
        &self,
        ci: &ConfigurationItemKey,
        source_path: &str,
        target_path: &str,
    ) -> Result<Vec<PathToPathLink>> {
        self.query(|tx| links::list_between(tx, ci, source_path, target_path))
    }

    /// Distinct link types used in a configuration item
    pub fn path_to_path_link_types(&self, ci: &ConfigurationItemKey) -> Result<Vec<String>> {
        self.query(|tx| links::list_types(tx, ci))
    }

    pub fn update_path_to_path_link_description(
        &self,
        ci: &ConfigurationItemKey,
        user: &str,
        id: i64,
        description: Option<&str>,
    ) -> Result<PathToPathLink> {
        self.authorize(user, Action::ManagePathLinks, ci)?;
        self.transact(|tx, _| {
            links::get(tx, ci, id)?;
            links::update_description(tx, id, description)?;
            links::get(tx, ci, id)
        })
    }

    pub fn delete_path_to_path_link(
        &self,
        ci: &ConfigurationItemKey,
        user: &str,
        id: i64,
    ) -> Result<()> {
        self.authorize(user, Action::ManagePathLinks, ci)?;
        self.transact(|tx, _| {
            links::get(tx, ci, id)?;
            links::delete(tx, id)
        })?;
        info!(ci = %ci, link = id, "path-to-path link deleted");
        Ok(())
    }

    /// Rewrite the links of a workspace after `old` usage links were
    /// replaced by `new` ones, pairwise, as a single all-or-nothing batch
    ///
    /// Running the same batch again creates nothing new.
    pub fn upgrade_links_for_part_change(
        &self,
        workspace: &str,
        user: &str,
        old: &[PartUsageLink],
        new: &[PartUsageLink],
    ) -> Result<UpgradeReport> {
        self.authorize(user, Action::ManagePathLinks, workspace)?;
        let report = self.transact(|tx, outbox| {
            let report = upgrade_for_replaced(tx, workspace, old, new)?;
            if !report.created.is_empty() {
                outbox.emit(Event::PathLinksUpgraded {
                    workspace: workspace.to_string(),
                    cloned: report.created.len(),
                });
            }
            Ok(report)
        })?;
        info!(
            workspace,
            created = report.created.len(),
            existing = report.existing.len(),
            "path-to-path upgrade batch committed"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::part::SubstituteLink;

    fn sub(id: i64, master: &str) -> SubstituteLink {
        SubstituteLink {
            id,
            substitute: master.to_string(),
            amount: 1.0,
            unit: None,
            reference_description: None,
        }
    }

    fn usage(id: i64, subs: Vec<SubstituteLink>) -> PartUsageLink {
        PartUsageLink {
            id,
            component: "WHEEL".to_string(),
            amount: 1.0,
            unit: None,
            optional: false,
            reference_description: None,
            substitutes: subs,
        }
    }

    #[test]
    fn test_substitutes_paired_by_master_not_position() {
        let old = vec![usage(1, vec![sub(10, "XL"), sub(11, "XS")])];
        let new = vec![usage(5, vec![sub(20, "XS"), sub(21, "XL")])];

        let pairs = id_pairs(&old, &new).unwrap();
        assert_eq!(
            pairs,
            vec![
                ("u1".to_string(), "u5".to_string()),
                ("s10".to_string(), "s21".to_string()),
                ("s11".to_string(), "s20".to_string()),
            ]
        );
    }

    #[test]
    fn test_repeated_substitute_masters_follow_occurrence_order() {
        let old = vec![usage(1, vec![sub(10, "XL"), sub(11, "XL"), sub(12, "GONE")])];
        let new = vec![usage(2, vec![sub(30, "XL"), sub(31, "XL")])];

        let pairs = id_pairs(&old, &new).unwrap();
        assert_eq!(
            pairs,
            vec![
                ("u1".to_string(), "u2".to_string()),
                ("s10".to_string(), "s30".to_string()),
                ("s11".to_string(), "s31".to_string()),
            ]
        );
    }

    #[test]
    fn test_mismatched_batch_is_rejected() {
        let err = id_pairs(&[usage(1, vec![])], &[]).unwrap_err();
        assert_eq!(
            err.denial(),
            Some(&Denial::MismatchedBatch { old: 1, new: 0 })
        );
    }

    #[test]
    fn test_link_full_ids() {
        let ids = link_full_ids(&[usage(1, vec![sub(4, "XL")]), usage(2, vec![])]);
        assert_eq!(ids, vec!["u1", "s4", "u2"]);
    }

    #[test]
    fn test_validate_link_paths() {
        assert!(validate_link_paths("u1", "u2").is_ok());
        assert!(matches!(
            validate_link_paths("", "u2"),
            Err(PlmError::InvalidPath { .. })
        ));
        assert!(matches!(
            validate_link_paths("u1-x", "u2"),
            Err(PlmError::InvalidPath { .. })
        ));
        let err = validate_link_paths("u1", "u1").unwrap_err();
        assert_eq!(err.denial(), Some(&Denial::SamePath));
    }
}
