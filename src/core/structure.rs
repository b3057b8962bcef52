//! Structure graph - part usage trees rooted at configuration items
//!
//! A part master can sit at several places in one tree, so nodes are
//! addressed by path: the chain of usage (or chosen substitute) link ids
//! from the root. Which iteration of each part a walk sees is decided by a
//! [`PartFilter`].

use std::collections::{BTreeMap, BTreeSet};

use rusqlite::Connection;
use serde::Serialize;
use tracing::{debug, info};

use crate::core::collaborators::Action;
use crate::core::entity::RevisionStatus;
use crate::core::error::{Denial, EntityKind, PlmError, Result};
use crate::core::identity::{
    ConfigurationItemKey, IterationKey, LinkId, MasterKey, MasterKind, RevisionKey,
};
use crate::core::lifecycle::working_copy;
use crate::core::manager::ProductManager;
use crate::core::path;
use crate::core::path_links::{
    link_full_ids, remove_path_to_path_links, upgrade_for_replaced, UpgradeReport,
};
use crate::core::store::{masters, structure as links};
use crate::entities::baseline::SelectionPolicy;
use crate::entities::configuration::ConfigurationItem;
use crate::entities::part::{PartUsageLink, SubstituteLink, SubstituteSpec, UsageLinkSpec};

// =========================================================================
// Part filters
// =========================================================================

/// Rule choosing one iteration per part master during a walk
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "filter", rename_all = "snake_case")]
pub enum PartFilter {
    /// Last checked-in iteration of the newest revision that has one
    LatestCheckedIn,

    /// Like `LatestCheckedIn`, except the holder of a checkout sees the
    /// working copy
    Latest { user: String },

    /// Last iteration of the newest released revision
    Released,

    /// Iterations pinned by a baseline or product instance, keyed by master id
    Pinned(BTreeMap<String, IterationKey>),

    /// Pinned iterations, falling back to `LatestCheckedIn` for unpinned parts
    PinnedOrLatestCheckedIn(BTreeMap<String, IterationKey>),
}

impl PartFilter {
    /// Pick the iteration of `master` this filter sees, with its row id
    pub(crate) fn pick(&self, conn: &Connection, master: &MasterKey) -> Result<(i64, IterationKey)> {
        match self {
            PartFilter::LatestCheckedIn => latest_checked_in(conn, master),
            PartFilter::Latest { user } => {
                let latest = masters::latest_revision(conn, master)?
                    .ok_or_else(|| PlmError::not_found(EntityKind::Master, master))?;
                if latest.checkout.is_held_by(user) {
                    if let Some(last) = masters::last_iteration_row(conn, latest.rid)? {
                        return Ok((last.iid, latest.key.iteration(last.number)));
                    }
                }
                latest_checked_in(conn, master)
            }
            PartFilter::Released => {
                for revision in masters::revisions_of(conn, master)?.into_iter().rev() {
                    if revision.status != RevisionStatus::Released {
                        continue;
                    }
                    if let Some(last) = masters::last_iteration_row(conn, revision.rid)? {
                        return Ok((last.iid, revision.key.iteration(last.number)));
                    }
                }
                Err(PlmError::not_found(
                    EntityKind::Iteration,
                    format!("released iteration of {}", master),
                ))
            }
            PartFilter::Pinned(pins) => match pins.get(&master.id) {
                Some(key) => pinned(conn, key),
                None => Err(PlmError::not_found(
                    EntityKind::Iteration,
                    format!("pinned iteration of {}", master),
                )),
            },
            PartFilter::PinnedOrLatestCheckedIn(pins) => match pins.get(&master.id) {
                Some(key) => pinned(conn, key),
                None => latest_checked_in(conn, master),
            },
        }
    }
}

fn latest_checked_in(conn: &Connection, master: &MasterKey) -> Result<(i64, IterationKey)> {
    let revisions = masters::revisions_of(conn, master)?;
    if revisions.is_empty() {
        return Err(PlmError::not_found(EntityKind::Master, master));
    }
    for revision in revisions.into_iter().rev() {
        let rows = masters::iteration_rows(conn, revision.rid)?;
        if let Some(row) = rows.into_iter().rev().find(|r| r.is_checked_in()) {
            return Ok((row.iid, revision.key.iteration(row.number)));
        }
    }
    Err(PlmError::not_found(
        EntityKind::Iteration,
        format!("checked-in iteration of {}", master),
    ))
}

fn pinned(conn: &Connection, key: &IterationKey) -> Result<(i64, IterationKey)> {
    let row = masters::get_revision_row(conn, &key.revision)?;
    let iid = masters::iteration_id(conn, row.rid, key)?;
    Ok((iid, key.clone()))
}

// =========================================================================
// Resolved structures
// =========================================================================

/// One node of a resolved tree
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StructureNode {
    /// Address of the node, empty for the root
    pub path: String,

    pub depth: usize,

    /// Iteration of the part placed here
    pub part: IterationKey,

    /// Last link of the path, `None` for the root
    pub link: Option<LinkId>,

    /// Reached through an optional usage link
    pub optional: bool,

    /// Reached through a selected substitute instead of the default component
    pub substituted: bool,
}

/// A configuration item's tree as seen through one filter and selection
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResolvedStructure {
    pub ci: ConfigurationItemKey,

    /// Nodes in depth-first order, root first
    pub nodes: Vec<StructureNode>,

    /// Selected substitute paths that were applied
    pub applied_substitutes: BTreeSet<String>,

    /// Optional usage paths kept in the tree
    pub retained_optionals: BTreeSet<String>,

    /// Optional usage paths left out, with their subtrees
    pub excluded_optionals: Vec<String>,
}

impl ResolvedStructure {
    pub fn root(&self) -> Option<&StructureNode> {
        self.nodes.first()
    }

    pub fn node(&self, path: &str) -> Option<&StructureNode> {
        self.nodes.iter().find(|n| n.path == path)
    }

    pub fn contains_path(&self, path: &str) -> bool {
        self.node(path).is_some()
    }

    /// Every reached part, keyed by master id
    pub fn parts(&self) -> BTreeMap<String, IterationKey> {
        self.nodes
            .iter()
            .map(|n| (n.part.master().id.clone(), n.part.clone()))
            .collect()
    }

    /// The deviations from the default tree that produced this structure
    pub fn selection(&self) -> SelectionPolicy {
        SelectionPolicy {
            substitute_paths: self.applied_substitutes.clone(),
            optional_paths: self.retained_optionals.clone(),
        }
    }
}

/// Depth-first walk state
struct Walk<'a> {
    conn: &'a Connection,
    workspace: &'a str,
    filter: &'a PartFilter,
    selection: &'a SelectionPolicy,
    nodes: Vec<StructureNode>,
    applied: BTreeSet<String>,
    retained: BTreeSet<String>,
    excluded: Vec<String>,
    offered_substitutes: BTreeSet<String>,
    offered_optionals: BTreeSet<String>,
    ancestors: Vec<String>,
}

impl Walk<'_> {
    fn visit(&mut self, iid: i64, parent_path: &str, depth: usize) -> Result<()> {
        for usage in links::load_components(self.conn, iid)? {
            let usage_path = path::child(parent_path, &usage.full_id());

            let mut chosen: Option<(&SubstituteLink, String)> = None;
            for sub in &usage.substitutes {
                let sub_path = path::child(parent_path, &sub.full_id());
                self.offered_substitutes.insert(sub_path.clone());
                if self.selection.is_substitute_selected(&sub_path) {
                    if chosen.is_some() {
                        return Err(PlmError::not_allowed(
                            &usage_path,
                            Denial::ConflictingSubstitutes {
                                link: usage.full_id(),
                            },
                        ));
                    }
                    chosen = Some((sub, sub_path));
                }
            }

            if usage.optional {
                self.offered_optionals.insert(usage_path.clone());
                if !self.selection.is_optional_retained(&usage_path) {
                    debug!(path = %usage_path, "optional link excluded");
                    self.excluded.push(usage_path);
                    continue;
                }
                self.retained.insert(usage_path.clone());
            }

            let (node_path, component, link) = match chosen {
                Some((sub, sub_path)) => {
                    self.applied.insert(sub_path.clone());
                    (sub_path, sub.substitute.clone(), sub.link_id())
                }
                None => (usage_path, usage.component.clone(), usage.link_id()),
            };

            if self.ancestors.contains(&component) {
                return Err(PlmError::not_allowed(
                    &node_path,
                    Denial::CyclicStructure { master: component },
                ));
            }

            let (child_iid, part) = self
                .filter
                .pick(self.conn, &MasterKey::part(self.workspace, &component))?;
            self.nodes.push(StructureNode {
                path: node_path.clone(),
                depth: depth + 1,
                part,
                link: Some(link),
                optional: usage.optional,
                substituted: matches!(link, LinkId::Substitute(_)),
            });

            self.ancestors.push(component);
            self.visit(child_iid, &node_path, depth + 1)?;
            self.ancestors.pop();
        }
        Ok(())
    }
}

/// Resolve the whole tree of a configuration item
pub(crate) fn resolve_in(
    conn: &Connection,
    item: &ConfigurationItem,
    filter: &PartFilter,
    selection: &SelectionPolicy,
) -> Result<ResolvedStructure> {
    let workspace = item.key.workspace.as_str();
    let (root_iid, root) = filter.pick(conn, &MasterKey::part(workspace, &item.design_item))?;

    let mut walk = Walk {
        conn,
        workspace,
        filter,
        selection,
        nodes: vec![StructureNode {
            path: String::new(),
            depth: 0,
            part: root,
            link: None,
            optional: false,
            substituted: false,
        }],
        applied: BTreeSet::new(),
        retained: BTreeSet::new(),
        excluded: Vec::new(),
        offered_substitutes: BTreeSet::new(),
        offered_optionals: BTreeSet::new(),
        ancestors: vec![item.design_item.clone()],
    };
    walk.visit(root_iid, "", 0)?;

    let unknown = selection
        .substitute_paths
        .iter()
        .find(|p| !walk.offered_substitutes.contains(*p))
        .or_else(|| {
            selection
                .optional_paths
                .iter()
                .find(|p| !walk.offered_optionals.contains(*p))
        });
    if let Some(path) = unknown {
        return Err(PlmError::not_found(EntityKind::Path, path));
    }

    Ok(ResolvedStructure {
        ci: item.key.clone(),
        nodes: walk.nodes,
        applied_substitutes: walk.applied,
        retained_optionals: walk.retained,
        excluded_optionals: walk.excluded,
    })
}

/// Follow one path from the root, regardless of selections
pub(crate) fn decode_in(
    conn: &Connection,
    item: &ConfigurationItem,
    raw_path: &str,
    filter: &PartFilter,
) -> Result<StructureNode> {
    let workspace = item.key.workspace.as_str();
    let (mut iid, root) = filter.pick(conn, &MasterKey::part(workspace, &item.design_item))?;
    let mut node = StructureNode {
        path: String::new(),
        depth: 0,
        part: root,
        link: None,
        optional: false,
        substituted: false,
    };

    for link_id in path::parse(raw_path)? {
        let components = links::load_components(conn, iid)?;
        let step = components.iter().find_map(|usage| match link_id {
            LinkId::Usage(id) if usage.id == id => Some((usage.component.clone(), usage.optional)),
            LinkId::Substitute(id) => usage
                .substitutes
                .iter()
                .find(|s| s.id == id)
                .map(|s| (s.substitute.clone(), usage.optional)),
            LinkId::Usage(_) => None,
        });
        let Some((component, optional)) = step else {
            return Err(PlmError::not_found(EntityKind::Path, raw_path));
        };

        let (next_iid, part) = filter.pick(conn, &MasterKey::part(workspace, &component))?;
        iid = next_iid;
        node = StructureNode {
            path: path::child(&node.path, &link_id.full_id()),
            depth: node.depth + 1,
            part,
            link: Some(link_id),
            optional,
            substituted: matches!(link_id, LinkId::Substitute(_)),
        };
    }
    Ok(node)
}

/// Fail if placing `component` under `parent_id` would close a cycle
fn check_acyclic(conn: &Connection, workspace: &str, parent_id: &str, component: &str) -> Result<()> {
    let mut pending = vec![component.to_string()];
    let mut seen = BTreeSet::new();
    while let Some(current) = pending.pop() {
        if current == parent_id {
            return Err(PlmError::not_allowed(
                MasterKey::part(workspace, parent_id),
                Denial::CyclicStructure {
                    master: component.to_string(),
                },
            ));
        }
        if seen.insert(current.clone()) {
            pending.extend(links::components_of(conn, workspace, &current)?);
        }
    }
    Ok(())
}

fn require_part(conn: &Connection, workspace: &str, id: &str) -> Result<()> {
    let key = MasterKey::part(workspace, id);
    if !masters::master_exists(conn, &key)? {
        return Err(PlmError::not_found(EntityKind::Master, key));
    }
    Ok(())
}

/// Validate the components of a usage link about to go under `parent`
fn check_usage(conn: &Connection, parent: &RevisionKey, spec: &UsageLinkSpec) -> Result<()> {
    let workspace = parent.workspace();
    let targets =
        std::iter::once(&spec.component).chain(spec.substitutes.iter().map(|s| &s.substitute));
    for target in targets {
        require_part(conn, workspace, target)?;
        check_acyclic(conn, workspace, &parent.master.id, target)?;
    }
    Ok(())
}

fn require_part_revision(key: &RevisionKey) -> Result<()> {
    if key.master.kind != MasterKind::Part {
        return Err(PlmError::not_allowed(
            key,
            Denial::NotAPart {
                kind: key.master.kind,
            },
        ));
    }
    Ok(())
}

fn find_usage<'a>(components: &'a [PartUsageLink], id: i64) -> Result<&'a PartUsageLink> {
    components
        .iter()
        .find(|l| l.id == id)
        .ok_or_else(|| PlmError::not_found(EntityKind::UsageLink, LinkId::Usage(id)))
}

impl ProductManager {
    // =====================================================================
    // Configuration items
    // =====================================================================

    /// Declare a configuration item rooted at an existing part master
    pub fn create_configuration_item(
        &self,
        key: &ConfigurationItemKey,
        design_item: &str,
        description: Option<&str>,
        user: &str,
    ) -> Result<ConfigurationItem> {
        self.authorize(user, Action::ManageConfigurationItem, key)?;
        let item = ConfigurationItem {
            key: key.clone(),
            design_item: design_item.to_string(),
            description: description.map(str::to_string),
            author: user.to_string(),
            created: self.now(),
        };

        self.transact(|tx, _| {
            require_part(tx, &key.workspace, design_item)?;
            links::insert_configuration_item(tx, &item)
        })?;

        info!(ci = %key, design_item, "configuration item created");
        Ok(item)
    }

    pub fn get_configuration_item(&self, key: &ConfigurationItemKey) -> Result<ConfigurationItem> {
        self.query(|tx| links::get_configuration_item(tx, key))
    }

    pub fn list_configuration_items(&self, workspace: &str) -> Result<Vec<ConfigurationItemKey>> {
        self.query(|tx| links::list_configuration_items(tx, workspace))
    }

    // =====================================================================
    // Usage links on a working copy
    // =====================================================================

    /// Add a usage link to the working copy of a part revision
    pub fn add_usage_link(
        &self,
        parent: &RevisionKey,
        user: &str,
        spec: &UsageLinkSpec,
    ) -> Result<PartUsageLink> {
        self.authorize(user, Action::EditStructure, parent)?;
        require_part_revision(parent)?;

        let link = self.transact(|tx, _| {
            let (iid, _) = working_copy(tx, parent, user)?;
            check_usage(tx, parent, spec)?;
            let position = links::next_position(tx, iid)?;
            links::insert_usage_link(tx, iid, position, spec)
        })?;

        debug!(parent = %parent, link = %link.full_id(), component = %link.component, "usage link added");
        Ok(link)
    }

    /// Remove a usage link, detaching every path-to-path link through it
    pub fn remove_usage_link(&self, parent: &RevisionKey, user: &str, link_id: i64) -> Result<()> {
        self.authorize(user, Action::EditStructure, parent)?;
        require_part_revision(parent)?;

        self.transact(|tx, _| {
            let (_, working) = working_copy(tx, parent, user)?;
            let usage = find_usage(&working.components, link_id)?;
            for full_id in link_full_ids(std::slice::from_ref(usage)) {
                remove_path_to_path_links(tx, parent.workspace(), &full_id)?;
            }
            links::delete_usage_link(tx, link_id)
        })?;

        debug!(parent = %parent, link = %LinkId::Usage(link_id), "usage link removed");
        Ok(())
    }

    /// Offer an alternate component on an existing usage link
    pub fn add_substitute(
        &self,
        parent: &RevisionKey,
        user: &str,
        link_id: i64,
        spec: &SubstituteSpec,
    ) -> Result<SubstituteLink> {
        self.authorize(user, Action::EditStructure, parent)?;
        require_part_revision(parent)?;

        self.transact(|tx, _| {
            let (_, working) = working_copy(tx, parent, user)?;
            find_usage(&working.components, link_id)?;
            require_part(tx, parent.workspace(), &spec.substitute)?;
            check_acyclic(tx, parent.workspace(), &parent.master.id, &spec.substitute)?;
            let position = links::next_substitute_position(tx, link_id)?;
            links::insert_substitute(tx, link_id, position, spec)
        })
    }

    /// Replace usage links in place as one batch
    ///
    /// Each replacement takes the slot of the link it replaces. Path-to-path
    /// links through the old links are moved onto the new ones.
    pub fn replace_usage_links(
        &self,
        parent: &RevisionKey,
        user: &str,
        replacements: &[(i64, UsageLinkSpec)],
    ) -> Result<(Vec<PartUsageLink>, UpgradeReport)> {
        self.authorize(user, Action::EditStructure, parent)?;
        require_part_revision(parent)?;

        let (created, report) = self.transact(|tx, _| {
            let (iid, working) = working_copy(tx, parent, user)?;

            let mut old = Vec::with_capacity(replacements.len());
            let mut new = Vec::with_capacity(replacements.len());
            for (old_id, spec) in replacements {
                let usage = find_usage(&working.components, *old_id)?;
                check_usage(tx, parent, spec)?;
                let position = links::usage_link_position(tx, *old_id)?;
                new.push(links::insert_usage_link(tx, iid, position, spec)?);
                old.push(usage.clone());
            }

            let report = upgrade_for_replaced(tx, parent.workspace(), &old, &new)?;
            for usage in &old {
                for full_id in link_full_ids(std::slice::from_ref(usage)) {
                    remove_path_to_path_links(tx, parent.workspace(), &full_id)?;
                }
                links::delete_usage_link(tx, usage.id)?;
            }
            Ok((new, report))
        })?;

        info!(
            parent = %parent,
            replaced = created.len(),
            upgraded = report.created.len(),
            "usage links replaced"
        );
        Ok((created, report))
    }

    // =====================================================================
    // Queries
    // =====================================================================

    /// Resolve a configuration item's tree under a filter and selection
    pub fn resolve_structure(
        &self,
        ci: &ConfigurationItemKey,
        filter: &PartFilter,
        selection: &SelectionPolicy,
    ) -> Result<ResolvedStructure> {
        self.query(|tx| {
            let item = links::get_configuration_item(tx, ci)?;
            resolve_in(tx, &item, filter, selection)
        })
    }

    /// Find the node a path addresses
    pub fn decode_path(
        &self,
        ci: &ConfigurationItemKey,
        raw_path: &str,
        filter: &PartFilter,
    ) -> Result<StructureNode> {
        self.query(|tx| {
            let item = links::get_configuration_item(tx, ci)?;
            decode_in(tx, &item, raw_path, filter)
        })
    }

    /// Part revisions whose structures use a master
    pub fn where_used(&self, master: &MasterKey) -> Result<Vec<RevisionKey>> {
        self.query(|tx| {
            masters::get_master(tx, master)?;
            links::structure_references(tx, &master.workspace, &master.id)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn released_part(pm: &ProductManager, id: &str) -> RevisionKey {
        let key = pm.create_part_master("ws", id, None, "alice").unwrap().key;
        pm.checkin(&key, "alice", None).unwrap();
        key
    }

    #[test]
    fn test_pick_latest_checked_in_skips_working_copy() {
        let pm = ProductManager::open_in_memory().unwrap();
        let key = released_part(&pm, "FRAME");
        pm.checkout(&key, "alice").unwrap();

        let (_, seen) = pm
            .query(|tx| PartFilter::LatestCheckedIn.pick(tx, &key.master))
            .unwrap();
        assert_eq!(seen.iteration, 1);

        let filter = PartFilter::Latest {
            user: "alice".to_string(),
        };
        let (_, seen) = pm.query(|tx| filter.pick(tx, &key.master)).unwrap();
        assert_eq!(seen.iteration, 2);

        let other = PartFilter::Latest {
            user: "bob".to_string(),
        };
        let (_, seen) = pm.query(|tx| other.pick(tx, &key.master)).unwrap();
        assert_eq!(seen.iteration, 1);
    }

    #[test]
    fn test_pick_released_and_pinned() {
        let pm = ProductManager::open_in_memory().unwrap();
        let key = released_part(&pm, "FRAME");

        let err = pm
            .query(|tx| PartFilter::Released.pick(tx, &key.master))
            .unwrap_err();
        assert!(err.is_not_found());

        pm.release(&key, "alice").unwrap();
        let (_, seen) = pm
            .query(|tx| PartFilter::Released.pick(tx, &key.master))
            .unwrap();
        assert_eq!(seen, key.iteration(1));

        let pins = PartFilter::Pinned(BTreeMap::new());
        let err = pm.query(|tx| pins.pick(tx, &key.master)).unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn test_cycle_is_rejected() {
        let pm = ProductManager::open_in_memory().unwrap();
        let bike = pm.create_part_master("ws", "BIKE", None, "alice").unwrap().key;
        let frame = pm.create_part_master("ws", "FRAME", None, "alice").unwrap().key;

        pm.add_usage_link(&bike, "alice", &UsageLinkSpec::new("FRAME"))
            .unwrap();
        let err = pm
            .add_usage_link(&frame, "alice", &UsageLinkSpec::new("BIKE"))
            .unwrap_err();
        assert!(matches!(
            err.denial(),
            Some(Denial::CyclicStructure { .. })
        ));

        let err = pm
            .add_usage_link(&bike, "alice", &UsageLinkSpec::new("BIKE"))
            .unwrap_err();
        assert!(matches!(
            err.denial(),
            Some(Denial::CyclicStructure { .. })
        ));
    }

    #[test]
    fn test_documents_carry_no_structure() {
        let pm = ProductManager::open_in_memory().unwrap();
        let doc = pm.create_document_master("ws", "SPEC", None, "alice").unwrap().key;
        pm.create_part_master("ws", "FRAME", None, "alice").unwrap();

        let err = pm
            .add_usage_link(&doc, "alice", &UsageLinkSpec::new("FRAME"))
            .unwrap_err();
        assert_eq!(
            err.denial(),
            Some(&Denial::NotAPart {
                kind: MasterKind::Document
            })
        );
    }

    #[test]
    fn test_unknown_component_is_not_found() {
        let pm = ProductManager::open_in_memory().unwrap();
        let bike = pm.create_part_master("ws", "BIKE", None, "alice").unwrap().key;
        let err = pm
            .add_usage_link(&bike, "alice", &UsageLinkSpec::new("GHOST"))
            .unwrap_err();
        assert!(err.is_not_found());
    }
}
