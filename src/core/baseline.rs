//! Baseline capture - frozen, fully resolved snapshots of a configuration item

use std::collections::BTreeSet;

use rusqlite::Connection;
use tracing::{debug, info};

use crate::core::collaborators::{Action, Event};
use crate::core::error::{EntityKind, PlmError, Result};
use crate::core::identity::{ConfigurationItemKey, IterationKey, MasterKind};
use crate::core::manager::ProductManager;
use crate::core::store::{masters, path_links, snapshots, structure as items};
use crate::core::structure::{resolve_in, PartFilter, ResolvedStructure};
use crate::entities::baseline::{BaselineType, ProductBaseline, SelectionPolicy, Snapshot};
use crate::entities::configuration::PathToPathLink;

/// Filter a baseline type captures with
pub(crate) fn capture_filter(baseline_type: BaselineType) -> PartFilter {
    match baseline_type {
        BaselineType::Latest => PartFilter::LatestCheckedIn,
        BaselineType::Released => PartFilter::Released,
    }
}

/// Last checked-in iteration of each document revision linked from the
/// pinned parts
fn linked_documents(conn: &Connection, parts: &[IterationKey]) -> Result<Vec<IterationKey>> {
    let mut documents = BTreeSet::new();
    for part in parts {
        let row = masters::get_revision_row(conn, &part.revision)?;
        let iid = masters::iteration_id(conn, row.rid, part)?;
        for link in masters::load_document_links(conn, iid)? {
            if link.target.master.kind != MasterKind::Document {
                continue;
            }
            let target = masters::get_revision_row(conn, &link.target)?;
            let frozen = masters::iteration_rows(conn, target.rid)?
                .into_iter()
                .rev()
                .find(|r| r.is_checked_in())
                .ok_or_else(|| {
                    PlmError::not_found(
                        EntityKind::Iteration,
                        format!("checked-in iteration of {}", link.target),
                    )
                })?;
            documents.insert(link.target.iteration(frozen.number));
        }
    }
    Ok(documents.into_iter().collect())
}

/// Build a snapshot of a resolved structure, keeping the candidate links
/// whose two ends are both reachable
pub(crate) fn capture(
    conn: &Connection,
    resolved: &ResolvedStructure,
    candidate_links: Vec<PathToPathLink>,
) -> Result<Snapshot> {
    let parts: Vec<IterationKey> = resolved.parts().into_values().collect();
    let documents = linked_documents(conn, &parts)?;

    let (kept, dropped): (Vec<_>, Vec<_>) = candidate_links.into_iter().partition(|link| {
        resolved.contains_path(&link.source_path) && resolved.contains_path(&link.target_path)
    });
    if !dropped.is_empty() {
        debug!(
            ci = %resolved.ci,
            dropped = dropped.len(),
            "path-to-path links outside the selection left out"
        );
    }

    Ok(Snapshot {
        parts,
        documents,
        selection: resolved.selection(),
        path_to_path_links: kept,
    })
}

fn baseline_of(conn: &Connection, ci: &ConfigurationItemKey, id: i64) -> Result<ProductBaseline> {
    let baseline = snapshots::get_baseline(conn, id)?;
    if &baseline.ci != ci {
        return Err(PlmError::not_found(
            EntityKind::Baseline,
            format!("{}:{}", ci, id),
        ));
    }
    Ok(baseline)
}

impl ProductManager {
    /// Freeze the current state of a configuration item
    ///
    /// Only deviations from the default tree are recorded: selected
    /// substitute paths and retained optional paths. Every reached part
    /// must have a checked-in iteration.
    pub fn create_baseline(
        &self,
        ci: &ConfigurationItemKey,
        user: &str,
        name: &str,
        baseline_type: BaselineType,
        description: Option<&str>,
        selection: &SelectionPolicy,
    ) -> Result<ProductBaseline> {
        self.authorize(user, Action::CreateBaseline, ci)?;
        let now = self.now();

        let baseline = self.transact(|tx, outbox| {
            let item = items::get_configuration_item(tx, ci)?;
            if snapshots::baseline_name_taken(tx, ci, name)? {
                return Err(PlmError::already_exists(
                    EntityKind::Baseline,
                    format!("{}:{}", ci, name),
                ));
            }

            let resolved = resolve_in(tx, &item, &capture_filter(baseline_type), selection)?;
            let snapshot = capture(tx, &resolved, path_links::list(tx, ci)?)?;
            let sid = snapshots::insert_snapshot(tx, &snapshot)?;
            let id = snapshots::insert_baseline(
                tx,
                ci,
                name,
                description,
                baseline_type,
                user,
                now,
                sid,
            )?;

            outbox.emit(Event::BaselineCreated {
                ci: ci.to_string(),
                baseline: id,
                name: name.to_string(),
            });
            snapshots::get_baseline(tx, id)
        })?;

        info!(
            ci = %ci,
            baseline = baseline.id,
            name,
            parts = baseline.snapshot.parts.len(),
            links = baseline.snapshot.path_to_path_links.len(),
            "baseline created"
        );
        Ok(baseline)
    }

    pub fn get_baseline(&self, ci: &ConfigurationItemKey, id: i64) -> Result<ProductBaseline> {
        self.query(|tx| baseline_of(tx, ci, id))
    }

    pub fn list_baselines(&self, ci: &ConfigurationItemKey) -> Result<Vec<ProductBaseline>> {
        self.query(|tx| {
            items::get_configuration_item(tx, ci)?;
            snapshots::list_baselines(tx, ci)
        })
    }

    /// Delete a baseline no product instance is built from
    pub fn delete_baseline(&self, ci: &ConfigurationItemKey, user: &str, id: i64) -> Result<()> {
        self.authorize(user, Action::DeleteBaseline, ci)?;

        self.transact(|tx, outbox| {
            let baseline = baseline_of(tx, ci, id)?;
            let instances = snapshots::instances_based_on(tx, id)?;
            if !instances.is_empty() {
                let names: Vec<String> = instances.iter().map(ToString::to_string).collect();
                return Err(PlmError::constraint(
                    format!("baseline {}", baseline.name),
                    format!("product instances {}", names.join(", ")),
                ));
            }
            snapshots::delete_baseline(tx, id)?;
            outbox.emit(Event::BaselineDeleted {
                ci: ci.to_string(),
                baseline: id,
            });
            Ok(())
        })?;

        info!(ci = %ci, baseline = id, "baseline deleted");
        Ok(())
    }

    /// The tree a baseline froze, walked through its pinned iterations
    pub fn resolve_baseline_structure(
        &self,
        ci: &ConfigurationItemKey,
        id: i64,
    ) -> Result<ResolvedStructure> {
        self.query(|tx| {
            let item = items::get_configuration_item(tx, ci)?;
            let baseline = baseline_of(tx, ci, id)?;
            let filter = PartFilter::Pinned(baseline.snapshot.pinned_parts());
            resolve_in(tx, &item, &filter, &baseline.snapshot.selection)
        })
    }
}
