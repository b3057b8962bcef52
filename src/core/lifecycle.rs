//! Revision lifecycle - checkout, checkin and status transitions
//!
//! Status moves forward only (WIP → RELEASED → OBSOLETE). Independently a
//! revision is either free or checked out by one user, who owns its single
//! working copy: the trailing iteration without a check-in date.

use rusqlite::Connection;
use tracing::{debug, info};

use crate::core::collaborators::{Action, BlobStore, Event};
use crate::core::entity::{Iterated, RevisionStatus};
use crate::core::error::{Denial, EntityKind, PlmError, Result};
use crate::core::identity::{next_version, MasterKey, MasterKind, RevisionKey, FIRST_VERSION};
use crate::core::manager::{Outbox, ProductManager};
use crate::core::path_links::{link_full_ids, remove_path_to_path_links, upgrade_for_replaced};
use crate::core::store::{masters, snapshots, structure};
use crate::entities::content::{AttributeValue, BinaryResource, DocumentLink, InstanceAttribute};
use crate::entities::master::{Iteration, Master, Revision, StatusChange};

/// Check if a status transition is valid
pub fn is_valid_transition(from: RevisionStatus, to: RevisionStatus) -> bool {
    matches!(
        (from, to),
        (RevisionStatus::Wip, RevisionStatus::Released)
            | (RevisionStatus::Released, RevisionStatus::Obsolete)
    )
}

/// Get allowed transitions from the current status
pub fn allowed_transitions(current: RevisionStatus) -> Vec<RevisionStatus> {
    match current {
        RevisionStatus::Wip => vec![RevisionStatus::Released],
        RevisionStatus::Released => vec![RevisionStatus::Obsolete],
        RevisionStatus::Obsolete => vec![],
    }
}

fn require_transition(key: &RevisionKey, from: RevisionStatus, to: RevisionStatus) -> Result<()> {
    if !is_valid_transition(from, to) {
        return Err(PlmError::not_allowed(
            key,
            Denial::InvalidTransition { from, to },
        ));
    }
    Ok(())
}

/// Duplicate the blob content of `from` under the file names of `to`
fn copy_files(blobs: &dyn BlobStore, from: &Iteration, to: &Iteration) -> Result<()> {
    for (source, target) in from.files.iter().zip(&to.files) {
        blobs.copy(&source.full_name, &target.full_name)?;
    }
    Ok(())
}

/// Insert a copied iteration and re-anchor path-to-path links from the
/// usage links of `source` to the fresh ones
fn insert_copy(
    conn: &Connection,
    rid: i64,
    source: &Iteration,
    copy: &Iteration,
    outbox: &mut Outbox,
) -> Result<()> {
    let (_, components) = masters::insert_iteration(conn, rid, copy)?;
    let workspace = copy.key.master().workspace.as_str();
    let report = upgrade_for_replaced(conn, workspace, &source.components, &components)?;
    if !report.created.is_empty() {
        outbox.emit(Event::PathLinksUpgraded {
            workspace: workspace.to_string(),
            cloned: report.created.len(),
        });
    }
    Ok(())
}

/// The working copy of a revision held by `user`, with its row id
pub(crate) fn working_copy(conn: &Connection, key: &RevisionKey, user: &str) -> Result<(i64, Iteration)> {
    let revision = masters::load_revision(conn, key)?;
    if let Err(denial) = revision.require_holder(user) {
        return Err(match (&denial, revision.last_iteration()) {
            (Denial::NotCheckedOut, Some(last)) => PlmError::not_allowed(
                key,
                Denial::IterationFrozen {
                    iteration: last.number(),
                },
            ),
            _ => PlmError::not_allowed(key, denial),
        });
    }
    let iteration = revision
        .working_copy()
        .cloned()
        .ok_or_else(|| PlmError::not_allowed(key, Denial::NoIteration))?;
    let row = masters::get_revision_row(conn, key)?;
    let iid = masters::iteration_id(conn, row.rid, &iteration.key)?;
    Ok((iid, iteration))
}

impl ProductManager {
    // =====================================================================
    // Masters and revisions
    // =====================================================================

    /// Create a master with revision `A`, whose iteration 1 is a working
    /// copy checked out by the author
    pub fn create_master(&self, key: &MasterKey, name: Option<&str>, user: &str) -> Result<Revision> {
        self.authorize(user, Action::CreateMaster, key)?;
        let now = self.now();

        let revision = self.transact(|tx, outbox| {
            masters::insert_master(
                tx,
                &Master {
                    key: key.clone(),
                    name: name.map(str::to_string),
                    author: user.to_string(),
                    created: now,
                },
            )?;

            let revision_key = key.revision(FIRST_VERSION);
            let rid = masters::insert_revision(tx, &revision_key, user, now, Some(user))?;
            let first = Iteration {
                key: revision_key.iteration(1),
                author: user.to_string(),
                created: now,
                checkin_date: None,
                note: None,
                files: Vec::new(),
                attributes: Vec::new(),
                document_links: Vec::new(),
                components: Vec::new(),
            };
            masters::insert_iteration(tx, rid, &first)?;

            outbox.emit(Event::MasterCreated {
                master: key.to_string(),
                user: user.to_string(),
            });
            masters::load_revision(tx, &revision_key)
        })?;

        info!(master = %key, user, "master created");
        Ok(revision)
    }

    pub fn create_part_master(
        &self,
        workspace: &str,
        id: &str,
        name: Option<&str>,
        user: &str,
    ) -> Result<Revision> {
        self.create_master(&MasterKey::part(workspace, id), name, user)
    }

    pub fn create_document_master(
        &self,
        workspace: &str,
        id: &str,
        name: Option<&str>,
        user: &str,
    ) -> Result<Revision> {
        self.create_master(&MasterKey::document(workspace, id), name, user)
    }

    /// Start the next revision of a master from the last checked-in
    /// iteration of the latest one
    pub fn create_revision(&self, master: &MasterKey, user: &str) -> Result<Revision> {
        self.authorize(user, Action::CreateRevision, master)?;
        let now = self.now();

        let revision = self.transact(|tx, outbox| {
            let latest = masters::latest_revision(tx, master)?
                .ok_or_else(|| PlmError::not_found(EntityKind::Master, master))?;
            if latest.checkout.holder().is_some() {
                return Err(PlmError::not_allowed(
                    &latest.key,
                    Denial::PredecessorCheckedOut {
                        version: latest.key.version.clone(),
                    },
                ));
            }

            let prior = masters::load_revision(tx, &latest.key)?;
            let source = prior
                .last_checked_in()
                .ok_or_else(|| PlmError::not_allowed(&latest.key, Denial::NoCheckedInIteration))?;

            let key = master.revision(next_version(&latest.key.version)?);
            let rid = masters::insert_revision(tx, &key, user, now, Some(user))?;
            let first = source.next_working_copy(key.iteration(1), user, now);
            copy_files(self.blobs(), source, &first)?;
            insert_copy(tx, rid, source, &first, outbox)?;

            outbox.emit(Event::RevisionCreated {
                revision: key.to_string(),
                user: user.to_string(),
            });
            masters::load_revision(tx, &key)
        })?;

        info!(revision = %revision.key, user, "revision created");
        Ok(revision)
    }

    pub fn get_master(&self, key: &MasterKey) -> Result<Master> {
        self.query(|tx| masters::get_master(tx, key))
    }

    pub fn get_revision(&self, key: &RevisionKey) -> Result<Revision> {
        self.query(|tx| masters::load_revision(tx, key))
    }

    /// Every revision of a master, oldest first
    pub fn get_revisions(&self, master: &MasterKey) -> Result<Vec<Revision>> {
        self.query(|tx| {
            masters::get_master(tx, master)?;
            masters::revisions_of(tx, master)?
                .iter()
                .map(|row| masters::load_revision(tx, &row.key))
                .collect()
        })
    }

    pub fn get_latest_revision(&self, master: &MasterKey) -> Result<Revision> {
        self.query(|tx| {
            let latest = masters::latest_revision(tx, master)?
                .ok_or_else(|| PlmError::not_found(EntityKind::Master, master))?;
            masters::load_revision(tx, &latest.key)
        })
    }

    // =====================================================================
    // Checkout discipline
    // =====================================================================

    /// Lock the latest revision for `user` and open a new working copy
    pub fn checkout(&self, key: &RevisionKey, user: &str) -> Result<Revision> {
        self.authorize(user, Action::Checkout, key)?;
        let now = self.now();

        let revision = self.transact(|tx, outbox| {
            let row = masters::get_revision_row(tx, key)?;
            if let Some(latest) = masters::latest_revision(tx, &key.master)? {
                if latest.rid != row.rid {
                    return Err(PlmError::not_allowed(
                        key,
                        Denial::NotLatestRevision {
                            latest: latest.key.version,
                        },
                    ));
                }
            }
            if row.status != RevisionStatus::Wip {
                return Err(PlmError::not_allowed(
                    key,
                    Denial::RevisionNotWip { status: row.status },
                ));
            }
            row.checkout
                .acquire(user, now)
                .map_err(|denial| PlmError::not_allowed(key, denial))?;
            if !masters::try_acquire_checkout(tx, row.rid, user, now)? {
                let holder = masters::get_revision_row(tx, key)?
                    .checkout
                    .holder()
                    .unwrap_or_default()
                    .to_string();
                return Err(PlmError::not_allowed(key, Denial::AlreadyCheckedOut { holder }));
            }

            let current = masters::load_revision(tx, key)?;
            let last = current
                .last_iteration()
                .ok_or_else(|| PlmError::not_allowed(key, Denial::NoIteration))?;
            let next = last.next_working_copy(key.iteration(last.number() + 1), user, now);
            copy_files(self.blobs(), last, &next)?;
            insert_copy(tx, row.rid, last, &next, outbox)?;

            outbox.emit(Event::CheckedOut {
                revision: key.to_string(),
                user: user.to_string(),
                iteration: next.number(),
            });
            masters::load_revision(tx, key)
        })?;

        info!(revision = %key, user, iteration = revision.last_iteration_number(), "checked out");
        Ok(revision)
    }

    /// Discard the working copy and release the lock
    ///
    /// The first iteration of a revision is never discarded.
    pub fn undo_checkout(&self, key: &RevisionKey, user: &str) -> Result<Revision> {
        self.authorize(user, Action::UndoCheckout, key)?;

        let revision = self.transact(|tx, outbox| {
            let current = masters::load_revision(tx, key)?;
            current
                .require_holder(user)
                .map_err(|denial| PlmError::not_allowed(key, denial))?;
            let discarded = current
                .working_copy()
                .ok_or_else(|| PlmError::not_allowed(key, Denial::NoIteration))?;
            if discarded.number() < 2 {
                return Err(PlmError::not_allowed(key, Denial::FirstIteration));
            }

            for full_id in link_full_ids(&discarded.components) {
                remove_path_to_path_links(tx, key.workspace(), &full_id)?;
            }

            let row = masters::get_revision_row(tx, key)?;
            let iid = masters::iteration_id(tx, row.rid, &discarded.key)?;
            masters::delete_iteration(tx, iid)?;
            masters::release_checkout(tx, row.rid)?;

            outbox.delete_blobs(discarded.files.iter().map(|f| f.full_name.clone()));
            outbox.emit(Event::CheckoutUndone {
                revision: key.to_string(),
                user: user.to_string(),
            });
            masters::load_revision(tx, key)
        })?;

        info!(revision = %key, user, "checkout undone");
        Ok(revision)
    }

    /// Freeze the working copy and release the lock
    pub fn checkin(&self, key: &RevisionKey, user: &str, note: Option<&str>) -> Result<Revision> {
        self.authorize(user, Action::Checkin, key)?;
        let now = self.now();

        let revision = self.transact(|tx, outbox| {
            let current = masters::load_revision(tx, key)?;
            current
                .require_holder(user)
                .map_err(|denial| PlmError::not_allowed(key, denial))?;
            let working = current
                .working_copy()
                .ok_or_else(|| PlmError::not_allowed(key, Denial::NoIteration))?;

            let row = masters::get_revision_row(tx, key)?;
            let iid = masters::iteration_id(tx, row.rid, &working.key)?;
            masters::checkin_iteration(tx, iid, now, note)?;
            masters::release_checkout(tx, row.rid)?;

            outbox.emit(Event::CheckedIn {
                revision: key.to_string(),
                user: user.to_string(),
                iteration: working.number(),
            });
            masters::load_revision(tx, key)
        })?;

        info!(revision = %key, user, iteration = revision.last_iteration_number(), "checked in");
        Ok(revision)
    }

    // =====================================================================
    // Status transitions
    // =====================================================================

    pub fn release(&self, key: &RevisionKey, user: &str) -> Result<Revision> {
        self.authorize(user, Action::Release, key)?;
        let now = self.now();

        let revision = self.transact(|tx, outbox| {
            let row = masters::get_revision_row(tx, key)?;
            require_transition(key, row.status, RevisionStatus::Released)?;
            if let Some(holder) = row.checkout.holder() {
                return Err(PlmError::not_allowed(
                    key,
                    Denial::CheckedOut {
                        holder: holder.to_string(),
                    },
                ));
            }
            if masters::last_iteration_row(tx, row.rid)?.is_none() {
                return Err(PlmError::not_allowed(key, Denial::NoIteration));
            }

            let change = StatusChange {
                by: user.to_string(),
                at: now,
            };
            masters::set_status(tx, row.rid, RevisionStatus::Released, &change)?;
            outbox.emit(Event::Released {
                revision: key.to_string(),
                user: user.to_string(),
            });
            masters::load_revision(tx, key)
        })?;

        info!(revision = %key, user, "released");
        Ok(revision)
    }

    pub fn mark_obsolete(&self, key: &RevisionKey, user: &str) -> Result<Revision> {
        self.authorize(user, Action::MarkObsolete, key)?;
        let now = self.now();

        let revision = self.transact(|tx, outbox| {
            let row = masters::get_revision_row(tx, key)?;
            require_transition(key, row.status, RevisionStatus::Obsolete)?;

            let change = StatusChange {
                by: user.to_string(),
                at: now,
            };
            masters::set_status(tx, row.rid, RevisionStatus::Obsolete, &change)?;
            outbox.emit(Event::MarkedObsolete {
                revision: key.to_string(),
                user: user.to_string(),
            });
            masters::load_revision(tx, key)
        })?;

        info!(revision = %key, user, "marked obsolete");
        Ok(revision)
    }

    /// Remove a revision that nothing references; removing the last
    /// revision removes the master too
    pub fn delete_revision(&self, key: &RevisionKey, user: &str) -> Result<()> {
        self.authorize(user, Action::DeleteRevision, key)?;

        self.transact(|tx, outbox| {
            let row = masters::get_revision_row(tx, key)?;
            if let Some(holder) = row.checkout.holder() {
                return Err(PlmError::not_allowed(
                    key,
                    Denial::CheckedOut {
                        holder: holder.to_string(),
                    },
                ));
            }

            let pinned_by = snapshots::revision_references(tx, key)?;
            if !pinned_by.is_empty() {
                return Err(PlmError::constraint(key, pinned_by.join(", ")));
            }
            let linked_from = masters::inbound_document_links(tx, key)?;
            if !linked_from.is_empty() {
                let sources: Vec<String> = linked_from.iter().map(ToString::to_string).collect();
                return Err(PlmError::constraint(
                    key,
                    format!("document links from {}", sources.join(", ")),
                ));
            }

            let is_last = masters::revisions_of(tx, &key.master)?.len() == 1;
            if is_last && key.master.kind == MasterKind::Part {
                let used_in = structure::structure_references(tx, key.workspace(), &key.master.id)?;
                if !used_in.is_empty() {
                    let parents: Vec<String> = used_in.iter().map(ToString::to_string).collect();
                    return Err(PlmError::constraint(
                        key,
                        format!("structures of {}", parents.join(", ")),
                    ));
                }
                let items = structure::items_designed_by(tx, key.workspace(), &key.master.id)?;
                if !items.is_empty() {
                    let names: Vec<String> = items.iter().map(ToString::to_string).collect();
                    return Err(PlmError::constraint(
                        key,
                        format!("configuration items {}", names.join(", ")),
                    ));
                }
            }

            let revision = masters::load_revision(tx, key)?;
            for iteration in &revision.iterations {
                for full_id in link_full_ids(&iteration.components) {
                    remove_path_to_path_links(tx, key.workspace(), &full_id)?;
                }
                outbox.delete_blobs(iteration.files.iter().map(|f| f.full_name.clone()));
            }

            masters::delete_revision(tx, row.rid)?;
            if is_last {
                masters::delete_master(tx, &key.master)?;
                debug!(master = %key.master, "master removed with its last revision");
            }

            outbox.emit(Event::RevisionDeleted {
                revision: key.to_string(),
                user: user.to_string(),
            });
            Ok(())
        })?;

        info!(revision = %key, user, "revision deleted");
        Ok(())
    }

    // =====================================================================
    // Working copy content
    // =====================================================================

    /// Set or replace an attribute on the working copy
    pub fn set_attribute(
        &self,
        key: &RevisionKey,
        user: &str,
        name: &str,
        value: AttributeValue,
    ) -> Result<Iteration> {
        self.authorize(user, Action::EditIteration, key)?;
        self.transact(|tx, _| {
            let (iid, _) = working_copy(tx, key, user)?;
            masters::put_attribute(tx, iid, &InstanceAttribute::new(name, value))?;
            current_iteration(tx, key)
        })
    }

    pub fn remove_attribute(&self, key: &RevisionKey, user: &str, name: &str) -> Result<Iteration> {
        self.authorize(user, Action::EditIteration, key)?;
        self.transact(|tx, _| {
            let (iid, _) = working_copy(tx, key, user)?;
            if !masters::delete_attribute(tx, iid, name)? {
                return Err(PlmError::not_found(EntityKind::Attribute, name));
            }
            current_iteration(tx, key)
        })
    }

    /// Attach a file to the working copy, storing its content in the blob store
    pub fn add_file(
        &self,
        key: &RevisionKey,
        user: &str,
        file_name: &str,
        content: &[u8],
    ) -> Result<BinaryResource> {
        self.authorize(user, Action::EditIteration, key)?;
        let now = self.now();

        let file = self.transact(|tx, _| {
            let (iid, working) = working_copy(tx, key, user)?;
            let full_name = working.key.vault_path(file_name);
            if working.files.iter().any(|f| f.full_name == full_name) {
                return Err(PlmError::already_exists(EntityKind::File, &full_name));
            }
            let length = self.blobs().put(&full_name, content)?;
            let file = BinaryResource {
                full_name,
                length,
                last_modified: now,
            };
            masters::insert_file(tx, iid, &file)?;
            Ok(file)
        })?;

        debug!(revision = %key, file = %file.full_name, "file attached");
        Ok(file)
    }

    pub fn remove_file(&self, key: &RevisionKey, user: &str, file_name: &str) -> Result<()> {
        self.authorize(user, Action::EditIteration, key)?;
        self.transact(|tx, outbox| {
            let (iid, working) = working_copy(tx, key, user)?;
            let full_name = working.key.vault_path(file_name);
            if !masters::delete_file(tx, iid, &full_name)? {
                return Err(PlmError::not_found(EntityKind::File, &full_name));
            }
            outbox.delete_blob(full_name);
            Ok(())
        })
    }

    /// Link the working copy to another revision
    pub fn add_document_link(
        &self,
        key: &RevisionKey,
        user: &str,
        target: &RevisionKey,
        comment: Option<&str>,
    ) -> Result<Iteration> {
        self.authorize(user, Action::EditIteration, key)?;
        self.transact(|tx, _| {
            let (iid, _) = working_copy(tx, key, user)?;
            masters::get_revision_row(tx, target)?;
            masters::insert_document_link(
                tx,
                iid,
                &DocumentLink {
                    target: target.clone(),
                    comment: comment.map(str::to_string),
                },
            )?;
            current_iteration(tx, key)
        })
    }

    pub fn remove_document_link(
        &self,
        key: &RevisionKey,
        user: &str,
        target: &RevisionKey,
    ) -> Result<Iteration> {
        self.authorize(user, Action::EditIteration, key)?;
        self.transact(|tx, _| {
            let (iid, _) = working_copy(tx, key, user)?;
            if !masters::delete_document_link(tx, iid, target)? {
                return Err(PlmError::not_found(EntityKind::DocumentLink, target));
            }
            current_iteration(tx, key)
        })
    }
}

pub(crate) fn current_iteration(conn: &Connection, key: &RevisionKey) -> Result<Iteration> {
    masters::load_revision(conn, key)?
        .iterations
        .pop()
        .ok_or_else(|| PlmError::not_allowed(key, Denial::NoIteration))
}
