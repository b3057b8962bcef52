//! Product instances - serialized units that start from a baseline and then
//! iterate on their own
//!
//! Every instance iteration owns a private copy of a snapshot. Iteration 1
//! is created checked in; later iterations follow the same checkout
//! discipline as revisions.

use rusqlite::Connection;
use tracing::{debug, info};

use crate::core::baseline::capture;
use crate::core::collaborators::{Action, Event};
use crate::core::entity::Iterated;
use crate::core::error::{Denial, EntityKind, PlmError, Result};
use crate::core::identity::{ConfigurationItemKey, ProductInstanceKey};
use crate::core::manager::ProductManager;
use crate::core::path_links::validate_link_paths;
use crate::core::store::snapshots::{self, InstanceIterationRow};
use crate::core::store::structure as items;
use crate::core::structure::{resolve_in, PartFilter, ResolvedStructure};
use crate::entities::baseline::{ProductBaseline, SelectionPolicy};
use crate::entities::configuration::PathToPathLink;
use crate::entities::content::BinaryResource;
use crate::entities::instance::{ProductInstance, ProductInstanceIteration};

/// The working copy of an instance held by `user`, with its row
fn working_copy(
    conn: &Connection,
    key: &ProductInstanceKey,
    user: &str,
) -> Result<(InstanceIterationRow, ProductInstanceIteration)> {
    let instance = snapshots::load_instance(conn, key)?;
    if let Err(denial) = instance.require_holder(user) {
        return Err(match denial {
            Denial::NotCheckedOut => PlmError::not_allowed(
                key,
                Denial::IterationFrozen {
                    iteration: instance.last_iteration_number(),
                },
            ),
            other => PlmError::not_allowed(key, other),
        });
    }
    let working = instance
        .working_copy()
        .cloned()
        .ok_or_else(|| PlmError::not_allowed(key, Denial::NoIteration))?;
    let row = snapshots::instance_iteration_rows(conn, key)?
        .into_iter()
        .find(|r| r.number == working.iteration)
        .ok_or_else(|| {
            PlmError::not_found(
                EntityKind::ProductInstanceIteration,
                format!("{}/{}", key, working.iteration),
            )
        })?;
    Ok((row, working))
}

/// A baseline of the instance's own configuration item
fn own_baseline(
    conn: &Connection,
    key: &ProductInstanceKey,
    baseline_id: i64,
) -> Result<ProductBaseline> {
    let baseline = snapshots::get_baseline(conn, baseline_id)?;
    if baseline.ci != key.ci {
        return Err(PlmError::not_allowed(
            key,
            Denial::ForeignBaseline {
                baseline: baseline_id,
            },
        ));
    }
    Ok(baseline)
}

/// Resolve the structure an instance iteration pins
fn resolve_iteration(
    conn: &Connection,
    key: &ProductInstanceKey,
    iteration: &ProductInstanceIteration,
) -> Result<ResolvedStructure> {
    let item = items::get_configuration_item(conn, &key.ci)?;
    let filter = PartFilter::Pinned(iteration.snapshot.pinned_parts());
    resolve_in(conn, &item, &filter, &iteration.snapshot.selection)
}

impl ProductManager {
    /// Build a new serialized unit from a baseline of its configuration item
    pub fn create_product_instance(
        &self,
        ci: &ConfigurationItemKey,
        user: &str,
        serial_number: &str,
        baseline_id: i64,
    ) -> Result<ProductInstance> {
        let key = ProductInstanceKey::new(ci.clone(), serial_number);
        self.authorize(user, Action::ManageProductInstance, &key)?;
        let now = self.now();

        let instance = self.transact(|tx, outbox| {
            items::get_configuration_item(tx, ci)?;
            let baseline = own_baseline(tx, &key, baseline_id)?;
            snapshots::insert_instance(tx, &key, user, now)?;
            let sid = snapshots::insert_snapshot(tx, &baseline.snapshot)?;
            snapshots::insert_instance_iteration(
                tx,
                &key,
                1,
                baseline_id,
                user,
                now,
                sid,
                Some(now),
            )?;

            outbox.emit(Event::InstanceCreated {
                instance: key.to_string(),
                baseline: baseline_id,
            });
            snapshots::load_instance(tx, &key)
        })?;

        info!(instance = %key, baseline = baseline_id, "product instance created");
        Ok(instance)
    }

    pub fn get_product_instance(&self, key: &ProductInstanceKey) -> Result<ProductInstance> {
        self.query(|tx| snapshots::load_instance(tx, key))
    }

    pub fn list_product_instances(
        &self,
        ci: &ConfigurationItemKey,
    ) -> Result<Vec<ProductInstanceKey>> {
        self.query(|tx| {
            items::get_configuration_item(tx, ci)?;
            snapshots::list_instances(tx, ci)
        })
    }

    /// Lock an instance and open a new iteration copied from the last one
    pub fn checkout_product_instance(
        &self,
        key: &ProductInstanceKey,
        user: &str,
    ) -> Result<ProductInstance> {
        self.authorize(user, Action::ManageProductInstance, key)?;
        let now = self.now();

        let instance = self.transact(|tx, outbox| {
            snapshots::instance_checkout(tx, key)?
                .acquire(user, now)
                .map_err(|denial| PlmError::not_allowed(key, denial))?;
            if !snapshots::try_acquire_instance_checkout(tx, key, user, now)? {
                let holder = snapshots::instance_checkout(tx, key)?
                    .holder()
                    .unwrap_or_default()
                    .to_string();
                return Err(PlmError::not_allowed(key, Denial::AlreadyCheckedOut { holder }));
            }

            let current = snapshots::load_instance(tx, key)?;
            let last = current
                .last_iteration()
                .ok_or_else(|| PlmError::not_allowed(key, Denial::NoIteration))?;
            let number = last.iteration + 1;

            let sid = snapshots::insert_snapshot(tx, &last.snapshot)?;
            let piid = snapshots::insert_instance_iteration(
                tx,
                key,
                number,
                last.based_on,
                user,
                now,
                sid,
                None,
            )?;
            for file in &last.files {
                let copy = BinaryResource {
                    full_name: key.vault_path(number, file.file_name()),
                    length: file.length,
                    last_modified: now,
                };
                self.blobs().copy(&file.full_name, &copy.full_name)?;
                snapshots::insert_instance_file(tx, piid, &copy)?;
            }

            outbox.emit(Event::InstanceCheckedOut {
                instance: key.to_string(),
                user: user.to_string(),
                iteration: number,
            });
            snapshots::load_instance(tx, key)
        })?;

        info!(instance = %key, user, iteration = instance.last_iteration_number(), "product instance checked out");
        Ok(instance)
    }

    pub fn checkin_product_instance(
        &self,
        key: &ProductInstanceKey,
        user: &str,
        note: Option<&str>,
    ) -> Result<ProductInstance> {
        self.authorize(user, Action::ManageProductInstance, key)?;
        let now = self.now();

        let instance = self.transact(|tx, outbox| {
            let (row, working) = working_copy(tx, key, user)?;
            snapshots::checkin_instance_iteration(tx, row.piid, now, note)?;
            snapshots::release_instance_checkout(tx, key)?;
            outbox.emit(Event::InstanceCheckedIn {
                instance: key.to_string(),
                user: user.to_string(),
                iteration: working.iteration,
            });
            snapshots::load_instance(tx, key)
        })?;

        info!(instance = %key, user, "product instance checked in");
        Ok(instance)
    }

    /// Discard the working iteration of an instance
    pub fn undo_checkout_product_instance(
        &self,
        key: &ProductInstanceKey,
        user: &str,
    ) -> Result<ProductInstance> {
        self.authorize(user, Action::ManageProductInstance, key)?;

        let instance = self.transact(|tx, outbox| {
            let (row, working) = working_copy(tx, key, user)?;
            if working.iteration < 2 {
                return Err(PlmError::not_allowed(key, Denial::FirstIteration));
            }
            snapshots::delete_instance_iteration(tx, row.piid)?;
            snapshots::delete_snapshot(tx, row.snapshot_id)?;
            snapshots::release_instance_checkout(tx, key)?;
            outbox.delete_blobs(working.files.iter().map(|f| f.full_name.clone()));
            snapshots::load_instance(tx, key)
        })?;

        info!(instance = %key, user, "product instance checkout undone");
        Ok(instance)
    }

    /// Re-base the working iteration onto another baseline of the same
    /// configuration item, replacing its pinned state and selections
    pub fn rebase_product_instance(
        &self,
        key: &ProductInstanceKey,
        user: &str,
        baseline_id: i64,
    ) -> Result<ProductInstance> {
        self.authorize(user, Action::ManageProductInstance, key)?;

        let instance = self.transact(|tx, _| {
            let (row, _) = working_copy(tx, key, user)?;
            let baseline = own_baseline(tx, key, baseline_id)?;
            let sid = snapshots::insert_snapshot(tx, &baseline.snapshot)?;
            snapshots::rebase_instance_iteration(tx, row.piid, baseline_id, sid)?;
            snapshots::delete_snapshot(tx, row.snapshot_id)?;
            snapshots::load_instance(tx, key)
        })?;

        info!(instance = %key, baseline = baseline_id, "product instance rebased");
        Ok(instance)
    }

    /// Change the substitute and optional selections of the working
    /// iteration
    ///
    /// Parts already pinned stay pinned; parts newly reached are pinned at
    /// their latest checked-in iteration. Instance links whose ends fall
    /// outside the new selection are dropped.
    pub fn update_product_instance_selection(
        &self,
        key: &ProductInstanceKey,
        user: &str,
        selection: &SelectionPolicy,
    ) -> Result<ProductInstance> {
        self.authorize(user, Action::ManageProductInstance, key)?;

        let instance = self.transact(|tx, _| {
            let (row, working) = working_copy(tx, key, user)?;
            let item = items::get_configuration_item(tx, &key.ci)?;
            let filter = PartFilter::PinnedOrLatestCheckedIn(working.snapshot.pinned_parts());
            let resolved = resolve_in(tx, &item, &filter, selection)?;
            let snapshot = capture(tx, &resolved, working.snapshot.path_to_path_links)?;
            snapshots::replace_contents(tx, row.snapshot_id, &snapshot)?;
            snapshots::load_instance(tx, key)
        })?;

        debug!(instance = %key, "product instance selection updated");
        Ok(instance)
    }

    /// Attach a file to the working iteration of an instance
    pub fn add_product_instance_file(
        &self,
        key: &ProductInstanceKey,
        user: &str,
        file_name: &str,
        content: &[u8],
    ) -> Result<BinaryResource> {
        self.authorize(user, Action::ManageProductInstance, key)?;
        let now = self.now();

        self.transact(|tx, _| {
            let (row, working) = working_copy(tx, key, user)?;
            let full_name = key.vault_path(working.iteration, file_name);
            if working.files.iter().any(|f| f.full_name == full_name) {
                return Err(PlmError::already_exists(EntityKind::File, &full_name));
            }
            let length = self.blobs().put(&full_name, content)?;
            let file = BinaryResource {
                full_name,
                length,
                last_modified: now,
            };
            snapshots::insert_instance_file(tx, row.piid, &file)?;
            Ok(file)
        })
    }

    /// Draw a path-to-path link private to the working iteration
    #[allow(clippy::too_many_arguments)]
    pub fn create_product_instance_path_link(
        &self,
        key: &ProductInstanceKey,
        user: &str,
        link_type: &str,
        source_path: &str,
        target_path: &str,
        description: Option<&str>,
    ) -> Result<PathToPathLink> {
        self.authorize(user, Action::ManageProductInstance, key)?;
        validate_link_paths(source_path, target_path)?;

        self.transact(|tx, _| {
            let (row, working) = working_copy(tx, key, user)?;
            let resolved = resolve_iteration(tx, key, &working)?;
            for end in [source_path, target_path] {
                if !resolved.contains_path(end) {
                    return Err(PlmError::not_found(EntityKind::Path, end));
                }
            }
            snapshots::insert_snapshot_link(
                tx,
                row.snapshot_id,
                link_type,
                source_path,
                target_path,
                description,
            )
        })
    }

    pub fn delete_product_instance_path_link(
        &self,
        key: &ProductInstanceKey,
        user: &str,
        link_id: i64,
    ) -> Result<()> {
        self.authorize(user, Action::ManageProductInstance, key)?;
        self.transact(|tx, _| {
            let (row, _) = working_copy(tx, key, user)?;
            if !snapshots::delete_snapshot_link(tx, row.snapshot_id, link_id)? {
                return Err(PlmError::not_found(EntityKind::PathToPathLink, link_id));
            }
            Ok(())
        })
    }

    /// The tree the last iteration of an instance pins
    pub fn resolve_product_instance_structure(
        &self,
        key: &ProductInstanceKey,
    ) -> Result<ResolvedStructure> {
        self.query(|tx| {
            let instance = snapshots::load_instance(tx, key)?;
            let last = instance
                .last_iteration()
                .ok_or_else(|| PlmError::not_allowed(key, Denial::NoIteration))?;
            resolve_iteration(tx, key, last)
        })
    }

    /// Delete an instance with its whole history
    pub fn delete_product_instance(&self, key: &ProductInstanceKey, user: &str) -> Result<()> {
        self.authorize(user, Action::ManageProductInstance, key)?;

        self.transact(|tx, outbox| {
            let instance = snapshots::load_instance(tx, key)?;
            if let Some(holder) = instance.checkout.holder() {
                return Err(PlmError::not_allowed(
                    key,
                    Denial::CheckedOut {
                        holder: holder.to_string(),
                    },
                ));
            }
            let rows = snapshots::instance_iteration_rows(tx, key)?;
            snapshots::delete_instance(tx, key)?;
            for row in rows {
                snapshots::delete_snapshot(tx, row.snapshot_id)?;
            }
            for iteration in &instance.iterations {
                outbox.delete_blobs(iteration.files.iter().map(|f| f.full_name.clone()));
            }
            outbox.emit(Event::InstanceDeleted {
                instance: key.to_string(),
            });
            Ok(())
        })?;

        info!(instance = %key, user, "product instance deleted");
        Ok(())
    }
}
