//! Effectivity management on revisions

use tracing::info;

use crate::core::collaborators::Action;
use crate::core::error::{EntityKind, PlmError, Result};
use crate::core::identity::{ConfigurationItemKey, MasterKey, RevisionKey};
use crate::core::manager::ProductManager;
use crate::core::store::{effectivity, masters, structure as items};
use crate::entities::effectivity::{Applicability, Effectivity, EffectivityRange};

impl ProductManager {
    /// Attach a validity range to a revision
    pub fn add_effectivity(
        &self,
        revision: &RevisionKey,
        user: &str,
        name: &str,
        scope: Option<&ConfigurationItemKey>,
        range: EffectivityRange,
    ) -> Result<Effectivity> {
        self.authorize(user, Action::ManageEffectivity, revision)?;

        let effectivity = self.transact(|tx, _| {
            let row = masters::get_revision_row(tx, revision)?;
            if let Some(ci) = scope {
                items::get_configuration_item(tx, ci)?;
            }
            let id = effectivity::insert(tx, row.rid, name, scope, &range)?;
            Ok(Effectivity {
                id,
                name: name.to_string(),
                scope: scope.cloned(),
                range,
            })
        })?;

        info!(revision = %revision, effectivity = effectivity.id, kind = effectivity.range.type_name(), "effectivity added");
        Ok(effectivity)
    }

    pub fn list_effectivities(&self, revision: &RevisionKey) -> Result<Vec<Effectivity>> {
        self.query(|tx| {
            let row = masters::get_revision_row(tx, revision)?;
            effectivity::list(tx, row.rid)
        })
    }

    pub fn remove_effectivity(&self, revision: &RevisionKey, user: &str, id: i64) -> Result<()> {
        self.authorize(user, Action::ManageEffectivity, revision)?;
        self.transact(|tx, _| {
            let row = masters::get_revision_row(tx, revision)?;
            if !effectivity::delete(tx, row.rid, id)? {
                return Err(PlmError::not_found(
                    EntityKind::Effectivity,
                    format!("{}:{}", revision, id),
                ));
            }
            Ok(())
        })
    }

    /// Revisions of a master that apply to a unit, date or lot
    ///
    /// A revision without effectivities is unrestricted. Otherwise at least
    /// one of its effectivities must admit `target`.
    pub fn effective_revisions(
        &self,
        master: &MasterKey,
        target: &Applicability<'_>,
    ) -> Result<Vec<RevisionKey>> {
        self.query(|tx| {
            masters::get_master(tx, master)?;
            let mut effective = Vec::new();
            for row in masters::revisions_of(tx, master)? {
                let ranges = effectivity::list(tx, row.rid)?;
                if ranges.is_empty() || ranges.iter().any(|e| e.applies_to(target)) {
                    effective.push(row.key);
                }
            }
            Ok(effective)
        })
    }
}
