//! Snapshots, baselines and product instances
//!
//! A snapshot holds pinned iterations, selected paths and copied
//! path-to-path links. Each baseline and each product instance iteration
//! owns exactly one snapshot.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};

use crate::core::entity::CheckoutState;
use crate::core::error::{EntityKind, PlmError, Result};
use crate::core::identity::{
    ConfigurationItemKey, MasterKey, MasterKind, ProductInstanceKey, RevisionKey,
};
use crate::core::store::{map_unique, path_links::describe};
use crate::entities::baseline::{BaselineType, ProductBaseline, SelectionPolicy, Snapshot};
use crate::entities::configuration::PathToPathLink;
use crate::entities::content::BinaryResource;
use crate::entities::instance::{ProductInstance, ProductInstanceIteration};

const SUBSTITUTE: &str = "substitute";
const OPTIONAL: &str = "optional";

// =========================================================================
// Snapshots
// =========================================================================

pub fn insert_snapshot(conn: &Connection, snapshot: &Snapshot) -> Result<i64> {
    conn.execute("INSERT INTO snapshots DEFAULT VALUES", [])?;
    let sid = conn.last_insert_rowid();

    insert_items(conn, sid, snapshot)?;
    insert_selection(conn, sid, &snapshot.selection)?;
    for link in &snapshot.path_to_path_links {
        insert_snapshot_link(
            conn,
            sid,
            &link.link_type,
            &link.source_path,
            &link.target_path,
            link.description.as_deref(),
        )?;
    }
    Ok(sid)
}

fn insert_items(conn: &Connection, sid: i64, snapshot: &Snapshot) -> Result<()> {
    let mut stmt = conn.prepare(
        "INSERT INTO snapshot_items (snapshot_id, workspace, kind, master_id, version, iteration)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
    )?;
    for key in snapshot.parts.iter().chain(&snapshot.documents) {
        let master = key.master();
        stmt.execute(params![
            sid,
            master.workspace,
            master.kind,
            master.id,
            key.revision.version,
            key.iteration
        ])?;
    }
    Ok(())
}

fn insert_selection(conn: &Connection, sid: i64, selection: &SelectionPolicy) -> Result<()> {
    let mut stmt = conn.prepare(
        "INSERT INTO snapshot_paths (snapshot_id, selection, path) VALUES (?1, ?2, ?3)",
    )?;
    for path in &selection.substitute_paths {
        stmt.execute(params![sid, SUBSTITUTE, path])?;
    }
    for path in &selection.optional_paths {
        stmt.execute(params![sid, OPTIONAL, path])?;
    }
    Ok(())
}

pub fn load_snapshot(conn: &Connection, sid: i64) -> Result<Snapshot> {
    let mut snapshot = Snapshot::default();

    let mut stmt = conn.prepare(
        "SELECT workspace, kind, master_id, version, iteration FROM snapshot_items
         WHERE snapshot_id = ?1 ORDER BY kind, master_id",
    )?;
    let items = stmt
        .query_map([sid], |row| {
            let master = MasterKey::new(
                row.get::<_, String>(0)?,
                row.get::<_, MasterKind>(1)?,
                row.get::<_, String>(2)?,
            );
            Ok(master
                .revision(row.get::<_, String>(3)?)
                .iteration(row.get(4)?))
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    for key in items {
        match key.master().kind {
            MasterKind::Part => snapshot.parts.push(key),
            MasterKind::Document => snapshot.documents.push(key),
        }
    }

    let mut stmt = conn.prepare(
        "SELECT selection, path FROM snapshot_paths WHERE snapshot_id = ?1 ORDER BY path",
    )?;
    let paths = stmt
        .query_map([sid], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    for (selection, path) in paths {
        if selection == SUBSTITUTE {
            snapshot.selection.substitute_paths.insert(path);
        } else {
            snapshot.selection.optional_paths.insert(path);
        }
    }

    snapshot.path_to_path_links = snapshot_links(conn, sid)?;
    Ok(snapshot)
}

/// Rewrite pinned items and selection; keep only the listed links
pub fn replace_contents(conn: &Connection, sid: i64, snapshot: &Snapshot) -> Result<()> {
    conn.execute("DELETE FROM snapshot_items WHERE snapshot_id = ?1", [sid])?;
    conn.execute("DELETE FROM snapshot_paths WHERE snapshot_id = ?1", [sid])?;
    insert_items(conn, sid, snapshot)?;
    insert_selection(conn, sid, &snapshot.selection)?;

    let keep: BTreeSet<i64> = snapshot.path_to_path_links.iter().map(|l| l.id).collect();
    for link in snapshot_links(conn, sid)? {
        if !keep.contains(&link.id) {
            delete_snapshot_link(conn, sid, link.id)?;
        }
    }
    Ok(())
}

pub fn delete_snapshot(conn: &Connection, sid: i64) -> Result<()> {
    conn.execute("DELETE FROM snapshots WHERE id = ?1", [sid])?;
    Ok(())
}

fn snapshot_links(conn: &Connection, sid: i64) -> Result<Vec<PathToPathLink>> {
    let mut stmt = conn.prepare(
        "SELECT id, link_type, source_path, target_path, description
         FROM snapshot_path_links WHERE snapshot_id = ?1 ORDER BY id",
    )?;
    let links = stmt
        .query_map([sid], |row| {
            Ok(PathToPathLink {
                id: row.get(0)?,
                link_type: row.get(1)?,
                source_path: row.get(2)?,
                target_path: row.get(3)?,
                description: row.get(4)?,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(links)
}

pub fn insert_snapshot_link(
    conn: &Connection,
    sid: i64,
    link_type: &str,
    source_path: &str,
    target_path: &str,
    description: Option<&str>,
) -> Result<PathToPathLink> {
    conn.execute(
        "INSERT INTO snapshot_path_links
            (snapshot_id, link_type, source_path, target_path, description)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![sid, link_type, source_path, target_path, description],
    )
    .map_err(|e| {
        map_unique(
            e,
            EntityKind::PathToPathLink,
            describe(link_type, source_path, target_path),
        )
    })?;
    Ok(PathToPathLink {
        id: conn.last_insert_rowid(),
        link_type: link_type.to_string(),
        source_path: source_path.to_string(),
        target_path: target_path.to_string(),
        description: description.map(str::to_string),
    })
}

pub fn delete_snapshot_link(conn: &Connection, sid: i64, id: i64) -> Result<bool> {
    let removed = conn.execute(
        "DELETE FROM snapshot_path_links WHERE snapshot_id = ?1 AND id = ?2",
        params![sid, id],
    )?;
    Ok(removed > 0)
}

/// Baselines and product instance iterations pinning any iteration of a
/// revision, described for error reporting
pub fn revision_references(conn: &Connection, revision: &RevisionKey) -> Result<Vec<String>> {
    let master = &revision.master;
    let mut stmt = conn.prepare(
        "SELECT 'baseline ' || b.workspace || '/' || b.ci_id || ':' || b.name
         FROM snapshot_items s JOIN baselines b ON b.snapshot_id = s.snapshot_id
         WHERE s.workspace = ?1 AND s.kind = ?2 AND s.master_id = ?3 AND s.version = ?4
         UNION
         SELECT 'product instance ' || p.workspace || '/' || p.ci_id || '#' || p.serial_number
                || ' iteration ' || p.iteration
         FROM snapshot_items s JOIN instance_iterations p ON p.snapshot_id = s.snapshot_id
         WHERE s.workspace = ?1 AND s.kind = ?2 AND s.master_id = ?3 AND s.version = ?4
         ORDER BY 1",
    )?;
    let refs = stmt
        .query_map(
            params![master.workspace, master.kind, master.id, revision.version],
            |row| row.get(0),
        )?
        .collect::<rusqlite::Result<Vec<String>>>()?;
    Ok(refs)
}

// =========================================================================
// Baselines
// =========================================================================

#[allow(clippy::too_many_arguments)]
pub fn insert_baseline(
    conn: &Connection,
    ci: &ConfigurationItemKey,
    name: &str,
    description: Option<&str>,
    baseline_type: BaselineType,
    author: &str,
    created: DateTime<Utc>,
    snapshot_id: i64,
) -> Result<i64> {
    conn.execute(
        "INSERT INTO baselines
            (workspace, ci_id, name, description, baseline_type, author, created, snapshot_id)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            ci.workspace,
            ci.id,
            name,
            description,
            baseline_type,
            author,
            created,
            snapshot_id
        ],
    )
    .map_err(|e| map_unique(e, EntityKind::Baseline, format!("{}:{}", ci, name)))?;
    Ok(conn.last_insert_rowid())
}

pub fn baseline_name_taken(conn: &Connection, ci: &ConfigurationItemKey, name: &str) -> Result<bool> {
    let found: Option<i64> = conn
        .query_row(
            "SELECT id FROM baselines WHERE workspace = ?1 AND ci_id = ?2 AND name = ?3",
            params![ci.workspace, ci.id, name],
            |row| row.get(0),
        )
        .optional()?;
    Ok(found.is_some())
}

struct BaselineRow {
    id: i64,
    ci: ConfigurationItemKey,
    name: String,
    description: Option<String>,
    baseline_type: BaselineType,
    author: String,
    created: DateTime<Utc>,
    snapshot_id: i64,
}

const BASELINE_COLUMNS: &str =
    "id, workspace, ci_id, name, description, baseline_type, author, created, snapshot_id";

fn baseline_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<BaselineRow> {
    Ok(BaselineRow {
        id: row.get(0)?,
        ci: ConfigurationItemKey::new(row.get::<_, String>(1)?, row.get::<_, String>(2)?),
        name: row.get(3)?,
        description: row.get(4)?,
        baseline_type: row.get(5)?,
        author: row.get(6)?,
        created: row.get(7)?,
        snapshot_id: row.get(8)?,
    })
}

fn hydrate_baseline(conn: &Connection, row: BaselineRow) -> Result<ProductBaseline> {
    Ok(ProductBaseline {
        id: row.id,
        ci: row.ci,
        name: row.name,
        description: row.description,
        baseline_type: row.baseline_type,
        author: row.author,
        created: row.created,
        snapshot: load_snapshot(conn, row.snapshot_id)?,
    })
}

pub fn get_baseline(conn: &Connection, id: i64) -> Result<ProductBaseline> {
    let row = conn
        .query_row(
            &format!("SELECT {} FROM baselines WHERE id = ?1", BASELINE_COLUMNS),
            [id],
            baseline_row,
        )
        .optional()?
        .ok_or_else(|| PlmError::not_found(EntityKind::Baseline, id))?;
    hydrate_baseline(conn, row)
}

pub fn list_baselines(conn: &Connection, ci: &ConfigurationItemKey) -> Result<Vec<ProductBaseline>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM baselines WHERE workspace = ?1 AND ci_id = ?2 ORDER BY id",
        BASELINE_COLUMNS
    ))?;
    let rows = stmt
        .query_map(params![ci.workspace, ci.id], baseline_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    rows.into_iter()
        .map(|row| hydrate_baseline(conn, row))
        .collect()
}

pub fn baseline_snapshot_id(conn: &Connection, id: i64) -> Result<i64> {
    conn.query_row("SELECT snapshot_id FROM baselines WHERE id = ?1", [id], |row| {
        row.get(0)
    })
    .optional()?
    .ok_or_else(|| PlmError::not_found(EntityKind::Baseline, id))
}

pub fn delete_baseline(conn: &Connection, id: i64) -> Result<()> {
    let sid = baseline_snapshot_id(conn, id)?;
    conn.execute("DELETE FROM baselines WHERE id = ?1", [id])?;
    delete_snapshot(conn, sid)
}

/// Product instances with at least one iteration based on a baseline
pub fn instances_based_on(conn: &Connection, baseline: i64) -> Result<Vec<ProductInstanceKey>> {
    let mut stmt = conn.prepare(
        "SELECT DISTINCT workspace, ci_id, serial_number FROM instance_iterations
         WHERE based_on = ?1 ORDER BY workspace, ci_id, serial_number",
    )?;
    let keys = stmt
        .query_map([baseline], |row| {
            Ok(ProductInstanceKey::new(
                ConfigurationItemKey::new(row.get::<_, String>(0)?, row.get::<_, String>(1)?),
                row.get::<_, String>(2)?,
            ))
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(keys)
}

// =========================================================================
// Product instances
// =========================================================================

pub fn insert_instance(
    conn: &Connection,
    key: &ProductInstanceKey,
    author: &str,
    created: DateTime<Utc>,
) -> Result<()> {
    conn.execute(
        "INSERT INTO product_instances (workspace, ci_id, serial_number, author, created)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![key.ci.workspace, key.ci.id, key.serial_number, author, created],
    )
    .map_err(|e| map_unique(e, EntityKind::ProductInstance, key))?;
    Ok(())
}

/// Checkout state of a product instance, `NotFound` when absent
pub fn instance_checkout(conn: &Connection, key: &ProductInstanceKey) -> Result<CheckoutState> {
    conn.query_row(
        "SELECT checkout_user, checkout_date FROM product_instances
         WHERE workspace = ?1 AND ci_id = ?2 AND serial_number = ?3",
        params![key.ci.workspace, key.ci.id, key.serial_number],
        |row| Ok(CheckoutState::from_columns(row.get(0)?, row.get(1)?)),
    )
    .optional()?
    .ok_or_else(|| PlmError::not_found(EntityKind::ProductInstance, key))
}

pub fn try_acquire_instance_checkout(
    conn: &Connection,
    key: &ProductInstanceKey,
    user: &str,
    now: DateTime<Utc>,
) -> Result<bool> {
    let changed = conn.execute(
        "UPDATE product_instances SET checkout_user = ?1, checkout_date = ?2
         WHERE workspace = ?3 AND ci_id = ?4 AND serial_number = ?5 AND checkout_user IS NULL",
        params![user, now, key.ci.workspace, key.ci.id, key.serial_number],
    )?;
    Ok(changed == 1)
}

pub fn release_instance_checkout(conn: &Connection, key: &ProductInstanceKey) -> Result<()> {
    conn.execute(
        "UPDATE product_instances SET checkout_user = NULL, checkout_date = NULL
         WHERE workspace = ?1 AND ci_id = ?2 AND serial_number = ?3",
        params![key.ci.workspace, key.ci.id, key.serial_number],
    )?;
    Ok(())
}

pub fn delete_instance(conn: &Connection, key: &ProductInstanceKey) -> Result<()> {
    conn.execute(
        "DELETE FROM product_instances WHERE workspace = ?1 AND ci_id = ?2 AND serial_number = ?3",
        params![key.ci.workspace, key.ci.id, key.serial_number],
    )?;
    Ok(())
}

pub fn list_instances(
    conn: &Connection,
    ci: &ConfigurationItemKey,
) -> Result<Vec<ProductInstanceKey>> {
    let mut stmt = conn.prepare(
        "SELECT serial_number FROM product_instances
         WHERE workspace = ?1 AND ci_id = ?2 ORDER BY serial_number",
    )?;
    let keys = stmt
        .query_map(params![ci.workspace, ci.id], |row| {
            Ok(ProductInstanceKey::new(ci.clone(), row.get::<_, String>(0)?))
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(keys)
}

/// Identity columns of an instance iteration row
#[derive(Debug, Clone)]
pub struct InstanceIterationRow {
    pub piid: i64,
    pub number: u32,
    pub based_on: i64,
    pub snapshot_id: i64,
    pub checkin_date: Option<DateTime<Utc>>,
}

impl InstanceIterationRow {
    pub fn is_checked_in(&self) -> bool {
        self.checkin_date.is_some()
    }
}

pub fn instance_iteration_rows(
    conn: &Connection,
    key: &ProductInstanceKey,
) -> Result<Vec<InstanceIterationRow>> {
    let mut stmt = conn.prepare(
        "SELECT piid, iteration, based_on, snapshot_id, checkin_date FROM instance_iterations
         WHERE workspace = ?1 AND ci_id = ?2 AND serial_number = ?3 ORDER BY iteration",
    )?;
    let rows = stmt
        .query_map(
            params![key.ci.workspace, key.ci.id, key.serial_number],
            |row| {
                Ok(InstanceIterationRow {
                    piid: row.get(0)?,
                    number: row.get(1)?,
                    based_on: row.get(2)?,
                    snapshot_id: row.get(3)?,
                    checkin_date: row.get(4)?,
                })
            },
        )?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}

#[allow(clippy::too_many_arguments)]
pub fn insert_instance_iteration(
    conn: &Connection,
    key: &ProductInstanceKey,
    number: u32,
    based_on: i64,
    author: &str,
    created: DateTime<Utc>,
    snapshot_id: i64,
    checkin_date: Option<DateTime<Utc>>,
) -> Result<i64> {
    conn.execute(
        "INSERT INTO instance_iterations
            (workspace, ci_id, serial_number, iteration, based_on, author, created, snapshot_id)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            key.ci.workspace,
            key.ci.id,
            key.serial_number,
            number,
            based_on,
            author,
            created,
            snapshot_id
        ],
    )?;
    let piid = conn.last_insert_rowid();
    if let Some(date) = checkin_date {
        checkin_instance_iteration(conn, piid, date, None)?;
    }
    Ok(piid)
}

pub fn checkin_instance_iteration(
    conn: &Connection,
    piid: i64,
    now: DateTime<Utc>,
    note: Option<&str>,
) -> Result<()> {
    conn.execute(
        "UPDATE instance_iterations SET checkin_date = ?1, note = COALESCE(?2, note)
         WHERE piid = ?3",
        params![now, note, piid],
    )?;
    Ok(())
}

/// Point a working copy at another baseline and snapshot
pub fn rebase_instance_iteration(
    conn: &Connection,
    piid: i64,
    based_on: i64,
    snapshot_id: i64,
) -> Result<()> {
    conn.execute(
        "UPDATE instance_iterations SET based_on = ?1, snapshot_id = ?2 WHERE piid = ?3",
        params![based_on, snapshot_id, piid],
    )?;
    Ok(())
}

pub fn delete_instance_iteration(conn: &Connection, piid: i64) -> Result<()> {
    conn.execute("DELETE FROM instance_iterations WHERE piid = ?1", [piid])?;
    Ok(())
}

pub fn load_instance_files(conn: &Connection, piid: i64) -> Result<Vec<BinaryResource>> {
    let mut stmt = conn.prepare(
        "SELECT full_name, length, last_modified FROM instance_files
         WHERE instance_iteration_id = ?1 ORDER BY full_name",
    )?;
    let files = stmt
        .query_map([piid], |row| {
            Ok(BinaryResource {
                full_name: row.get(0)?,
                length: u64::try_from(row.get::<_, i64>(1)?).unwrap_or(0),
                last_modified: row.get(2)?,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(files)
}

pub fn insert_instance_file(conn: &Connection, piid: i64, file: &BinaryResource) -> Result<()> {
    conn.execute(
        "INSERT INTO instance_files (instance_iteration_id, full_name, length, last_modified)
         VALUES (?1, ?2, ?3, ?4)",
        params![
            piid,
            file.full_name,
            i64::try_from(file.length).unwrap_or(i64::MAX),
            file.last_modified
        ],
    )
    .map_err(|e| map_unique(e, EntityKind::File, &file.full_name))?;
    Ok(())
}

pub fn load_instance(conn: &Connection, key: &ProductInstanceKey) -> Result<ProductInstance> {
    let (author, created, checkout) = conn
        .query_row(
            "SELECT author, created, checkout_user, checkout_date FROM product_instances
             WHERE workspace = ?1 AND ci_id = ?2 AND serial_number = ?3",
            params![key.ci.workspace, key.ci.id, key.serial_number],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, DateTime<Utc>>(1)?,
                    CheckoutState::from_columns(row.get(2)?, row.get(3)?),
                ))
            },
        )
        .optional()?
        .ok_or_else(|| PlmError::not_found(EntityKind::ProductInstance, key))?;

    let mut stmt = conn.prepare(
        "SELECT piid, iteration, based_on, author, created, checkin_date, note, snapshot_id
         FROM instance_iterations
         WHERE workspace = ?1 AND ci_id = ?2 AND serial_number = ?3 ORDER BY iteration",
    )?;
    let heads = stmt
        .query_map(
            params![key.ci.workspace, key.ci.id, key.serial_number],
            |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, u32>(1)?,
                    row.get::<_, i64>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, DateTime<Utc>>(4)?,
                    row.get::<_, Option<DateTime<Utc>>>(5)?,
                    row.get::<_, Option<String>>(6)?,
                    row.get::<_, i64>(7)?,
                ))
            },
        )?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    let iterations = heads
        .into_iter()
        .map(
            |(piid, iteration, based_on, author, created, checkin_date, note, sid)| {
                Ok(ProductInstanceIteration {
                    instance: key.clone(),
                    iteration,
                    based_on,
                    author,
                    created,
                    checkin_date,
                    note,
                    files: load_instance_files(conn, piid)?,
                    snapshot: load_snapshot(conn, sid)?,
                })
            },
        )
        .collect::<Result<Vec<_>>>()?;

    Ok(ProductInstance {
        key: key.clone(),
        author,
        created,
        checkout,
        iterations,
    })
}
