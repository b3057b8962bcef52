//! Masters, revisions and iterations with their content rows

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::core::entity::{CheckoutState, RevisionStatus};
use crate::core::error::{EntityKind, PlmError, Result};
use crate::core::identity::{IterationKey, MasterKey, MasterKind, RevisionKey};
use crate::core::store::{map_unique, structure};
use crate::entities::content::{BinaryResource, DocumentLink, InstanceAttribute};
use crate::entities::master::{Iteration, Master, Revision, StatusChange};
use crate::entities::part::PartUsageLink;

// =========================================================================
// Masters
// =========================================================================

pub fn insert_master(conn: &Connection, master: &Master) -> Result<()> {
    conn.execute(
        "INSERT INTO masters (workspace, kind, id, name, author, created)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            master.key.workspace,
            master.key.kind,
            master.key.id,
            master.name,
            master.author,
            master.created
        ],
    )
    .map_err(|e| map_unique(e, EntityKind::Master, &master.key))?;
    Ok(())
}

pub fn get_master(conn: &Connection, key: &MasterKey) -> Result<Master> {
    conn.query_row(
        "SELECT name, author, created FROM masters
         WHERE workspace = ?1 AND kind = ?2 AND id = ?3",
        params![key.workspace, key.kind, key.id],
        |row| {
            Ok(Master {
                key: key.clone(),
                name: row.get(0)?,
                author: row.get(1)?,
                created: row.get(2)?,
            })
        },
    )
    .optional()?
    .ok_or_else(|| PlmError::not_found(EntityKind::Master, key))
}

pub fn master_exists(conn: &Connection, key: &MasterKey) -> Result<bool> {
    let found: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM masters WHERE workspace = ?1 AND kind = ?2 AND id = ?3",
            params![key.workspace, key.kind, key.id],
            |row| row.get(0),
        )
        .optional()?;
    Ok(found.is_some())
}

pub fn delete_master(conn: &Connection, key: &MasterKey) -> Result<()> {
    conn.execute(
        "DELETE FROM masters WHERE workspace = ?1 AND kind = ?2 AND id = ?3",
        params![key.workspace, key.kind, key.id],
    )?;
    Ok(())
}

// =========================================================================
// Revisions
// =========================================================================

/// Identity and lifecycle columns of a revision row
#[derive(Debug, Clone)]
pub struct RevisionRow {
    pub rid: i64,
    pub key: RevisionKey,
    pub status: RevisionStatus,
    pub checkout: CheckoutState,
    pub author: String,
    pub created: DateTime<Utc>,
    pub released: Option<StatusChange>,
    pub obsoleted: Option<StatusChange>,
}

const REVISION_COLUMNS: &str = "rid, version, status, checkout_user, checkout_date, author, created,
     released_by, released_at, obsoleted_by, obsoleted_at";

fn status_change(by: Option<String>, at: Option<DateTime<Utc>>) -> Option<StatusChange> {
    by.zip(at).map(|(by, at)| StatusChange { by, at })
}

fn revision_row(master: &MasterKey, row: &Row<'_>) -> rusqlite::Result<RevisionRow> {
    Ok(RevisionRow {
        rid: row.get(0)?,
        key: master.revision(row.get::<_, String>(1)?),
        status: row.get(2)?,
        checkout: CheckoutState::from_columns(row.get(3)?, row.get(4)?),
        author: row.get(5)?,
        created: row.get(6)?,
        released: status_change(row.get(7)?, row.get(8)?),
        obsoleted: status_change(row.get(9)?, row.get(10)?),
    })
}

/// Every revision of a master, oldest first
pub fn revisions_of(conn: &Connection, master: &MasterKey) -> Result<Vec<RevisionRow>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM revisions
         WHERE workspace = ?1 AND kind = ?2 AND master_id = ?3
         ORDER BY rid",
        REVISION_COLUMNS
    ))?;
    let rows = stmt
        .query_map(params![master.workspace, master.kind, master.id], |row| {
            revision_row(master, row)
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}

pub fn latest_revision(conn: &Connection, master: &MasterKey) -> Result<Option<RevisionRow>> {
    let row = conn
        .query_row(
            &format!(
                "SELECT {} FROM revisions
                 WHERE workspace = ?1 AND kind = ?2 AND master_id = ?3
                 ORDER BY rid DESC LIMIT 1",
                REVISION_COLUMNS
            ),
            params![master.workspace, master.kind, master.id],
            |row| revision_row(master, row),
        )
        .optional()?;
    Ok(row)
}

pub fn get_revision_row(conn: &Connection, key: &RevisionKey) -> Result<RevisionRow> {
    conn.query_row(
        &format!(
            "SELECT {} FROM revisions
             WHERE workspace = ?1 AND kind = ?2 AND master_id = ?3 AND version = ?4",
            REVISION_COLUMNS
        ),
        params![
            key.master.workspace,
            key.master.kind,
            key.master.id,
            key.version
        ],
        |row| revision_row(&key.master, row),
    )
    .optional()?
    .ok_or_else(|| PlmError::not_found(EntityKind::Revision, key))
}

pub fn insert_revision(
    conn: &Connection,
    key: &RevisionKey,
    author: &str,
    now: DateTime<Utc>,
    holder: Option<&str>,
) -> Result<i64> {
    conn.execute(
        "INSERT INTO revisions
            (workspace, kind, master_id, version, status, checkout_user, checkout_date, author, created)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        params![
            key.master.workspace,
            key.master.kind,
            key.master.id,
            key.version,
            RevisionStatus::Wip,
            holder,
            holder.map(|_| now),
            author,
            now
        ],
    )
    .map_err(|e| map_unique(e, EntityKind::Revision, key))?;
    Ok(conn.last_insert_rowid())
}

/// Compare-and-set the checkout holder; `false` when someone holds it already
pub fn try_acquire_checkout(
    conn: &Connection,
    rid: i64,
    user: &str,
    now: DateTime<Utc>,
) -> Result<bool> {
    let changed = conn.execute(
        "UPDATE revisions SET checkout_user = ?1, checkout_date = ?2
         WHERE rid = ?3 AND checkout_user IS NULL",
        params![user, now, rid],
    )?;
    Ok(changed == 1)
}

pub fn release_checkout(conn: &Connection, rid: i64) -> Result<()> {
    conn.execute(
        "UPDATE revisions SET checkout_user = NULL, checkout_date = NULL WHERE rid = ?1",
        [rid],
    )?;
    Ok(())
}

/// Record a forward status transition with who made it and when
pub fn set_status(
    conn: &Connection,
    rid: i64,
    status: RevisionStatus,
    change: &StatusChange,
) -> Result<()> {
    let sql = match status {
        RevisionStatus::Released => {
            "UPDATE revisions SET status = ?1, released_by = ?2, released_at = ?3 WHERE rid = ?4"
        }
        RevisionStatus::Obsolete => {
            "UPDATE revisions SET status = ?1, obsoleted_by = ?2, obsoleted_at = ?3 WHERE rid = ?4"
        }
        // WIP is never re-entered
        RevisionStatus::Wip => return Ok(()),
    };
    conn.execute(sql, params![status, change.by, change.at, rid])?;
    Ok(())
}

pub fn delete_revision(conn: &Connection, rid: i64) -> Result<()> {
    conn.execute("DELETE FROM revisions WHERE rid = ?1", [rid])?;
    Ok(())
}

/// Load a revision with every iteration and its content
pub fn load_revision(conn: &Connection, key: &RevisionKey) -> Result<Revision> {
    let row = get_revision_row(conn, key)?;
    let iterations = load_iterations(conn, &row)?;
    Ok(Revision {
        key: row.key,
        status: row.status,
        checkout: row.checkout,
        author: row.author,
        created: row.created,
        released: row.released,
        obsoleted: row.obsoleted,
        iterations,
    })
}

// =========================================================================
// Iterations
// =========================================================================

/// Identity columns of an iteration row
#[derive(Debug, Clone)]
pub struct IterationRow {
    pub iid: i64,
    pub number: u32,
    pub checkin_date: Option<DateTime<Utc>>,
}

impl IterationRow {
    pub fn is_checked_in(&self) -> bool {
        self.checkin_date.is_some()
    }
}

pub fn iteration_rows(conn: &Connection, rid: i64) -> Result<Vec<IterationRow>> {
    let mut stmt = conn.prepare(
        "SELECT iid, iteration, checkin_date FROM iterations
         WHERE revision_id = ?1 ORDER BY iteration",
    )?;
    let rows = stmt
        .query_map([rid], |row| {
            Ok(IterationRow {
                iid: row.get(0)?,
                number: row.get(1)?,
                checkin_date: row.get(2)?,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}

pub fn last_iteration_row(conn: &Connection, rid: i64) -> Result<Option<IterationRow>> {
    Ok(iteration_rows(conn, rid)?.pop())
}

pub fn iteration_id(conn: &Connection, rid: i64, key: &IterationKey) -> Result<i64> {
    conn.query_row(
        "SELECT iid FROM iterations WHERE revision_id = ?1 AND iteration = ?2",
        params![rid, key.iteration],
        |row| row.get(0),
    )
    .optional()?
    .ok_or_else(|| PlmError::not_found(EntityKind::Iteration, key))
}

fn load_iterations(conn: &Connection, revision: &RevisionRow) -> Result<Vec<Iteration>> {
    let mut stmt = conn.prepare(
        "SELECT iid, iteration, author, created, checkin_date, note FROM iterations
         WHERE revision_id = ?1 ORDER BY iteration",
    )?;
    let heads = stmt
        .query_map([revision.rid], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, u32>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, DateTime<Utc>>(3)?,
                row.get::<_, Option<DateTime<Utc>>>(4)?,
                row.get::<_, Option<String>>(5)?,
            ))
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    heads
        .into_iter()
        .map(|(iid, number, author, created, checkin_date, note)| {
            Ok(Iteration {
                key: revision.key.iteration(number),
                author,
                created,
                checkin_date,
                note,
                files: load_files(conn, iid)?,
                attributes: load_attributes(conn, iid)?,
                document_links: load_document_links(conn, iid)?,
                components: structure::load_components(conn, iid)?,
            })
        })
        .collect()
}

/// Insert an iteration with its content; returns the row id and the created
/// usage links, in the order of `iteration.components`
pub fn insert_iteration(
    conn: &Connection,
    rid: i64,
    iteration: &Iteration,
) -> Result<(i64, Vec<PartUsageLink>)> {
    conn.execute(
        "INSERT INTO iterations (revision_id, iteration, author, created, note)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            rid,
            iteration.key.iteration,
            iteration.author,
            iteration.created,
            iteration.note
        ],
    )
    .map_err(|e| map_unique(e, EntityKind::Iteration, &iteration.key))?;
    let iid = conn.last_insert_rowid();

    for file in &iteration.files {
        insert_file(conn, iid, file)?;
    }
    for attribute in &iteration.attributes {
        put_attribute(conn, iid, attribute)?;
    }
    for link in &iteration.document_links {
        insert_document_link(conn, iid, link)?;
    }
    let components = iteration
        .components
        .iter()
        .enumerate()
        .map(|(position, link)| {
            structure::insert_usage_link(conn, iid, position as i64, &link.to_spec())
        })
        .collect::<Result<Vec<_>>>()?;

    Ok((iid, components))
}

pub fn checkin_iteration(
    conn: &Connection,
    iid: i64,
    now: DateTime<Utc>,
    note: Option<&str>,
) -> Result<()> {
    conn.execute(
        "UPDATE iterations SET checkin_date = ?1, note = COALESCE(?2, note) WHERE iid = ?3",
        params![now, note, iid],
    )?;
    Ok(())
}

pub fn delete_iteration(conn: &Connection, iid: i64) -> Result<()> {
    conn.execute("DELETE FROM iterations WHERE iid = ?1", [iid])?;
    Ok(())
}

// =========================================================================
// Iteration content
// =========================================================================

fn load_files(conn: &Connection, iid: i64) -> Result<Vec<BinaryResource>> {
    let mut stmt = conn.prepare(
        "SELECT full_name, length, last_modified FROM attached_files
         WHERE iteration_id = ?1 ORDER BY full_name",
    )?;
    let files = stmt
        .query_map([iid], |row| {
            Ok(BinaryResource {
                full_name: row.get(0)?,
                length: u64::try_from(row.get::<_, i64>(1)?).unwrap_or(0),
                last_modified: row.get(2)?,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(files)
}

/// Full names of every file attached to an iteration
pub fn file_names(conn: &Connection, iid: i64) -> Result<Vec<String>> {
    Ok(load_files(conn, iid)?
        .into_iter()
        .map(|f| f.full_name)
        .collect())
}

pub fn insert_file(conn: &Connection, iid: i64, file: &BinaryResource) -> Result<()> {
    conn.execute(
        "INSERT INTO attached_files (iteration_id, full_name, length, last_modified)
         VALUES (?1, ?2, ?3, ?4)",
        params![
            iid,
            file.full_name,
            i64::try_from(file.length).unwrap_or(i64::MAX),
            file.last_modified
        ],
    )
    .map_err(|e| map_unique(e, EntityKind::File, &file.full_name))?;
    Ok(())
}

pub fn delete_file(conn: &Connection, iid: i64, full_name: &str) -> Result<bool> {
    let removed = conn.execute(
        "DELETE FROM attached_files WHERE iteration_id = ?1 AND full_name = ?2",
        params![iid, full_name],
    )?;
    Ok(removed > 0)
}

fn load_attributes(conn: &Connection, iid: i64) -> Result<Vec<InstanceAttribute>> {
    let mut stmt = conn.prepare(
        "SELECT name, value FROM attributes WHERE iteration_id = ?1 ORDER BY position",
    )?;
    let raw = stmt
        .query_map([iid], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    raw.into_iter()
        .map(|(name, value)| {
            Ok(InstanceAttribute {
                name,
                value: serde_json::from_str(&value)?,
            })
        })
        .collect()
}

/// Insert or replace an attribute, keeping its position when it exists
pub fn put_attribute(conn: &Connection, iid: i64, attribute: &InstanceAttribute) -> Result<()> {
    let value = serde_json::to_string(&attribute.value)?;
    let value_type = attribute.value.type_name();
    let position: i64 = conn.query_row(
        "SELECT COALESCE(
            (SELECT position FROM attributes WHERE iteration_id = ?1 AND name = ?2),
            (SELECT COUNT(*) FROM attributes WHERE iteration_id = ?1))",
        params![iid, attribute.name],
        |row| row.get(0),
    )?;
    conn.execute(
        "INSERT OR REPLACE INTO attributes (iteration_id, position, name, value_type, value)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![iid, position, attribute.name, value_type, value],
    )?;
    Ok(())
}

pub fn delete_attribute(conn: &Connection, iid: i64, name: &str) -> Result<bool> {
    let removed = conn.execute(
        "DELETE FROM attributes WHERE iteration_id = ?1 AND name = ?2",
        params![iid, name],
    )?;
    Ok(removed > 0)
}

pub fn load_document_links(conn: &Connection, iid: i64) -> Result<Vec<DocumentLink>> {
    let mut stmt = conn.prepare(
        "SELECT target_workspace, target_kind, target_id, target_version, comment
         FROM document_links WHERE iteration_id = ?1
         ORDER BY target_workspace, target_id, target_version",
    )?;
    let links = stmt
        .query_map([iid], |row| {
            let master = MasterKey::new(
                row.get::<_, String>(0)?,
                row.get::<_, MasterKind>(1)?,
                row.get::<_, String>(2)?,
            );
            Ok(DocumentLink {
                target: master.revision(row.get::<_, String>(3)?),
                comment: row.get(4)?,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(links)
}

pub fn insert_document_link(conn: &Connection, iid: i64, link: &DocumentLink) -> Result<()> {
    let target = &link.target;
    conn.execute(
        "INSERT INTO document_links
            (iteration_id, target_workspace, target_kind, target_id, target_version, comment)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            iid,
            target.master.workspace,
            target.master.kind,
            target.master.id,
            target.version,
            link.comment
        ],
    )
    .map_err(|e| map_unique(e, EntityKind::DocumentLink, target))?;
    Ok(())
}

pub fn delete_document_link(conn: &Connection, iid: i64, target: &RevisionKey) -> Result<bool> {
    let removed = conn.execute(
        "DELETE FROM document_links
         WHERE iteration_id = ?1 AND target_workspace = ?2 AND target_kind = ?3
           AND target_id = ?4 AND target_version = ?5",
        params![
            iid,
            target.master.workspace,
            target.master.kind,
            target.master.id,
            target.version
        ],
    )?;
    Ok(removed > 0)
}

/// Revisions of other masters whose iterations link to `target`
pub fn inbound_document_links(conn: &Connection, target: &RevisionKey) -> Result<Vec<RevisionKey>> {
    let mut stmt = conn.prepare(
        "SELECT DISTINCT r.workspace, r.kind, r.master_id, r.version
         FROM document_links d
         JOIN iterations i ON i.iid = d.iteration_id
         JOIN revisions r ON r.rid = i.revision_id
         WHERE d.target_workspace = ?1 AND d.target_kind = ?2
           AND d.target_id = ?3 AND d.target_version = ?4
           AND NOT (r.workspace = ?1 AND r.kind = ?2 AND r.master_id = ?3)
         ORDER BY r.master_id, r.version",
    )?;
    let sources = stmt
        .query_map(
            params![
                target.master.workspace,
                target.master.kind,
                target.master.id,
                target.version
            ],
            |row| {
                let master = MasterKey::new(
                    row.get::<_, String>(0)?,
                    row.get::<_, MasterKind>(1)?,
                    row.get::<_, String>(2)?,
                );
                Ok(master.revision(row.get::<_, String>(3)?))
            },
        )?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(sources)
}
