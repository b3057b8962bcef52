//! Usage links, substitutes and configuration items

use rusqlite::{params, Connection, OptionalExtension};

use crate::core::error::{EntityKind, PlmError, Result};
use crate::core::identity::{ConfigurationItemKey, MasterKey, RevisionKey};
use crate::core::store::map_unique;
use crate::entities::configuration::ConfigurationItem;
use crate::entities::part::{PartUsageLink, SubstituteLink, SubstituteSpec, UsageLinkSpec};

// =========================================================================
// Usage and substitute links
// =========================================================================

/// Usage links of an iteration in position order, substitutes included
pub fn load_components(conn: &Connection, iid: i64) -> Result<Vec<PartUsageLink>> {
    let mut stmt = conn.prepare(
        "SELECT id, component, amount, unit, optional, reference_description
         FROM usage_links WHERE iteration_id = ?1 ORDER BY position, id",
    )?;
    let mut links = stmt
        .query_map([iid], |row| {
            Ok(PartUsageLink {
                id: row.get(0)?,
                component: row.get(1)?,
                amount: row.get(2)?,
                unit: row.get(3)?,
                optional: row.get(4)?,
                reference_description: row.get(5)?,
                substitutes: Vec::new(),
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    for link in &mut links {
        link.substitutes = load_substitutes(conn, link.id)?;
    }
    Ok(links)
}

fn load_substitutes(conn: &Connection, usage_link_id: i64) -> Result<Vec<SubstituteLink>> {
    let mut stmt = conn.prepare(
        "SELECT id, substitute, amount, unit, reference_description
         FROM substitute_links WHERE usage_link_id = ?1 ORDER BY position, id",
    )?;
    let substitutes = stmt
        .query_map([usage_link_id], |row| {
            Ok(SubstituteLink {
                id: row.get(0)?,
                substitute: row.get(1)?,
                amount: row.get(2)?,
                unit: row.get(3)?,
                reference_description: row.get(4)?,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(substitutes)
}

/// Create a usage link with its substitutes; ids are assigned here
pub fn insert_usage_link(
    conn: &Connection,
    iid: i64,
    position: i64,
    spec: &UsageLinkSpec,
) -> Result<PartUsageLink> {
    conn.execute(
        "INSERT INTO usage_links
            (iteration_id, position, component, amount, unit, optional, reference_description)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            iid,
            position,
            spec.component,
            spec.amount,
            spec.unit,
            spec.optional,
            spec.reference_description
        ],
    )?;
    let id = conn.last_insert_rowid();

    let substitutes = spec
        .substitutes
        .iter()
        .enumerate()
        .map(|(idx, sub)| insert_substitute(conn, id, idx as i64, sub))
        .collect::<Result<Vec<_>>>()?;

    Ok(PartUsageLink {
        id,
        component: spec.component.clone(),
        amount: spec.amount,
        unit: spec.unit.clone(),
        optional: spec.optional,
        reference_description: spec.reference_description.clone(),
        substitutes,
    })
}

pub fn insert_substitute(
    conn: &Connection,
    usage_link_id: i64,
    position: i64,
    spec: &SubstituteSpec,
) -> Result<SubstituteLink> {
    conn.execute(
        "INSERT INTO substitute_links
            (usage_link_id, position, substitute, amount, unit, reference_description)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            usage_link_id,
            position,
            spec.substitute,
            spec.amount,
            spec.unit,
            spec.reference_description
        ],
    )?;
    Ok(SubstituteLink {
        id: conn.last_insert_rowid(),
        substitute: spec.substitute.clone(),
        amount: spec.amount,
        unit: spec.unit.clone(),
        reference_description: spec.reference_description.clone(),
    })
}

/// Next free position among an iteration's usage links
pub fn next_position(conn: &Connection, iid: i64) -> Result<i64> {
    Ok(conn.query_row(
        "SELECT COALESCE(MAX(position) + 1, 0) FROM usage_links WHERE iteration_id = ?1",
        [iid],
        |row| row.get(0),
    )?)
}

pub fn next_substitute_position(conn: &Connection, usage_link_id: i64) -> Result<i64> {
    Ok(conn.query_row(
        "SELECT COALESCE(MAX(position) + 1, 0) FROM substitute_links WHERE usage_link_id = ?1",
        [usage_link_id],
        |row| row.get(0),
    )?)
}

pub fn usage_link_position(conn: &Connection, id: i64) -> Result<i64> {
    conn.query_row(
        "SELECT position FROM usage_links WHERE id = ?1",
        [id],
        |row| row.get(0),
    )
    .optional()?
    .ok_or_else(|| PlmError::not_found(EntityKind::UsageLink, format!("u{}", id)))
}

pub fn delete_usage_link(conn: &Connection, id: i64) -> Result<()> {
    conn.execute("DELETE FROM usage_links WHERE id = ?1", [id])?;
    Ok(())
}

/// Components and substitutes used by any iteration of a part
pub fn components_of(conn: &Connection, workspace: &str, master_id: &str) -> Result<Vec<String>> {
    let mut stmt = conn.prepare(
        "SELECT u.component FROM usage_links u
         JOIN iterations i ON i.iid = u.iteration_id
         JOIN revisions r ON r.rid = i.revision_id
         WHERE r.workspace = ?1 AND r.kind = 'part' AND r.master_id = ?2
         UNION
         SELECT s.substitute FROM substitute_links s
         JOIN usage_links u ON u.id = s.usage_link_id
         JOIN iterations i ON i.iid = u.iteration_id
         JOIN revisions r ON r.rid = i.revision_id
         WHERE r.workspace = ?1 AND r.kind = 'part' AND r.master_id = ?2
         ORDER BY 1",
    )?;
    let ids = stmt
        .query_map(params![workspace, master_id], |row| row.get(0))?
        .collect::<rusqlite::Result<Vec<String>>>()?;
    Ok(ids)
}

/// Revisions of other parts whose structures use `master_id` as a component
/// or substitute
pub fn structure_references(
    conn: &Connection,
    workspace: &str,
    master_id: &str,
) -> Result<Vec<RevisionKey>> {
    let mut stmt = conn.prepare(
        "SELECT DISTINCT r.master_id, r.version
         FROM iterations i
         JOIN revisions r ON r.rid = i.revision_id
         WHERE r.workspace = ?1 AND r.kind = 'part' AND r.master_id <> ?2
           AND (
             EXISTS (SELECT 1 FROM usage_links u
                     WHERE u.iteration_id = i.iid AND u.component = ?2)
             OR EXISTS (SELECT 1 FROM usage_links u
                        JOIN substitute_links s ON s.usage_link_id = u.id
                        WHERE u.iteration_id = i.iid AND s.substitute = ?2)
           )
         ORDER BY r.master_id, r.version",
    )?;
    let sources = stmt
        .query_map(params![workspace, master_id], |row| {
            Ok(MasterKey::part(workspace, row.get::<_, String>(0)?)
                .revision(row.get::<_, String>(1)?))
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(sources)
}

// =========================================================================
// Configuration items
// =========================================================================

pub fn insert_configuration_item(conn: &Connection, ci: &ConfigurationItem) -> Result<()> {
    conn.execute(
        "INSERT INTO configuration_items (workspace, id, design_item, description, author, created)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            ci.key.workspace,
            ci.key.id,
            ci.design_item,
            ci.description,
            ci.author,
            ci.created
        ],
    )
    .map_err(|e| map_unique(e, EntityKind::ConfigurationItem, &ci.key))?;
    Ok(())
}

pub fn get_configuration_item(
    conn: &Connection,
    key: &ConfigurationItemKey,
) -> Result<ConfigurationItem> {
    conn.query_row(
        "SELECT design_item, description, author, created FROM configuration_items
         WHERE workspace = ?1 AND id = ?2",
        params![key.workspace, key.id],
        |row| {
            Ok(ConfigurationItem {
                key: key.clone(),
                design_item: row.get(0)?,
                description: row.get(1)?,
                author: row.get(2)?,
                created: row.get(3)?,
            })
        },
    )
    .optional()?
    .ok_or_else(|| PlmError::not_found(EntityKind::ConfigurationItem, key))
}

pub fn list_configuration_items(
    conn: &Connection,
    workspace: &str,
) -> Result<Vec<ConfigurationItemKey>> {
    let mut stmt =
        conn.prepare("SELECT id FROM configuration_items WHERE workspace = ?1 ORDER BY id")?;
    let keys = stmt
        .query_map([workspace], |row| {
            Ok(ConfigurationItemKey::new(workspace, row.get::<_, String>(0)?))
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(keys)
}

/// Configuration items rooted at a part master
pub fn items_designed_by(
    conn: &Connection,
    workspace: &str,
    master_id: &str,
) -> Result<Vec<ConfigurationItemKey>> {
    let mut stmt = conn.prepare(
        "SELECT id FROM configuration_items WHERE workspace = ?1 AND design_item = ?2 ORDER BY id",
    )?;
    let keys = stmt
        .query_map(params![workspace, master_id], |row| {
            Ok(ConfigurationItemKey::new(workspace, row.get::<_, String>(0)?))
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(keys)
}
