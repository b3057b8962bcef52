//! Path-to-path links owned by configuration items

use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::core::error::{EntityKind, PlmError, Result};
use crate::core::identity::ConfigurationItemKey;
use crate::core::path;
use crate::core::store::map_unique;
use crate::entities::configuration::PathToPathLink;

const COLUMNS: &str = "id, link_type, source_path, target_path, description";

fn link_row(row: &Row<'_>) -> rusqlite::Result<PathToPathLink> {
    Ok(PathToPathLink {
        id: row.get(0)?,
        link_type: row.get(1)?,
        source_path: row.get(2)?,
        target_path: row.get(3)?,
        description: row.get(4)?,
    })
}

/// Display key of a link's unique tuple
pub fn describe(link_type: &str, source: &str, target: &str) -> String {
    format!("{} [{}] -> [{}]", link_type, source, target)
}

pub fn insert(
    conn: &Connection,
    ci: &ConfigurationItemKey,
    link_type: &str,
    source_path: &str,
    target_path: &str,
    description: Option<&str>,
) -> Result<PathToPathLink> {
    conn.execute(
        "INSERT INTO path_links (workspace, ci_id, link_type, source_path, target_path, description)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            ci.workspace,
            ci.id,
            link_type,
            source_path,
            target_path,
            description
        ],
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

pub fn find_exact(
    conn: &Connection,
    ci: &ConfigurationItemKey,
    link_type: &str,
    source_path: &str,
    target_path: &str,
) -> Result<Option<PathToPathLink>> {
    let link = conn
        .query_row(
            &format!(
                "SELECT {} FROM path_links
                 WHERE workspace = ?1 AND ci_id = ?2 AND link_type = ?3
                   AND source_path = ?4 AND target_path = ?5",
                COLUMNS
            ),
            params![ci.workspace, ci.id, link_type, source_path, target_path],
            link_row,
        )
        .optional()?;
    Ok(link)
}

pub fn get(conn: &Connection, ci: &ConfigurationItemKey, id: i64) -> Result<PathToPathLink> {
    conn.query_row(
        &format!(
            "SELECT {} FROM path_links WHERE workspace = ?1 AND ci_id = ?2 AND id = ?3",
            COLUMNS
        ),
        params![ci.workspace, ci.id, id],
        link_row,
    )
    .optional()?
    .ok_or_else(|| PlmError::not_found(EntityKind::PathToPathLink, id))
}

pub fn list(conn: &Connection, ci: &ConfigurationItemKey) -> Result<Vec<PathToPathLink>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM path_links WHERE workspace = ?1 AND ci_id = ?2 ORDER BY id",
        COLUMNS
    ))?;
    let links = stmt
        .query_map(params![ci.workspace, ci.id], link_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(links)
}

pub fn list_by_type(
    conn: &Connection,
    ci: &ConfigurationItemKey,
    link_type: &str,
) -> Result<Vec<PathToPathLink>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM path_links
         WHERE workspace = ?1 AND ci_id = ?2 AND link_type = ?3 ORDER BY id",
        COLUMNS
    ))?;
    let links = stmt
        .query_map(params![ci.workspace, ci.id, link_type], link_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(links)
}

/// Links of any type between two given paths
pub fn list_between(
    conn: &Connection,
    ci: &ConfigurationItemKey,
    source_path: &str,
    target_path: &str,
) -> Result<Vec<PathToPathLink>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM path_links
         WHERE workspace = ?1 AND ci_id = ?2 AND source_path = ?3 AND target_path = ?4
         ORDER BY id",
        COLUMNS
    ))?;
    let links = stmt
        .query_map(params![ci.workspace, ci.id, source_path, target_path], link_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(links)
}

pub fn list_types(conn: &Connection, ci: &ConfigurationItemKey) -> Result<Vec<String>> {
    let mut stmt = conn.prepare(
        "SELECT DISTINCT link_type FROM path_links
         WHERE workspace = ?1 AND ci_id = ?2 ORDER BY link_type",
    )?;
    let types = stmt
        .query_map(params![ci.workspace, ci.id], |row| row.get(0))?
        .collect::<rusqlite::Result<Vec<String>>>()?;
    Ok(types)
}

pub fn delete(conn: &Connection, id: i64) -> Result<()> {
    conn.execute("DELETE FROM path_links WHERE id = ?1", [id])?;
    Ok(())
}

pub fn update_description(conn: &Connection, id: i64, description: Option<&str>) -> Result<()> {
    conn.execute(
        "UPDATE path_links SET description = ?1 WHERE id = ?2",
        params![description, id],
    )?;
    Ok(())
}

/// Every link in the workspace whose source or target path contains
/// `segment` as a whole segment, with its owning configuration item
pub fn containing_segment(
    conn: &Connection,
    workspace: &str,
    segment: &str,
) -> Result<Vec<(ConfigurationItemKey, PathToPathLink)>> {
    let [prefix, suffix, middle] = path::like_patterns(segment);
    let mut stmt = conn.prepare(&format!(
        "SELECT ci_id, {} FROM path_links
         WHERE workspace = ?1 AND (
             source_path = ?2 OR source_path LIKE ?3 OR source_path LIKE ?4 OR source_path LIKE ?5
             OR target_path = ?2 OR target_path LIKE ?3 OR target_path LIKE ?4 OR target_path LIKE ?5)
         ORDER BY id",
        COLUMNS
    ))?;
    let candidates = stmt
        .query_map(params![workspace, segment, prefix, suffix, middle], |row| {
            let ci = ConfigurationItemKey::new(workspace, row.get::<_, String>(0)?);
            let link = PathToPathLink {
                id: row.get(1)?,
                link_type: row.get(2)?,
                source_path: row.get(3)?,
                target_path: row.get(4)?,
                description: row.get(5)?,
            };
            Ok((ci, link))
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    Ok(candidates
        .into_iter()
        .filter(|(_, link)| {
            path::contains_segment(&link.source_path, segment)
                || path::contains_segment(&link.target_path, segment)
        })
        .collect())
}
