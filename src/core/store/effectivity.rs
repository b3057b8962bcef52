//! Effectivity rows attached to revisions

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};

use crate::core::error::{PlmError, Result};
use crate::core::identity::ConfigurationItemKey;
use crate::entities::effectivity::{Effectivity, EffectivityRange};

fn bounds(range: &EffectivityRange) -> (String, Option<String>) {
    match range {
        EffectivityRange::SerialNumber { start, end } | EffectivityRange::Lot { start, end } => {
            (start.clone(), end.clone())
        }
        EffectivityRange::Date { start, end } => {
            (start.to_rfc3339(), end.map(|d| d.to_rfc3339()))
        }
    }
}

fn parse_date(value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|d| d.with_timezone(&Utc))
        .map_err(|e| PlmError::Config {
            message: format!("stored effectivity date '{}': {}", value, e),
        })
}

fn range_from_columns(kind: &str, start: String, end: Option<String>) -> Result<EffectivityRange> {
    match kind {
        "serial_number" => Ok(EffectivityRange::SerialNumber { start, end }),
        "lot" => Ok(EffectivityRange::Lot { start, end }),
        "date" => Ok(EffectivityRange::Date {
            start: parse_date(&start)?,
            end: end.as_deref().map(parse_date).transpose()?,
        }),
        other => Err(PlmError::Config {
            message: format!("unknown effectivity type '{}'", other),
        }),
    }
}

pub fn insert(
    conn: &Connection,
    rid: i64,
    name: &str,
    scope: Option<&ConfigurationItemKey>,
    range: &EffectivityRange,
) -> Result<i64> {
    let (start, end) = bounds(range);
    conn.execute(
        "INSERT INTO effectivities
            (revision_id, name, range_type, range_start, range_end, scope_workspace, scope_ci)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            rid,
            name,
            range.type_name(),
            start,
            end,
            scope.map(|s| &s.workspace),
            scope.map(|s| &s.id)
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn list(conn: &Connection, rid: i64) -> Result<Vec<Effectivity>> {
    let mut stmt = conn.prepare(
        "SELECT id, name, range_type, range_start, range_end, scope_workspace, scope_ci
         FROM effectivities WHERE revision_id = ?1 ORDER BY id",
    )?;
    let rows = stmt
        .query_map([rid], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, Option<String>>(4)?,
                row.get::<_, Option<String>>(5)?,
                row.get::<_, Option<String>>(6)?,
            ))
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    rows.into_iter()
        .map(|(id, name, kind, start, end, scope_ws, scope_ci)| {
            Ok(Effectivity {
                id,
                name,
                scope: scope_ws
                    .zip(scope_ci)
                    .map(|(ws, ci)| ConfigurationItemKey::new(ws, ci)),
                range: range_from_columns(&kind, start, end)?,
            })
        })
        .collect()
}

pub fn delete(conn: &Connection, rid: i64, id: i64) -> Result<bool> {
    let removed = conn.execute(
        "DELETE FROM effectivities WHERE revision_id = ?1 AND id = ?2",
        params![rid, id],
    )?;
    Ok(removed > 0)
}
