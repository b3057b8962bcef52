//! Database schema definitions and migrations
//!
//! The schema is versioned through the `schema_version` table; each version
//! is applied once, in order, inside the opening transaction.

use rusqlite::Connection;
use tracing::{debug, info};

use crate::core::error::{PlmError, Result};

/// Current schema version
pub const SCHEMA_VERSION: i32 = 2;

fn init_schema_version(conn: &Connection) -> Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
        )",
        [],
    )?;
    Ok(())
}

/// Get the current schema version from the database
pub fn get_schema_version(conn: &Connection) -> Result<i32> {
    init_schema_version(conn)?;

    let version: Option<i32> = conn.query_row(
        "SELECT MAX(version) FROM schema_version",
        [],
        |row| row.get(0),
    )?;

    Ok(version.unwrap_or(0))
}

fn set_schema_version(conn: &Connection, version: i32) -> Result<()> {
    conn.execute("INSERT INTO schema_version (version) VALUES (?1)", [version])?;
    Ok(())
}

/// Apply all pending migrations to bring the database up to date
pub fn migrate(conn: &Connection) -> Result<()> {
    let current_version = get_schema_version(conn)?;
    debug!(current_version, "checking schema version");

    if current_version >= SCHEMA_VERSION {
        return Ok(());
    }

    for version in (current_version + 1)..=SCHEMA_VERSION {
        info!(version, "applying schema migration");
        apply_migration(conn, version)?;
        set_schema_version(conn, version)?;
    }

    Ok(())
}

fn apply_migration(conn: &Connection, version: i32) -> Result<()> {
    match version {
        1 => migrate_v1(conn),
        2 => migrate_v2(conn),
        _ => Err(PlmError::Config {
            message: format!("unknown schema migration version {}", version),
        }),
    }
}

/// Versioned core: masters, revisions, iterations and their content,
/// structure links, configuration items and path-to-path links
fn migrate_v1(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE masters (
            workspace TEXT NOT NULL,
            kind TEXT NOT NULL CHECK(kind IN ('document', 'part')),
            id TEXT NOT NULL,
            name TEXT,
            author TEXT NOT NULL,
            created TEXT NOT NULL,
            PRIMARY KEY (workspace, kind, id)
        );

        CREATE TABLE revisions (
            rid INTEGER PRIMARY KEY AUTOINCREMENT,
            workspace TEXT NOT NULL,
            kind TEXT NOT NULL,
            master_id TEXT NOT NULL,
            version TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'wip'
                CHECK(status IN ('wip', 'released', 'obsolete')),
            checkout_user TEXT,
            checkout_date TEXT,
            author TEXT NOT NULL,
            created TEXT NOT NULL,
            released_by TEXT,
            released_at TEXT,
            obsoleted_by TEXT,
            obsoleted_at TEXT,
            UNIQUE (workspace, kind, master_id, version),
            FOREIGN KEY (workspace, kind, master_id)
                REFERENCES masters(workspace, kind, id) ON DELETE CASCADE
        );

        CREATE TABLE iterations (
            iid INTEGER PRIMARY KEY AUTOINCREMENT,
            revision_id INTEGER NOT NULL REFERENCES revisions(rid) ON DELETE CASCADE,
            iteration INTEGER NOT NULL CHECK(iteration >= 1),
            author TEXT NOT NULL,
            created TEXT NOT NULL,
            checkin_date TEXT,
            note TEXT,
            UNIQUE (revision_id, iteration)
        );

        CREATE TABLE attached_files (
            iteration_id INTEGER NOT NULL REFERENCES iterations(iid) ON DELETE CASCADE,
            full_name TEXT NOT NULL,
            length INTEGER NOT NULL,
            last_modified TEXT NOT NULL,
            PRIMARY KEY (iteration_id, full_name)
        );

        CREATE TABLE attributes (
            iteration_id INTEGER NOT NULL REFERENCES iterations(iid) ON DELETE CASCADE,
            position INTEGER NOT NULL,
            name TEXT NOT NULL,
            value_type TEXT NOT NULL,
            value TEXT NOT NULL,
            PRIMARY KEY (iteration_id, name)
        );

        CREATE TABLE document_links (
            iteration_id INTEGER NOT NULL REFERENCES iterations(iid) ON DELETE CASCADE,
            target_workspace TEXT NOT NULL,
            target_kind TEXT NOT NULL,
            target_id TEXT NOT NULL,
            target_version TEXT NOT NULL,
            comment TEXT,
            PRIMARY KEY (iteration_id, target_workspace, target_kind, target_id, target_version)
        );

        CREATE INDEX idx_document_links_target
            ON document_links(target_workspace, target_kind, target_id, target_version);

        CREATE TABLE usage_links (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            iteration_id INTEGER NOT NULL REFERENCES iterations(iid) ON DELETE CASCADE,
            position INTEGER NOT NULL,
            component TEXT NOT NULL,
            amount REAL NOT NULL,
            unit TEXT,
            optional INTEGER NOT NULL DEFAULT 0,
            reference_description TEXT
        );

        CREATE INDEX idx_usage_links_iteration ON usage_links(iteration_id);
        CREATE INDEX idx_usage_links_component ON usage_links(component);

        CREATE TABLE substitute_links (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            usage_link_id INTEGER NOT NULL REFERENCES usage_links(id) ON DELETE CASCADE,
            position INTEGER NOT NULL,
            substitute TEXT NOT NULL,
            amount REAL NOT NULL,
            unit TEXT,
            reference_description TEXT
        );

        CREATE INDEX idx_substitute_links_usage ON substitute_links(usage_link_id);
        CREATE INDEX idx_substitute_links_substitute ON substitute_links(substitute);

        CREATE TABLE configuration_items (
            workspace TEXT NOT NULL,
            id TEXT NOT NULL,
            design_item TEXT NOT NULL,
            description TEXT,
            author TEXT NOT NULL,
            created TEXT NOT NULL,
            PRIMARY KEY (workspace, id)
        );

        CREATE TABLE path_links (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            workspace TEXT NOT NULL,
            ci_id TEXT NOT NULL,
            link_type TEXT NOT NULL,
            source_path TEXT NOT NULL,
            target_path TEXT NOT NULL,
            description TEXT,
            UNIQUE (workspace, ci_id, link_type, source_path, target_path),
            FOREIGN KEY (workspace, ci_id)
                REFERENCES configuration_items(workspace, id) ON DELETE CASCADE
        );

        -- A checked-in iteration never changes again
        CREATE TRIGGER iterations_frozen
        BEFORE UPDATE ON iterations
        WHEN OLD.checkin_date IS NOT NULL
        BEGIN
            SELECT RAISE(ABORT, 'iteration is checked in');
        END;

        CREATE TRIGGER attached_files_frozen
        BEFORE INSERT ON attached_files
        WHEN (SELECT checkin_date FROM iterations WHERE iid = NEW.iteration_id) IS NOT NULL
        BEGIN
            SELECT RAISE(ABORT, 'iteration is checked in');
        END;

        CREATE TRIGGER attributes_frozen
        BEFORE INSERT ON attributes
        WHEN (SELECT checkin_date FROM iterations WHERE iid = NEW.iteration_id) IS NOT NULL
        BEGIN
            SELECT RAISE(ABORT, 'iteration is checked in');
        END;

        CREATE TRIGGER document_links_frozen
        BEFORE INSERT ON document_links
        WHEN (SELECT checkin_date FROM iterations WHERE iid = NEW.iteration_id) IS NOT NULL
        BEGIN
            SELECT RAISE(ABORT, 'iteration is checked in');
        END;

        CREATE TRIGGER usage_links_frozen
        BEFORE INSERT ON usage_links
        WHEN (SELECT checkin_date FROM iterations WHERE iid = NEW.iteration_id) IS NOT NULL
        BEGIN
            SELECT RAISE(ABORT, 'iteration is checked in');
        END;

        CREATE TRIGGER substitute_links_frozen
        BEFORE INSERT ON substitute_links
        WHEN (
            SELECT i.checkin_date FROM usage_links u
            JOIN iterations i ON i.iid = u.iteration_id
            WHERE u.id = NEW.usage_link_id
        ) IS NOT NULL
        BEGIN
            SELECT RAISE(ABORT, 'iteration is checked in');
        END;
        ",
    )?;

    Ok(())
}

/// Baselines, product instances and effectivities
///
/// Baselines and product instance iterations share the snapshot tables:
/// pinned iterations, selected paths and copied path-to-path links.
fn migrate_v2(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE snapshots (
            id INTEGER PRIMARY KEY AUTOINCREMENT
        );

        CREATE TABLE snapshot_items (
            snapshot_id INTEGER NOT NULL REFERENCES snapshots(id) ON DELETE CASCADE,
            workspace TEXT NOT NULL,
            kind TEXT NOT NULL,
            master_id TEXT NOT NULL,
            version TEXT NOT NULL,
            iteration INTEGER NOT NULL,
            PRIMARY KEY (snapshot_id, workspace, kind, master_id)
        );

        CREATE INDEX idx_snapshot_items_revision
            ON snapshot_items(workspace, kind, master_id, version);

        CREATE TABLE snapshot_paths (
            snapshot_id INTEGER NOT NULL REFERENCES snapshots(id) ON DELETE CASCADE,
            selection TEXT NOT NULL CHECK(selection IN ('substitute', 'optional')),
            path TEXT NOT NULL,
            PRIMARY KEY (snapshot_id, selection, path)
        );

        CREATE TABLE snapshot_path_links (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            snapshot_id INTEGER NOT NULL REFERENCES snapshots(id) ON DELETE CASCADE,
            link_type TEXT NOT NULL,
            source_path TEXT NOT NULL,
            target_path TEXT NOT NULL,
            description TEXT,
            UNIQUE (snapshot_id, link_type, source_path, target_path)
        );

        CREATE TABLE baselines (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            workspace TEXT NOT NULL,
            ci_id TEXT NOT NULL,
            name TEXT NOT NULL,
            description TEXT,
            baseline_type TEXT NOT NULL CHECK(baseline_type IN ('latest', 'released')),
            author TEXT NOT NULL,
            created TEXT NOT NULL,
            snapshot_id INTEGER NOT NULL REFERENCES snapshots(id),
            UNIQUE (workspace, ci_id, name),
            FOREIGN KEY (workspace, ci_id) REFERENCES configuration_items(workspace, id)
        );

        CREATE TABLE product_instances (
            workspace TEXT NOT NULL,
            ci_id TEXT NOT NULL,
            serial_number TEXT NOT NULL,
            author TEXT NOT NULL,
            created TEXT NOT NULL,
            checkout_user TEXT,
            checkout_date TEXT,
            PRIMARY KEY (workspace, ci_id, serial_number),
            FOREIGN KEY (workspace, ci_id) REFERENCES configuration_items(workspace, id)
        );

        CREATE TABLE instance_iterations (
            piid INTEGER PRIMARY KEY AUTOINCREMENT,
            workspace TEXT NOT NULL,
            ci_id TEXT NOT NULL,
            serial_number TEXT NOT NULL,
            iteration INTEGER NOT NULL CHECK(iteration >= 1),
            based_on INTEGER NOT NULL REFERENCES baselines(id),
            author TEXT NOT NULL,
            created TEXT NOT NULL,
            checkin_date TEXT,
            note TEXT,
            snapshot_id INTEGER NOT NULL REFERENCES snapshots(id),
            UNIQUE (workspace, ci_id, serial_number, iteration),
            FOREIGN KEY (workspace, ci_id, serial_number)
                REFERENCES product_instances(workspace, ci_id, serial_number) ON DELETE CASCADE
        );

        CREATE TABLE instance_files (
            instance_iteration_id INTEGER NOT NULL
                REFERENCES instance_iterations(piid) ON DELETE CASCADE,
            full_name TEXT NOT NULL,
            length INTEGER NOT NULL,
            last_modified TEXT NOT NULL,
            PRIMARY KEY (instance_iteration_id, full_name)
        );

        CREATE TABLE effectivities (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            revision_id INTEGER NOT NULL REFERENCES revisions(rid) ON DELETE CASCADE,
            name TEXT NOT NULL,
            range_type TEXT NOT NULL CHECK(range_type IN ('serial_number', 'date', 'lot')),
            range_start TEXT NOT NULL,
            range_end TEXT,
            scope_workspace TEXT,
            scope_ci TEXT
        );

        CREATE TRIGGER instance_iterations_frozen
        BEFORE UPDATE ON instance_iterations
        WHEN OLD.checkin_date IS NOT NULL
        BEGIN
            SELECT RAISE(ABORT, 'instance iteration is checked in');
        END;

        CREATE TRIGGER instance_files_frozen
        BEFORE INSERT ON instance_files
        WHEN (
            SELECT checkin_date FROM instance_iterations WHERE piid = NEW.instance_iteration_id
        ) IS NOT NULL
        BEGIN
            SELECT RAISE(ABORT, 'instance iteration is checked in');
        END;
        ",
    )?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_migrate_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        migrate(&conn).unwrap();
        assert_eq!(get_schema_version(&conn).unwrap(), SCHEMA_VERSION);
        migrate(&conn).unwrap();
        assert_eq!(get_schema_version(&conn).unwrap(), SCHEMA_VERSION);
    }

    #[test]
    fn test_checked_in_iteration_rejects_updates_and_content() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch("PRAGMA foreign_keys = ON;").unwrap();
        migrate(&conn).unwrap();

        conn.execute_batch(
            "INSERT INTO masters VALUES ('ws', 'part', 'P', NULL, 'alice', '2024-01-01');
             INSERT INTO revisions (workspace, kind, master_id, version, author, created)
                 VALUES ('ws', 'part', 'P', 'A', 'alice', '2024-01-01');
             INSERT INTO iterations (revision_id, iteration, author, created, checkin_date)
                 VALUES (1, 1, 'alice', '2024-01-01', '2024-01-02');",
        )
        .unwrap();

        let update = conn.execute("UPDATE iterations SET note = 'x' WHERE iid = 1", []);
        assert!(update.is_err());

        let insert = conn.execute(
            "INSERT INTO usage_links (iteration_id, position, component, amount)
             VALUES (1, 0, 'Q', 1.0)",
            [],
        );
        assert!(insert.is_err());
    }
}
