//! SQLite store
//!
//! A single connection guarded by a mutex. Every public operation of the
//! product manager runs inside one `IMMEDIATE` transaction taken through
//! [`Store::write`], so it either commits in full or leaves no trace.

pub mod effectivity;
pub mod masters;
pub mod path_links;
pub mod schema;
pub mod serialize;
pub mod snapshots;
pub mod structure;

use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;

use rusqlite::{Connection, OpenFlags, Transaction, TransactionBehavior};
use tracing::debug;

use crate::core::config::StoreConfig;
use crate::core::error::{PlmError, Result};

/// Transactional handle on the PLM database
pub struct Store {
    conn: Mutex<Connection>,
}

impl Store {
    /// Open (or create) a database file and bring its schema up to date
    pub fn open(path: &Path, config: &StoreConfig) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_CREATE,
        )?;
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get::<_, String>(0))?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        Self::init(conn, config)
    }

    /// Private in-memory database, lost on drop
    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?, &StoreConfig::default())
    }

    fn init(mut conn: Connection, config: &StoreConfig) -> Result<Self> {
        conn.busy_timeout(Duration::from_millis(config.busy_timeout_ms))?;
        conn.pragma_update(None, "foreign_keys", "ON")?;

        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        schema::migrate(&tx)?;
        tx.commit()?;

        debug!("store opened");
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Run `f` in a write transaction; commits on `Ok`, rolls back on `Err`
    pub fn write<T>(&self, f: impl FnOnce(&Transaction<'_>) -> Result<T>) -> Result<T> {
        let mut conn = self.conn.lock().map_err(|_| PlmError::LockPoisoned)?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let value = f(&tx)?;
        tx.commit()?;
        Ok(value)
    }

    /// Run `f` in a read transaction giving a consistent point-in-time view
    pub fn read<T>(&self, f: impl FnOnce(&Transaction<'_>) -> Result<T>) -> Result<T> {
        let mut conn = self.conn.lock().map_err(|_| PlmError::LockPoisoned)?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Deferred)?;
        f(&tx)
    }
}

/// Map a uniqueness failure to `AlreadyExists`, leaving other errors alone
pub(crate) fn map_unique(
    err: rusqlite::Error,
    entity: crate::core::error::EntityKind,
    key: impl std::fmt::Display,
) -> PlmError {
    match &err {
        rusqlite::Error::SqliteFailure(e, _)
            if e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
                || e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY =>
        {
            PlmError::already_exists(entity, key)
        }
        _ => PlmError::Database(err),
    }
}
