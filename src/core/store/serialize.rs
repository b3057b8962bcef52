//! SQLite serialization for typed enums
//!
//! Implements ToSql and FromSql for RevisionStatus, MasterKind and
//! BaselineType to enable typed storage and retrieval from SQLite.

use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};

use crate::core::entity::RevisionStatus;
use crate::core::identity::MasterKind;
use crate::entities::baseline::BaselineType;

fn invalid_data(message: String) -> FromSqlError {
    FromSqlError::Other(Box::new(std::io::Error::new(
        std::io::ErrorKind::InvalidData,
        message,
    )))
}

// =========================================================================
// RevisionStatus - ToSql/FromSql
// =========================================================================

impl ToSql for RevisionStatus {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.to_string()))
    }
}

impl FromSql for RevisionStatus {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        value.as_str()?.parse().map_err(invalid_data)
    }
}

// =========================================================================
// MasterKind - ToSql/FromSql
// =========================================================================

impl ToSql for MasterKind {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

impl FromSql for MasterKind {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        value
            .as_str()?
            .parse()
            .map_err(|e: crate::core::identity::IdParseError| invalid_data(e.to_string()))
    }
}

// =========================================================================
// BaselineType - ToSql/FromSql
// =========================================================================

impl ToSql for BaselineType {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.to_string()))
    }
}

impl FromSql for BaselineType {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        value.as_str()?.parse().map_err(invalid_data)
    }
}
