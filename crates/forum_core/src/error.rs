//! Error taxonomy for the persistence core.
//!
//! # Responsibility
//! - Classify SQLite failures into caller-actionable categories.
//! - Surface state-machine misuse as distinct programmer errors.
//!
//! # Invariants
//! - Constraint failures keep the SQLite message verbatim.
//! - An interrupted statement is always reported as `Cancelled`.

use crate::model::audit::AuditValidationError;
use crate::model::entity::EntityId;
use rusqlite::ErrorCode;
use thiserror::Error;

pub type PersistenceResult<T> = Result<T, PersistenceError>;

#[derive(Debug, Error)]
pub enum PersistenceError {
    /// Connection, IO or locking failure talking to SQLite.
    #[error("store unavailable: {message}")]
    StoreUnavailable {
        message: String,
        #[source]
        source: Option<rusqlite::Error>,
    },
    /// SQLite rejected a write (unique, foreign key, check).
    #[error("constraint violation: {message}")]
    ConstraintViolation {
        message: String,
        #[source]
        source: rusqlite::Error,
    },
    #[error("invalid query: {0}")]
    InvalidQuery(String),
    #[error("a transaction is already active on this unit of work")]
    AlreadyInTransaction,
    #[error("no active transaction on this unit of work")]
    NoActiveTransaction,
    #[error("unit of work is closed")]
    UnitOfWorkClosed,
    #[error("operation cancelled")]
    Cancelled,
    /// `update`/`remove` called with an entity that was never flushed.
    #[error("entity in `{table}` has no store-assigned id")]
    MissingIdentity { table: &'static str },
    /// A pending modification targets a row that no longer exists.
    #[error("row {id} not found in `{table}`")]
    NotFound { table: &'static str, id: EntityId },
    #[error(transparent)]
    Validation(#[from] AuditValidationError),
    #[error("invalid persisted data: {0}")]
    InvalidData(String),
    #[error("database schema version {db_version} is newer than supported {latest_supported}")]
    UnsupportedSchemaVersion {
        db_version: u32,
        latest_supported: u32,
    },
    #[error("persistence session requires schema version {expected_version}, got {actual_version}")]
    UninitializedConnection {
        expected_version: u32,
        actual_version: u32,
    },
    #[error("repository requires table `{0}`")]
    MissingRequiredTable(&'static str),
    #[error("repository requires column `{column}` in table `{table}`")]
    MissingRequiredColumn {
        table: &'static str,
        column: &'static str,
    },
}

impl PersistenceError {
    /// Stable short code used in log events.
    pub fn code(&self) -> &'static str {
        match self {
            Self::StoreUnavailable { .. } => "store_unavailable",
            Self::ConstraintViolation { .. } => "constraint_violation",
            Self::InvalidQuery(_) => "invalid_query",
            Self::AlreadyInTransaction => "already_in_transaction",
            Self::NoActiveTransaction => "no_active_transaction",
            Self::UnitOfWorkClosed => "unit_of_work_closed",
            Self::Cancelled => "cancelled",
            Self::MissingIdentity { .. } => "missing_identity",
            Self::NotFound { .. } => "not_found",
            Self::Validation(_) => "validation",
            Self::InvalidData(_) => "invalid_data",
            Self::UnsupportedSchemaVersion { .. } => "unsupported_schema_version",
            Self::UninitializedConnection { .. } => "uninitialized_connection",
            Self::MissingRequiredTable(_) => "missing_required_table",
            Self::MissingRequiredColumn { .. } => "missing_required_column",
        }
    }
}

impl From<rusqlite::Error> for PersistenceError {
    fn from(err: rusqlite::Error) -> Self {
        match err.sqlite_error_code() {
            Some(ErrorCode::ConstraintViolation) => Self::ConstraintViolation {
                message: err.to_string(),
                source: err,
            },
            Some(ErrorCode::OperationInterrupted) => Self::Cancelled,
            _ => match err {
                rusqlite::Error::InvalidColumnType(..)
                | rusqlite::Error::FromSqlConversionFailure(..)
                | rusqlite::Error::IntegralValueOutOfRange(..)
                | rusqlite::Error::InvalidColumnName(_) => Self::InvalidData(err.to_string()),
                other => Self::StoreUnavailable {
                    message: other.to_string(),
                    source: Some(other),
                },
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::PersistenceError;
    use rusqlite::Connection;

    #[test]
    fn unique_failure_maps_to_constraint_violation() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch("CREATE TABLE t (name TEXT UNIQUE); INSERT INTO t VALUES ('a');")
            .unwrap();
        let err: PersistenceError = conn
            .execute("INSERT INTO t VALUES ('a');", [])
            .unwrap_err()
            .into();
        match err {
            PersistenceError::ConstraintViolation { message, .. } => {
                assert!(message.contains("UNIQUE"), "unexpected message: {message}");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn syntax_failure_maps_to_store_unavailable() {
        let conn = Connection::open_in_memory().unwrap();
        let err: PersistenceError = conn.execute("SELEC 1;", []).unwrap_err().into();
        assert_eq!(err.code(), "store_unavailable");
    }
}
