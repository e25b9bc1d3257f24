//! Audit envelope shared by every persisted entity.
//!
//! # Responsibility
//! - Carry identity, provenance and soft-delete state for one row.
//! - Provide lifecycle helpers for soft-delete semantics.
//!
//! # Invariants
//! - `created_at <= updated_at`.
//! - `is_deleted` is true exactly when `deleted_date` is set.
//! - `deleted_user_id` is never set on an active row.
//! - `id` is assigned by the store and never changed afterwards.

use crate::error::PersistenceResult;
use crate::model::entity::{EntityId, UserId};
use chrono::{DateTime, Utc};
use rusqlite::Row;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Envelope columns, in the order every table declares them.
pub const AUDIT_COLUMNS: &[&str] = &[
    "id",
    "created_at",
    "updated_at",
    "created_user_id",
    "updated_user_id",
    "is_deleted",
    "deleted_date",
    "deleted_user_id",
];

/// Provenance and soft-delete state carried by every entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEnvelope {
    /// Store-assigned identity. `None` until the first successful flush.
    pub id: Option<EntityId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub created_user_id: Option<UserId>,
    pub updated_user_id: Option<UserId>,
    /// Soft delete tombstone. Deleted rows stay in storage.
    pub is_deleted: bool,
    pub deleted_date: Option<DateTime<Utc>>,
    pub deleted_user_id: Option<UserId>,
}

impl Default for AuditEnvelope {
    fn default() -> Self {
        Self {
            id: None,
            created_at: DateTime::<Utc>::UNIX_EPOCH,
            updated_at: DateTime::<Utc>::UNIX_EPOCH,
            created_user_id: None,
            updated_user_id: None,
            is_deleted: false,
            deleted_date: None,
            deleted_user_id: None,
        }
    }
}

/// Envelope state that must never reach the store.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuditValidationError {
    #[error("created_at {created_at} is later than updated_at {updated_at}")]
    CreatedAfterUpdated {
        created_at: DateTime<Utc>,
        updated_at: DateTime<Utc>,
    },
    #[error("is_deleted is set but deleted_date is missing")]
    DeletedWithoutDate,
    #[error("deleted_date is set on an active row")]
    DateWithoutDeleted,
    #[error("deleted_user_id is set on an active row")]
    DeletedUserOnActiveRow,
}

impl AuditEnvelope {
    /// Returns whether default read paths should see this row.
    pub fn is_active(&self) -> bool {
        !self.is_deleted
    }

    /// Marks the row as softly deleted at `at`.
    ///
    /// Leaves an already-deleted row untouched so its original deletion
    /// date survives repeated removals.
    pub fn mark_deleted(&mut self, at: DateTime<Utc>) {
        if self.is_deleted {
            return;
        }
        self.is_deleted = true;
        self.deleted_date = Some(at);
    }

    /// Clears the whole soft-delete envelope.
    pub fn restore(&mut self) {
        self.is_deleted = false;
        self.deleted_date = None;
        self.deleted_user_id = None;
    }

    pub fn validate(&self) -> Result<(), AuditValidationError> {
        if self.created_at > self.updated_at {
            return Err(AuditValidationError::CreatedAfterUpdated {
                created_at: self.created_at,
                updated_at: self.updated_at,
            });
        }
        match (self.is_deleted, self.deleted_date.is_some()) {
            (true, false) => return Err(AuditValidationError::DeletedWithoutDate),
            (false, true) => return Err(AuditValidationError::DateWithoutDeleted),
            _ => {}
        }
        if !self.is_deleted && self.deleted_user_id.is_some() {
            return Err(AuditValidationError::DeletedUserOnActiveRow);
        }
        Ok(())
    }

    /// Decodes envelope columns from a row selected with [`AUDIT_COLUMNS`].
    pub fn from_row(row: &Row<'_>) -> PersistenceResult<Self> {
        Ok(Self {
            id: Some(row.get("id")?),
            created_at: row.get("created_at")?,
            updated_at: row.get("updated_at")?,
            created_user_id: row.get("created_user_id")?,
            updated_user_id: row.get("updated_user_id")?,
            is_deleted: parse_flag(row.get("is_deleted")?, "is_deleted")?,
            deleted_date: row.get("deleted_date")?,
            deleted_user_id: row.get("deleted_user_id")?,
        })
    }
}

/// Decodes a strict 0/1 INTEGER flag.
pub(crate) fn parse_flag(value: i64, column: &str) -> PersistenceResult<bool> {
    match value {
        0 => Ok(false),
        1 => Ok(true),
        other => Err(crate::error::PersistenceError::InvalidData(format!(
            "invalid {column} value `{other}`"
        ))),
    }
}
