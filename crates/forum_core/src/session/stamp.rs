//! Audit stamping rules applied to pending writes right before a flush.
//!
//! # Invariants
//! - One stamp (time + principal) is shared by every entity in a flush.
//! - `created_*` fields are written only for newly added rows.
//! - `deleted_user_id` is written only on the transition into deletion.
//! - A row that is already deleted keeps its stored deletion date and
//!   principal.

use crate::model::audit::AuditEnvelope;
use crate::model::entity::UserId;
use chrono::{DateTime, Utc};

/// Soft-delete columns as currently persisted for one row.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct StoredDeletion {
    pub(crate) is_deleted: bool,
    pub(crate) deleted_date: Option<DateTime<Utc>>,
    pub(crate) deleted_user_id: Option<UserId>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct AuditStamp {
    pub(crate) now: DateTime<Utc>,
    pub(crate) user: Option<UserId>,
}

impl AuditStamp {
    pub(crate) fn apply_created(&self, audit: &mut AuditEnvelope) {
        audit.created_at = self.now;
        audit.updated_at = self.now;
        audit.created_user_id = self.user;
        audit.updated_user_id = self.user;
    }

    /// `stored` is the persisted soft-delete state of the row being modified.
    pub(crate) fn apply_modified(&self, audit: &mut AuditEnvelope, stored: &StoredDeletion) {
        audit.updated_at = self.now;
        audit.updated_user_id = self.user;
        if !audit.is_deleted {
            return;
        }
        if stored.is_deleted {
            audit.deleted_date = stored.deleted_date;
            audit.deleted_user_id = stored.deleted_user_id;
        } else if audit.deleted_date.is_some() {
            audit.deleted_user_id = self.user;
        }
    }
}
