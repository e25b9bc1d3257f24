//! Moderation and notification entities.

use crate::error::{PersistenceError, PersistenceResult};
use crate::model::audit::{parse_flag, AuditEnvelope};
use crate::model::entity::{Entity, EntityId, IntoValue, UserId};
use rusqlite::types::Value;
use rusqlite::Row;
use serde::{Deserialize, Serialize};

/// Message delivered to one user's inbox.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub audit: AuditEnvelope,
    pub recipient_id: UserId,
    /// Free-form category such as `reply` or `mention`.
    pub kind: String,
    pub message: String,
    pub is_read: bool,
}

impl Notification {
    pub fn new(recipient_id: UserId, kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            audit: AuditEnvelope::default(),
            recipient_id,
            kind: kind.into(),
            message: message.into(),
            is_read: false,
        }
    }
}

impl Entity for Notification {
    const TABLE: &'static str = "notifications";
    const COLUMNS: &'static [&'static str] = &["recipient_id", "kind", "message", "is_read"];

    fn audit(&self) -> &AuditEnvelope {
        &self.audit
    }

    fn audit_mut(&mut self) -> &mut AuditEnvelope {
        &mut self.audit
    }

    fn column_values(&self) -> Vec<Value> {
        vec![
            self.recipient_id.into_value(),
            self.kind.as_str().into_value(),
            self.message.as_str().into_value(),
            self.is_read.into_value(),
        ]
    }

    fn from_row(row: &Row<'_>) -> PersistenceResult<Self> {
        Ok(Self {
            audit: AuditEnvelope::from_row(row)?,
            recipient_id: row.get("recipient_id")?,
            kind: row.get("kind")?,
            message: row.get("message")?,
            is_read: parse_flag(row.get("is_read")?, "notifications.is_read")?,
        })
    }
}

/// Review state of a user report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportStatus {
    Open,
    Resolved,
    Dismissed,
}

impl ReportStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Resolved => "resolved",
            Self::Dismissed => "dismissed",
        }
    }

    fn parse(value: &str) -> Option<Self> {
        match value {
            "open" => Some(Self::Open),
            "resolved" => Some(Self::Resolved),
            "dismissed" => Some(Self::Dismissed),
            _ => None,
        }
    }
}

/// A user flagging a post for moderator attention.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Report {
    pub audit: AuditEnvelope,
    pub reporter_id: UserId,
    pub post_id: EntityId,
    pub reason: String,
    pub status: ReportStatus,
}

impl Report {
    pub fn new(reporter_id: UserId, post_id: EntityId, reason: impl Into<String>) -> Self {
        Self {
            audit: AuditEnvelope::default(),
            reporter_id,
            post_id,
            reason: reason.into(),
            status: ReportStatus::Open,
        }
    }
}

impl Entity for Report {
    const TABLE: &'static str = "reports";
    const COLUMNS: &'static [&'static str] = &["reporter_id", "post_id", "reason", "status"];

    fn audit(&self) -> &AuditEnvelope {
        &self.audit
    }

    fn audit_mut(&mut self) -> &mut AuditEnvelope {
        &mut self.audit
    }

    fn column_values(&self) -> Vec<Value> {
        vec![
            self.reporter_id.into_value(),
            self.post_id.into_value(),
            self.reason.as_str().into_value(),
            self.status.as_str().into_value(),
        ]
    }

    fn from_row(row: &Row<'_>) -> PersistenceResult<Self> {
        let status_text: String = row.get("status")?;
        let status = ReportStatus::parse(&status_text).ok_or_else(|| {
            PersistenceError::InvalidData(format!(
                "invalid report status `{status_text}` in reports.status"
            ))
        })?;

        Ok(Self {
            audit: AuditEnvelope::from_row(row)?,
            reporter_id: row.get("reporter_id")?,
            post_id: row.get("post_id")?,
            reason: row.get("reason")?,
            status,
        })
    }
}

/// Administrative action record kept for staff review.
///
/// Distinct from the per-row audit envelope: this is a business log entry
/// written explicitly by moderation use cases.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditLog {
    pub audit: AuditEnvelope,
    pub action: String,
    pub entity_type: String,
    pub entity_id: Option<EntityId>,
    pub details: Option<String>,
}

impl AuditLog {
    pub fn new(
        action: impl Into<String>,
        entity_type: impl Into<String>,
        entity_id: Option<EntityId>,
    ) -> Self {
        Self {
            audit: AuditEnvelope::default(),
            action: action.into(),
            entity_type: entity_type.into(),
            entity_id,
            details: None,
        }
    }
}

impl Entity for AuditLog {
    const TABLE: &'static str = "audit_logs";
    const COLUMNS: &'static [&'static str] = &["action", "entity_type", "entity_id", "details"];

    fn audit(&self) -> &AuditEnvelope {
        &self.audit
    }

    fn audit_mut(&mut self) -> &mut AuditEnvelope {
        &mut self.audit
    }

    fn column_values(&self) -> Vec<Value> {
        vec![
            self.action.as_str().into_value(),
            self.entity_type.as_str().into_value(),
            self.entity_id.into_value(),
            self.details.as_deref().into_value(),
        ]
    }

    fn from_row(row: &Row<'_>) -> PersistenceResult<Self> {
        Ok(Self {
            audit: AuditEnvelope::from_row(row)?,
            action: row.get("action")?,
            entity_type: row.get("entity_type")?,
            entity_id: row.get("entity_id")?,
            details: row.get("details")?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::ReportStatus;

    #[test]
    fn report_status_round_trips_through_db_text() {
        for status in [
            ReportStatus::Open,
            ReportStatus::Resolved,
            ReportStatus::Dismissed,
        ] {
            assert_eq!(ReportStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(ReportStatus::parse("closed"), None);
    }
}
