//! Account and account-restriction entities.

use crate::error::PersistenceResult;
use crate::model::audit::{parse_flag, AuditEnvelope};
use crate::model::entity::{Entity, IntoValue, UserId};
use chrono::{DateTime, Utc};
use rusqlite::types::Value;
use rusqlite::Row;
use serde::{Deserialize, Serialize};

/// Registered forum account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub audit: AuditEnvelope,
    /// Unique among active accounts.
    pub username: String,
    /// Unique among active accounts.
    pub email: String,
    pub password_hash: String,
    pub display_name: Option<String>,
    pub is_admin: bool,
}

impl User {
    pub fn new(
        username: impl Into<String>,
        email: impl Into<String>,
        password_hash: impl Into<String>,
    ) -> Self {
        Self {
            audit: AuditEnvelope::default(),
            username: username.into(),
            email: email.into(),
            password_hash: password_hash.into(),
            display_name: None,
            is_admin: false,
        }
    }
}

impl Entity for User {
    const TABLE: &'static str = "users";
    const COLUMNS: &'static [&'static str] = &[
        "username",
        "email",
        "password_hash",
        "display_name",
        "is_admin",
    ];

    fn audit(&self) -> &AuditEnvelope {
        &self.audit
    }

    fn audit_mut(&mut self) -> &mut AuditEnvelope {
        &mut self.audit
    }

    fn column_values(&self) -> Vec<Value> {
        vec![
            self.username.as_str().into_value(),
            self.email.as_str().into_value(),
            self.password_hash.as_str().into_value(),
            self.display_name.as_deref().into_value(),
            self.is_admin.into_value(),
        ]
    }

    fn from_row(row: &Row<'_>) -> PersistenceResult<Self> {
        Ok(Self {
            audit: AuditEnvelope::from_row(row)?,
            username: row.get("username")?,
            email: row.get("email")?,
            password_hash: row.get("password_hash")?,
            display_name: row.get("display_name")?,
            is_admin: parse_flag(row.get("is_admin")?, "users.is_admin")?,
        })
    }
}

/// One-shot credential reset token. Only the hash is stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PasswordResetToken {
    pub audit: AuditEnvelope,
    pub user_id: UserId,
    pub token_hash: String,
    pub expires_at: DateTime<Utc>,
    pub used_at: Option<DateTime<Utc>>,
}

impl PasswordResetToken {
    pub fn new(user_id: UserId, token_hash: impl Into<String>, expires_at: DateTime<Utc>) -> Self {
        Self {
            audit: AuditEnvelope::default(),
            user_id,
            token_hash: token_hash.into(),
            expires_at,
            used_at: None,
        }
    }

    /// Returns whether the token can still be redeemed at `now`.
    pub fn is_redeemable(&self, now: DateTime<Utc>) -> bool {
        self.audit.is_active() && self.used_at.is_none() && now < self.expires_at
    }
}

impl Entity for PasswordResetToken {
    const TABLE: &'static str = "password_reset_tokens";
    const COLUMNS: &'static [&'static str] = &["user_id", "token_hash", "expires_at", "used_at"];

    fn audit(&self) -> &AuditEnvelope {
        &self.audit
    }

    fn audit_mut(&mut self) -> &mut AuditEnvelope {
        &mut self.audit
    }

    fn column_values(&self) -> Vec<Value> {
        vec![
            self.user_id.into_value(),
            self.token_hash.as_str().into_value(),
            self.expires_at.into_value(),
            self.used_at.into_value(),
        ]
    }

    fn from_row(row: &Row<'_>) -> PersistenceResult<Self> {
        Ok(Self {
            audit: AuditEnvelope::from_row(row)?,
            user_id: row.get("user_id")?,
            token_hash: row.get("token_hash")?,
            expires_at: row.get("expires_at")?,
            used_at: row.get("used_at")?,
        })
    }
}

/// Account ban. `expires_at = None` means permanent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserBan {
    pub audit: AuditEnvelope,
    pub user_id: UserId,
    pub reason: String,
    pub expires_at: Option<DateTime<Utc>>,
}

impl UserBan {
    pub fn new(user_id: UserId, reason: impl Into<String>, expires_at: Option<DateTime<Utc>>) -> Self {
        Self {
            audit: AuditEnvelope::default(),
            user_id,
            reason: reason.into(),
            expires_at,
        }
    }
}

impl Entity for UserBan {
    const TABLE: &'static str = "user_bans";
    const COLUMNS: &'static [&'static str] = &["user_id", "reason", "expires_at"];

    fn audit(&self) -> &AuditEnvelope {
        &self.audit
    }

    fn audit_mut(&mut self) -> &mut AuditEnvelope {
        &mut self.audit
    }

    fn column_values(&self) -> Vec<Value> {
        vec![
            self.user_id.into_value(),
            self.reason.as_str().into_value(),
            self.expires_at.into_value(),
        ]
    }

    fn from_row(row: &Row<'_>) -> PersistenceResult<Self> {
        Ok(Self {
            audit: AuditEnvelope::from_row(row)?,
            user_id: row.get("user_id")?,
            reason: row.get("reason")?,
            expires_at: row.get("expires_at")?,
        })
    }
}

/// Posting restriction. Same shape as a ban, different enforcement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserMute {
    pub audit: AuditEnvelope,
    pub user_id: UserId,
    pub reason: String,
    pub expires_at: Option<DateTime<Utc>>,
}

impl UserMute {
    pub fn new(user_id: UserId, reason: impl Into<String>, expires_at: Option<DateTime<Utc>>) -> Self {
        Self {
            audit: AuditEnvelope::default(),
            user_id,
            reason: reason.into(),
            expires_at,
        }
    }
}

impl Entity for UserMute {
    const TABLE: &'static str = "user_mutes";
    const COLUMNS: &'static [&'static str] = &["user_id", "reason", "expires_at"];

    fn audit(&self) -> &AuditEnvelope {
        &self.audit
    }

    fn audit_mut(&mut self) -> &mut AuditEnvelope {
        &mut self.audit
    }

    fn column_values(&self) -> Vec<Value> {
        vec![
            self.user_id.into_value(),
            self.reason.as_str().into_value(),
            self.expires_at.into_value(),
        ]
    }

    fn from_row(row: &Row<'_>) -> PersistenceResult<Self> {
        Ok(Self {
            audit: AuditEnvelope::from_row(row)?,
            user_id: row.get("user_id")?,
            reason: row.get("reason")?,
            expires_at: row.get("expires_at")?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::PasswordResetToken;
    use chrono::{Duration, Utc};

    #[test]
    fn reset_token_is_redeemable_until_used_or_expired() {
        let now = Utc::now();
        let mut token = PasswordResetToken::new(1, "hash", now + Duration::minutes(15));
        assert!(token.is_redeemable(now));
        assert!(!token.is_redeemable(now + Duration::minutes(16)));

        token.used_at = Some(now);
        assert!(!token.is_redeemable(now));
    }
}
