//! Discussion entities: categories, threads, posts and votes.
//!
//! # Invariants
//! - `Thread.category_id` and `Post.thread_id` reference existing rows;
//!   the schema enforces this, not the model.
//! - `PostVote.value` is either `1` or `-1`.

use crate::error::PersistenceResult;
use crate::model::audit::{parse_flag, AuditEnvelope};
use crate::model::entity::{Entity, EntityId, IntoValue, UserId};
use rusqlite::types::Value;
use rusqlite::Row;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Category {
    pub audit: AuditEnvelope,
    pub name: String,
    /// URL-safe unique key.
    pub slug: String,
    pub description: Option<String>,
    pub sort_order: i64,
}

impl Category {
    pub fn new(name: impl Into<String>, slug: impl Into<String>) -> Self {
        Self {
            audit: AuditEnvelope::default(),
            name: name.into(),
            slug: slug.into(),
            description: None,
            sort_order: 0,
        }
    }
}

impl Entity for Category {
    const TABLE: &'static str = "categories";
    const COLUMNS: &'static [&'static str] = &["name", "slug", "description", "sort_order"];

    fn audit(&self) -> &AuditEnvelope {
        &self.audit
    }

    fn audit_mut(&mut self) -> &mut AuditEnvelope {
        &mut self.audit
    }

    fn column_values(&self) -> Vec<Value> {
        vec![
            self.name.as_str().into_value(),
            self.slug.as_str().into_value(),
            self.description.as_deref().into_value(),
            self.sort_order.into_value(),
        ]
    }

    fn from_row(row: &Row<'_>) -> PersistenceResult<Self> {
        Ok(Self {
            audit: AuditEnvelope::from_row(row)?,
            name: row.get("name")?,
            slug: row.get("slug")?,
            description: row.get("description")?,
            sort_order: row.get("sort_order")?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Thread {
    pub audit: AuditEnvelope,
    pub category_id: EntityId,
    pub author_id: UserId,
    pub title: String,
    pub is_locked: bool,
    pub is_pinned: bool,
}

impl Thread {
    pub fn new(category_id: EntityId, author_id: UserId, title: impl Into<String>) -> Self {
        Self {
            audit: AuditEnvelope::default(),
            category_id,
            author_id,
            title: title.into(),
            is_locked: false,
            is_pinned: false,
        }
    }
}

impl Entity for Thread {
    const TABLE: &'static str = "threads";
    const COLUMNS: &'static [&'static str] =
        &["category_id", "author_id", "title", "is_locked", "is_pinned"];

    fn audit(&self) -> &AuditEnvelope {
        &self.audit
    }

    fn audit_mut(&mut self) -> &mut AuditEnvelope {
        &mut self.audit
    }

    fn column_values(&self) -> Vec<Value> {
        vec![
            self.category_id.into_value(),
            self.author_id.into_value(),
            self.title.as_str().into_value(),
            self.is_locked.into_value(),
            self.is_pinned.into_value(),
        ]
    }

    fn from_row(row: &Row<'_>) -> PersistenceResult<Self> {
        Ok(Self {
            audit: AuditEnvelope::from_row(row)?,
            category_id: row.get("category_id")?,
            author_id: row.get("author_id")?,
            title: row.get("title")?,
            is_locked: parse_flag(row.get("is_locked")?, "threads.is_locked")?,
            is_pinned: parse_flag(row.get("is_pinned")?, "threads.is_pinned")?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Post {
    pub audit: AuditEnvelope,
    pub thread_id: EntityId,
    pub author_id: UserId,
    /// Markdown source.
    pub body: String,
    /// Set when this post replies to another post in the same thread.
    pub parent_post_id: Option<EntityId>,
}

impl Post {
    pub fn new(thread_id: EntityId, author_id: UserId, body: impl Into<String>) -> Self {
        Self {
            audit: AuditEnvelope::default(),
            thread_id,
            author_id,
            body: body.into(),
            parent_post_id: None,
        }
    }
}

impl Entity for Post {
    const TABLE: &'static str = "posts";
    const COLUMNS: &'static [&'static str] = &["thread_id", "author_id", "body", "parent_post_id"];

    fn audit(&self) -> &AuditEnvelope {
        &self.audit
    }

    fn audit_mut(&mut self) -> &mut AuditEnvelope {
        &mut self.audit
    }

    fn column_values(&self) -> Vec<Value> {
        vec![
            self.thread_id.into_value(),
            self.author_id.into_value(),
            self.body.as_str().into_value(),
            self.parent_post_id.into_value(),
        ]
    }

    fn from_row(row: &Row<'_>) -> PersistenceResult<Self> {
        Ok(Self {
            audit: AuditEnvelope::from_row(row)?,
            thread_id: row.get("thread_id")?,
            author_id: row.get("author_id")?,
            body: row.get("body")?,
            parent_post_id: row.get("parent_post_id")?,
        })
    }
}

/// One user's up or down vote on a post.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostVote {
    pub audit: AuditEnvelope,
    pub post_id: EntityId,
    pub user_id: UserId,
    pub value: i64,
}

impl PostVote {
    pub fn upvote(post_id: EntityId, user_id: UserId) -> Self {
        Self::with_value(post_id, user_id, 1)
    }

    pub fn downvote(post_id: EntityId, user_id: UserId) -> Self {
        Self::with_value(post_id, user_id, -1)
    }

    fn with_value(post_id: EntityId, user_id: UserId, value: i64) -> Self {
        Self {
            audit: AuditEnvelope::default(),
            post_id,
            user_id,
            value,
        }
    }
}

impl Entity for PostVote {
    const TABLE: &'static str = "post_votes";
    const COLUMNS: &'static [&'static str] = &["post_id", "user_id", "value"];

    fn audit(&self) -> &AuditEnvelope {
        &self.audit
    }

    fn audit_mut(&mut self) -> &mut AuditEnvelope {
        &mut self.audit
    }

    fn column_values(&self) -> Vec<Value> {
        vec![
            self.post_id.into_value(),
            self.user_id.into_value(),
            self.value.into_value(),
        ]
    }

    fn from_row(row: &Row<'_>) -> PersistenceResult<Self> {
        Ok(Self {
            audit: AuditEnvelope::from_row(row)?,
            post_id: row.get("post_id")?,
            user_id: row.get("user_id")?,
            value: row.get("value")?,
        })
    }
}
