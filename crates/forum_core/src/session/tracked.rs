//! Explicit pending-write intents and their SQL execution.
//!
//! # Responsibility
//! - Hold caller entities between `add`/`update`/`remove` and the flush.
//! - Stage stamped copies into SQLite and publish them only on success.
//!
//! # Invariants
//! - A tracked entity is never changed by a flush that fails.
//! - `created_at`/`created_user_id` are never rewritten by an update.
//! - Deletion date and principal of an already-deleted row are never
//!   rewritten.

use super::stamp::{AuditStamp, StoredDeletion};
use crate::error::{PersistenceError, PersistenceResult};
use crate::model::audit::{parse_flag, AuditEnvelope, AUDIT_COLUMNS};
use crate::model::entity::{Entity, EntityId, IntoValue, UserId};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::types::Value;
use rusqlite::{params_from_iter, Connection, OptionalExtension};
use std::any::Any;
use std::fmt;
use std::sync::Arc;

/// Kind of write recorded for one entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryState {
    Added,
    Modified,
}

/// Shared handle on an entity handed to a repository.
///
/// After a successful flush the handle holds the stamped entity, including
/// the store-assigned id. Clones point at the same entity.
pub struct Tracked<T> {
    inner: Arc<Mutex<T>>,
}

impl<T: Entity> Tracked<T> {
    pub(crate) fn new(entity: T) -> Self {
        Self {
            inner: Arc::new(Mutex::new(entity)),
        }
    }

    /// Snapshot of the current entity value.
    pub fn get(&self) -> T {
        self.inner.lock().clone()
    }

    pub fn id(&self) -> Option<EntityId> {
        self.inner.lock().id()
    }

    /// Edits the entity in place. Pending writes pick the change up at flush.
    pub fn modify<R>(&self, edit: impl FnOnce(&mut T) -> R) -> R {
        let mut guard = self.inner.lock();
        edit(&mut *guard)
    }

    /// Returns whether both handles track the same entity.
    pub fn same_as(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    pub(crate) fn replace(&self, entity: T) {
        *self.inner.lock() = entity;
    }
}

impl<T> Clone for Tracked<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for Tracked<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Tracked").field(&*self.inner.lock()).finish()
    }
}

/// Typed view of one pending intent.
#[derive(Debug, Clone)]
pub struct PendingIntent<T> {
    pub state: EntryState,
    pub entity: Tracked<T>,
}

/// Type-erased pending write owned by the session.
pub(crate) trait PendingEntry: Send {
    fn table(&self) -> &'static str;
    fn as_any(&self) -> &dyn Any;
    /// Writes a stamped copy; the tracked entity is left untouched.
    fn stage(&self, conn: &Connection, stamp: &AuditStamp)
        -> PersistenceResult<Box<dyn StagedEntry>>;
}

/// A write that reached the store inside the current flush.
pub(crate) trait StagedEntry: Send {
    fn affected(&self) -> usize;
    /// Exposes the stamped copy through the tracked handle.
    fn publish(&self);
    /// Restores the pre-flush value after an outer rollback.
    fn revert(&self);
}

pub(crate) struct PendingWrite<T> {
    pub(crate) state: EntryState,
    pub(crate) tracked: Tracked<T>,
}

impl<T: Entity> PendingEntry for PendingWrite<T> {
    fn table(&self) -> &'static str {
        T::TABLE
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn stage(
        &self,
        conn: &Connection,
        stamp: &AuditStamp,
    ) -> PersistenceResult<Box<dyn StagedEntry>> {
        let before = self.tracked.get();
        let mut after = before.clone();

        let affected = match self.state {
            EntryState::Added => {
                stamp.apply_created(after.audit_mut());
                after.audit().validate()?;
                let id = insert_row(conn, &after)?;
                after.audit_mut().id = Some(id);
                1
            }
            EntryState::Modified => {
                let id = after
                    .id()
                    .ok_or(PersistenceError::MissingIdentity { table: T::TABLE })?;
                let stored = stored_deletion(conn, T::TABLE, id)?
                    .ok_or(PersistenceError::NotFound { table: T::TABLE, id })?;
                stamp.apply_modified(after.audit_mut(), &stored);
                after.audit().validate()?;
                update_row(conn, id, &after)?
            }
        };

        Ok(Box::new(StagedWrite {
            tracked: self.tracked.clone(),
            before,
            after,
            affected,
        }))
    }
}

struct StagedWrite<T> {
    tracked: Tracked<T>,
    before: T,
    after: T,
    affected: usize,
}

impl<T: Entity> StagedEntry for StagedWrite<T> {
    fn affected(&self) -> usize {
        self.affected
    }

    fn publish(&self) {
        self.tracked.replace(self.after.clone());
    }

    fn revert(&self) {
        self.tracked.replace(self.before.clone());
    }
}

/// Envelope values for every envelope column except `id`.
fn envelope_values(audit: &AuditEnvelope) -> Vec<Value> {
    vec![
        audit.created_at.into_value(),
        audit.updated_at.into_value(),
        audit.created_user_id.into_value(),
        audit.updated_user_id.into_value(),
        audit.is_deleted.into_value(),
        audit.deleted_date.into_value(),
        audit.deleted_user_id.into_value(),
    ]
}

fn insert_row<T: Entity>(conn: &Connection, entity: &T) -> PersistenceResult<EntityId> {
    let columns: Vec<&str> = AUDIT_COLUMNS[1..]
        .iter()
        .chain(T::COLUMNS.iter())
        .copied()
        .collect();
    let placeholders = (1..=columns.len())
        .map(|index| format!("?{index}"))
        .collect::<Vec<_>>()
        .join(", ");
    let sql = format!(
        "INSERT INTO {} ({}) VALUES ({placeholders});",
        T::TABLE,
        columns.join(", ")
    );

    let mut values = envelope_values(entity.audit());
    values.extend(entity.column_values());

    let mut stmt = conn.prepare_cached(&sql)?;
    stmt.execute(params_from_iter(values))?;
    Ok(conn.last_insert_rowid())
}

fn update_row<T: Entity>(conn: &Connection, id: EntityId, entity: &T) -> PersistenceResult<usize> {
    const MUTABLE_ENVELOPE: &[&str] = &[
        "updated_at",
        "updated_user_id",
        "is_deleted",
        "deleted_date",
        "deleted_user_id",
    ];

    let assignments = MUTABLE_ENVELOPE
        .iter()
        .chain(T::COLUMNS.iter())
        .enumerate()
        .map(|(index, column)| format!("{column} = ?{}", index + 1))
        .collect::<Vec<_>>();
    let id_placeholder = assignments.len() + 1;
    let sql = format!(
        "UPDATE {} SET {} WHERE id = ?{id_placeholder};",
        T::TABLE,
        assignments.join(", ")
    );

    let audit = entity.audit();
    let mut values = vec![
        audit.updated_at.into_value(),
        audit.updated_user_id.into_value(),
        audit.is_deleted.into_value(),
        audit.deleted_date.into_value(),
        audit.deleted_user_id.into_value(),
    ];
    values.extend(entity.column_values());
    values.push(id.into_value());

    let mut stmt = conn.prepare_cached(&sql)?;
    let changed = stmt.execute(params_from_iter(values))?;
    if changed == 0 {
        return Err(PersistenceError::NotFound {
            table: T::TABLE,
            id,
        });
    }
    Ok(changed)
}

/// Reads the persisted soft-delete columns, `None` when the row is missing.
fn stored_deletion(
    conn: &Connection,
    table: &'static str,
    id: EntityId,
) -> PersistenceResult<Option<StoredDeletion>> {
    let row = conn
        .query_row(
            &format!(
                "SELECT is_deleted, deleted_date, deleted_user_id FROM {table} WHERE id = ?1;"
            ),
            [id],
            |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, Option<DateTime<Utc>>>(1)?,
                    row.get::<_, Option<UserId>>(2)?,
                ))
            },
        )
        .optional()?;

    row.map(|(flag, deleted_date, deleted_user_id)| {
        Ok(StoredDeletion {
            is_deleted: parse_flag(flag, &format!("{table}.is_deleted"))?,
            deleted_date,
            deleted_user_id,
        })
    })
    .transpose()
}
