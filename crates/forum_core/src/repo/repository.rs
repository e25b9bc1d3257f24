//! Generic entity repository bound to a shared persistence session.
//!
//! # Responsibility
//! - Queue create/modify/soft-delete intents for one entity type.
//! - Serve reads that honor default soft-delete visibility.
//!
//! # Invariants
//! - `remove` never issues a physical delete.
//! - `update`/`remove`/`restore` require a store-assigned id.
//! - The include-deleted read paths are the only way to see tombstones.

use super::filter::{Filter, Query};
use super::select_columns;
use crate::error::PersistenceResult;
use crate::model::entity::{Entity, EntityId};
use crate::session::{PendingIntent, SharedSession, Tracked};
use std::fmt;
use std::marker::PhantomData;

pub struct Repository<T> {
    session: SharedSession,
    _entity: PhantomData<fn() -> T>,
}

impl<T: Entity> Repository<T> {
    /// Binds a repository to `session` after checking that the backing
    /// table exposes every envelope and domain column.
    pub fn try_new(session: SharedSession) -> PersistenceResult<Self> {
        session.lock().ensure_table_ready::<T>()?;
        Ok(Self {
            session,
            _entity: PhantomData,
        })
    }

    /// Queues `entity` for insertion at the next flush.
    pub fn add(&self, entity: T) -> PersistenceResult<Tracked<T>> {
        self.session.lock().track_added(entity)
    }

    pub fn add_range(&self, entities: impl IntoIterator<Item = T>) -> PersistenceResult<Vec<Tracked<T>>> {
        let mut session = self.session.lock();
        entities
            .into_iter()
            .map(|entity| session.track_added(entity))
            .collect()
    }

    /// Queues a modification of a previously flushed entity.
    pub fn update(&self, entity: T) -> PersistenceResult<Tracked<T>> {
        self.session.lock().track_modified(entity)
    }

    pub fn update_range(&self, entities: impl IntoIterator<Item = T>) -> PersistenceResult<Vec<Tracked<T>>> {
        let mut session = self.session.lock();
        entities
            .into_iter()
            .map(|entity| session.track_modified(entity))
            .collect()
    }

    /// Soft-deletes `entity`: sets the tombstone and deletion date, then
    /// queues it as a modification.
    pub fn remove(&self, mut entity: T) -> PersistenceResult<Tracked<T>> {
        let mut session = self.session.lock();
        let now = session.now();
        entity.audit_mut().mark_deleted(now);
        session.track_modified(entity)
    }

    pub fn remove_range(&self, entities: impl IntoIterator<Item = T>) -> PersistenceResult<Vec<Tracked<T>>> {
        let mut session = self.session.lock();
        let now = session.now();
        entities
            .into_iter()
            .map(|mut entity| {
                entity.audit_mut().mark_deleted(now);
                session.track_modified(entity)
            })
            .collect()
    }

    /// Clears the soft-delete envelope and queues the entity as a modification.
    pub fn restore(&self, mut entity: T) -> PersistenceResult<Tracked<T>> {
        entity.audit_mut().restore();
        self.session.lock().track_modified(entity)
    }

    /// Returns the row with `id` unless it is missing or soft-deleted.
    pub fn get_by_id(&self, id: EntityId) -> PersistenceResult<Option<T>> {
        self.load(id, false)
    }

    pub fn get_by_id_including_deleted(&self, id: EntityId) -> PersistenceResult<Option<T>> {
        self.load(id, true)
    }

    /// Builds a lazy query over rows matching `filter`.
    ///
    /// # Errors
    /// - `InvalidQuery` for unknown columns, empty `IN` lists, empty `LIKE`
    ///   patterns or empty and/or groups.
    pub fn query(&self, filter: Filter) -> PersistenceResult<Query<T>> {
        Query::new(self.session.clone(), &filter)
    }

    pub fn all(&self) -> PersistenceResult<Query<T>> {
        self.query(Filter::All)
    }

    /// Snapshot of the intents queued for this entity type.
    pub fn pending(&self) -> Vec<PendingIntent<T>> {
        self.session.lock().pending_of::<T>()
    }

    /// Returns whether both repositories write through the same session.
    pub fn shares_session_with<U: Entity>(&self, other: &Repository<U>) -> bool {
        std::sync::Arc::ptr_eq(&self.session, &other.session)
    }

    fn load(&self, id: EntityId, include_deleted: bool) -> PersistenceResult<Option<T>> {
        let visibility = if include_deleted {
            ""
        } else {
            " AND is_deleted = 0"
        };
        let sql = format!(
            "SELECT {} FROM {} WHERE id = ?1{visibility};",
            select_columns::<T>(),
            T::TABLE
        );

        let session = self.session.lock();
        let conn = session.connection()?;
        let mut stmt = conn.prepare_cached(&sql)?;
        let mut rows = stmt.query([id])?;
        if let Some(row) = rows.next()? {
            return Ok(Some(T::from_row(row)?));
        }
        Ok(None)
    }
}

impl<T> fmt::Debug for Repository<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Repository")
            .field("entity", &std::any::type_name::<T>())
            .finish()
    }
}
