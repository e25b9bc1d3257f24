//! Transaction-scoped facade over one persistence session.
//!
//! # Responsibility
//! - Hand out memoized repositories that share one session.
//! - Drive the `Idle -> InTransaction -> Committed | RolledBack` lifecycle.
//!
//! # Invariants
//! - `Committed` and `RolledBack` are terminal; later calls fail with
//!   `UnitOfWorkClosed`, including writes made through the shared session.
//! - Any failure while a transaction is open rolls it back before the
//!   error reaches the caller.
//! - Dropping a unit of work with an open transaction rolls it back.

use crate::error::{PersistenceError, PersistenceResult};
use crate::model::board::{Category, Post, PostVote, Thread};
use crate::model::entity::Entity;
use crate::model::moderation::{AuditLog, Notification, Report};
use crate::model::user::{PasswordResetToken, User, UserBan, UserMute};
use crate::repo::Repository;
use crate::session::{
    CancellationToken, CurrentUserProvider, PersistenceSession, SharedSession,
};
use log::{error, info, warn};
use parking_lot::Mutex;
use rusqlite::Connection;
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnitOfWorkState {
    Idle,
    InTransaction,
    Committed,
    RolledBack,
}

impl UnitOfWorkState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Committed | Self::RolledBack)
    }
}

type RepositoryCache = HashMap<TypeId, Arc<dyn Any + Send + Sync>>;

pub struct UnitOfWork {
    session: SharedSession,
    state: UnitOfWorkState,
    repositories: Mutex<RepositoryCache>,
    disposed: bool,
}

impl UnitOfWork {
    pub fn new(session: PersistenceSession) -> Self {
        Self {
            session: session.into_shared(),
            state: UnitOfWorkState::Idle,
            repositories: Mutex::new(HashMap::new()),
            disposed: false,
        }
    }

    /// Opens a unit of work on a migrated connection with the system clock.
    pub fn open(
        conn: Connection,
        current_user: Arc<dyn CurrentUserProvider>,
    ) -> PersistenceResult<Self> {
        Ok(Self::new(PersistenceSession::new(conn, current_user)?))
    }

    pub fn state(&self) -> UnitOfWorkState {
        self.state
    }

    pub fn session(&self) -> &SharedSession {
        &self.session
    }

    /// Repository for `T`, built on first access and reused afterwards.
    pub fn repository<T: Entity>(&self) -> PersistenceResult<Arc<Repository<T>>> {
        self.ensure_usable()?;
        let mut cache = self.repositories.lock();
        if let Some(cached) = cache.get(&TypeId::of::<T>()) {
            if let Ok(repository) = Arc::clone(cached).downcast::<Repository<T>>() {
                return Ok(repository);
            }
        }

        let repository = Arc::new(Repository::<T>::try_new(Arc::clone(&self.session))?);
        cache.insert(TypeId::of::<T>(), repository.clone());
        Ok(repository)
    }

    pub fn users(&self) -> PersistenceResult<Arc<Repository<User>>> {
        self.repository()
    }

    pub fn password_reset_tokens(&self) -> PersistenceResult<Arc<Repository<PasswordResetToken>>> {
        self.repository()
    }

    pub fn user_bans(&self) -> PersistenceResult<Arc<Repository<UserBan>>> {
        self.repository()
    }

    pub fn user_mutes(&self) -> PersistenceResult<Arc<Repository<UserMute>>> {
        self.repository()
    }

    pub fn categories(&self) -> PersistenceResult<Arc<Repository<Category>>> {
        self.repository()
    }

    pub fn threads(&self) -> PersistenceResult<Arc<Repository<Thread>>> {
        self.repository()
    }

    pub fn posts(&self) -> PersistenceResult<Arc<Repository<Post>>> {
        self.repository()
    }

    pub fn post_votes(&self) -> PersistenceResult<Arc<Repository<PostVote>>> {
        self.repository()
    }

    pub fn notifications(&self) -> PersistenceResult<Arc<Repository<Notification>>> {
        self.repository()
    }

    pub fn reports(&self) -> PersistenceResult<Arc<Repository<Report>>> {
        self.repository()
    }

    pub fn audit_logs(&self) -> PersistenceResult<Arc<Repository<AuditLog>>> {
        self.repository()
    }

    /// Flushes pending writes.
    ///
    /// Outside a transaction the flush commits on its own; inside one it
    /// stays uncommitted until `commit_transaction`.
    ///
    /// # Errors
    /// Inside a transaction any failure rolls the transaction back and
    /// moves this unit of work to `RolledBack`.
    pub fn save_changes(&mut self, cancel: &CancellationToken) -> PersistenceResult<usize> {
        self.ensure_usable()?;
        let result = self.session.lock().flush(cancel);
        match result {
            Err(err) if self.state == UnitOfWorkState::InTransaction => Err(self.abort(err)),
            other => other,
        }
    }

    pub fn begin_transaction(&mut self, cancel: &CancellationToken) -> PersistenceResult<()> {
        self.ensure_usable()?;
        if self.state == UnitOfWorkState::InTransaction {
            return Err(PersistenceError::AlreadyInTransaction);
        }
        cancel.check()?;
        self.session.lock().begin()?;
        self.state = UnitOfWorkState::InTransaction;
        Ok(())
    }

    /// Flushes what is still pending, then commits.
    pub fn commit_transaction(&mut self, cancel: &CancellationToken) -> PersistenceResult<()> {
        self.ensure_usable()?;
        if self.state != UnitOfWorkState::InTransaction {
            return Err(PersistenceError::NoActiveTransaction);
        }

        let result = {
            let mut session = self.session.lock();
            let result = session.flush(cancel).and_then(|_| session.commit(cancel));
            if result.is_ok() {
                session.close();
            }
            result
        };
        match result {
            Ok(()) => {
                self.state = UnitOfWorkState::Committed;
                Ok(())
            }
            Err(err) => Err(self.abort(err)),
        }
    }

    /// Discards every write since `begin_transaction`. Runs even when
    /// `_cancel` has fired.
    pub fn rollback_transaction(&mut self, _cancel: &CancellationToken) -> PersistenceResult<()> {
        self.ensure_usable()?;
        if self.state != UnitOfWorkState::InTransaction {
            return Err(PersistenceError::NoActiveTransaction);
        }
        let result = {
            let mut session = self.session.lock();
            let result = session.rollback();
            session.close();
            result
        };
        self.state = UnitOfWorkState::RolledBack;
        result
    }

    /// Rolls back an open transaction and releases the session. Idempotent.
    pub fn dispose(&mut self) {
        if self.disposed {
            return;
        }
        self.disposed = true;

        let rolled_back = self.state == UnitOfWorkState::InTransaction;
        {
            let mut session = self.session.lock();
            if rolled_back {
                if let Err(err) = session.rollback() {
                    error!(
                        "event=uow_dispose module=uow status=error error_code={} error={}",
                        err.code(),
                        err
                    );
                }
                self.state = UnitOfWorkState::RolledBack;
            }
            session.close();
        }
        self.repositories.lock().clear();
        info!(
            "event=uow_dispose module=uow status=ok state={:?} rolled_back={rolled_back}",
            self.state
        );
    }

    fn ensure_usable(&self) -> PersistenceResult<()> {
        if self.disposed || self.state.is_terminal() {
            return Err(PersistenceError::UnitOfWorkClosed);
        }
        Ok(())
    }

    /// Forces `RolledBack` after a failure inside a transaction and hands
    /// back the original error.
    fn abort(&mut self, err: PersistenceError) -> PersistenceError {
        warn!(
            "event=uow_abort module=uow status=error error_code={}",
            err.code()
        );
        {
            let mut session = self.session.lock();
            if let Err(rollback_err) = session.rollback() {
                error!(
                    "event=uow_abort module=uow status=error stage=rollback error={rollback_err}"
                );
            }
            session.close();
        }
        self.state = UnitOfWorkState::RolledBack;
        err
    }
}

impl Drop for UnitOfWork {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl std::fmt::Debug for UnitOfWork {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UnitOfWork")
            .field("state", &self.state)
            .field("disposed", &self.disposed)
            .field("repositories", &self.repositories.lock().len())
            .finish()
    }
}
