//! Persistence session: the live SQLite connection plus pending writes.
//!
//! # Responsibility
//! - Own the connection for one logical operation.
//! - Stamp the audit envelope on every pending write at flush time.
//! - Execute each flush atomically and expose raw transaction control to
//!   the unit of work.
//!
//! # Invariants
//! - A flush either applies every pending write or none of them.
//! - Principal and time are resolved once per flush.
//! - Pending writes are only cleared by a successful flush, a rollback or
//!   closing the session.
//! - Not designed for concurrent callers; one session per operation.

mod cancel;
mod clock;
mod principal;
mod stamp;
mod tracked;

pub use cancel::CancellationToken;
pub use clock::{Clock, ManualClock, SystemClock};
pub use principal::{CurrentUserProvider, FixedUser, SystemActor};
pub use tracked::{EntryState, PendingIntent, Tracked};

use crate::db::migrations::{current_user_version, latest_version};
use crate::error::{PersistenceError, PersistenceResult};
use crate::model::audit::AUDIT_COLUMNS;
use crate::model::entity::{Entity, UserId};
use chrono::{DateTime, Utc};
use log::{debug, error, info, warn};
use parking_lot::Mutex;
use rusqlite::{Connection, TransactionBehavior};
use stamp::AuditStamp;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;
use tracked::{PendingEntry, PendingWrite, StagedEntry};

/// Session shared by every repository of one unit of work.
pub type SharedSession = Arc<Mutex<PersistenceSession>>;

pub struct PersistenceSession {
    conn: Connection,
    current_user: Arc<dyn CurrentUserProvider>,
    clock: Arc<dyn Clock>,
    pending: Vec<Box<dyn PendingEntry>>,
    /// Writes flushed inside the open transaction, oldest first.
    journal: Vec<Box<dyn StagedEntry>>,
    in_transaction: bool,
    closed: bool,
    ready_tables: HashSet<&'static str>,
}

impl PersistenceSession {
    /// Wraps a migrated connection.
    ///
    /// # Errors
    /// - `UninitializedConnection` when the schema is not at the latest
    ///   version known by this binary.
    pub fn new(
        conn: Connection,
        current_user: Arc<dyn CurrentUserProvider>,
    ) -> PersistenceResult<Self> {
        ensure_schema_current(&conn)?;
        Ok(Self {
            conn,
            current_user,
            clock: Arc::new(SystemClock),
            pending: Vec::new(),
            journal: Vec::new(),
            in_transaction: false,
            closed: false,
            ready_tables: HashSet::new(),
        })
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn into_shared(self) -> SharedSession {
        Arc::new(Mutex::new(self))
    }

    pub fn current_user_id(&self) -> Option<UserId> {
        self.current_user.current_user_id()
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub fn is_in_transaction(&self) -> bool {
        self.in_transaction
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Writes every pending create/update in one atomic step.
    ///
    /// Returns the number of affected rows. With nothing pending this
    /// returns `0` without touching the store.
    ///
    /// # Errors
    /// - `ConstraintViolation` / `StoreUnavailable` when SQLite rejects a write.
    /// - `Cancelled` when `cancel` fires before or during the write.
    /// - `NotFound` when a modified row no longer exists.
    ///
    /// On error the store is unchanged, pending writes stay queued and
    /// tracked entities keep their pre-flush values.
    pub fn flush(&mut self, cancel: &CancellationToken) -> PersistenceResult<usize> {
        self.ensure_open()?;
        if self.pending.is_empty() {
            debug!("event=flush module=session status=skip reason=no_pending");
            return Ok(0);
        }
        cancel.check()?;

        let started_at = Instant::now();
        let stamp = AuditStamp {
            now: self.clock.now(),
            user: self.current_user.current_user_id(),
        };
        let entries = self.pending.len();

        let staged = match stage_pending(
            &mut self.conn,
            &self.pending,
            self.in_transaction,
            &stamp,
            cancel,
        ) {
            Ok(staged) => staged,
            Err(err) => {
                error!(
                    "event=flush module=session status=error entries={entries} in_transaction={} duration_ms={} error_code={} error={}",
                    self.in_transaction,
                    started_at.elapsed().as_millis(),
                    err.code(),
                    err
                );
                return Err(err);
            }
        };

        let mut rows = 0;
        for entry in &staged {
            entry.publish();
            rows += entry.affected();
        }
        if self.in_transaction {
            self.journal.extend(staged);
        }
        self.pending.clear();

        info!(
            "event=flush module=session status=ok entries={entries} rows={rows} in_transaction={} duration_ms={}",
            self.in_transaction,
            started_at.elapsed().as_millis()
        );
        Ok(rows)
    }

    pub(crate) fn ensure_open(&self) -> PersistenceResult<()> {
        if self.closed {
            return Err(PersistenceError::UnitOfWorkClosed);
        }
        Ok(())
    }

    pub(crate) fn connection(&self) -> PersistenceResult<&Connection> {
        self.ensure_open()?;
        Ok(&self.conn)
    }

    /// Verifies the backing table of `T` once per session.
    pub(crate) fn ensure_table_ready<T: Entity>(&mut self) -> PersistenceResult<()> {
        if self.ready_tables.contains(T::TABLE) {
            return Ok(());
        }
        let conn = self.connection()?;
        if !table_exists(conn, T::TABLE)? {
            return Err(PersistenceError::MissingRequiredTable(T::TABLE));
        }
        for column in AUDIT_COLUMNS.iter().chain(T::COLUMNS.iter()).copied() {
            if !table_has_column(conn, T::TABLE, column)? {
                return Err(PersistenceError::MissingRequiredColumn {
                    table: T::TABLE,
                    column,
                });
            }
        }
        self.ready_tables.insert(T::TABLE);
        Ok(())
    }

    pub(crate) fn track_added<T: Entity>(&mut self, entity: T) -> PersistenceResult<Tracked<T>> {
        self.ensure_open()?;
        let tracked = Tracked::new(entity);
        self.pending.push(Box::new(PendingWrite {
            state: EntryState::Added,
            tracked: tracked.clone(),
        }));
        Ok(tracked)
    }

    /// Queues a modification; a second update of the same row before the
    /// next flush replaces the first one.
    pub(crate) fn track_modified<T: Entity>(&mut self, entity: T) -> PersistenceResult<Tracked<T>> {
        self.ensure_open()?;
        let id = entity
            .id()
            .ok_or(PersistenceError::MissingIdentity { table: T::TABLE })?;

        let existing = self.pending.iter().find_map(|entry| {
            entry
                .as_any()
                .downcast_ref::<PendingWrite<T>>()
                .filter(|write| write.state == EntryState::Modified && write.tracked.id() == Some(id))
                .map(|write| write.tracked.clone())
        });
        if let Some(tracked) = existing {
            tracked.replace(entity);
            return Ok(tracked);
        }

        let tracked = Tracked::new(entity);
        self.pending.push(Box::new(PendingWrite {
            state: EntryState::Modified,
            tracked: tracked.clone(),
        }));
        Ok(tracked)
    }

    pub(crate) fn pending_of<T: Entity>(&self) -> Vec<PendingIntent<T>> {
        self.pending
            .iter()
            .filter_map(|entry| entry.as_any().downcast_ref::<PendingWrite<T>>())
            .map(|write| PendingIntent {
                state: write.state,
                entity: write.tracked.clone(),
            })
            .collect()
    }

    pub(crate) fn begin(&mut self) -> PersistenceResult<()> {
        self.ensure_open()?;
        self.conn.execute_batch("BEGIN IMMEDIATE;")?;
        self.in_transaction = true;
        self.journal.clear();
        info!(
            "event=tx_begin module=session status=ok pending={}",
            self.pending.len()
        );
        Ok(())
    }

    pub(crate) fn commit(&mut self, cancel: &CancellationToken) -> PersistenceResult<()> {
        cancel.check()?;
        {
            let _binding = cancel.bind(self.conn.get_interrupt_handle());
            self.conn.execute_batch("COMMIT;")?;
        }
        self.in_transaction = false;
        let rows = self
            .journal
            .drain(..)
            .map(|entry| entry.affected())
            .sum::<usize>();
        info!("event=tx_commit module=session status=ok rows={rows}");
        Ok(())
    }

    /// Rolls the store back and discards everything queued or flushed since
    /// `begin`. Local state is reset even when SQLite fails to roll back.
    pub(crate) fn rollback(&mut self) -> PersistenceResult<()> {
        let result = if self.conn.is_autocommit() {
            Ok(())
        } else {
            self.conn
                .execute_batch("ROLLBACK;")
                .map_err(|err| PersistenceError::StoreUnavailable {
                    message: format!("rollback failed: {err}"),
                    source: Some(err),
                })
        };

        let reverted = self.journal.len();
        for entry in self.journal.drain(..).rev() {
            entry.revert();
        }
        let discarded = self.pending.len();
        self.pending.clear();
        self.in_transaction = false;

        match &result {
            Ok(()) => info!(
                "event=tx_rollback module=session status=ok reverted={reverted} discarded={discarded}"
            ),
            Err(err) => error!(
                "event=tx_rollback module=session status=error reverted={reverted} discarded={discarded} error={err}"
            ),
        }
        result
    }

    /// Releases the session for good. Queued writes are dropped.
    pub(crate) fn close(&mut self) {
        if self.closed {
            return;
        }
        if !self.pending.is_empty() {
            warn!(
                "event=session_close module=session status=ok dropped_pending={}",
                self.pending.len()
            );
        }
        self.pending.clear();
        self.closed = true;
    }
}

impl std::fmt::Debug for PersistenceSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PersistenceSession")
            .field("pending", &self.pending.len())
            .field("journal", &self.journal.len())
            .field("in_transaction", &self.in_transaction)
            .field("closed", &self.closed)
            .finish_non_exhaustive()
    }
}

fn stage_pending(
    conn: &mut Connection,
    pending: &[Box<dyn PendingEntry>],
    in_transaction: bool,
    stamp: &AuditStamp,
    cancel: &CancellationToken,
) -> PersistenceResult<Vec<Box<dyn StagedEntry>>> {
    let _binding = cancel.bind(conn.get_interrupt_handle());
    if in_transaction {
        let savepoint = conn.savepoint()?;
        let staged = stage_all(&savepoint, pending, stamp, cancel)?;
        savepoint.commit()?;
        Ok(staged)
    } else {
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let staged = stage_all(&tx, pending, stamp, cancel)?;
        tx.commit()?;
        Ok(staged)
    }
}

fn stage_all(
    conn: &Connection,
    pending: &[Box<dyn PendingEntry>],
    stamp: &AuditStamp,
    cancel: &CancellationToken,
) -> PersistenceResult<Vec<Box<dyn StagedEntry>>> {
    let mut staged = Vec::with_capacity(pending.len());
    for entry in pending {
        cancel.check()?;
        match entry.stage(conn, stamp) {
            Ok(write) => staged.push(write),
            Err(err) => {
                debug!(
                    "event=flush_entry module=session status=error table={} error_code={}",
                    entry.table(),
                    err.code()
                );
                return Err(err);
            }
        }
    }
    Ok(staged)
}

fn ensure_schema_current(conn: &Connection) -> PersistenceResult<()> {
    let expected_version = latest_version();
    let actual_version = current_user_version(conn)?;
    if actual_version != expected_version {
        return Err(PersistenceError::UninitializedConnection {
            expected_version,
            actual_version,
        });
    }
    Ok(())
}

fn table_exists(conn: &Connection, table: &str) -> PersistenceResult<bool> {
    let exists: i64 = conn.query_row(
        "SELECT EXISTS(
            SELECT 1
            FROM sqlite_master
            WHERE type = 'table' AND name = ?1
        );",
        [table],
        |row| row.get(0),
    )?;
    Ok(exists == 1)
}

fn table_has_column(conn: &Connection, table: &str, column: &str) -> PersistenceResult<bool> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({table});"))?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let current: String = row.get(1)?;
        if current == column {
            return Ok(true);
        }
    }
    Ok(false)
}
