//! Cooperative cancellation for flush and commit.
//!
//! # Invariants
//! - Once cancelled, a token stays cancelled.
//! - Cancelling interrupts every SQLite statement currently bound to the
//!   token; the interrupted call fails with `Cancelled`.

use crate::error::{PersistenceError, PersistenceResult};
use parking_lot::Mutex;
use rusqlite::InterruptHandle;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

/// Shared cancellation signal. Clones observe the same state.
#[derive(Clone, Default)]
pub struct CancellationToken {
    inner: Arc<CancelState>,
}

#[derive(Default)]
struct CancelState {
    cancelled: AtomicBool,
    next_binding: AtomicU64,
    bound: Mutex<Vec<(u64, InterruptHandle)>>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Signals cancellation and interrupts in-flight store calls.
    pub fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::SeqCst);
        for (_, handle) in self.inner.bound.lock().iter() {
            handle.interrupt();
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// Fails with `Cancelled` once the signal has fired.
    pub fn check(&self) -> PersistenceResult<()> {
        if self.is_cancelled() {
            return Err(PersistenceError::Cancelled);
        }
        Ok(())
    }

    /// Routes cancellation to one connection until the binding drops.
    pub(crate) fn bind(&self, handle: InterruptHandle) -> InterruptBinding<'_> {
        let id = self.inner.next_binding.fetch_add(1, Ordering::Relaxed);
        self.inner.bound.lock().push((id, handle));
        InterruptBinding { token: self, id }
    }
}

impl std::fmt::Debug for CancellationToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancellationToken")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

pub(crate) struct InterruptBinding<'a> {
    token: &'a CancellationToken,
    id: u64,
}

impl Drop for InterruptBinding<'_> {
    fn drop(&mut self) {
        self.token
            .inner
            .bound
            .lock()
            .retain(|(id, _)| *id != self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::CancellationToken;
    use crate::error::PersistenceError;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn clones_share_cancellation_state() {
        let token = CancellationToken::new();
        let observer = token.clone();
        assert!(observer.check().is_ok());

        token.cancel();
        assert!(observer.is_cancelled());
        assert!(matches!(observer.check(), Err(PersistenceError::Cancelled)));
    }

    #[test]
    fn binding_is_released_on_drop() {
        let conn = rusqlite::Connection::open_in_memory().unwrap();
        let token = CancellationToken::new();
        {
            let _binding = token.bind(conn.get_interrupt_handle());
            assert_eq!(token.inner.bound.lock().len(), 1);
        }
        assert!(token.inner.bound.lock().is_empty());
    }

    #[test]
    fn cancel_interrupts_a_running_statement() {
        let conn = rusqlite::Connection::open_in_memory().unwrap();
        let token = CancellationToken::new();
        let _binding = token.bind(conn.get_interrupt_handle());

        let remote = token.clone();
        let canceller = thread::spawn(move || {
            thread::sleep(Duration::from_millis(50));
            remote.cancel();
        });
        let result: rusqlite::Result<i64> = conn.query_row(
            "WITH RECURSIVE seq(n) AS (SELECT 1 UNION ALL SELECT n + 1 FROM seq WHERE n < 10000000000)
             SELECT count(*) FROM seq;",
            [],
            |row| row.get(0),
        );
        canceller.join().unwrap();

        let err = PersistenceError::from(result.unwrap_err());
        assert!(matches!(err, PersistenceError::Cancelled));
    }
}
