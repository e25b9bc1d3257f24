//! SQLite storage bootstrap and schema migration entry points.
//!
//! # Responsibility
//! - Open and configure SQLite connections for the forum store.
//! - Apply schema migrations in deterministic order.
//!
//! # Invariants
//! - Migration version is tracked via `PRAGMA user_version`.
//! - No session is built on a connection before migrations succeed.

use std::time::Duration;

pub mod migrations;
mod open;

pub use open::{open_db, open_db_in_memory};

/// Connection-level settings applied at open time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseOptions {
    /// How long a writer waits on a locked database before failing.
    pub busy_timeout: Duration,
    pub foreign_keys: bool,
}

impl Default for DatabaseOptions {
    fn default() -> Self {
        Self {
            busy_timeout: Duration::from_secs(5),
            foreign_keys: true,
        }
    }
}
