//! Repository layer over the persistence session.
//!
//! # Responsibility
//! - Expose per-entity read/write APIs bound to one shared session.
//! - Keep SQL text generation inside the persistence boundary.
//!
//! # Invariants
//! - Writes only queue intents; the store changes at flush time.
//! - Default reads never return soft-deleted rows.

pub mod filter;
pub mod repository;

pub use filter::{CompareOp, Filter, Order, Query};
pub use repository::Repository;

use crate::model::audit::AUDIT_COLUMNS;
use crate::model::entity::Entity;

/// Envelope plus domain column list for `SELECT` statements on `T`.
pub(crate) fn select_columns<T: Entity>() -> String {
    AUDIT_COLUMNS
        .iter()
        .chain(T::COLUMNS.iter())
        .copied()
        .collect::<Vec<_>>()
        .join(", ")
}
