//! Transactional persistence core for the forum backend.
//! Owns audit stamping, soft-delete visibility and unit-of-work lifecycle.

pub mod config;
pub mod db;
pub mod error;
pub mod logging;
pub mod model;
pub mod repo;
pub mod session;
pub mod unit_of_work;

pub use config::{ConfigError, ConfigLoader, StoreConfig};
pub use db::{open_db, open_db_in_memory, DatabaseOptions};
pub use error::{PersistenceError, PersistenceResult};
pub use logging::{default_log_level, init_logging, logging_status, LoggingError};
pub use model::audit::{AuditEnvelope, AuditValidationError};
pub use model::board::{Category, Post, PostVote, Thread};
pub use model::entity::{Entity, EntityId, UserId};
pub use model::moderation::{AuditLog, Notification, Report, ReportStatus};
pub use model::user::{PasswordResetToken, User, UserBan, UserMute};
pub use repo::{Filter, Order, Query, Repository};
pub use session::{
    CancellationToken, Clock, CurrentUserProvider, FixedUser, ManualClock, PersistenceSession,
    SharedSession, SystemActor, SystemClock, Tracked,
};
pub use unit_of_work::{UnitOfWork, UnitOfWorkState};

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[cfg(test)]
mod tests {
    use super::core_version;

    #[test]
    fn version_is_not_empty() {
        assert!(!core_version().is_empty());
    }
}
