//! Acting-principal lookup consumed by audit stamping.
//!
//! The provider is handed to the session explicitly; there is no ambient
//! request context.

use crate::model::entity::UserId;

/// Exposes who is performing the current writes.
///
/// Implementations must be side-effect free. `None` stands for an
/// unauthenticated or system actor and is a legal audit identity.
pub trait CurrentUserProvider: Send + Sync {
    fn current_user_id(&self) -> Option<UserId>;
}

/// System-initiated work with no principal.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SystemActor;

impl CurrentUserProvider for SystemActor {
    fn current_user_id(&self) -> Option<UserId> {
        None
    }
}

/// A principal resolved once, e.g. from a verified request token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixedUser(pub UserId);

impl CurrentUserProvider for FixedUser {
    fn current_user_id(&self) -> Option<UserId> {
        Some(self.0)
    }
}

impl<F> CurrentUserProvider for F
where
    F: Fn() -> Option<UserId> + Send + Sync,
{
    fn current_user_id(&self) -> Option<UserId> {
        self()
    }
}
