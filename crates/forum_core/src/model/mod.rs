//! Forum entity model.
//!
//! # Responsibility
//! - Define the audit envelope and the `Entity` contract.
//! - Define the concrete forum records persisted through repositories.
//!
//! # Invariants
//! - Every entity embeds exactly one `AuditEnvelope`.
//! - Deletion is represented by soft-delete tombstones, not hard delete.

pub mod audit;
pub mod board;
pub mod entity;
pub mod moderation;
pub mod user;
