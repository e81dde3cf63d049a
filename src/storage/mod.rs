//!
//! journeyguard storage module
//! ---------------------------
//! Identity entities (users, the email index, sessions and the journey event log) kept in a
//! table engine addressed by `(table, partition, row)`. The engine provides per-row optimistic
//! concurrency through opaque etags and nothing more: there are no multi-row transactions, so
//! every operation here is a sequence of single-row, single-attempt writes.
//!
//! Key pieces:
//! - `TableEngine`: the collaborator contract (get / get-if-exists / insert / merge-update).
//! - `MemoryTables`: in-process engine with optional JSON snapshot persistence.
//! - `IdentityStore`: the idempotent create/lookup/touch/bind/end operations.

use thiserror::Error;

mod engine;
pub mod memory;
pub mod entities;
mod identity_store;
mod user_id;

pub use engine::{ETag, Properties, StoredRow, TableEngine};
pub use memory::MemoryTables;
pub use entities::{User, EmailIndexEntry, Session, SessionEvent, UserEvent};
pub use identity_store::{IdentityStore, Clock};
pub use user_id::build_user_id;

pub const USERS_TABLE: &str = "Users";
pub const EMAIL_INDEX_TABLE: &str = "UsersByEmail";
pub const SESSIONS_TABLE: &str = "Sessions";
pub const EVENTS_BY_SESSION_TABLE: &str = "EventsBySession";
pub const EVENTS_BY_USER_TABLE: &str = "EventsByUser";

/// All tables provisioned by `IdentityStore::ensure_schema`.
pub const ALL_TABLES: [&str; 5] = [USERS_TABLE, EMAIL_INDEX_TABLE, SESSIONS_TABLE, EVENTS_BY_SESSION_TABLE, EVENTS_BY_USER_TABLE];

pub const USER_PARTITION: &str = "USER";
pub const EMAIL_PARTITION: &str = "EMAIL";
pub const SESSION_PARTITION: &str = "SESSION";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("table '{0}' does not exist")]
    TableNotFound(String),
    #[error("{table}: no row {partition}/{row}")]
    NotFound { table: String, partition: String, row: String },
    #[error("{table}: row {partition}/{row} already exists")]
    AlreadyExists { table: String, partition: String, row: String },
    #[error("{table}: row {partition}/{row} was modified concurrently")]
    Conflict { table: String, partition: String, row: String },
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("serialization: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

impl StoreError {
    pub(crate) fn not_found(table: &str, partition: &str, row: &str) -> Self {
        StoreError::NotFound { table: table.into(), partition: partition.into(), row: row.into() }
    }
    pub(crate) fn already_exists(table: &str, partition: &str, row: &str) -> Self {
        StoreError::AlreadyExists { table: table.into(), partition: partition.into(), row: row.into() }
    }
    pub(crate) fn conflict(table: &str, partition: &str, row: &str) -> Self {
        StoreError::Conflict { table: table.into(), partition: partition.into(), row: row.into() }
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Canonical email key: trimmed and lowercased.
pub fn normalize_email(email: &str) -> String { email.trim().to_lowercase() }
