//! Role storage backends
//!
//! - Postgres: durable role assignments
//! - Memory: process-local assignments for tests and database-less runs

mod memory;
mod postgres;

pub use memory::MemoryRoleStore;
pub use postgres::{PostgresConfig, PostgresStore};

use crate::auth::RoleSet;
pub use async_trait::async_trait;
use futures::stream::BoxStream;
use thiserror::Error;

/// Storage errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StorageError {
    #[error("database error: {0}")]
    Database(String),

    #[error("invalid public key: {0}")]
    InvalidPubkey(String),

    #[error("corrupt role record for {pubkey}: {message}")]
    Corrupt { pubkey: String, message: String },
}

/// An explicit role assignment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoleAssignment {
    pub pubkey: String,
    pub roles: RoleSet,
}

impl RoleAssignment {
    pub fn new(pubkey: impl Into<String>, roles: RoleSet) -> Self {
        Self {
            pubkey: pubkey.into(),
            roles,
        }
    }
}

/// Lazy sequence of explicit assignments
pub type RoleStream = BoxStream<'static, Result<RoleAssignment, StorageError>>;

/// Trait for pubkey → roles storage
///
/// Reads never create entries; absence of an entry means `{a}`.
#[async_trait]
pub trait RoleStore: Send + Sync {
    /// Roles assigned to `pubkey`, or `{a}` if none were ever set
    async fn get_roles(&self, pubkey: &str) -> Result<RoleSet, StorageError>;

    /// Replace the roles assigned to `pubkey`
    async fn set_roles(&self, pubkey: &str, roles: &RoleSet) -> Result<(), StorageError>;

    /// Enumerate explicit assignments in insertion order
    async fn list_roles(&self) -> Result<RoleStream, StorageError>;
}

/// Canonical (lower-case) form of a pubkey, or an error if it is not 64 hex chars
pub(crate) fn normalize_pubkey(pubkey: &str) -> Result<String, StorageError> {
    if crate::event::is_valid_pubkey(pubkey) {
        Ok(pubkey.to_ascii_lowercase())
    } else {
        Err(StorageError::InvalidPubkey(pubkey.to_string()))
    }
}
