//! In-memory role store

use crate::auth::RoleSet;
use crate::storage::{
    async_trait, normalize_pubkey, RoleAssignment, RoleStore, RoleStream, StorageError,
};
use futures::stream::{self, StreamExt};
use parking_lot::RwLock;
use std::collections::HashMap;

#[derive(Default)]
struct Inner {
    /// pubkey -> position in `entries`
    index: HashMap<String, usize>,
    /// Assignments in order of first assignment
    entries: Vec<RoleAssignment>,
}

/// Role assignments held in process memory
///
/// Lost on restart; used when no database is configured and in tests.
#[derive(Default)]
pub struct MemoryRoleStore {
    inner: RwLock<Inner>,
}

impl MemoryRoleStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of explicit assignments
    pub fn len(&self) -> usize {
        self.inner.read().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().entries.is_empty()
    }
}

#[async_trait]
impl RoleStore for MemoryRoleStore {
    async fn get_roles(&self, pubkey: &str) -> Result<RoleSet, StorageError> {
        let pubkey = normalize_pubkey(pubkey)?;
        let inner = self.inner.read();

        Ok(inner
            .index
            .get(&pubkey)
            .map(|&i| inner.entries[i].roles.clone())
            .unwrap_or_default())
    }

    async fn set_roles(&self, pubkey: &str, roles: &RoleSet) -> Result<(), StorageError> {
        let pubkey = normalize_pubkey(pubkey)?;
        let mut inner = self.inner.write();

        match inner.index.get(&pubkey).copied() {
            Some(i) => inner.entries[i].roles = roles.clone(),
            None => {
                let position = inner.entries.len();
                inner
                    .entries
                    .push(RoleAssignment::new(pubkey.clone(), roles.clone()));
                inner.index.insert(pubkey, position);
            }
        }

        Ok(())
    }

    async fn list_roles(&self) -> Result<RoleStream, StorageError> {
        let snapshot = self.inner.read().entries.clone();
        Ok(stream::iter(snapshot.into_iter().map(Ok)).boxed())
    }
}
