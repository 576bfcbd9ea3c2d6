//! Long lock registry.
//!
//! Long locks are advisory holds over sets of document identities that live
//! across working sets until explicitly released. They never block storage
//! writes; working sets consult the registry before mutating documents.

use crate::error::{CoreError, CoreResult};
use crate::types::DocIdentity;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use tracing::info;
use uuid::Uuid;

/// Opaque token identifying a held long lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LockToken(Uuid);

impl LockToken {
    fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    /// Returns the underlying UUID.
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl fmt::Display for LockToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "lock:{}", self.0)
    }
}

/// A held long lock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LongLock {
    /// The lock token.
    pub token: LockToken,
    /// Identities covered by the lock.
    pub identities: BTreeSet<DocIdentity>,
    /// When the lock was acquired.
    pub acquired_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct LockTable {
    locks: HashMap<LockToken, LongLock>,
    index: HashMap<DocIdentity, LockToken>,
}

/// Registry of long locks, shareable across working sets.
///
/// The internal table is guarded by a mutex held only for the duration of
/// each registry call.
#[derive(Debug, Default)]
pub struct LongLockRegistry {
    table: Mutex<LockTable>,
}

impl LongLockRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquires a lock over a set of identities.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::LockConflict`] if any identity is covered by a
    /// live lock, or an invalid request error for an empty set.
    pub fn acquire(
        &self,
        identities: impl IntoIterator<Item = DocIdentity>,
    ) -> CoreResult<LockToken> {
        let identities: BTreeSet<_> = identities.into_iter().collect();
        if identities.is_empty() {
            return Err(CoreError::invalid_request(
                "a long lock needs at least one document",
            ));
        }

        let mut table = self.table.lock();
        if let Some((identity, holder)) = identities
            .iter()
            .find_map(|i| table.index.get(i).map(|t| (*i, *t)))
        {
            return Err(CoreError::LockConflict { identity, holder });
        }

        let token = LockToken::generate();
        for identity in &identities {
            table.index.insert(*identity, token);
        }
        info!(%token, documents = identities.len(), "long lock acquired");
        table.locks.insert(
            token,
            LongLock {
                token,
                identities,
                acquired_at: Utc::now(),
            },
        );
        Ok(token)
    }

    /// Releases a lock.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::UnknownLockToken`] if the token is not held.
    pub fn release(&self, token: LockToken) -> CoreResult<()> {
        let mut table = self.table.lock();
        let lock = table
            .locks
            .remove(&token)
            .ok_or(CoreError::UnknownLockToken { token })?;
        for identity in &lock.identities {
            table.index.remove(identity);
        }
        info!(%token, "long lock released");
        Ok(())
    }

    /// Returns the token covering an identity, if any.
    #[must_use]
    pub fn holder(&self, identity: &DocIdentity) -> Option<LockToken> {
        self.table.lock().index.get(identity).copied()
    }

    /// Fails if any identity is covered by a lock not in `own`.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::LockConflict`] naming the first blocked identity.
    pub fn check<'a>(
        &self,
        identities: impl IntoIterator<Item = &'a DocIdentity>,
        own: &[LockToken],
    ) -> CoreResult<()> {
        let table = self.table.lock();
        for identity in identities {
            if let Some(holder) = table.index.get(identity) {
                if !own.contains(holder) {
                    return Err(CoreError::LockConflict {
                        identity: *identity,
                        holder: *holder,
                    });
                }
            }
        }
        Ok(())
    }

    /// Returns a copy of a held lock.
    #[must_use]
    pub fn get(&self, token: LockToken) -> Option<LongLock> {
        self.table.lock().locks.get(&token).cloned()
    }

    /// Returns the number of held locks.
    #[must_use]
    pub fn len(&self) -> usize {
        self.table.lock().locks.len()
    }

    /// Checks if no lock is held.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
