//! Token -> entry map for every transfer that is still live.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tokio::time::Instant;

use crate::blob_store::BlobLocation;
use crate::token::Token;

/// One active upload. All fields are fixed at insertion.
#[derive(Clone, Debug)]
pub struct Entry {
    token: Token,
    location: BlobLocation,
    created_at: Instant,
}

impl Entry {
    pub fn token(&self) -> &Token {
        &self.token
    }

    pub fn location(&self) -> &BlobLocation {
        &self.location
    }

    pub fn created_at(&self) -> Instant {
        self.created_at
    }
}

/// In-memory registry of live transfers.
///
/// Readers share the lock, writers are exclusive. Guards are only held for
/// the map operation itself and never across an `.await`, which is also what
/// lets [`Registry::remove`] run from synchronous drop paths.
#[derive(Debug, Default)]
pub struct Registry {
    entries: RwLock<HashMap<Token, Slot>>,
}

#[derive(Debug)]
struct Slot {
    entry: Entry,
    /// Set once a download has started; cleared only by removal.
    claimed: bool,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a stored blob under a freshly generated token.
    pub fn insert(&self, location: BlobLocation) -> Token {
        let token = Token::generate();
        let entry = Entry {
            token: token.clone(),
            location,
            created_at: Instant::now(),
        };
        self.write().insert(
            token.clone(),
            Slot {
                entry,
                claimed: false,
            },
        );
        token
    }

    pub fn lookup(&self, token: &Token) -> Option<Entry> {
        self.read().get(token).map(|slot| slot.entry.clone())
    }

    /// Mark the entry as being downloaded. Only the first caller for a token
    /// gets `Some`; the entry stays visible to [`Registry::lookup`] until it
    /// is removed.
    pub fn claim(&self, token: &Token) -> Option<Entry> {
        let mut entries = self.write();
        let slot = entries.get_mut(token)?;
        if slot.claimed {
            return None;
        }
        slot.claimed = true;
        Some(slot.entry.clone())
    }

    /// Remove and return the entry. Of several racing callers for the same
    /// token exactly one gets `Some`.
    pub fn remove(&self, token: &Token) -> Option<Entry> {
        self.write().remove(token).map(|slot| slot.entry)
    }

    /// Like [`Registry::remove`], but leaves claimed entries alone.
    pub fn remove_unclaimed(&self, token: &Token) -> Option<Entry> {
        let mut entries = self.write();
        if entries.get(token)?.claimed {
            return None;
        }
        entries.remove(token).map(|slot| slot.entry)
    }

    /// Point-in-time copy of every entry, so callers can do I/O without
    /// holding the lock.
    pub fn snapshot(&self) -> Vec<Entry> {
        self.read().values().map(|slot| slot.entry.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    // Every critical section is a single map call, so a poisoned map is
    // still consistent.
    fn read(&self) -> RwLockReadGuard<'_, HashMap<Token, Slot>> {
        self.entries.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<Token, Slot>> {
        self.entries.write().unwrap_or_else(PoisonError::into_inner)
    }
}
