//! Volatile token cache: login name -> most recently issued token.
//!
//! Entries carry two deadlines: the cache TTL (optional, `Ttl::Never` keeps
//! the entry until it is deleted) and the signed token's own `exp`. An entry
//! is never served past either one, so a cache TTL longer than the token
//! lifetime cannot extend what the signature allows.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;

use crate::clock::Clock;

/// A token held in the cache
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedToken {
    pub token: String,
    /// The `exp` claim of the signed token
    pub token_expires_at: DateTime<Utc>,
}

/// Cache lifetime of an entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ttl {
    /// Kept until deleted (or until the token itself expires)
    Never,
    After(Duration),
}

impl Ttl {
    /// Build from a seconds value where zero means no expiry
    pub fn from_seconds(seconds: u64) -> Self {
        if seconds == 0 {
            Ttl::Never
        } else {
            Ttl::After(Duration::seconds(seconds as i64))
        }
    }
}

pub trait TokenCache: Send + Sync {
    fn get(&self, key: &str) -> Option<CachedToken>;

    fn set(&self, key: &str, value: CachedToken, ttl: Ttl);

    fn delete(&self, key: &str) -> bool;

    /// Read and invalidate in one step. Two concurrent callers for the same
    /// key never both receive the entry.
    fn take(&self, key: &str) -> Option<CachedToken>;

    /// Drop every entry past its TTL or token expiry
    fn purge_expired(&self) -> usize;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone)]
struct Entry {
    deadline: Option<DateTime<Utc>>,
    value: CachedToken,
}

impl Entry {
    fn is_live(&self, now: DateTime<Utc>) -> bool {
        let within_ttl = self.deadline.map_or(true, |deadline| now < deadline);
        within_ttl && now <= self.value.token_expires_at
    }
}

/// In-process cache shared by all request handlers.
pub struct MemoryTokenCache {
    clock: Arc<dyn Clock>,
    entries: DashMap<String, Entry>,
}

impl MemoryTokenCache {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            entries: DashMap::new(),
        }
    }
}

impl TokenCache for MemoryTokenCache {
    fn get(&self, key: &str) -> Option<CachedToken> {
        let now = self.clock.now();
        if let Some(entry) = self.entries.get(key) {
            if entry.is_live(now) {
                return Some(entry.value.clone());
            }
        }
        self.entries.remove_if(key, |_, entry| !entry.is_live(now));
        None
    }

    fn set(&self, key: &str, value: CachedToken, ttl: Ttl) {
        let deadline = match ttl {
            Ttl::Never => None,
            Ttl::After(duration) => Some(self.clock.now() + duration),
        };
        self.entries
            .insert(key.to_string(), Entry { deadline, value });
    }

    fn delete(&self, key: &str) -> bool {
        self.entries.remove(key).is_some()
    }

    fn take(&self, key: &str) -> Option<CachedToken> {
        let (_, entry) = self.entries.remove(key)?;
        entry.is_live(self.clock.now()).then_some(entry.value)
    }

    fn purge_expired(&self) -> usize {
        let now = self.clock.now();
        let before = self.entries.len();
        self.entries.retain(|_, entry| entry.is_live(now));
        before.saturating_sub(self.entries.len())
    }

    fn len(&self) -> usize {
        self.entries.len()
    }
}
