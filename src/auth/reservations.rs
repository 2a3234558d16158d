//! Login names that are queued for persistence but not yet durable.
//!
//! The credential store only knows about records the worker has already
//! written, so in fast mode a duplicate-name check against the store alone
//! would accept a second registration while the first is still queued.
//! Reservations close that window within one process.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use uuid::Uuid;

#[derive(Debug, Default)]
pub struct Reservations {
    names: DashMap<String, Uuid>,
}

impl Reservations {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim `login_name` for the record `id`. Returns false if another
    /// record already holds it.
    pub fn reserve(&self, login_name: &str, id: Uuid) -> bool {
        match self.names.entry(login_name.to_string()) {
            Entry::Occupied(held) => *held.get() == id,
            Entry::Vacant(slot) => {
                slot.insert(id);
                true
            }
        }
    }

    /// Drop the claim, but only if it still belongs to `id`
    pub fn release(&self, login_name: &str, id: Uuid) -> bool {
        self.names
            .remove_if(login_name, |_, held| *held == id)
            .is_some()
    }

    pub fn is_reserved(&self, login_name: &str) -> bool {
        self.names.contains_key(login_name)
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reserve_is_exclusive() {
        let reservations = Reservations::new();
        let first = Uuid::new_v4();
        let second = Uuid::new_v4();

        assert!(reservations.reserve("alice", first));
        assert!(!reservations.reserve("alice", second));
        // Re-reserving for the same record is idempotent
        assert!(reservations.reserve("alice", first));
        assert!(reservations.is_reserved("alice"));
    }

    #[test]
    fn test_release_only_by_owner() {
        let reservations = Reservations::new();
        let owner = Uuid::new_v4();
        reservations.reserve("alice", owner);

        assert!(!reservations.release("alice", Uuid::new_v4()));
        assert!(reservations.is_reserved("alice"));

        assert!(reservations.release("alice", owner));
        assert!(reservations.is_empty());
    }

    #[test]
    fn test_concurrent_reserve_single_winner() {
        let reservations = std::sync::Arc::new(Reservations::new());

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let reservations = std::sync::Arc::clone(&reservations);
                std::thread::spawn(move || reservations.reserve("alice", Uuid::new_v4()))
            })
            .collect();

        let winners = handles
            .into_iter()
            .filter_map(|h| h.join().ok())
            .filter(|won| *won)
            .count();
        assert_eq!(winners, 1);
        assert_eq!(reservations.len(), 1);
    }
}
