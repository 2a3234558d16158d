//! Write-behind pipeline: a durable FIFO of pending registrations and the
//! single worker that drains it into the credential store.

mod redb_queue;
pub mod worker;

use thiserror::Error;

pub use redb_queue::{DeadLetter, RedbQueue};
pub use worker::{WorkerHandle, WriteBehindWorker};

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("Queue storage error: {0}")]
    Storage(#[from] crate::storage::DatabaseError),
    #[error("Payload encoding error: {0}")]
    Payload(#[from] serde_json::Error),
    #[error("Unknown delivery: {0}")]
    UnknownDelivery(u64),
}

/// An entry handed to the consumer. It stays leased until acked,
/// requeued or dead-lettered; a crash before that means redelivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub id: u64,
    pub payload: Vec<u8>,
}

/// Ordered, at-least-once queue of opaque payloads.
pub trait WriteQueue: Send + Sync {
    fn push(&self, payload: &[u8]) -> Result<(), QueueError>;

    /// Lease the oldest pending entry. `None` means no work right now.
    fn pop(&self) -> Result<Option<Delivery>, QueueError>;

    fn ack(&self, id: u64) -> Result<(), QueueError>;

    /// Release a leased entry and append a replacement payload to the tail
    fn requeue(&self, id: u64, payload: &[u8]) -> Result<(), QueueError>;

    /// Move a leased entry out of the pipeline for good
    fn dead_letter(&self, id: u64, reason: &str) -> Result<(), QueueError>;

    /// Hand a leased entry back to the pending set unchanged, keeping its
    /// place in line
    fn release_lease(&self, id: u64) -> Result<(), QueueError>;

    /// Return every leased entry to the pending set. Called at startup.
    fn recover(&self) -> Result<usize, QueueError>;

    /// Snapshot of pending payloads, oldest first
    fn pending(&self) -> Result<Vec<Vec<u8>>, QueueError>;

    fn pending_len(&self) -> Result<u64, QueueError>;
}
