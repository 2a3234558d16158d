use chrono::{DateTime, Utc};
use redb::{Database as RedbDatabase, ReadableTable, ReadableTableMetadata, TableDefinition};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;

use super::{Delivery, QueueError, WriteQueue};
use crate::storage::DatabaseError;

/// Pending entries: sequence -> payload
const PENDING: TableDefinition<u64, &[u8]> = TableDefinition::new("pending");

/// Leased entries awaiting ack: sequence -> payload
const IN_FLIGHT: TableDefinition<u64, &[u8]> = TableDefinition::new("in_flight");

/// Entries removed from the pipeline: sequence -> DeadLetter (bincode)
const DEAD_LETTER: TableDefinition<u64, &[u8]> = TableDefinition::new("dead_letter");

/// Queue metadata: "next_sequence" -> u64
const QUEUE_META: TableDefinition<&str, u64> = TableDefinition::new("queue_meta");

const NEXT_SEQUENCE: &str = "next_sequence";

/// A payload that could not be persisted
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeadLetter {
    pub failed_at: DateTime<Utc>,
    pub payload: Vec<u8>,
    pub reason: String,
    pub sequence: u64,
}

/// Write queue backed by its own redb file, so queued registrations survive
/// a restart and leased entries are redelivered after a crash.
#[derive(Clone)]
pub struct RedbQueue {
    db: Arc<RedbDatabase>,
}

impl RedbQueue {
    pub fn open<P: AsRef<Path>>(data_dir: P) -> Result<Self, DatabaseError> {
        std::fs::create_dir_all(data_dir.as_ref())?;
        let db = RedbDatabase::create(data_dir.as_ref().join("queue.redb"))?;

        let write_txn = db.begin_write()?;
        {
            let _ = write_txn.open_table(PENDING)?;
            let _ = write_txn.open_table(IN_FLIGHT)?;
            let _ = write_txn.open_table(DEAD_LETTER)?;
            let _ = write_txn.open_table(QUEUE_META)?;
        }
        write_txn.commit()?;

        Ok(Self { db: Arc::new(db) })
    }

    /// Append a payload under the next sequence number
    fn append(&self, release: Option<u64>, payload: &[u8]) -> Result<(), DatabaseError> {
        let write_txn = self.db.begin_write()?;
        {
            if let Some(id) = release {
                let mut in_flight = write_txn.open_table(IN_FLIGHT)?;
                in_flight.remove(id)?;
            }

            let mut meta = write_txn.open_table(QUEUE_META)?;
            let sequence = meta.get(NEXT_SEQUENCE)?.map(|v| v.value()).unwrap_or(0);
            meta.insert(NEXT_SEQUENCE, sequence + 1)?;

            let mut pending = write_txn.open_table(PENDING)?;
            pending.insert(sequence, payload)?;
        }
        write_txn.commit()?;
        Ok(())
    }

    fn lease(&self) -> Result<Option<Delivery>, DatabaseError> {
        let write_txn = self.db.begin_write()?;
        let delivery = {
            let mut pending = write_txn.open_table(PENDING)?;
            let first = pending
                .pop_first()?
                .map(|(k, v)| (k.value(), v.value().to_vec()));

            match first {
                Some((id, payload)) => {
                    let mut in_flight = write_txn.open_table(IN_FLIGHT)?;
                    in_flight.insert(id, payload.as_slice())?;
                    Some(Delivery { id, payload })
                }
                None => None,
            }
        };

        if delivery.is_some() {
            write_txn.commit()?;
        }
        Ok(delivery)
    }

    /// Remove a leased entry, optionally filing it as a dead letter
    fn release(&self, id: u64, dead_letter_reason: Option<&str>) -> Result<bool, DatabaseError> {
        let write_txn = self.db.begin_write()?;
        let found = {
            let mut in_flight = write_txn.open_table(IN_FLIGHT)?;
            let payload = in_flight.remove(id)?.map(|v| v.value().to_vec());

            match (payload, dead_letter_reason) {
                (Some(payload), Some(reason)) => {
                    let letter = DeadLetter {
                        failed_at: Utc::now(),
                        payload,
                        reason: reason.to_string(),
                        sequence: id,
                    };
                    let data = bincode::serialize(&letter)?;
                    let mut dead = write_txn.open_table(DEAD_LETTER)?;
                    dead.insert(id, data.as_slice())?;
                    true
                }
                (Some(_), None) => true,
                (None, _) => false,
            }
        };
        write_txn.commit()?;
        Ok(found)
    }

    fn return_to_pending(&self, id: u64) -> Result<bool, DatabaseError> {
        let write_txn = self.db.begin_write()?;
        let found = {
            let mut in_flight = write_txn.open_table(IN_FLIGHT)?;
            let payload = in_flight.remove(id)?.map(|v| v.value().to_vec());

            match payload {
                Some(payload) => {
                    let mut pending = write_txn.open_table(PENDING)?;
                    pending.insert(id, payload.as_slice())?;
                    true
                }
                None => false,
            }
        };
        write_txn.commit()?;
        Ok(found)
    }

    fn restore_in_flight(&self) -> Result<usize, DatabaseError> {
        let write_txn = self.db.begin_write()?;
        let restored = {
            let mut in_flight = write_txn.open_table(IN_FLIGHT)?;
            let mut pending = write_txn.open_table(PENDING)?;

            let mut restored = 0;
            while let Some((id, payload)) = in_flight
                .pop_first()?
                .map(|(k, v)| (k.value(), v.value().to_vec()))
            {
                pending.insert(id, payload.as_slice())?;
                restored += 1;
            }
            restored
        };
        write_txn.commit()?;
        Ok(restored)
    }

    fn pending_payloads(&self) -> Result<Vec<Vec<u8>>, DatabaseError> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(PENDING)?;

        let mut payloads = Vec::new();
        for result in table.iter()? {
            let (_, value) = result?;
            payloads.push(value.value().to_vec());
        }
        Ok(payloads)
    }

    fn count(&self, table: TableDefinition<u64, &'static [u8]>) -> Result<u64, DatabaseError> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(table)?;
        Ok(table.len()?)
    }

    /// All dead-lettered entries, oldest first
    pub fn dead_letters(&self) -> Result<Vec<DeadLetter>, DatabaseError> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(DEAD_LETTER)?;

        let mut letters = Vec::new();
        for result in table.iter()? {
            let (_, value) = result?;
            letters.push(bincode::deserialize(value.value())?);
        }
        Ok(letters)
    }

    pub fn in_flight_len(&self) -> Result<u64, DatabaseError> {
        self.count(IN_FLIGHT)
    }
}

impl WriteQueue for RedbQueue {
    fn push(&self, payload: &[u8]) -> Result<(), QueueError> {
        Ok(self.append(None, payload)?)
    }

    fn pop(&self) -> Result<Option<Delivery>, QueueError> {
        Ok(self.lease()?)
    }

    fn ack(&self, id: u64) -> Result<(), QueueError> {
        if self.release(id, None)? {
            Ok(())
        } else {
            Err(QueueError::UnknownDelivery(id))
        }
    }

    fn requeue(&self, id: u64, payload: &[u8]) -> Result<(), QueueError> {
        Ok(self.append(Some(id), payload)?)
    }

    fn dead_letter(&self, id: u64, reason: &str) -> Result<(), QueueError> {
        if self.release(id, Some(reason))? {
            Ok(())
        } else {
            Err(QueueError::UnknownDelivery(id))
        }
    }

    fn release_lease(&self, id: u64) -> Result<(), QueueError> {
        if self.return_to_pending(id)? {
            Ok(())
        } else {
            Err(QueueError::UnknownDelivery(id))
        }
    }

    fn recover(&self) -> Result<usize, QueueError> {
        Ok(self.restore_in_flight()?)
    }

    fn pending(&self) -> Result<Vec<Vec<u8>>, QueueError> {
        Ok(self.pending_payloads()?)
    }

    fn pending_len(&self) -> Result<u64, QueueError> {
        Ok(self.count(PENDING)?)
    }
}
