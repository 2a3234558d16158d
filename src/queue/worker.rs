//! The single consumer that makes queued registrations durable.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::{Delivery, QueueError, WriteQueue};
use crate::auth::{Components, Reservations};
use crate::config::WorkerConfig;
use crate::storage::{CredentialStore, InsertError, QueuedRegistration};

/// What one iteration of the worker did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// Queue was empty
    Idle,
    /// Record inserted into the credential store
    Persisted,
    /// Record was already durable (redelivery); entry acknowledged
    AlreadyPersisted,
    /// Store failed; entry pushed back with one more attempt counted
    Requeued,
    /// Entry moved to the dead-letter table
    DeadLettered,
}

pub struct WriteBehindWorker {
    max_attempts: u32,
    poll_interval: Duration,
    queue: Arc<dyn WriteQueue>,
    reservations: Arc<Reservations>,
    store: Arc<dyn CredentialStore>,
}

impl WriteBehindWorker {
    pub fn new(components: &Components, config: &WorkerConfig) -> Self {
        Self {
            max_attempts: config.max_attempts,
            poll_interval: Duration::from_millis(config.poll_interval_ms),
            queue: Arc::clone(&components.queue),
            reservations: Arc::clone(&components.reservations),
            store: Arc::clone(&components.store),
        }
    }

    /// Lease one entry and try to persist it.
    ///
    /// If settling the lease fails (ack, requeue or dead-letter), the entry
    /// is handed back to the pending set so it is retried in this process
    /// rather than only after a restart.
    pub fn process_next(&self) -> Result<Step, QueueError> {
        let Some(delivery) = self.queue.pop()? else {
            return Ok(Step::Idle);
        };

        let id = delivery.id;
        self.settle(delivery).map_err(|e| {
            if let Err(release) = self.queue.release_lease(id) {
                error!(sequence = id, error = %release, "Failed to return leased entry to the queue");
            }
            e
        })
    }

    fn settle(&self, delivery: Delivery) -> Result<Step, QueueError> {
        let entry = match QueuedRegistration::from_payload(&delivery.payload) {
            Ok(entry) => entry,
            Err(e) => {
                warn!(sequence = delivery.id, error = %e, "Dead-lettering malformed queue entry");
                self.queue
                    .dead_letter(delivery.id, &format!("malformed payload: {e}"))?;
                return Ok(Step::DeadLettered);
            }
        };
        let record = &entry.record;

        let step = match self.store.insert(record) {
            Ok(()) => {
                self.queue.ack(delivery.id)?;
                debug!(login_name = %record.login_name, user_id = %record.id, "Persisted queued user");
                Step::Persisted
            }
            Err(InsertError::Duplicate { existing_id }) if existing_id == record.id => {
                self.queue.ack(delivery.id)?;
                debug!(user_id = %record.id, "Queued user already persisted, skipping redelivery");
                Step::AlreadyPersisted
            }
            Err(InsertError::Duplicate { existing_id }) => {
                warn!(
                    login_name = %record.login_name,
                    user_id = %record.id,
                    existing_id = %existing_id,
                    "Login name was taken before the queued user became durable"
                );
                self.queue
                    .dead_letter(delivery.id, "login name already exists")?;
                Step::DeadLettered
            }
            Err(InsertError::Database(e)) => {
                let attempts = entry.attempts + 1;
                if attempts >= self.max_attempts {
                    error!(
                        login_name = %record.login_name,
                        attempts,
                        error = %e,
                        "Giving up on queued user"
                    );
                    self.queue
                        .dead_letter(delivery.id, &format!("store error after {attempts} attempts: {e}"))?;
                    Step::DeadLettered
                } else {
                    warn!(login_name = %record.login_name, attempts, error = %e, "Store write failed, requeueing");
                    let retry = QueuedRegistration {
                        attempts,
                        record: record.clone(),
                    };
                    self.queue.requeue(delivery.id, &retry.to_payload()?)?;
                    return Ok(Step::Requeued);
                }
            }
        };

        // Durable or abandoned either way: the name is no longer pending
        self.reservations.release(&record.login_name, record.id);
        Ok(step)
    }

    /// Process entries until the queue is empty. Stops early if an entry
    /// had to be requeued, so a failing store is not hammered.
    pub fn drain(&self) -> Result<usize, QueueError> {
        let mut processed = 0;
        loop {
            match self.process_next()? {
                Step::Idle => return Ok(processed),
                Step::Requeued => return Ok(processed + 1),
                _ => processed += 1,
            }
        }
    }

    /// Run the worker loop on the tokio runtime.
    pub fn spawn(self) -> WorkerHandle {
        let (stop_tx, mut stop_rx) = watch::channel(false);
        let worker = Arc::new(self);
        let poll_interval = worker.poll_interval;

        let handle = tokio::spawn(async move {
            info!(poll_interval_ms = poll_interval.as_millis() as u64, "Write-behind worker started");

            loop {
                if *stop_rx.borrow() {
                    break;
                }

                let w = Arc::clone(&worker);
                let idle = match tokio::task::spawn_blocking(move || w.process_next()).await {
                    Ok(Ok(Step::Idle)) | Ok(Ok(Step::Requeued)) => true,
                    Ok(Ok(_)) => false,
                    Ok(Err(e)) => {
                        error!(error = %e, "Write queue unavailable");
                        true
                    }
                    Err(e) => {
                        error!(error = %e, "Write-behind worker task panicked");
                        true
                    }
                };

                if idle {
                    tokio::select! {
                        _ = tokio::time::sleep(poll_interval) => {}
                        changed = stop_rx.changed() => {
                            if changed.is_err() {
                                break;
                            }
                        }
                    }
                }
            }

            let w = Arc::clone(&worker);
            match tokio::task::spawn_blocking(move || w.drain()).await {
                Ok(Ok(count)) => info!(drained = count, "Write-behind worker stopped"),
                Ok(Err(e)) => error!(error = %e, "Failed to drain write queue on shutdown"),
                Err(e) => error!(error = %e, "Write queue drain panicked"),
            }
        });

        WorkerHandle { handle, stop_tx }
    }
}

/// Handle to a running worker
pub struct WorkerHandle {
    handle: JoinHandle<()>,
    stop_tx: watch::Sender<bool>,
}

impl WorkerHandle {
    /// Ask the worker to stop, let it drain pending entries, and wait.
    pub async fn shutdown(self) {
        let _ = self.stop_tx.send(true);
        if let Err(e) = self.handle.await {
            error!(error = %e, "Write-behind worker exited abnormally");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    use crate::queue::RedbQueue;
    use crate::storage::UserRecord;
    use crate::testutil::{make_user, test_components, FailingStore};

    /// A queue whose next `requeue` fails once
    struct FlakyRequeueQueue {
        fail_next: AtomicBool,
        inner: RedbQueue,
    }

    impl WriteQueue for FlakyRequeueQueue {
        fn push(&self, payload: &[u8]) -> Result<(), QueueError> {
            self.inner.push(payload)
        }
        fn pop(&self) -> Result<Option<Delivery>, QueueError> {
            self.inner.pop()
        }
        fn ack(&self, id: u64) -> Result<(), QueueError> {
            self.inner.ack(id)
        }
        fn requeue(&self, id: u64, payload: &[u8]) -> Result<(), QueueError> {
            if self.fail_next.swap(false, Ordering::SeqCst) {
                return Err(QueueError::UnknownDelivery(id));
            }
            self.inner.requeue(id, payload)
        }
        fn dead_letter(&self, id: u64, reason: &str) -> Result<(), QueueError> {
            self.inner.dead_letter(id, reason)
        }
        fn release_lease(&self, id: u64) -> Result<(), QueueError> {
            self.inner.release_lease(id)
        }
        fn recover(&self) -> Result<usize, QueueError> {
            self.inner.recover()
        }
        fn pending(&self) -> Result<Vec<Vec<u8>>, QueueError> {
            self.inner.pending()
        }
        fn pending_len(&self) -> Result<u64, QueueError> {
            self.inner.pending_len()
        }
    }

    fn enqueue(components: &Components, record: &UserRecord) {
        let payload = QueuedRegistration::new(record.clone()).to_payload().unwrap();
        components.queue.push(&payload).unwrap();
        components.reservations.reserve(&record.login_name, record.id);
    }

    #[test]
    fn test_persists_queued_record() {
        let (components, _temp) = test_components();
        let worker = WriteBehindWorker::new(&components, &WorkerConfig::default());
        let user = make_user("alice", "secretA");
        enqueue(&components, &user);

        assert!(components.store.find_by_login_name("alice").unwrap().is_none());
        assert_eq!(worker.process_next().unwrap(), Step::Persisted);

        assert_eq!(components.store.find_by_login_name("alice").unwrap(), Some(user));
        assert!(!components.reservations.is_reserved("alice"));
        assert_eq!(worker.process_next().unwrap(), Step::Idle);
    }

    #[test]
    fn test_redelivery_is_idempotent() {
        let (components, _temp) = test_components();
        let worker = WriteBehindWorker::new(&components, &WorkerConfig::default());
        let user = make_user("alice", "secretA");
        enqueue(&components, &user);
        enqueue(&components, &user);

        assert_eq!(worker.process_next().unwrap(), Step::Persisted);
        assert_eq!(worker.process_next().unwrap(), Step::AlreadyPersisted);
        assert_eq!(components.queue.pending_len().unwrap(), 0);
    }

    #[test]
    fn test_malformed_payload_does_not_stall_pipeline() {
        let (components, _temp) = test_components();
        let worker = WriteBehindWorker::new(&components, &WorkerConfig::default());

        components.queue.push(b"{not json").unwrap();
        let user = make_user("bob", "secretB");
        enqueue(&components, &user);

        assert_eq!(worker.drain().unwrap(), 2);
        assert!(components.store.find_by_login_name("bob").unwrap().is_some());
    }

    #[test]
    fn test_conflicting_record_is_dead_lettered() {
        let (components, _temp) = test_components();
        let worker = WriteBehindWorker::new(&components, &WorkerConfig::default());

        let durable = make_user("alice", "secretA");
        components.store.insert(&durable).unwrap();
        let late = make_user("alice", "secretB");
        enqueue(&components, &late);

        assert_eq!(worker.process_next().unwrap(), Step::DeadLettered);
        let stored = components.store.find_by_login_name("alice").unwrap().unwrap();
        assert_eq!(stored.id, durable.id);
        assert!(!components.reservations.is_reserved("alice"));
    }

    #[test]
    fn test_store_errors_retry_then_dead_letter() {
        let (mut components, _temp) = test_components();
        components.store = Arc::new(FailingStore);
        let config = WorkerConfig {
            max_attempts: 3,
            ..Default::default()
        };
        let worker = WriteBehindWorker::new(&components, &config);
        enqueue(&components, &make_user("alice", "secretA"));

        assert_eq!(worker.process_next().unwrap(), Step::Requeued);
        assert_eq!(worker.process_next().unwrap(), Step::Requeued);
        assert!(components.reservations.is_reserved("alice"));

        assert_eq!(worker.process_next().unwrap(), Step::DeadLettered);
        assert_eq!(worker.process_next().unwrap(), Step::Idle);
        assert!(!components.reservations.is_reserved("alice"));
    }

    #[test]
    fn test_failed_requeue_returns_lease() {
        let (mut components, _temp) = test_components();
        let queue_dir = tempfile::TempDir::new().unwrap();
        components.queue = Arc::new(FlakyRequeueQueue {
            fail_next: AtomicBool::new(true),
            inner: RedbQueue::open(queue_dir.path()).unwrap(),
        });
        components.store = Arc::new(FailingStore);
        let config = WorkerConfig {
            max_attempts: 2,
            ..Default::default()
        };
        let worker = WriteBehindWorker::new(&components, &config);
        enqueue(&components, &make_user("alice", "secretA"));

        assert!(worker.process_next().is_err());
        // Back in line without a restart
        assert_eq!(components.queue.pending_len().unwrap(), 1);
        assert!(components.reservations.is_reserved("alice"));

        assert_eq!(worker.process_next().unwrap(), Step::Requeued);
        assert_eq!(worker.process_next().unwrap(), Step::DeadLettered);
        assert_eq!(worker.process_next().unwrap(), Step::Idle);
        assert!(!components.reservations.is_reserved("alice"));
    }

    #[tokio::test]
    async fn test_spawned_worker_drains_and_stops() {
        let (components, _temp) = test_components();
        let config = WorkerConfig {
            poll_interval_ms: 10,
            ..Default::default()
        };
        let handle = WriteBehindWorker::new(&components, &config).spawn();

        enqueue(&components, &make_user("alice", "secretA"));
        tokio::time::timeout(Duration::from_secs(5), async {
            while components.store.find_by_login_name("alice").unwrap().is_none() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("worker did not persist the queued user");

        enqueue(&components, &make_user("bob", "secretB"));
        handle.shutdown().await;
        assert!(components.store.find_by_login_name("bob").unwrap().is_some());
    }
}
