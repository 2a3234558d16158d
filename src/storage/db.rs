use redb::{Database as RedbDatabase, ReadTransaction, ReadableTable, WriteTransaction};
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;

use super::models::UserRecord;
use super::tables::*;

#[derive(Debug, Error)]
pub enum DatabaseError {
    #[error("Commit error: {0}")]
    Commit(#[from] redb::CommitError),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Database error: {0}")]
    Redb(#[from] redb::Error),
    #[error("Database error: {0}")]
    RedbDatabase(#[from] redb::DatabaseError),
    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),
    #[error("Storage error: {0}")]
    Storage(#[from] redb::StorageError),
    #[error("Table error: {0}")]
    Table(#[from] redb::TableError),
    #[error("Transaction error: {0}")]
    Transaction(#[from] redb::TransactionError),
}

#[derive(Debug, Error)]
pub enum InsertError {
    #[error("Login name already exists")]
    Duplicate { existing_id: uuid::Uuid },
    #[error(transparent)]
    Database(#[from] DatabaseError),
}

/// Durable, keyed user records.
///
/// Login name uniqueness is enforced here, inside the insert transaction,
/// because the caller's pre-check and the eventual write can be far apart
/// in time.
pub trait CredentialStore: Send + Sync {
    fn find_by_login_name(&self, login_name: &str) -> Result<Option<UserRecord>, DatabaseError>;

    fn insert(&self, record: &UserRecord) -> Result<(), InsertError>;
}

#[derive(Clone)]
pub struct Database {
    db: Arc<RedbDatabase>,
}

impl Database {
    /// Open or create a database at the given path
    pub fn open<P: AsRef<Path>>(data_dir: P) -> Result<Self, DatabaseError> {
        std::fs::create_dir_all(data_dir.as_ref())?;
        let db_path = data_dir.as_ref().join("users.redb");
        let db = RedbDatabase::create(db_path)?;

        let write_txn = db.begin_write()?;
        {
            let _ = write_txn.open_table(USERS)?;
        }
        write_txn.commit()?;

        Ok(Self { db: Arc::new(db) })
    }

    /// Begin a read transaction
    pub fn begin_read(&self) -> Result<ReadTransaction, DatabaseError> {
        Ok(self.db.begin_read()?)
    }

    /// Begin a write transaction
    pub fn begin_write(&self) -> Result<WriteTransaction, DatabaseError> {
        Ok(self.db.begin_write()?)
    }

    // ========================================================================
    // User operations
    // ========================================================================

    /// Get a user by login name
    pub fn get_user(&self, login_name: &str) -> Result<Option<UserRecord>, DatabaseError> {
        let read_txn = self.begin_read()?;
        let table = read_txn.open_table(USERS)?;

        match table.get(login_name)? {
            Some(data) => {
                let user: UserRecord = bincode::deserialize(data.value())?;
                Ok(Some(user))
            }
            None => Ok(None),
        }
    }

    /// Insert a user, failing if the login name is taken
    pub fn put_user(&self, user: &UserRecord) -> Result<(), InsertError> {
        let write_txn = self.begin_write()?;
        {
            let mut table = write_txn.open_table(USERS).map_err(DatabaseError::from)?;

            let existing: Option<UserRecord> = match table
                .get(user.login_name.as_str())
                .map_err(DatabaseError::from)?
            {
                Some(data) => Some(bincode::deserialize(data.value()).map_err(DatabaseError::from)?),
                None => None,
            };
            if let Some(existing) = existing {
                // The transaction is dropped uncommitted
                return Err(InsertError::Duplicate {
                    existing_id: existing.id,
                });
            }

            let data = bincode::serialize(user).map_err(DatabaseError::from)?;
            table
                .insert(user.login_name.as_str(), data.as_slice())
                .map_err(DatabaseError::from)?;
        }
        write_txn.commit().map_err(DatabaseError::from)?;
        Ok(())
    }
}

impl CredentialStore for Database {
    fn find_by_login_name(&self, login_name: &str) -> Result<Option<UserRecord>, DatabaseError> {
        self.get_user(login_name)
    }

    fn insert(&self, record: &UserRecord) -> Result<(), InsertError> {
        self.put_user(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{make_user, setup_db};

    #[test]
    fn test_put_and_get_user() {
        let (db, _temp) = setup_db();

        let user = make_user("alice", "secretA");
        db.put_user(&user).unwrap();

        let fetched = db.get_user("alice").unwrap().unwrap();
        assert_eq!(fetched, user);
    }

    #[test]
    fn test_missing_user_is_none() {
        let (db, _temp) = setup_db();

        assert!(db.get_user("nobody").unwrap().is_none());
    }

    #[test]
    fn test_duplicate_login_name_rejected() {
        let (db, _temp) = setup_db();

        let first = make_user("alice", "secretA");
        db.put_user(&first).unwrap();

        let second = make_user("alice", "secretB");
        match db.put_user(&second) {
            Err(InsertError::Duplicate { existing_id }) => assert_eq!(existing_id, first.id),
            other => panic!("expected duplicate, got {other:?}"),
        }

        let stored = db.get_user("alice").unwrap().unwrap();
        assert_eq!(stored.id, first.id);
        assert_eq!(stored.secret, "secretA");
    }

    #[test]
    fn test_login_names_are_case_sensitive() {
        let (db, _temp) = setup_db();

        let lower = make_user("alice", "a");
        let upper = make_user("Alice", "b");
        db.put_user(&lower).unwrap();
        db.put_user(&upper).unwrap();

        assert_eq!(db.get_user("alice").unwrap().unwrap().id, lower.id);
        assert_eq!(db.get_user("Alice").unwrap().unwrap().id, upper.id);
    }

    #[test]
    fn test_records_survive_reopen() {
        let (db, temp) = setup_db();
        let user = make_user("alice", "secretA");
        db.put_user(&user).unwrap();
        drop(db);

        let reopened = Database::open(temp.path()).unwrap();
        assert_eq!(reopened.find_by_login_name("alice").unwrap().unwrap(), user);
    }
}
