mod db;
pub mod models;
mod tables;

pub use db::{CredentialStore, Database, DatabaseError, InsertError};
pub use models::{QueuedRegistration, UserRecord};
