mod admin;
mod auth;

pub use admin::health;
pub use auth::{login, register, verify_token};
