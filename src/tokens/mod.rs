pub mod claims;
pub mod issuer;
pub mod secrets;

pub use claims::{Claims, TokenKind};
pub use issuer::{IssuedToken, TokenError, TokenIssuer, TOKEN_LIFETIME};
pub use secrets::{Argon2Policy, PlaintextPolicy, SecretError, SecretPolicy};
