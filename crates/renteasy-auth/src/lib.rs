//! Session tokens and password hashing.
//!
//! Access and refresh tokens are HS256 JWTs signed with separate secrets, so
//! one kind can never be replayed as the other.

pub mod password;
pub mod tokens;

pub use tokens::{Audience, Claims, TokenConfig, TokenError, TokenPair, TokenService};
