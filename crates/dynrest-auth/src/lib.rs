//! dynrest Bearer Token Guard
//!
//! Verifies `Authorization: Bearer` tokens for endpoints that require one:
//! - Signing secrets looked up per token by their `kid` header
//! - HMAC signature and expiry checks
//! - Server-side sessions resolved by the token's `jti`
//!
//! Keys and sessions come from in-memory stores or from lookup statements
//! run through the active SQL dialect.

#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod guard;
pub mod keys;
pub mod session;
mod sql;

pub use guard::{AuthGuard, Identity};
pub use keys::{InMemoryKeyStore, KeyStore, SqlKeyStore};
pub use session::{InMemorySessionStore, SessionStore, SqlSessionStore};
