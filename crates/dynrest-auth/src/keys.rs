//! Signing key stores
//!
//! Keys are base64 encoded HMAC secrets addressed by the `kid` token header.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use base64::Engine as _;
use parking_lot::RwLock;

use dynrest_common::config::AuthConfig;
use dynrest_common::error::Result;
use dynrest_engine::{ConnectionPool, Dialect};

use crate::sql::SqlLookup;

#[async_trait]
pub trait KeyStore: Send + Sync {
    /// Base64 signing secret for `kid`, if one is registered
    async fn signing_key(&self, kid: &str) -> Result<Option<String>>;
}

/// Key store held in memory
#[derive(Debug, Default)]
pub struct InMemoryKeyStore {
    keys: RwLock<HashMap<String, String>>,
}

impl InMemoryKeyStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an already base64 encoded secret
    pub fn insert(&self, kid: impl Into<String>, base64_key: impl Into<String>) {
        self.keys.write().insert(kid.into(), base64_key.into());
    }

    /// Register a raw secret
    pub fn insert_secret(&self, kid: impl Into<String>, secret: &[u8]) {
        let encoded = base64::engine::general_purpose::STANDARD.encode(secret);
        self.insert(kid, encoded);
    }

    pub fn remove(&self, kid: &str) -> bool {
        self.keys.write().remove(kid).is_some()
    }
}

#[async_trait]
impl KeyStore for InMemoryKeyStore {
    async fn signing_key(&self, kid: &str) -> Result<Option<String>> {
        Ok(self.keys.read().get(kid).cloned())
    }
}

/// Key store backed by the configured lookup statement
#[derive(Clone)]
pub struct SqlKeyStore {
    lookup: SqlLookup,
}

impl SqlKeyStore {
    pub fn new(pool: ConnectionPool, dialect: Arc<dyn Dialect>, config: &AuthConfig) -> Self {
        Self {
            lookup: SqlLookup::new(pool, dialect, &config.key_lookup_sql, &config.key_column),
        }
    }
}

#[async_trait]
impl KeyStore for SqlKeyStore {
    async fn signing_key(&self, kid: &str) -> Result<Option<String>> {
        self.lookup.fetch("kid", kid).await
    }
}
