//! Session stores mapping a token's `jti` to the subject it was issued for

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;

use dynrest_common::config::AuthConfig;
use dynrest_common::error::Result;
use dynrest_engine::{ConnectionPool, Dialect};

use crate::sql::SqlLookup;

#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Subject of the live session `jti`, if there is one
    async fn subject(&self, jti: &str) -> Result<Option<String>>;
}

/// Session store held in memory
#[derive(Debug, Default)]
pub struct InMemorySessionStore {
    sessions: RwLock<HashMap<String, String>>,
}

impl InMemorySessionStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn open(&self, jti: impl Into<String>, subject: impl Into<String>) {
        self.sessions.write().insert(jti.into(), subject.into());
    }

    /// End a session; tokens carrying its `jti` stop working immediately
    pub fn revoke(&self, jti: &str) -> bool {
        self.sessions.write().remove(jti).is_some()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sessions.read().is_empty()
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn subject(&self, jti: &str) -> Result<Option<String>> {
        Ok(self.sessions.read().get(jti).cloned())
    }
}

/// Session store backed by the configured lookup statement
#[derive(Clone)]
pub struct SqlSessionStore {
    lookup: SqlLookup,
}

impl SqlSessionStore {
    pub fn new(pool: ConnectionPool, dialect: Arc<dyn Dialect>, config: &AuthConfig) -> Self {
        Self {
            lookup: SqlLookup::new(
                pool,
                dialect,
                &config.session_lookup_sql,
                &config.subject_column,
            ),
        }
    }
}

#[async_trait]
impl SessionStore for SqlSessionStore {
    async fn subject(&self, jti: &str) -> Result<Option<String>> {
        self.lookup.fetch("jti", jti).await
    }
}
