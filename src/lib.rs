//! dynrest: declarative SQL-backed REST endpoints
//!
//! An operator declares endpoints as data (method, URL template, SQL text
//! and parameter metadata) and this crate serves them live:
//!
//! - **Routing** - URL templates compiled to anchored matchers, first match wins
//! - **Binding** - Parameters extracted straight out of SQL text and validated
//! - **Auth** - Bearer tokens checked against stored signing keys and sessions
//! - **Execution** - Procedures and queries chained over two SQL dialects

#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub use dynrest_auth as auth;
pub use dynrest_common as common;
pub use dynrest_engine as engine;
pub use dynrest_rest as rest;

use std::sync::Arc;

use tracing::info;

use dynrest_auth::{AuthGuard, SqlKeyStore, SqlSessionStore};
use dynrest_common::config::{DynrestConfig, RequestSettings};
use dynrest_common::error::Result;
use dynrest_engine::{connector_for, dialect_for, ConnectionPool, Connector, Executor, FileSpecStore};
use dynrest_rest::{AppState, RestServer};

/// The assembled service: pool, dialect, stores and HTTP front end
pub struct DynrestServer {
    config: DynrestConfig,
    rest_server: RestServer,
}

impl DynrestServer {
    /// Wire every component on the connector `config.database` selects
    pub fn from_config(config: DynrestConfig) -> Result<Self> {
        let connector = connector_for(&config.database)?;
        Ok(Self::new(config, connector))
    }

    /// Wire every component from `config` on top of `connector`
    pub fn new(config: DynrestConfig, connector: Arc<dyn Connector>) -> Self {
        info!(
            engine = ?config.database.engine,
            driver = ?config.database.driver,
            "Initializing dynrest"
        );

        let pool = ConnectionPool::new(connector, config.database.pool.clone());
        let dialect = dialect_for(config.database.engine);

        let keys = Arc::new(SqlKeyStore::new(pool.clone(), dialect.clone(), &config.auth));
        let sessions = Arc::new(SqlSessionStore::new(
            pool.clone(),
            dialect.clone(),
            &config.auth,
        ));
        let guard = AuthGuard::new(keys, sessions).with_leeway(config.auth.leeway_secs);

        let settings = RequestSettings::from(&config);
        let store = FileSpecStore::new(&config.registry.path, settings.api_root.clone());

        let state = Arc::new(AppState {
            store: Arc::new(store),
            guard: Arc::new(guard),
            executor: Arc::new(Executor::new(pool, dialect)),
            settings,
        });
        let rest_server = RestServer::new(&config.server, state);

        Self {
            config,
            rest_server,
        }
    }

    #[must_use]
    pub fn config(&self) -> &DynrestConfig {
        &self.config
    }

    #[must_use]
    pub fn rest(&self) -> &RestServer {
        &self.rest_server
    }

    /// Serve until the HTTP server stops
    pub async fn run(&self) -> Result<()> {
        info!("Starting dynrest services");
        self.rest_server.run().await
    }

    /// Log the shutdown; leased connections close as their requests finish
    pub async fn shutdown(&self) -> Result<()> {
        let pool = self.rest_server.state().executor.pool().clone();
        info!(idle = pool.idle_count(), "Shutting down dynrest services");
        Ok(())
    }
}
