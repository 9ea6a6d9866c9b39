//! Driver seam: the minimal connection surface both dialects run on

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::warn;

use dynrest_common::config::{DatabaseConfig, Driver, Engine};
use dynrest_common::error::{Error, Result};

use crate::bind::{OutType, Row, SqlValue};
use crate::memory::MemoryConnector;
use crate::mysql::MySqlConnector;

/// Bind direction for engines with native OUT parameters
#[derive(Debug, Clone, PartialEq)]
pub enum Direction {
    In,
    Out(OutType),
}

#[derive(Debug, Clone, PartialEq)]
pub struct NamedBind {
    pub name: String,
    pub value: SqlValue,
    pub direction: Direction,
}

impl NamedBind {
    pub fn input(name: impl Into<String>, value: SqlValue) -> Self {
        Self {
            name: name.into(),
            value,
            direction: Direction::In,
        }
    }

    pub fn output(name: impl Into<String>, out_type: OutType) -> Self {
        Self {
            name: name.into(),
            value: SqlValue::Null,
            direction: Direction::Out(out_type),
        }
    }
}

/// Parameters of a statement, in the engine's native model
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Params {
    #[default]
    None,
    Named(Vec<NamedBind>),
    Positional(Vec<SqlValue>),
}

/// A statement ready for the driver
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    pub sql: String,
    pub params: Params,
    /// Commit the statement's own unit of work once it succeeds
    pub auto_commit: bool,
}

impl Statement {
    pub fn new(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            params: Params::None,
            auto_commit: false,
        }
    }

    #[must_use]
    pub fn with_params(mut self, params: Params) -> Self {
        self.params = params;
        self
    }

    #[must_use]
    pub fn auto_commit(mut self, auto_commit: bool) -> Self {
        self.auto_commit = auto_commit;
        self
    }
}

/// What a driver returns for one statement
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Outcome {
    pub rows: Vec<Row>,
    pub rows_affected: u64,
    /// Values of OUT binds, keyed by bind name
    pub out_values: HashMap<String, SqlValue>,
}

impl Outcome {
    #[must_use]
    pub fn from_rows(rows: Vec<Row>) -> Self {
        Self {
            rows_affected: rows.len() as u64,
            rows,
            out_values: HashMap::new(),
        }
    }
}

/// One open database connection.
///
/// Drivers report engine failures as `Error::ExecutionFailed` carrying the
/// engine's own message.
#[async_trait]
pub trait SqlConnection: Send {
    async fn execute(&mut self, statement: &Statement) -> Result<Outcome>;

    async fn begin(&mut self) -> Result<()>;

    async fn commit(&mut self) -> Result<()>;

    async fn rollback(&mut self) -> Result<()>;

    /// Cheap round trip used to keep idle connections alive
    async fn ping(&mut self) -> Result<()>;
}

/// Opens new connections for the pool
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self) -> Result<Box<dyn SqlConnection>>;
}

/// Build the connector `config` selects. Nothing is opened yet.
pub fn connector_for(config: &DatabaseConfig) -> Result<Arc<dyn Connector>> {
    match config.driver {
        Driver::Memory => {
            warn!("Using the in-memory echo connector; statements are not sent to a database");
            Ok(Arc::new(MemoryConnector::echo()))
        }
        Driver::Mysql => {
            if config.engine != Engine::Session {
                return Err(Error::ConfigError(
                    "the mysql driver requires database.engine = \"session\"".to_string(),
                ));
            }
            let url = config.url.as_deref().ok_or_else(|| {
                Error::ConfigError("database.url is required for the mysql driver".to_string())
            })?;
            Ok(Arc::new(MySqlConnector::new(url)?))
        }
    }
}
