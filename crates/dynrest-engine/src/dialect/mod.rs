//! SQL dialect adapters
//!
//! Both adapters receive statements whose input binds are written as
//! `:name` and whose procedure outputs are written as `@name`. The `named`
//! adapter binds by name and uses native OUT parameters; the `session`
//! adapter binds positionally and reads outputs back from session
//! variables.

mod named;
mod session;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::warn;

use dynrest_common::config::Engine;
use dynrest_common::error::{Error, Result};

use crate::bind::{BindSet, OutType, Row, SqlValue};
use crate::connection::SqlConnection;
use crate::placeholder::{Placeholder, PlaceholderKind};

pub use named::NamedDialect;
pub use session::SessionDialect;

/// Procedure output values, keyed by output name
pub type OutputValues = HashMap<String, SqlValue>;

/// One `@name` output of a procedure and its declared type
#[derive(Debug, Clone, PartialEq)]
pub struct OutputParam {
    pub name: String,
    pub out_type: OutType,
}

/// A procedure body ready for execution
#[derive(Debug, Clone, PartialEq)]
pub struct ProcedureCall {
    pub sql: String,
    pub outputs: Vec<OutputParam>,
}

impl ProcedureCall {
    #[must_use]
    pub fn output(&self, name: &str) -> Option<&OutputParam> {
        self.outputs.iter().find(|o| o.name == name)
    }
}

#[async_trait]
pub trait Dialect: Send + Sync {
    fn engine(&self) -> Engine;

    /// Render a procedure output for inlining into a trailing query
    fn literal(&self, value: &SqlValue) -> String {
        value.to_literal()
    }

    /// Run a statement and return its rows
    async fn run_query(
        &self,
        conn: &mut dyn SqlConnection,
        sql: &str,
        binds: &BindSet,
        auto_commit: bool,
    ) -> Result<Vec<Row>>;

    /// Run a procedure body and return its declared outputs
    async fn run_procedure(
        &self,
        conn: &mut dyn SqlConnection,
        call: &ProcedureCall,
        binds: &BindSet,
        auto_commit: bool,
    ) -> Result<OutputValues>;
}

#[must_use]
pub fn dialect_for(engine: Engine) -> Arc<dyn Dialect> {
    match engine {
        Engine::Named => Arc::new(NamedDialect),
        Engine::Session => Arc::new(SessionDialect),
    }
}

/// Roll back after a failed statement and hand the original error back
pub(crate) async fn abort(conn: &mut dyn SqlConnection, err: Error) -> Error {
    if let Err(rollback_err) = conn.rollback().await {
        warn!(error = %rollback_err, "Rollback after failed statement also failed");
    }
    err
}

/// Input bind placeholders, first occurrence of each name only
pub(crate) fn distinct_inputs(placeholders: &[Placeholder]) -> Vec<&str> {
    let mut names: Vec<&str> = Vec::new();
    for p in placeholders {
        if p.kind == PlaceholderKind::Query && !names.contains(&p.name.as_str()) {
            names.push(&p.name);
        }
    }
    names
}
