//! In-memory connector for development and testing
//!
//! Every connection shares one journal of the calls it received, so tests
//! can assert on the exact statement sequence a dialect produced.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value as JsonValue};

use dynrest_common::error::Result;

use crate::connection::{Connector, Direction, Outcome, Params, SqlConnection, Statement};

type Handler = dyn Fn(&Statement) -> Result<Outcome> + Send + Sync;

/// One call observed by a memory connection
#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    Begin,
    Commit,
    Rollback,
    Ping,
    Execute(Statement),
}

/// Connector whose connections answer statements with a handler closure
#[derive(Clone)]
pub struct MemoryConnector {
    handler: Arc<Handler>,
    journal: Arc<Mutex<Vec<Call>>>,
    opened: Arc<AtomicUsize>,
    ping_ok: Arc<AtomicBool>,
    rollback_ok: Arc<AtomicBool>,
    stalled: Arc<AtomicBool>,
}

impl MemoryConnector {
    pub fn new<F>(handler: F) -> Self
    where
        F: Fn(&Statement) -> Result<Outcome> + Send + Sync + 'static,
    {
        Self {
            handler: Arc::new(handler),
            journal: Arc::new(Mutex::new(Vec::new())),
            opened: Arc::new(AtomicUsize::new(0)),
            ping_ok: Arc::new(AtomicBool::new(true)),
            rollback_ok: Arc::new(AtomicBool::new(true)),
            stalled: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Connector that answers every statement with one row describing it
    #[must_use]
    pub fn echo() -> Self {
        Self::new(|statement| Ok(Outcome::from_rows(vec![echo_row(statement)])))
    }

    /// Snapshot of every call made so far, across all connections
    #[must_use]
    pub fn journal(&self) -> Vec<Call> {
        self.journal.lock().clone()
    }

    /// Executed statements only, in order
    #[must_use]
    pub fn statements(&self) -> Vec<Statement> {
        self.journal
            .lock()
            .iter()
            .filter_map(|call| match call {
                Call::Execute(statement) => Some(statement.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn clear_journal(&self) {
        self.journal.lock().clear();
    }

    #[must_use]
    pub fn connections_opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    /// Make subsequent pings succeed or fail
    pub fn set_ping_ok(&self, ok: bool) {
        self.ping_ok.store(ok, Ordering::SeqCst);
    }

    /// Make subsequent rollbacks succeed or fail
    pub fn set_rollback_ok(&self, ok: bool) {
        self.rollback_ok.store(ok, Ordering::SeqCst);
    }

    /// While stalled, executed statements never complete
    pub fn set_stalled(&self, stalled: bool) {
        self.stalled.store(stalled, Ordering::SeqCst);
    }
}

impl std::fmt::Debug for MemoryConnector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryConnector")
            .field("connections_opened", &self.connections_opened())
            .finish_non_exhaustive()
    }
}

fn echo_row(statement: &Statement) -> serde_json::Map<String, JsonValue> {
    let binds: serde_json::Map<String, JsonValue> = match &statement.params {
        Params::None => serde_json::Map::new(),
        Params::Named(binds) => binds
            .iter()
            .filter(|b| b.direction == Direction::In)
            .map(|b| (b.name.clone(), b.value.to_json()))
            .collect(),
        Params::Positional(values) => values
            .iter()
            .enumerate()
            .map(|(i, v)| ((i + 1).to_string(), v.to_json()))
            .collect(),
    };

    let row = json!({
        "statement": statement.sql,
        "binds": binds,
        "result": "statement executed"
    });
    match row {
        JsonValue::Object(map) => map,
        _ => serde_json::Map::new(),
    }
}

#[async_trait]
impl Connector for MemoryConnector {
    async fn connect(&self) -> Result<Box<dyn SqlConnection>> {
        self.opened.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MemoryConnection {
            connector: self.clone(),
        }))
    }
}

struct MemoryConnection {
    connector: MemoryConnector,
}

impl MemoryConnection {
    fn record(&self, call: Call) {
        self.connector.journal.lock().push(call);
    }
}

#[async_trait]
impl SqlConnection for MemoryConnection {
    async fn execute(&mut self, statement: &Statement) -> Result<Outcome> {
        self.record(Call::Execute(statement.clone()));
        if self.connector.stalled.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        (self.connector.handler)(statement)
    }

    async fn begin(&mut self) -> Result<()> {
        self.record(Call::Begin);
        Ok(())
    }

    async fn commit(&mut self) -> Result<()> {
        self.record(Call::Commit);
        Ok(())
    }

    async fn rollback(&mut self) -> Result<()> {
        self.record(Call::Rollback);
        if self.connector.rollback_ok.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(dynrest_common::Error::ExecutionFailed(
                "rollback failed: connection lost".to_string(),
            ))
        }
    }

    async fn ping(&mut self) -> Result<()> {
        self.record(Call::Ping);
        if self.connector.ping_ok.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(dynrest_common::Error::ExecutionFailed(
                "connection reset by peer".to_string(),
            ))
        }
    }
}
