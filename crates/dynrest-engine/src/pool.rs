//! Bounded connection pool
//!
//! A semaphore caps the number of leased connections. Idle connections are
//! kept with the instant they were returned; on checkout, connections idle
//! past `idle_timeout` are closed and those idle past `keep_alive` are
//! pinged before reuse.
//!
//! A lease that is dropped with a transaction open, or while a call on it
//! was still in flight, closes its connection instead of returning it.

use std::ops::{Deref, DerefMut};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::time::Instant;
use tracing::{debug, warn};

use dynrest_common::config::PoolConfig;
use dynrest_common::error::{Error, Result};

use crate::connection::{Connector, Outcome, SqlConnection, Statement};

struct PoolInner {
    connector: Arc<dyn Connector>,
    config: PoolConfig,
    permits: Arc<Semaphore>,
    idle: Mutex<Vec<(Box<dyn SqlConnection>, Instant)>>,
}

/// Shared handle to the pool; clones refer to the same connections
#[derive(Clone)]
pub struct ConnectionPool {
    inner: Arc<PoolInner>,
}

impl std::fmt::Debug for ConnectionPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionPool")
            .field("max_size", &self.inner.config.max_size)
            .field("available", &self.available())
            .field("idle", &self.idle_count())
            .finish()
    }
}

impl ConnectionPool {
    pub fn new(connector: Arc<dyn Connector>, config: PoolConfig) -> Self {
        let max_size = config.max_size.max(1);
        Self {
            inner: Arc::new(PoolInner {
                connector,
                config,
                permits: Arc::new(Semaphore::new(max_size)),
                idle: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Lease a connection, waiting at most `acquire_timeout` for a free slot
    pub async fn acquire(&self) -> Result<PooledConnection> {
        let permit = tokio::time::timeout(
            self.inner.config.acquire_timeout(),
            self.inner.permits.clone().acquire_owned(),
        )
        .await
        .map_err(|_| Error::PoolTimeout)?
        .map_err(|_| Error::PoolTimeout)?;

        let conn = match self.reuse_idle().await {
            Some(conn) => conn,
            None => {
                debug!("Opening new database connection");
                self.inner.connector.connect().await?
            }
        };

        Ok(PooledConnection {
            conn: Some(Tracked::new(conn)),
            inner: Arc::clone(&self.inner),
            _permit: permit,
        })
    }

    async fn reuse_idle(&self) -> Option<Box<dyn SqlConnection>> {
        loop {
            // The lock is never held across an await.
            let (mut conn, returned_at) = self.inner.idle.lock().pop()?;
            let idle_for = returned_at.elapsed();

            if idle_for >= self.inner.config.idle_timeout() {
                debug!(?idle_for, "Closing idle connection past idle timeout");
                continue;
            }
            if idle_for >= self.inner.config.keep_alive() {
                if let Err(e) = conn.ping().await {
                    warn!(error = %e, "Dropping idle connection that failed keep-alive ping");
                    continue;
                }
            }
            return Some(conn);
        }
    }

    #[must_use]
    pub fn idle_count(&self) -> usize {
        self.inner.idle.lock().len()
    }

    /// Slots free for new leases
    #[must_use]
    pub fn available(&self) -> usize {
        self.inner.permits.available_permits()
    }
}

/// Connection wrapper that records whether it is safe to hand out again
struct Tracked {
    conn: Box<dyn SqlConnection>,
    /// Set while a call is awaited; stays set if that future is dropped
    in_flight: bool,
    open_tx: bool,
}

impl Tracked {
    fn new(conn: Box<dyn SqlConnection>) -> Self {
        Self {
            conn,
            in_flight: false,
            open_tx: false,
        }
    }

    fn is_clean(&self) -> bool {
        !self.in_flight && !self.open_tx
    }
}

#[async_trait]
impl SqlConnection for Tracked {
    async fn execute(&mut self, statement: &Statement) -> Result<Outcome> {
        if !statement.auto_commit {
            self.open_tx = true;
        }
        self.in_flight = true;
        let result = self.conn.execute(statement).await;
        self.in_flight = false;
        result
    }

    async fn begin(&mut self) -> Result<()> {
        self.open_tx = true;
        self.in_flight = true;
        let result = self.conn.begin().await;
        self.in_flight = false;
        result
    }

    async fn commit(&mut self) -> Result<()> {
        self.in_flight = true;
        let result = self.conn.commit().await;
        self.in_flight = false;
        if result.is_ok() {
            self.open_tx = false;
        }
        result
    }

    async fn rollback(&mut self) -> Result<()> {
        self.in_flight = true;
        let result = self.conn.rollback().await;
        self.in_flight = false;
        if result.is_ok() {
            self.open_tx = false;
        }
        result
    }

    async fn ping(&mut self) -> Result<()> {
        self.in_flight = true;
        let result = self.conn.ping().await;
        self.in_flight = false;
        result
    }
}

/// A leased connection; returned to the pool when dropped
pub struct PooledConnection {
    conn: Option<Tracked>,
    inner: Arc<PoolInner>,
    _permit: OwnedSemaphorePermit,
}

impl std::fmt::Debug for PooledConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let (in_flight, open_tx) = self
            .conn
            .as_ref()
            .map_or((false, false), |c| (c.in_flight, c.open_tx));
        f.debug_struct("PooledConnection")
            .field("in_flight", &in_flight)
            .field("open_tx", &open_tx)
            .finish_non_exhaustive()
    }
}

impl PooledConnection {
    /// Close the connection instead of returning it to the pool
    pub fn discard(mut self) {
        self.conn.take();
    }
}

impl Deref for PooledConnection {
    type Target = dyn SqlConnection;

    fn deref(&self) -> &Self::Target {
        self.conn
            .as_ref()
            .expect("connection is present until the lease is dropped")
    }
}

impl DerefMut for PooledConnection {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.conn
            .as_mut()
            .expect("connection is present until the lease is dropped")
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        let Some(tracked) = self.conn.take() else {
            return;
        };
        if tracked.is_clean() {
            self.inner.idle.lock().push((tracked.conn, Instant::now()));
        } else {
            warn!(
                in_flight = tracked.in_flight,
                open_tx = tracked.open_tx,
                "Closing connection released in an unfinished state"
            );
        }
    }
}
