//! Read-only SQLite connections shared by lookups and cursors.

use crate::error::{ChainError, Result};
use parking_lot::Mutex;
use rusqlite::{Connection, OpenFlags};
use std::ops::Deref;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

pub struct ConnectionPool {
    path: PathBuf,
    idle: Mutex<Vec<Connection>>,
    max_idle: usize,
    in_use: AtomicUsize,
    closed: AtomicBool,
}

impl ConnectionPool {
    pub fn new(path: impl Into<PathBuf>, max_idle: usize) -> Arc<Self> {
        Arc::new(ConnectionPool {
            path: path.into(),
            idle: Mutex::new(Vec::new()),
            max_idle,
            in_use: AtomicUsize::new(0),
            closed: AtomicBool::new(false),
        })
    }

    /// Checks out a connection, opening a new one when none is idle.
    pub fn acquire(self: &Arc<Self>) -> Result<PooledConnection> {
        if self.closed.load(Ordering::Acquire) {
            return Err(ChainError::StorageFailure("connection pool is closed".to_string()));
        }
        let conn = match self.idle.lock().pop() {
            Some(conn) => conn,
            None => self.open_reader()?,
        };
        self.in_use.fetch_add(1, Ordering::AcqRel);
        Ok(PooledConnection {
            conn: Some(conn),
            pool: Arc::clone(self),
        })
    }

    /// Connections currently checked out.
    pub fn in_use(&self) -> usize {
        self.in_use.load(Ordering::Acquire)
    }

    pub fn idle(&self) -> usize {
        self.idle.lock().len()
    }

    /// Refuses new checkouts and drops the idle connections. Connections still
    /// checked out are closed when their holders drop them.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.idle.lock().clear();
    }

    fn open_reader(&self) -> Result<Connection> {
        let conn = Connection::open_with_flags(
            &self.path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .map_err(|e| ChainError::StorageFailure(format!("Failed to open reader: {}", e)))?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        debug!("Opened reader connection on {}", self.path.display());
        Ok(conn)
    }

    fn give_back(&self, conn: Connection) {
        self.in_use.fetch_sub(1, Ordering::AcqRel);
        if self.closed.load(Ordering::Acquire) {
            return;
        }
        if !conn.is_autocommit() {
            debug!("Dropping reader left inside a transaction");
            return;
        }
        let mut idle = self.idle.lock();
        if idle.len() < self.max_idle {
            idle.push(conn);
        }
    }
}

/// A checked-out reader; returned to the pool on drop.
pub struct PooledConnection {
    conn: Option<Connection>,
    pool: Arc<ConnectionPool>,
}

impl Deref for PooledConnection {
    type Target = Connection;

    fn deref(&self) -> &Connection {
        // Only `drop` takes the connection out.
        self.conn.as_ref().expect("pooled connection used after release")
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            self.pool.give_back(conn);
        }
    }
}
