//! Fixed-size SQLite connection pool.
//!
//! `rusqlite::Connection` is not `Sync`, so connections are checked out
//! exclusively: a semaphore bounds concurrency and a checked-out
//! connection rides along into `spawn_blocking` closures, returning to the
//! pool when the [`PooledConnection`] drops.

use hearth_registry::StoreError;
use rusqlite::Connection;
use std::ops::{Deref, DerefMut};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::debug;

/// A pool of SQLite connections to one database file.
#[derive(Debug)]
pub struct SqlitePool {
    connections: Mutex<Vec<Connection>>,
    permits: Arc<Semaphore>,
    acquire_timeout: Duration,
    path: PathBuf,
}

impl SqlitePool {
    /// Opens `size` connections to the database at `path`.
    ///
    /// Every connection gets WAL journaling and a busy timeout, so
    /// concurrent readers and the single writer coexist without immediate
    /// lock errors.
    pub fn open(
        path: impl AsRef<Path>,
        size: usize,
        acquire_timeout: Duration,
    ) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        let size = size.max(1);
        let mut connections = Vec::with_capacity(size);
        for _ in 0..size {
            connections.push(open_connection(&path)?);
        }
        debug!("Opened {} SQLite connections to {}", size, path.display());
        Ok(Self {
            connections: Mutex::new(connections),
            permits: Arc::new(Semaphore::new(size)),
            acquire_timeout,
            path,
        })
    }

    /// Path of the backing database file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Checks out a connection, waiting up to the acquire timeout.
    pub async fn acquire(self: &Arc<Self>) -> Result<PooledConnection, StoreError> {
        let permit = tokio::time::timeout(
            self.acquire_timeout,
            Arc::clone(&self.permits).acquire_owned(),
        )
        .await
        .map_err(|_| StoreError::PoolExhausted(self.acquire_timeout))?
        .map_err(|_| StoreError::Connection("connection pool closed".into()))?;

        let conn = self
            .connections
            .lock()
            .map_err(|_| StoreError::Connection("connection pool poisoned".into()))?
            .pop()
            .ok_or_else(|| StoreError::Connection("connection pool empty".into()))?;

        Ok(PooledConnection {
            conn: Some(conn),
            pool: Arc::clone(self),
            _permit: permit,
        })
    }

    fn restore(&self, conn: Connection) {
        if let Ok(mut connections) = self.connections.lock() {
            connections.push(conn);
        }
    }
}

fn open_connection(path: &Path) -> Result<Connection, StoreError> {
    let conn = Connection::open(path).map_err(crate::map_sql_err)?;
    conn.pragma_update(None, "journal_mode", "WAL")
        .map_err(crate::map_sql_err)?;
    conn.pragma_update(None, "synchronous", "NORMAL")
        .map_err(crate::map_sql_err)?;
    conn.pragma_update(None, "foreign_keys", "ON")
        .map_err(crate::map_sql_err)?;
    conn.busy_timeout(Duration::from_secs(5))
        .map_err(crate::map_sql_err)?;
    Ok(conn)
}

/// A connection checked out of the pool; returns on drop.
#[derive(Debug)]
pub struct PooledConnection {
    conn: Option<Connection>,
    pool: Arc<SqlitePool>,
    _permit: OwnedSemaphorePermit,
}

impl Deref for PooledConnection {
    type Target = Connection;

    fn deref(&self) -> &Connection {
        // Only `Drop` takes the connection out.
        self.conn.as_ref().unwrap()
    }
}

impl DerefMut for PooledConnection {
    fn deref_mut(&mut self) -> &mut Connection {
        self.conn.as_mut().unwrap()
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            self.pool.restore(conn);
        }
    }
}
