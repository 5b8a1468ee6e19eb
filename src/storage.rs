//! SQLite handle shared by the credential store and the revocation registry.
//!
//! rusqlite is blocking, so every call runs on the blocking pool under a
//! deadline. A call that misses its deadline surfaces as
//! `StoreError::Unavailable` instead of stalling the request.

use crate::error::StoreError;
use parking_lot::Mutex;
use rusqlite::{Connection, OpenFlags};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

const PRAGMAS_SQL: &str = r#"
PRAGMA journal_mode = WAL;
PRAGMA synchronous = NORMAL;
PRAGMA foreign_keys = ON;
"#;

#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
    timeout: Duration,
}

impl Database {
    /// Open (or create) the database file at `path`.
    pub fn open(path: &str, timeout: Duration) -> Result<Self, StoreError> {
        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_NO_MUTEX; // We handle our own locking

        let conn = Connection::open_with_flags(path, flags)?;
        conn.busy_timeout(timeout)?;
        conn.execute_batch(PRAGMAS_SQL)?;

        info!(path, timeout_ms = timeout.as_millis() as u64, "auth database opened");

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            timeout,
        })
    }

    /// Private in-memory database, used by tests and ephemeral deployments.
    pub fn in_memory(timeout: Duration) -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            timeout,
        })
    }

    /// Run schema statements synchronously. Only used during startup.
    pub fn migrate(&self, schema_sql: &str) -> Result<(), StoreError> {
        self.conn.lock().execute_batch(schema_sql)?;
        Ok(())
    }

    /// Run `f` against the connection on the blocking pool, bounded by the
    /// configured timeout.
    pub async fn call<F, T>(&self, op: &'static str, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(&mut Connection) -> Result<T, StoreError> + Send + 'static,
        T: Send + 'static,
    {
        let conn = self.conn.clone();
        let task = tokio::task::spawn_blocking(move || {
            let mut guard = conn.lock();
            f(&mut guard)
        });

        match tokio::time::timeout(self.timeout, task).await {
            Ok(Ok(result)) => result,
            Ok(Err(join_err)) => {
                warn!(op, error = %join_err, "store task aborted");
                Err(StoreError::Unavailable(format!("{op}: task aborted")))
            }
            Err(_) => {
                warn!(
                    op,
                    timeout_ms = self.timeout.as_millis() as u64,
                    "store call timed out"
                );
                Err(StoreError::Unavailable(format!("{op}: timed out")))
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn hold_lock(&self) -> parking_lot::MutexGuard<'_, Connection> {
        self.conn.lock()
    }
}
