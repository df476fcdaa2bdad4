//! DuckDB storage layer for Custodian.
//!
//! Persists the administrator identity, protected user rows and their custom
//! profile field values, and the hash-chained audit log.
//!
//! # Architecture
//!
//! - All tables live in one database behind one `Arc<Mutex<Connection>>`, so
//!   every write in the process is serialized. That gives the audit chain a
//!   unique total order and lets a key rotation lock out every other writer.
//! - Table modules expose plain functions over `&Connection`; callers compose
//!   them inside [`Database::transaction`] so a data change and its audit
//!   entry commit or roll back together.
//! - Only ciphertext, ephemeral public keys and blind indexes are stored.

pub mod admins;
pub mod audit;
mod error;
pub mod users;

pub use admins::AdministratorIdentity;
pub use audit::{
    AuditEntry, AuditLog, AuditTable, ChainBreak, ChainReport, NewAuditEntry, GENESIS_HASH,
};
pub use duckdb::Connection;
pub use error::{StorageError, StorageResult};
pub use users::{ProfileFieldRecord, UserRecord};

use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, warn};

/// Shared handle to the Custodian database.
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Opens or creates a database at the given path.
    pub fn open(path: &Path, memory_limit: &str, threads: u32) -> StorageResult<Self> {
        let conn = open_duckdb_with_wal_recovery(path, memory_limit, threads)?;
        Self::from_connection(conn)
    }

    /// Opens an in-memory database (for testing).
    pub fn open_in_memory() -> StorageResult<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> StorageResult<Self> {
        admins::initialize_schema(&conn)?;
        users::initialize_schema(&conn)?;
        audit::initialize_schema(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Runs `f` with exclusive access to the connection, outside a transaction.
    pub fn with_connection<T>(
        &self,
        f: impl FnOnce(&Connection) -> StorageResult<T>,
    ) -> StorageResult<T> {
        let conn = self.lock()?;
        f(&conn)
    }

    /// Runs `f` inside one transaction holding the connection lock.
    ///
    /// Commits when `f` returns `Ok`. On `Err` the transaction is dropped
    /// uncommitted, which rolls back every statement `f` executed.
    pub fn transaction<T, E>(&self, f: impl FnOnce(&Connection) -> Result<T, E>) -> Result<T, E>
    where
        E: From<StorageError>,
    {
        let mut conn = self.lock()?;
        let tx = conn.transaction().map_err(StorageError::from)?;
        match f(&tx) {
            Ok(value) => {
                tx.commit().map_err(StorageError::from)?;
                Ok(value)
            }
            Err(e) => {
                debug!("transaction rolled back");
                Err(e)
            }
        }
    }

    fn lock(&self) -> StorageResult<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| StorageError::LockPoisoned)
    }
}

/// Open a DuckDB connection with stale WAL recovery and resource limits.
///
/// If the initial open fails and a `.wal` file exists alongside the database,
/// it is removed and the open is retried once.
pub fn open_duckdb_with_wal_recovery(
    path: &Path,
    memory_limit: &str,
    threads: u32,
) -> StorageResult<Connection> {
    let conn = match Connection::open(path) {
        Ok(c) => c,
        Err(first_err) => {
            let wal_path = path.with_extension(
                path.extension()
                    .map(|ext| format!("{}.wal", ext.to_string_lossy()))
                    .unwrap_or_else(|| "wal".to_string()),
            );
            if wal_path.exists() {
                warn!(
                    "DuckDB open failed, removing stale WAL and retrying: {}",
                    wal_path.display()
                );
                if std::fs::remove_file(&wal_path).is_ok() {
                    let c = Connection::open(path)?;
                    apply_resource_limits(&c, memory_limit, threads)?;
                    return Ok(c);
                }
            }
            return Err(first_err.into());
        }
    };
    apply_resource_limits(&conn, memory_limit, threads)?;
    Ok(conn)
}

/// Apply memory and thread limits to a DuckDB connection.
fn apply_resource_limits(conn: &Connection, memory_limit: &str, threads: u32) -> StorageResult<()> {
    conn.execute_batch(&format!(
        "PRAGMA memory_limit='{}'; PRAGMA threads={};",
        memory_limit.replace('\'', ""),
        threads
    ))?;
    Ok(())
}

pub(crate) fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
