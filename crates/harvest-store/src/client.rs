//! SQLite connection management and the shared store client.

use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use rusqlite::{Connection, ErrorCode, OpenFlags, TransactionBehavior};

use harvest_core::config::DatabaseConfig;

use crate::schema;

/// Errors from store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// A uniqueness constraint fired despite the match-before-insert check.
    /// The fact was not recorded; the caller may retry.
    #[error("Constraint violation: {0}")]
    ConstraintViolation(String),

    /// The database could not be opened, locked, or committed.
    #[error("Storage unavailable: {0}")]
    StorageUnavailable(String),

    #[error("SQLite query error: {0}")]
    Query(#[source] rusqlite::Error),

    #[error("Invalid snapshot: {0}")]
    InvalidSnapshot(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        match err.sqlite_error_code() {
            Some(ErrorCode::ConstraintViolation) => Self::ConstraintViolation(err.to_string()),
            Some(
                ErrorCode::DatabaseBusy
                | ErrorCode::DatabaseLocked
                | ErrorCode::CannotOpen
                | ErrorCode::ReadOnly
                | ErrorCode::DiskFull
                | ErrorCode::SystemIoFailure
                | ErrorCode::NotADatabase
                | ErrorCode::DatabaseCorrupt,
            ) => Self::StorageUnavailable(err.to_string()),
            _ => Self::Query(err),
        }
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// Thread-safe handle on one engagement database.
///
/// All writes are serialized through the inner mutex and run in a single
/// `BEGIN IMMEDIATE` transaction, so match-then-insert sequences never
/// interleave. Clone is cheap (inner Arc).
#[derive(Clone)]
pub struct StoreClient {
    conn: Arc<Mutex<Connection>>,
}

impl StoreClient {
    /// Open (or create) the engagement database described by `config`.
    pub fn open(config: &DatabaseConfig) -> Result<Self> {
        let mut flags = OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_URI
            | OpenFlags::SQLITE_OPEN_NO_MUTEX;
        if config.create_if_missing {
            flags |= OpenFlags::SQLITE_OPEN_CREATE;
        }

        let conn = Connection::open_with_flags(Path::new(&config.path), flags)?;
        conn.busy_timeout(Duration::from_millis(config.busy_timeout_ms))?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;

        tracing::info!(path = %config.path, "Opened engagement database");
        Self::from_connection(conn)
    }

    /// Open a private in-memory store. Used by tests and dry runs.
    pub fn open_in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        conn.pragma_update(None, "foreign_keys", "ON")?;
        schema::initialize(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| StoreError::StorageUnavailable(format!("connection lock poisoned: {e}")))
    }

    /// Run `f` inside one deferred transaction. Reads see a single snapshot.
    pub(crate) fn read<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T>,
    {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let out = f(&tx)?;
        tx.commit()?;
        Ok(out)
    }

    /// Run `f` as one atomic write. A constraint violation rolls back and
    /// the whole sequence is retried once before surfacing.
    pub(crate) fn write<T, F>(&self, op: &'static str, f: F) -> Result<T>
    where
        F: Fn(&Connection) -> Result<T>,
    {
        match self.transact(&f) {
            Err(StoreError::ConstraintViolation(msg)) => {
                tracing::warn!(op, error = %msg, "Constraint violation, retrying once");
                self.transact(&f)
            }
            other => other,
        }
    }

    fn transact<T, F>(&self, f: &F) -> Result<T>
    where
        F: Fn(&Connection) -> Result<T>,
    {
        let mut conn = self.lock()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        // Dropping `tx` on the error path rolls back.
        let out = f(&tx)?;
        tx.commit()?;
        Ok(out)
    }

    /// Delete every row from every entity and relation table.
    pub fn clear(&self) -> Result<()> {
        self.write("clear", |conn| {
            for table in schema::TABLES {
                conn.execute(&format!("DELETE FROM \"{table}\""), [])?;
            }
            Ok(())
        })?;
        tracing::info!("Engagement store cleared");
        Ok(())
    }
}
