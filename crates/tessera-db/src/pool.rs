//! Ledger database pool: connection setup, checkout limits and the
//! migrate-on-open entry point used by the server.

use std::time::Duration;

use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{Connection, OpenFlags};
use thiserror::Error;

use crate::migrations::{run_migrations, MigrationError};

/// Runtime tunables for the ledger's SQLite connections.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DbRuntimeSettings {
    /// How long a statement waits on a locked database, in milliseconds.
    pub busy_timeout_ms: u64,

    /// Maximum number of pooled SQLite connections.
    pub pool_max_size: u32,

    /// How long a request waits for a free pooled connection, in milliseconds.
    pub checkout_timeout_ms: u64,
}

impl Default for DbRuntimeSettings {
    fn default() -> Self {
        Self {
            busy_timeout_ms: 5_000,
            pool_max_size: 8,
            checkout_timeout_ms: 10_000,
        }
    }
}

/// A type alias for the SQLite connection pool.
pub type DbPool = Pool<SqliteConnectionManager>;

/// Errors raised while opening the ledger database.
#[derive(Debug, Error)]
pub enum PoolError {
    /// Failed to build the connection pool.
    #[error("failed to create database connection pool: {0}")]
    PoolInit(#[from] r2d2::Error),

    /// No connection could be checked out to run migrations.
    #[error("failed to check out a connection for migrations: {0}")]
    Checkout(r2d2::Error),

    /// The schema could not be brought up to date.
    #[error(transparent)]
    Migration(#[from] MigrationError),
}

/// Applies the per-connection pragmas the ledger depends on.
///
/// `tagged_results` rows cascade on purge only with foreign keys on. WAL is
/// required for file databases; in-memory databases report `memory`.
fn prepare_connection(conn: &mut Connection, busy_timeout_ms: u64) -> rusqlite::Result<()> {
    let journal_mode: String = conn.query_row("PRAGMA journal_mode = WAL;", [], |row| row.get(0))?;
    if journal_mode != "wal" && journal_mode != "memory" {
        return Err(rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_ERROR),
            Some(format!("ledger requires WAL journal mode, got: {journal_mode}")),
        ));
    }
    conn.execute_batch(&format!(
        "PRAGMA foreign_keys = ON;
         PRAGMA busy_timeout = {busy_timeout_ms};"
    ))
}

/// Creates a pool of prepared SQLite connections without touching the schema.
///
/// `:memory:` gives every pooled connection its own private database, so
/// callers that share state across connections should use a file instead.
///
/// # Errors
///
/// Returns `PoolError::PoolInit` if the connection pool cannot be created.
pub fn create_pool(db_path: &str, settings: DbRuntimeSettings) -> Result<DbPool, PoolError> {
    let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
        | OpenFlags::SQLITE_OPEN_CREATE
        | OpenFlags::SQLITE_OPEN_FULL_MUTEX;

    let manager = SqliteConnectionManager::file(db_path)
        .with_flags(flags)
        .with_init(move |conn| prepare_connection(conn, settings.busy_timeout_ms));

    let pool = Pool::builder()
        .max_size(settings.pool_max_size)
        .connection_timeout(Duration::from_millis(settings.checkout_timeout_ms))
        .build(manager)?;

    Ok(pool)
}

/// Opens the ledger database at `db_path` and brings its schema up to date.
///
/// This is the single entry point the server uses at startup: the returned
/// pool is ready for `tessera-ledger` operations.
///
/// # Errors
///
/// Returns `PoolError` if the pool cannot be built, no connection can be
/// checked out, or a migration fails.
pub fn open_ledger(db_path: &str, settings: DbRuntimeSettings) -> Result<DbPool, PoolError> {
    let pool = create_pool(db_path, settings)?;
    let applied = {
        let conn = pool.get().map_err(PoolError::Checkout)?;
        run_migrations(&conn)?
    };
    if applied > 0 {
        tracing::info!(path = db_path, count = applied, "applied ledger migrations");
    } else {
        tracing::debug!(path = db_path, "ledger schema is up to date");
    }
    Ok(pool)
}
