//! SQLite access
//!
//! An r2d2 pool of SQLite connections. Every query runs inside a closure on
//! the blocking thread pool so async callers never block the runtime.
//! Migrations run synchronously before a manager is handed out.

use crate::core::config::DatabaseConfig;
use crate::core::error::{ErrorContext, Result, SweepError};
use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{Connection, Transaction};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::task;

type SqlitePool = Pool<SqliteConnectionManager>;

const CHECKOUT_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Clone)]
pub struct DatabaseManager {
    pool: SqlitePool,
    location: PathBuf,
}

impl DatabaseManager {
    /// Open or create the database file, then migrate it
    pub fn new(path: &Path, pool_size: u32, busy_timeout: Duration) -> Result<Self> {
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("creating database directory {}", dir.display()))?;
        }

        let connections = SqliteConnectionManager::file(path).with_init(move |conn| {
            conn.busy_timeout(busy_timeout)?;
            conn.execute_batch("PRAGMA foreign_keys = ON; PRAGMA journal_mode = WAL;")
        });
        Self::open(connections, pool_size, path.to_path_buf())
    }

    pub fn from_config(config: &DatabaseConfig) -> Result<Self> {
        Self::new(
            &config.path,
            u32::try_from(config.connection_pool_size).unwrap_or(u32::MAX),
            Duration::from_millis(config.busy_timeout),
        )
    }

    /// Single-connection in-memory database; each `:memory:` connection would
    /// otherwise see its own empty database
    pub fn new_in_memory() -> Result<Self> {
        let connections = SqliteConnectionManager::memory()
            .with_init(|conn| conn.execute_batch("PRAGMA foreign_keys = ON;"));
        Self::open(connections, 1, PathBuf::from(":memory:"))
    }

    fn open(connections: SqliteConnectionManager, size: u32, location: PathBuf) -> Result<Self> {
        let pool = Pool::builder()
            .max_size(size.max(1))
            .connection_timeout(CHECKOUT_TIMEOUT)
            .build(connections)
            .context("building connection pool")?;

        let manager = Self { pool, location };
        let mut conn = checkout(&manager.pool)?;
        crate::db::migrations::run_migrations(&mut conn)?;
        Ok(manager)
    }

    /// Run `f` with a pooled connection on the blocking thread pool
    pub async fn execute<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let pool = self.pool.clone();
        task::spawn_blocking(move || {
            let conn = checkout(&pool)?;
            f(&conn)
        })
            .await
            .map_err(|e| SweepError::TaskError(format!("database task: {}", e)))?
    }

    /// Like [`execute`](Self::execute) inside a transaction that commits only when `f` succeeds
    pub async fn transaction<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Transaction) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let pool = self.pool.clone();
        task::spawn_blocking(move || {
            let mut conn = checkout(&pool)?;
            let tx = conn.transaction()?;
            let value = f(&tx)?;
            tx.commit()?;
            Ok(value)
        })
        .await
        .map_err(|e| SweepError::TaskError(format!("database transaction task: {}", e)))?
    }

    pub fn location(&self) -> &Path {
        &self.location
    }

    pub fn pool_size(&self) -> u32 {
        self.pool.max_size()
    }
}

fn checkout(pool: &SqlitePool) -> Result<PooledConnection<SqliteConnectionManager>> {
    pool.get().context("checking out a database connection")
}
