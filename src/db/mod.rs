pub mod migrations;
pub mod models;
pub mod repos;

use std::path::Path;
use std::time::Duration;

use r2d2::{CustomizeConnection, Pool};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{Transaction, TransactionBehavior};

use crate::config::DbConfig;
use crate::error::AppError;

pub type DbPool = Pool<SqliteConnectionManager>;

/// Connection customizer that sets per-connection SQLite pragmas.
#[derive(Debug)]
struct SqlitePragmaCustomizer;

impl CustomizeConnection<rusqlite::Connection, rusqlite::Error> for SqlitePragmaCustomizer {
    fn on_acquire(&self, conn: &mut rusqlite::Connection) -> Result<(), rusqlite::Error> {
        conn.execute_batch(
            "PRAGMA foreign_keys = ON;
             PRAGMA busy_timeout = 5000;
             PRAGMA synchronous = NORMAL;
             PRAGMA cache_size = -8000;",
        )?;
        Ok(())
    }
}

/// Open a pool on `db_path`, enable WAL and run migrations.
pub fn open_pool(db_path: &Path, max_size: u32) -> Result<DbPool, AppError> {
    let manager = SqliteConnectionManager::file(db_path);
    let pool = Pool::builder()
        .max_size(max_size)
        .connection_timeout(Duration::from_secs(5))
        .connection_customizer(Box::new(SqlitePragmaCustomizer))
        .build(manager)?;

    // Database-wide, only needs to run once
    {
        let conn = pool.get()?;
        conn.execute_batch("PRAGMA journal_mode = WAL;")?;
        tracing::debug!("SQLite pragmas configured (WAL, FK, busy_timeout)");
    }

    {
        let conn = pool.get()?;
        migrations::run(&conn)?;
    }

    Ok(pool)
}

/// Initialize the database under the data directory.
pub fn init_db(data_dir: &Path, config: &DbConfig) -> Result<DbPool, AppError> {
    std::fs::create_dir_all(data_dir)?;
    let db_path = data_dir.join("teamwork.db");

    tracing::info!(path = %db_path.display(), pool_size = config.pool_size, "Initializing database");
    let pool = open_pool(&db_path, config.pool_size)?;
    tracing::info!("Database initialized successfully");
    Ok(pool)
}

/// Run `f` inside one `BEGIN IMMEDIATE` transaction. Commits on `Ok`, rolls
/// back on `Err` (the transaction is dropped uncommitted). Writers take the
/// lock before their first read.
pub fn with_tx<T, F>(pool: &DbPool, f: F) -> Result<T, AppError>
where
    F: FnOnce(&Transaction<'_>) -> Result<T, AppError>,
{
    let mut conn = pool.get()?;
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
    let value = f(&tx)?;
    tx.commit()?;
    Ok(value)
}

#[cfg(test)]
pub fn init_test_db() -> Result<DbPool, AppError> {
    // Use a unique temp file for each test to avoid in-memory connection issues with r2d2.
    let tmp = std::env::temp_dir().join(format!("teamwork_test_{}.db", uuid::Uuid::new_v4()));
    open_pool(&tmp, 2)
}
