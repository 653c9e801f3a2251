//! Persistence layer.
//!
//! This module provides the SQLite implementation of the chapter store used
//! by the pipelines: connection pool management, models, repositories and
//! busy-retry helpers.

pub mod models;
pub mod repositories;
pub mod retry;
pub mod time;

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Pool, Sqlite};
use std::str::FromStr;
use std::time::Duration;

pub type DbPool = Pool<Sqlite>;

const DEFAULT_POOL_SIZE: u32 = 8;

/// Status writers wait this long on a locked database before `SQLITE_BUSY`
/// surfaces to `retry_on_sqlite_busy`.
const BUSY_TIMEOUT: Duration = Duration::from_secs(30);

const ACQUIRE_TIMEOUT: Duration = Duration::from_secs(30);

/// Open a WAL-mode SQLite pool with `max_connections` connections.
///
/// `database_url` is a sqlx SQLite URL such as `sqlite:lessonforge.db?mode=rwc`.
pub async fn init_pool_with_size(
    database_url: &str,
    max_connections: u32,
) -> Result<DbPool, sqlx::Error> {
    let options = SqliteConnectOptions::from_str(database_url)?
        .create_if_missing(true)
        .foreign_keys(true)
        // Readers keep going while a generation status is being written
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Normal)
        .busy_timeout(BUSY_TIMEOUT)
        .pragma("temp_store", "MEMORY")
        .pragma("cache_size", "-16000");

    let pool = SqlitePoolOptions::new()
        .max_connections(max_connections)
        .acquire_timeout(ACQUIRE_TIMEOUT)
        .connect_with(options)
        .await?;

    tracing::info!(database_url, max_connections, "SQLite pool ready");
    Ok(pool)
}

pub async fn init_pool(database_url: &str) -> Result<DbPool, sqlx::Error> {
    init_pool_with_size(database_url, DEFAULT_POOL_SIZE).await
}

/// Apply the embedded schema migrations.
pub async fn run_migrations(pool: &DbPool) -> crate::Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    tracing::debug!("schema migrations applied");
    Ok(())
}
