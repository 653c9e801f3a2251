//! Retry helpers for database writes.
//!
//! Status transitions must not be lost to a transient `SQLITE_BUSY`, so the
//! conditional writes go through [`retry_on_sqlite_busy`].

use std::borrow::Cow;
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::debug;

use crate::{Error, Result};

const SQLITE_BUSY_MAX_RETRIES: u32 = 8;
const SQLITE_BUSY_BASE_DELAY_MS: u64 = 10;
const SQLITE_BUSY_MAX_DELAY_MS: u64 = 1000;

fn is_sqlite_busy_error(err: &Error) -> bool {
    let Error::DatabaseSqlx(sqlx_err) = err else {
        return false;
    };

    if let sqlx::Error::Database(db_err) = sqlx_err.as_ref() {
        let code = db_err.code().map(Cow::into_owned);
        // SQLITE_BUSY / SQLITE_LOCKED
        if matches!(code.as_deref(), Some("5") | Some("6")) {
            return true;
        }
    }

    let msg = sqlx_err.to_string().to_ascii_lowercase();
    msg.contains("database is locked") || msg.contains("database is busy")
}

fn busy_delay(attempt: u32) -> Duration {
    let capped = SQLITE_BUSY_BASE_DELAY_MS
        .saturating_mul(1u64 << attempt.min(16))
        .min(SQLITE_BUSY_MAX_DELAY_MS);
    let jitter = rand::random::<u64>() % (capped / 4 + 1);
    Duration::from_millis((capped + jitter).min(SQLITE_BUSY_MAX_DELAY_MS))
}

/// Run `op`, retrying with capped exponential backoff while SQLite reports busy.
pub async fn retry_on_sqlite_busy<T, F, Fut>(op_name: &'static str, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 0u32;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if is_sqlite_busy_error(&err) && attempt < SQLITE_BUSY_MAX_RETRIES => {
                let delay = busy_delay(attempt);
                debug!(
                    op = op_name,
                    attempt = attempt + 1,
                    max = SQLITE_BUSY_MAX_RETRIES,
                    delay = ?delay,
                    "SQLite busy, retrying"
                );
                sleep(delay).await;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}
