pub mod migrations;
pub mod queries;

use std::time::Duration;

use anyhow::Context;
use rusqlite::Connection;

use crate::errors::AppError;

const BUSY_RETRIES: u32 = 3;

pub fn init_db(path: &str) -> anyhow::Result<Connection> {
    let conn = Connection::open(path).context("failed to open database")?;

    conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")
        .context("failed to set database pragmas")?;
    conn.busy_timeout(Duration::from_secs(5))
        .context("failed to set busy timeout")?;

    migrations::run_migrations(&conn)?;

    Ok(conn)
}

/// Runs `op` again when SQLite reports lock contention, up to a small
/// bound. The connection's busy timeout already waits inside SQLite, so
/// retries are immediate. Contention that outlasts them surfaces as
/// [`AppError::Busy`].
pub fn retry_on_busy<T>(
    conn: &mut Connection,
    mut op: impl FnMut(&mut Connection) -> Result<T, AppError>,
) -> Result<T, AppError> {
    let mut attempt = 0;
    loop {
        match op(conn) {
            Err(e) if e.is_busy() => {
                attempt += 1;
                if attempt >= BUSY_RETRIES {
                    tracing::warn!(attempt, "giving up after repeated lock contention");
                    return Err(AppError::Busy);
                }
                tracing::debug!(attempt, "database busy, retrying");
            }
            result => return result,
        }
    }
}
