//! Database module for tenant, contact, conversation and message persistence

pub mod company;
pub mod contact;
pub mod conversation;
pub mod gateway;
pub mod message;
mod schema;

use std::path::Path;

use chrono::{DateTime, SecondsFormat, Utc};
use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;

use crate::{Error, Result};

pub use company::{Company, CompanyRepo, Instance};
pub use contact::{Contact, ContactRepo};
pub use conversation::{Conversation, ConversationRepo};
pub use gateway::SqliteGateway;
pub use message::MessageRepo;
pub use schema::SCHEMA_VERSION;

/// Database connection pool
pub type DbPool = Pool<SqliteConnectionManager>;

/// Pooled database connection
pub type DbConn = PooledConnection<SqliteConnectionManager>;

/// Initialize the database
///
/// # Errors
///
/// Returns error if database cannot be opened or initialized
pub fn init<P: AsRef<Path>>(path: P) -> Result<DbPool> {
    if let Some(parent) = path.as_ref().parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    // Concurrent deliveries wait on the write lock instead of failing
    let manager = SqliteConnectionManager::file(path).with_init(|conn| {
        conn.busy_timeout(std::time::Duration::from_secs(5))?;
        conn.query_row("PRAGMA journal_mode = WAL", [], |_| Ok(()))
    });
    let pool = Pool::builder()
        .max_size(4)
        .build(manager)
        .map_err(|e| Error::Database(e.to_string()))?;

    // Run migrations on first connection
    let conn = pool.get().map_err(|e| Error::Database(e.to_string()))?;
    schema::init(&conn)?;

    tracing::info!(version = SCHEMA_VERSION, "database initialized");
    Ok(pool)
}

/// Initialize an in-memory database (for testing)
///
/// # Errors
///
/// Returns error if database cannot be initialized
pub fn init_memory() -> Result<DbPool> {
    let manager = SqliteConnectionManager::memory();
    let pool = Pool::builder()
        .max_size(1)
        .build(manager)
        .map_err(|e| Error::Database(e.to_string()))?;

    let conn = pool.get().map_err(|e| Error::Database(e.to_string()))?;
    schema::init(&conn)?;

    Ok(pool)
}

/// Run a trivial query to prove the database is reachable
///
/// # Errors
///
/// Returns error if no connection can be checked out or the query fails
pub fn ping(pool: &DbPool) -> Result<()> {
    let conn = pool.get().map_err(|e| Error::Database(e.to_string()))?;
    conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0))?;
    Ok(())
}

/// Timestamps are stored as fixed-width RFC 3339 so they sort as text
pub(crate) fn format_datetime(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub(crate) fn parse_datetime(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s).map_or_else(|_| Utc::now(), |dt| dt.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_memory() {
        let pool = init_memory().unwrap();
        ping(&pool).unwrap();
    }

    #[test]
    fn test_init_file_creates_parent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("ingest.db");

        let pool = init(&path).unwrap();
        ping(&pool).unwrap();
        assert!(path.exists());

        // Reopening an initialized database is a no-op migration
        drop(pool);
        init(&path).unwrap();
    }

    #[test]
    fn datetimes_sort_as_text() {
        let earlier = format_datetime(&parse_datetime("2024-01-01T09:00:00Z"));
        let later = format_datetime(&parse_datetime("2024-01-01T10:00:00.5Z"));
        assert!(earlier < later);
        assert_eq!(parse_datetime(&later).timestamp_millis() % 1000, 500);
    }
}
