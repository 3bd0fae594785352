//! Notification store.
//!
//! SQLite through a shared sqlx pool in WAL mode, with the schema embedded as
//! migrations.

pub mod models;
pub mod repositories;
pub mod retry;
pub mod time;

use std::str::FromStr;
use std::time::Duration;

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Pool, Row, Sqlite, SqliteConnection};

/// Database connection pool type alias.
pub type DbPool = Pool<Sqlite>;

/// Upper bound on the default pool size.
const MAX_DEFAULT_POOL_SIZE: u32 = 10;

/// How long a writer waits on a locked database before SQLite reports busy.
const BUSY_TIMEOUT: Duration = Duration::from_secs(30);

const ACQUIRE_TIMEOUT: Duration = Duration::from_secs(30);

/// Applied to every new connection.
const CONNECTION_PRAGMAS: &[&str] = &[
    // ~4MB of WAL between automatic checkpoints at the default page size.
    "PRAGMA wal_autocheckpoint = 1000",
    // Negative means KiB: ~64MB page cache.
    "PRAGMA cache_size = -64000",
    "PRAGMA temp_store = MEMORY",
];

async fn apply_connection_pragmas(conn: &mut SqliteConnection) -> Result<(), sqlx::Error> {
    for pragma in CONNECTION_PRAGMAS {
        sqlx::query(pragma).execute(&mut *conn).await?;
    }
    Ok(())
}

/// Re-assert WAL on databases created by other tools in rollback mode.
async fn ensure_wal_mode(pool: &DbPool) -> Result<(), sqlx::Error> {
    let mut conn = pool.acquire().await?;
    let mode: String = sqlx::query("PRAGMA journal_mode")
        .fetch_one(&mut *conn)
        .await?
        .get(0);
    // In-memory databases report "memory" and cannot switch to WAL.
    if !matches!(mode.as_str(), "wal" | "memory") {
        tracing::warn!(mode = %mode, "Database not in WAL mode, switching");
        sqlx::query("PRAGMA journal_mode = WAL")
            .execute(&mut *conn)
            .await?;
    }
    Ok(())
}

/// Two connections per core, capped.
pub fn default_pool_size() -> u32 {
    std::thread::available_parallelism()
        .map(|n| n.get() as u32 * 2)
        .unwrap_or(4)
        .min(MAX_DEFAULT_POOL_SIZE)
}

/// Open a WAL-mode pool of at most `max_connections`, creating the database
/// file if needed.
pub async fn init_pool_with_size(
    database_url: &str,
    max_connections: u32,
) -> Result<DbPool, sqlx::Error> {
    let options = SqliteConnectOptions::from_str(database_url)?
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Normal)
        .busy_timeout(BUSY_TIMEOUT);

    let pool = SqlitePoolOptions::new()
        .max_connections(max_connections)
        .acquire_timeout(ACQUIRE_TIMEOUT)
        .after_connect(|conn, _meta| Box::pin(apply_connection_pragmas(conn)))
        .connect_with(options)
        .await?;

    ensure_wal_mode(&pool).await?;
    tracing::info!(max_connections, "Database pool ready");
    Ok(pool)
}

pub async fn init_pool(database_url: &str) -> Result<DbPool, sqlx::Error> {
    init_pool_with_size(database_url, default_pool_size()).await
}

/// Initialize a single-connection pool over a private in-memory database.
///
/// Every connection to `sqlite::memory:` opens its own database, so the pool is
/// pinned to one connection that is never recycled.
pub async fn init_memory_pool() -> Result<DbPool, sqlx::Error> {
    let options = SqliteConnectOptions::from_str("sqlite::memory:")?;
    SqlitePoolOptions::new()
        .max_connections(1)
        .min_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect_with(options)
        .await
}

/// Apply the embedded schema migrations.
pub async fn run_migrations(pool: &DbPool) -> crate::Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    tracing::info!("Database schema up to date");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_pool_size_is_bounded() {
        let size = default_pool_size();
        assert!((1..=MAX_DEFAULT_POOL_SIZE).contains(&size));
    }

    #[tokio::test]
    async fn memory_pool_applies_pragmas_and_reports_memory_journal() {
        let pool = init_pool_with_size("sqlite::memory:", 1).await.unwrap();

        let (mode,): (String,) = sqlx::query_as("PRAGMA journal_mode")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(mode, "memory");

        let (temp_store,): (i64,) = sqlx::query_as("PRAGMA temp_store")
            .fetch_one(&pool)
            .await
            .unwrap();
        // 2 = MEMORY
        assert_eq!(temp_store, 2);
    }

    #[tokio::test]
    async fn migrations_create_notifications_table() {
        let pool = init_memory_pool().await.unwrap();
        run_migrations(&pool).await.unwrap();

        let tables: Vec<(String,)> =
            sqlx::query_as("SELECT name FROM sqlite_master WHERE type='table' ORDER BY name")
                .fetch_all(&pool)
                .await
                .unwrap();
        assert!(tables.iter().any(|(name,)| name == "notifications"));
    }
}
