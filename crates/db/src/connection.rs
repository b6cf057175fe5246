use std::time::Duration;

use sqlx::sqlite::SqlitePoolOptions;

pub type DbPool = sqlx::SqlitePool;

/// How long a connection waits on a locked database before giving up.
/// Sweep writes and portal writes share the file, so short lock contention
/// is routine; ten seconds outlasts any single sweep transaction.
const BUSY_TIMEOUT_MS: u32 = 10_000;

pub async fn connect(database_url: &str) -> Result<DbPool, sqlx::Error> {
    connect_with_settings(database_url, 5, 30).await
}

/// Pool sizing and the acquire timeout come from validated config, which
/// rejects zero values before they reach here.
pub async fn connect_with_settings(
    database_url: &str,
    max_connections: u32,
    timeout_secs: u64,
) -> Result<DbPool, sqlx::Error> {
    SqlitePoolOptions::new()
        .max_connections(max_connections)
        .acquire_timeout(Duration::from_secs(timeout_secs))
        .after_connect(|conn, _meta| {
            Box::pin(async move {
                let pragmas = format!(
                    "PRAGMA foreign_keys = ON; \
                     PRAGMA journal_mode = WAL; \
                     PRAGMA synchronous = NORMAL; \
                     PRAGMA busy_timeout = {BUSY_TIMEOUT_MS};"
                );
                sqlx::Executor::execute(&mut *conn, sqlx::raw_sql(&pragmas)).await?;
                Ok(())
            })
        })
        .connect(database_url)
        .await
}

#[cfg(test)]
mod tests {
    use super::{connect, connect_with_settings};

    #[tokio::test]
    async fn connections_enforce_foreign_keys() {
        let pool = connect("sqlite::memory:").await.expect("connect");
        let (enabled,): (i64,) = sqlx::query_as("PRAGMA foreign_keys")
            .fetch_one(&pool)
            .await
            .expect("read pragma");
        assert_eq!(enabled, 1);
    }

    #[tokio::test]
    async fn settings_are_applied_to_the_pool() {
        let pool = connect_with_settings("sqlite::memory:", 2, 5).await.expect("connect");
        assert_eq!(pool.options().get_max_connections(), 2);
    }
}
