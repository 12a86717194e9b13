use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{Pool, Sqlite};
use std::str::FromStr;
use std::time::Duration;

pub mod queries;

#[cfg(test)]
mod tests;

/// Initialize the SQLite connection pool with appropriate options.
///
/// # Arguments
///
/// * `database_url` - The database URL string.
///
/// # Returns
/// * `Pool<Sqlite>` - The initialized SQLite connection pool.
pub async fn init_pool(database_url: &str) -> sqlx::Result<Pool<Sqlite>> {
    let options = SqliteConnectOptions::from_str(database_url)?
        .journal_mode(SqliteJournalMode::Wal)
        .foreign_keys(true)
        .create_if_missing(true)
        .busy_timeout(Duration::from_secs(30));

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await?;

    Ok(pool)
}

/// Apply the embedded schema migrations.
pub async fn migrate(pool: &Pool<Sqlite>) -> Result<(), sqlx::migrate::MigrateError> {
    sqlx::migrate!("./migrations").run(pool).await
}
