//! Database pool setup and migrations.
//!
//! Grounded on the teacher's `db::init`/`run_migrations` (manual
//! version-tracking, statements split on `;` and executed one at a time,
//! no `sqlx::migrate!` macro so no compile-time `DATABASE_URL` is
//! required). Swapped from the teacher's SQLite backend to Postgres:
//! the column contract needs `timestamptz`/`inet` types and the writer
//! needs `COPY FROM STDIN`, both Postgres-native.

use anyhow::Result;
use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use sqlx::PgPool;
use tracing::info;

use crate::config::DatabaseConfig;

const INIT_MIGRATION: &str = include_str!("migrations/001_init.sql");

/// Connect, run migrations, and verify the connection with a ping.
pub async fn init(config: &DatabaseConfig) -> Result<PgPool> {
    let options = PgConnectOptions::new()
        .host(&config.host)
        .port(config.port)
        .database(&config.database)
        .username(&config.user)
        .password(&config.password);

    let pool = PgPoolOptions::new()
        .max_connections(config.pool_size)
        .connect_with(options)
        .await?;

    run_migrations(&pool).await?;
    sqlx::query("SELECT 1").execute(&pool).await?;
    info!(component = "db", "connected and migrations applied");

    Ok(pool)
}

async fn run_migrations(pool: &PgPool) -> Result<()> {
    sqlx::query(
        "CREATE TABLE IF NOT EXISTS _migrations (\
         version integer PRIMARY KEY, \
         applied_at timestamptz NOT NULL DEFAULT now())",
    )
    .execute(pool)
    .await?;

    let applied: bool = sqlx::query("SELECT 1 FROM _migrations WHERE version = 1")
        .fetch_optional(pool)
        .await?
        .is_some();

    if !applied {
        for statement in INIT_MIGRATION.split(';') {
            let stmt = statement.trim();
            if stmt.is_empty() || stmt.starts_with("--") {
                continue;
            }
            sqlx::query(stmt).execute(pool).await?;
        }

        sqlx::query("INSERT INTO _migrations (version) VALUES (1)")
            .execute(pool)
            .await?;

        info!(component = "db", "applied migration 001_init.sql");
    }

    Ok(())
}
