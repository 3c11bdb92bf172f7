//! Database pool and migrations.
//!
//! SYSTEM CONTEXT
//! ==============
//! Startup creates the shared SQLx pool here. The CRM tables are owned by
//! the hosted database in production, so the bundled migrations can be
//! skipped with `DB_SKIP_MIGRATIONS=true`.

use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use tracing::info;

use crate::config::{env_bool, env_parse};

const DEFAULT_DB_MAX_CONNECTIONS: u32 = 5;

/// Initialize the `PostgreSQL` connection pool and, unless skipped, run migrations.
///
/// # Errors
///
/// Returns an error if the connection or migrations fail.
pub async fn init_pool(database_url: &str) -> Result<PgPool, sqlx::Error> {
    let pool = PgPoolOptions::new()
        .max_connections(env_parse("DB_MAX_CONNECTIONS", DEFAULT_DB_MAX_CONNECTIONS))
        .connect(database_url)
        .await?;

    if env_bool("DB_SKIP_MIGRATIONS").unwrap_or(false) {
        info!("DB_SKIP_MIGRATIONS set; not running migrations");
    } else {
        sqlx::migrate!("src/db/migrations").run(&pool).await?;
    }

    Ok(pool)
}
