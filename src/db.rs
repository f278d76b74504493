use std::time::Duration;

use anyhow::Context;
use sqlx::{postgres::PgPoolOptions, PgPool};

use crate::config::DbConfig;

pub async fn connect(cfg: &DbConfig) -> anyhow::Result<PgPool> {
    let db = PgPoolOptions::new()
        .max_connections(cfg.max_connections)
        .min_connections(cfg.min_connections)
        .max_lifetime(Duration::from_secs(5 * 60))
        .connect(&cfg.url)
        .await
        .context("connect to database")?;
    Ok(db)
}

/// Applies `migrations/`, which also creates the unique email constraint.
pub async fn migrate(db: &PgPool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations")
        .run(db)
        .await
        .context("run migrations")?;
    Ok(())
}
