use sqlx::SqlitePool;
use sqlx::sqlite::SqlitePoolOptions;
use std::env;
use tracing::info;

pub async fn setup_database() -> anyhow::Result<SqlitePool> {
    let db_url =
        env::var("DATABASE_URL").unwrap_or_else(|_| "sqlite://deposit.db?mode=rwc".to_string());

    info!("database: {}", db_url);

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect(&db_url)
        .await?;

    sqlx::migrate!("./migrations").run(&pool).await?;
    info!("database migrations applied");

    Ok(pool)
}
