//! Ops tool: wipe the trend cache. Every trend recomputes on next read.

use sqlx::postgres::PgPoolOptions;
use std::env;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();

    let database_url = env::var("DATABASE_URL")
        .unwrap_or_else(|_| "postgres://localhost/trendline".to_string());

    println!("Connecting to {}", database_url);

    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&database_url)
        .await?;

    let result = sqlx::query("DELETE FROM trend_cache").execute(&pool).await?;

    println!("Purged {} cached trend(s).", result.rows_affected());
    Ok(())
}
