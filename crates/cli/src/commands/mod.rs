//! CLI command implementations.

pub mod failures;
pub mod migrate;
pub mod seed;
pub mod webhooks;

use secrecy::SecretString;
use sqlx::PgPool;
use tracing::info;

/// Read the checkout database URL, preferring `LUX_DATABASE_URL`.
fn database_url() -> Result<SecretString, &'static str> {
    std::env::var("LUX_DATABASE_URL")
        .or_else(|_| std::env::var("DATABASE_URL"))
        .map(SecretString::from)
        .map_err(|_| "LUX_DATABASE_URL not set")
}

/// Load `.env`, then connect to the checkout database.
async fn connect() -> Result<PgPool, Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();

    let database_url = database_url()?;
    let pool = lux_storefront::db::create_pool(&database_url).await?;
    info!("Connected to database");
    Ok(pool)
}
