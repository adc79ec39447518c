//! Database migration command.
//!
//! # Usage
//!
//! ```bash
//! lux-cli migrate
//! ```
//!
//! # Environment Variables
//!
//! - `LUX_DATABASE_URL` (or `DATABASE_URL`) - `PostgreSQL` connection string
//!
//! # Migration Files
//!
//! Checkout migrations live in `crates/storefront/migrations/`, including the
//! sessions table shared with the account service.

use super::connect;

/// Run checkout database migrations.
///
/// # Errors
///
/// Returns an error if the database is unreachable or a migration fails.
pub async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let pool = connect().await?;

    tracing::info!("Running checkout migrations...");
    sqlx::migrate!("../storefront/migrations").run(&pool).await?;

    tracing::info!("Checkout migrations complete!");
    Ok(())
}
