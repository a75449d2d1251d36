//! Database CLI subcommands for vigild.
//!
//! Provides `db migrate`, `db status`, and `db seed` commands.

use anyhow::{anyhow, Result};
use std::env;
use tracing::info;

use vigil_db::{migrate, seed_microservices, status};

use vigild::config::{parse_microservices, Config};

/// Run database CLI subcommands.
///
/// Supported commands:
/// - `vigild db migrate` - Run pending migrations
/// - `vigild db status` - Check migration status
/// - `vigild db seed` - Register the microservices from `VIGIL_MICROSERVICES`
pub async fn run_db_command(args: &[String]) -> Result<()> {
    let command = args
        .get(2)
        .ok_or_else(|| anyhow!("Usage: vigild db <migrate|status|seed>"))?;

    let database_url = env::var("DATABASE_URL")
        .map_err(|_| anyhow!("DATABASE_URL environment variable is required for db commands"))?;

    let pool = sqlx::PgPool::connect(&database_url).await?;

    match command.as_str() {
        "migrate" => {
            migrate(&pool).await?;
        },
        "status" => {
            status(&pool).await?;
        },
        "seed" => {
            let services = match env::var("VIGIL_MICROSERVICES") {
                Ok(raw) => parse_microservices(&raw)?,
                Err(_) => Config::default().downstream.microservices,
            };
            let rows: Vec<(String, String)> =
                services.into_iter().map(|s| (s.name, s.endpoint)).collect();

            let inserted = seed_microservices(&pool, &rows).await?;
            info!(inserted, total = rows.len(), "Seeded microservice registry");
        },
        other => {
            return Err(anyhow!("Unknown db command: {}. Use migrate, status, or seed", other));
        },
    }

    Ok(())
}
