//! Registry seeding for Vigil.
//!
//! Inserts one `microservice_health` row per configured microservice.

use sqlx::PgPool;
use tracing::info;

use super::Result;

/// Seed `microservice_health` with the configured services.
///
/// New rows start `offline` until the first probe. Existing rows keep their
/// status; only the endpoint is refreshed. Safe to run on every start.
pub async fn seed_microservices(pool: &PgPool, services: &[(String, String)]) -> Result<usize> {
    let mut tx = pool.begin().await?;
    let mut inserted = 0usize;

    for (name, endpoint) in services {
        let result = sqlx::query(
            r#"
            INSERT INTO microservice_health (name, status, endpoint, last_check)
            VALUES ($1, 'offline', $2, NOW())
            ON CONFLICT (name) DO UPDATE SET endpoint = EXCLUDED.endpoint
            WHERE microservice_health.endpoint <> EXCLUDED.endpoint
            "#,
        )
        .bind(name)
        .bind(endpoint)
        .execute(&mut *tx)
        .await?;

        inserted += result.rows_affected() as usize;
    }

    tx.commit().await?;

    info!(services = services.len(), changed = inserted, "Microservice registry seeded");
    Ok(inserted)
}
