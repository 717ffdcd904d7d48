// Embedded Diesel migration runner.
// diesel_migrations needs a sync connection, so the harness runs on a
// blocking task against its own short-lived PgConnection.

use diesel::{Connection, PgConnection};
use diesel_migrations::{embed_migrations, EmbeddedMigrations, MigrationHarness};
use std::error::Error;
use tracing::{debug, info};

pub const MIGRATIONS: EmbeddedMigrations = embed_migrations!("migrations");

/// Run all pending migrations; returns how many were applied
pub async fn run_migrations() -> Result<usize, Box<dyn Error + Send + Sync>> {
    let database_url = crate::app_config::config().database.url.clone();

    let applied =
        tokio::task::spawn_blocking(move || -> Result<usize, Box<dyn Error + Send + Sync>> {
            debug!("Establishing sync connection for migrations");
            let mut conn = PgConnection::establish(&database_url)
                .map_err(|e| format!("Failed to establish sync connection: {}", e))?;

            let pending = conn
                .pending_migrations(MIGRATIONS)
                .map_err(|e| format!("Failed to check pending migrations: {}", e))?;

            if pending.is_empty() {
                debug!("No pending migrations");
                return Ok(0);
            }

            let mut applied = 0usize;
            for migration in pending {
                info!("Applying migration: {}", migration.name());
                conn.run_migration(&migration)
                    .map_err(|e| format!("Failed to run migration {}: {}", migration.name(), e))?;
                applied += 1;
            }

            Ok(applied)
        })
        .await
        .map_err(|e| format!("Migration task panicked: {}", e))??;

    if applied > 0 {
        info!("Applied {} migrations", applied);
    }
    Ok(applied)
}
