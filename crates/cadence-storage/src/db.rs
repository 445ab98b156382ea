//! PostgreSQL pool shared by the `Db*` repositories

use cadence_common::config::{DatabaseBackend, DatabaseConfig};
use cadence_common::{Error, Result};
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::Duration;
use tracing::info;

/// How long a repository call waits for a free connection
const ACQUIRE_TIMEOUT: Duration = Duration::from_secs(30);

/// Cloneable handle on the Postgres pool
#[derive(Clone)]
pub struct DatabasePool {
    pool: PgPool,
}

impl DatabasePool {
    /// Open a pool for the `postgres` backend
    ///
    /// Fails for the memory backend, which keeps its tables in process.
    pub async fn new(config: &DatabaseConfig) -> Result<Self> {
        let url = connection_url(config)?;

        info!(
            max_connections = config.max_connections,
            min_connections = config.min_connections,
            "Opening Postgres pool"
        );

        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(ACQUIRE_TIMEOUT)
            .connect(&url)
            .await
            .map_err(|e| Error::Database(format!("Failed to connect: {}", e)))?;

        info!("Postgres pool ready");

        Ok(Self { pool })
    }

    /// Use a pool opened elsewhere, e.g. by `#[sqlx::test]`
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Apply the embedded schema under `migrations/`
    pub async fn migrate(&self) -> Result<()> {
        info!("Applying schema migrations");

        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| Error::Database(format!("Migration failed: {}", e)))?;

        info!("Schema is up to date");
        Ok(())
    }

    /// Round-trip a trivial query; backs `/health/ready`
    pub async fn health_check(&self) -> Result<()> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| Error::Database(format!("Health check failed: {}", e)))?;
        Ok(())
    }
}

fn connection_url(config: &DatabaseConfig) -> Result<String> {
    match config.backend {
        DatabaseBackend::Postgres => config
            .url
            .clone()
            .ok_or_else(|| Error::Config("database.url is required for postgres".to_string())),
        DatabaseBackend::Memory => Err(Error::Config(
            "the memory backend has no connection pool".to_string(),
        )),
    }
}
