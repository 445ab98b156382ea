//! Send settings providers
//!
//! Settings are read on every tick so operator changes apply to the next
//! batch without restarting a run.

use async_trait::async_trait;
use cadence_common::{Error, Result, SendSettings};
use sqlx::types::Json;
use tokio::sync::RwLock;

use crate::db::DatabasePool;

/// Settings provider trait
#[async_trait]
pub trait SettingsProvider: Send + Sync {
    async fn load(&self) -> Result<SendSettings>;
    async fn save(&self, settings: SendSettings) -> Result<()>;
}

/// Settings held in process, seeded from the configuration file
pub struct StaticSettings {
    settings: RwLock<SendSettings>,
}

impl StaticSettings {
    pub fn new(settings: SendSettings) -> Self {
        Self {
            settings: RwLock::new(settings),
        }
    }
}

#[async_trait]
impl SettingsProvider for StaticSettings {
    async fn load(&self) -> Result<SendSettings> {
        Ok(self.settings.read().await.clone())
    }

    async fn save(&self, settings: SendSettings) -> Result<()> {
        settings.validate()?;
        *self.settings.write().await = settings;
        Ok(())
    }
}

/// Settings stored as a single JSON row
pub struct DbSettingsRepository {
    pool: DatabasePool,
}

impl DbSettingsRepository {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SettingsProvider for DbSettingsRepository {
    async fn load(&self) -> Result<SendSettings> {
        let row = sqlx::query_scalar::<_, Json<SendSettings>>(
            "SELECT settings FROM send_settings WHERE id = 1",
        )
        .fetch_optional(self.pool.pool())
        .await
        .map_err(|e| Error::Database(e.to_string()))?;

        Ok(row.map(|json| json.0).unwrap_or_default())
    }

    async fn save(&self, settings: SendSettings) -> Result<()> {
        settings.validate()?;
        sqlx::query(
            r#"
            INSERT INTO send_settings (id, settings, updated_at)
            VALUES (1, $1, NOW())
            ON CONFLICT (id) DO UPDATE SET settings = EXCLUDED.settings, updated_at = NOW()
            "#,
        )
        .bind(Json(&settings))
        .execute(self.pool.pool())
        .await
        .map_err(|e| Error::Database(e.to_string()))?;

        Ok(())
    }
}
