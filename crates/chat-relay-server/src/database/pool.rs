use anyhow::{Context, Result};
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::Duration;
use tracing::info;

use crate::config::StorageConfig;

#[derive(Clone)]
pub struct DbPool {
    pool: PgPool,
}

impl DbPool {
    pub async fn new(config: &StorageConfig) -> Result<Self> {
        let url = config
            .database_url
            .as_deref()
            .context("storage.database_url is not set")?;

        let pool = PgPoolOptions::new()
            .max_connections(config.pool_max_size)
            .acquire_timeout(Duration::from_secs(config.pool_timeout_seconds))
            .connect(url)
            .await
            .context("Failed to connect to PostgreSQL")?;

        info!("PostgreSQL pool ready (max_connections={})", config.pool_max_size);
        Ok(Self { pool })
    }

    pub fn get_pool(&self) -> &PgPool {
        &self.pool
    }
}
