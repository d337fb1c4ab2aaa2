use std::{env, sync::Arc};

use anyhow::{Context, Result};
use sqlx::{PgPool, postgres::PgPoolOptions};

use crate::{config::RecapSettings, llm::LlmClient};

#[derive(Clone)]
pub struct AppState {
    pool: PgPool,
    settings: Arc<RecapSettings>,
    llm: LlmClient,
}

impl AppState {
    pub async fn new() -> Result<Self> {
        let database_url = env::var("DATABASE_URL").context("DATABASE_URL env var is missing")?;

        let llm_client = LlmClient::from_env().context("failed to initialize completion client")?;

        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(&database_url)
            .await
            .context("failed to connect to Postgres")?;

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .context("failed to run database migrations")?;

        RecapSettings::ensure_defaults(&pool)
            .await
            .context("failed to seed default recap settings")?;
        let settings = RecapSettings::load(&pool)
            .await
            .context("failed to load recap settings")?;

        Ok(Self {
            pool,
            settings: Arc::new(settings),
            llm: llm_client,
        })
    }

    pub fn llm_client(&self) -> LlmClient {
        self.llm.clone()
    }

    pub fn pool(&self) -> PgPool {
        self.pool.clone()
    }

    pub fn pool_ref(&self) -> &PgPool {
        &self.pool
    }

    pub fn recap_settings(&self) -> &RecapSettings {
        &self.settings
    }
}
