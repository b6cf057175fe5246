use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tracing::info;

use granta_core::config::{AppConfig, ConfigError, LoadOptions};
use granta_core::escalation::EscalationEngine;
use granta_core::ports::NotificationDispatcher;
use granta_db::{
    connect_with_settings, migrations, DbPool, SqlDirectory, SqlEscalationStore,
    SqlRequestStore,
};

use crate::dispatch::TracingDispatcher;
use crate::runner::EscalationRunner;

pub struct Application {
    pub config: AppConfig,
    pub db_pool: DbPool,
    pub engine: Arc<EscalationEngine>,
    pub runner: EscalationRunner,
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("database connection failed: {0}")]
    DatabaseConnect(#[source] sqlx::Error),
    #[error("database migration failed: {0}")]
    Migration(#[source] sqlx::migrate::MigrateError),
}

pub async fn bootstrap(options: LoadOptions) -> Result<Application, BootstrapError> {
    let config = AppConfig::load(options)?;
    bootstrap_with_config(config).await
}

pub async fn bootstrap_with_config(config: AppConfig) -> Result<Application, BootstrapError> {
    info!("starting worker bootstrap");

    let db_pool = connect_with_settings(
        &config.database.url,
        config.database.max_connections,
        config.database.timeout_secs,
    )
    .await
    .map_err(BootstrapError::DatabaseConnect)?;
    info!("database connection established");

    migrations::run_pending(&db_pool).await.map_err(BootstrapError::Migration)?;
    info!("database migrations applied");

    let dispatcher: Arc<dyn NotificationDispatcher> = Arc::new(TracingDispatcher);
    let engine = Arc::new(EscalationEngine::new(
        config.escalation.to_engine_config(),
        Arc::new(SqlRequestStore::new(db_pool.clone())),
        Arc::new(SqlDirectory::new(db_pool.clone())),
        Arc::new(SqlEscalationStore::new(db_pool.clone())),
        dispatcher,
    ));

    let runner = EscalationRunner::new(
        engine.clone(),
        Duration::from_secs(config.escalation.sweep_interval_secs),
    );

    Ok(Application { config, db_pool, engine, runner })
}
